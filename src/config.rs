//! Environment-based configuration types for the tokenwright server.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::oauth::wechat::{DEFAULT_WECHAT_API_BASE, WechatProviderCredentials};
use crate::storage::MemorySeed;

/// HTTP server port configuration
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// Certificate bundles for outbound HTTPS connections
#[derive(Clone, Debug, Default)]
pub struct CertificateBundles(Vec<String>);

/// A `duration-str` value such as `10s`, `5m` or `7d`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigDuration(Duration);

/// Header the TLS terminator forwards the client certificate in
#[derive(Clone, Debug)]
pub struct ClientCertHeader(http::HeaderName);

/// Main application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    /// Public origin; when unset it is derived from each request's host
    pub external_base: Option<String>,
    pub certificate_bundles: CertificateBundles,
    pub user_agent: String,
    pub http_client_timeout: ConfigDuration,
    pub storage_backend: String,
    pub redis_url: Option<String>,
    pub seed_path: Option<String>,
    pub token_cleanup_interval: ConfigDuration,
    pub token_retention: ConfigDuration,
    pub dpop_sweep_interval: ConfigDuration,
    pub dpop_jti_lifetime: ConfigDuration,
    pub dpop_iat_tolerance: ConfigDuration,
    pub device_code_expiration: ConfigDuration,
    pub mtls_client_cert_header: ClientCertHeader,
    pub wechat_api_base: String,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let certificate_bundles: CertificateBundles =
            optional_env("CERTIFICATE_BUNDLES").try_into()?;
        let default_user_agent = format!("tokenwright/{}", version()?);
        let external_base = optional_env("EXTERNAL_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());
        let http_client_timeout: ConfigDuration =
            default_env("HTTP_CLIENT_TIMEOUT", "10s").try_into()?;
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let storage_backend = default_env("STORAGE_BACKEND", "memory");
        if !matches!(storage_backend.as_str(), "memory" | "redis") {
            return Err(ConfigError::UnknownStorageBackend(storage_backend).into());
        }
        let redis_url = if storage_backend == "redis" {
            Some(require_env("REDIS_URL")?)
        } else {
            optional_env("REDIS_URL")
        };
        let seed_path = optional_env("SEED_PATH");
        let user_agent = default_env("USER_AGENT", &default_user_agent);
        let token_cleanup_interval: ConfigDuration =
            default_env("TOKEN_CLEANUP_INTERVAL", "1h").try_into()?;
        let token_retention: ConfigDuration = default_env("TOKEN_RETENTION", "7d").try_into()?;
        let dpop_sweep_interval: ConfigDuration =
            default_env("DPOP_SWEEP_INTERVAL", "5m").try_into()?;
        let dpop_jti_lifetime: ConfigDuration =
            default_env("DPOP_JTI_LIFETIME", "1h").try_into()?;
        let dpop_iat_tolerance: ConfigDuration =
            default_env("DPOP_IAT_TOLERANCE", "60s").try_into()?;
        let device_code_expiration: ConfigDuration =
            default_env("DEVICE_CODE_EXPIRATION", "120s").try_into()?;
        let mtls_client_cert_header: ClientCertHeader =
            default_env("MTLS_CLIENT_CERT_HEADER", "x-client-cert").try_into()?;
        let wechat_api_base = default_env("WECHAT_API_BASE", DEFAULT_WECHAT_API_BASE);

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            certificate_bundles,
            user_agent,
            http_client_timeout,
            storage_backend,
            redis_url,
            seed_path,
            token_cleanup_interval,
            token_retention,
            dpop_sweep_interval,
            dpop_jti_lifetime,
            dpop_iat_tolerance,
            device_code_expiration,
            mtls_client_cert_header,
            wechat_api_base,
        })
    }
}

impl Default for Config {
    /// The values `Config::new` falls back to when nothing is set
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            http_port: HttpPort(8080),
            external_base: None,
            certificate_bundles: CertificateBundles::default(),
            user_agent: format!("tokenwright/{}", env!("CARGO_PKG_VERSION")),
            http_client_timeout: ConfigDuration(Duration::from_secs(10)),
            storage_backend: "memory".to_string(),
            redis_url: None,
            seed_path: None,
            token_cleanup_interval: ConfigDuration(Duration::from_secs(60 * 60)),
            token_retention: ConfigDuration(Duration::from_secs(7 * 24 * 60 * 60)),
            dpop_sweep_interval: ConfigDuration(Duration::from_secs(5 * 60)),
            dpop_jti_lifetime: ConfigDuration(Duration::from_secs(60 * 60)),
            dpop_iat_tolerance: ConfigDuration(Duration::from_secs(60)),
            device_code_expiration: ConfigDuration(Duration::from_secs(120)),
            mtls_client_cert_header: ClientCertHeader(http::HeaderName::from_static(
                "x-client-cert",
            )),
            wechat_api_base: DEFAULT_WECHAT_API_BASE.to_string(),
        }
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

/// Contents of the `SEED_PATH` document
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedDocument {
    #[serde(flatten)]
    pub storage: MemorySeed,
    pub wechat_providers: Vec<WechatProviderCredentials>,
}

/// Read and parse a seed document
pub fn load_seed(path: &str) -> Result<SeedDocument> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::SeedLoadFailed(path.to_string(), e.to_string()))?;
    let seed = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::SeedLoadFailed(path.to_string(), e.to_string()))?;
    Ok(seed)
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<Option<String>> for CertificateBundles {
    type Error = anyhow::Error;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        let value = value.unwrap_or_default();
        Ok(Self(
            value
                .split(';')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }
}

impl AsRef<Vec<String>> for CertificateBundles {
    fn as_ref(&self) -> &Vec<String> {
        &self.0
    }
}

impl TryFrom<String> for ConfigDuration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(duration))
    }
}

impl AsRef<Duration> for ConfigDuration {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl ConfigDuration {
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }
}

impl TryFrom<String> for ClientCertHeader {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let name = http::HeaderName::from_bytes(value.trim().to_ascii_lowercase().as_bytes())
            .map_err(|_| ConfigError::InvalidHeaderName(value))?;
        Ok(Self(name))
    }
}

impl AsRef<http::HeaderName> for ClientCertHeader {
    fn as_ref(&self) -> &http::HeaderName {
        &self.0
    }
}
