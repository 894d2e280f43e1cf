//! DPoP (Demonstration of Proof-of-Possession) implementation (RFC 9449).
//!
//! Validates DPoP proofs presented at the token endpoint and returns the JWK
//! thumbprint (`jkt`) the issued token is bound to.

use crate::errors::DPoPError;
use crate::oauth::es512;
use crate::oauth::types::sha256_base64url;
use crate::storage::traits::ReplayStore;
use base64::prelude::*;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Algorithms a proof may be signed with
pub const DPOP_ALGORITHMS: &[&str] = &[
    "RS256", "RS512", "ES256", "ES384", "ES512", "PS256", "PS384", "PS512",
];

/// DPoP JWT Header
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DPoPHeader {
    /// Token type (must be "dpop+jwt")
    pub typ: String,
    pub alg: String,
    /// Public JSON Web Key of the proving key
    pub jwk: Value,
}

/// DPoP JWT Claims
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DPoPClaims {
    /// Unique JWT identifier
    pub jti: String,
    /// HTTP method
    pub htm: String,
    /// HTTP URI
    pub htu: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Access token hash (SHA-256, base64url-encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
    /// Server-provided nonce
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// A verified DPoP proof
#[derive(Clone, Debug)]
pub struct DPoPProof {
    pub header: DPoPHeader,
    pub claims: DPoPClaims,
    /// Raw JWT token
    pub token: String,
    /// RFC 7638 thumbprint of the proving key
    pub thumbprint: String,
}

/// Timing and replay settings
#[derive(Clone, Debug)]
pub struct DPoPSettings {
    /// Accepted distance between `iat` and now, either direction
    pub iat_tolerance: Duration,
    /// How long a seen `jti` is remembered
    pub jti_lifetime: Duration,
    /// How often expired `jti` entries are swept
    pub sweep_interval: Duration,
}

impl Default for DPoPSettings {
    fn default() -> Self {
        Self {
            iat_tolerance: Duration::from_secs(60),
            jti_lifetime: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// DPoP proof validator backed by a replay store
pub struct DPoPValidator {
    settings: DPoPSettings,
    replay_store: Arc<dyn ReplayStore>,
    sweeper_started: AtomicBool,
    shutdown: CancellationToken,
}

impl DPoPValidator {
    pub fn new(replay_store: Arc<dyn ReplayStore>, settings: DPoPSettings) -> Self {
        Self::new_with_shutdown(replay_store, settings, CancellationToken::new())
    }

    /// Create a validator whose background sweep stops when `shutdown` is cancelled
    pub fn new_with_shutdown(
        replay_store: Arc<dyn ReplayStore>,
        settings: DPoPSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            replay_store,
            sweeper_started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Validate a proof for a request.
    ///
    /// Returns `Ok(None)` when no proof was presented. When `access_token` is given
    /// the proof must carry a matching `ath`.
    pub async fn validate_proof(
        &self,
        proof: &str,
        http_method: &str,
        http_uri: &str,
        access_token: Option<&str>,
    ) -> Result<Option<DPoPProof>, DPoPError> {
        if proof.is_empty() {
            return Ok(None);
        }
        self.ensure_sweeper();

        let now = chrono::Utc::now().timestamp();
        let parts: Vec<&str> = proof.split('.').collect();
        if parts.len() != 3 {
            return Err(DPoPError::InvalidProof("Invalid JWT format".to_string()));
        }

        let header = parse_header(parts[0])?;
        let claims = verify_signature(proof, &header)?;

        if claims.jti.is_empty() || claims.htm.is_empty() || claims.htu.is_empty() {
            return Err(DPoPError::InvalidProof(
                "jti, htm and htu claims are required".to_string(),
            ));
        }
        if !claims.htm.eq_ignore_ascii_case(http_method) {
            return Err(DPoPError::InvalidProof(format!(
                "htm mismatch: expected {}, got {}",
                http_method, claims.htm
            )));
        }
        if strip_query_and_fragment(&claims.htu) != strip_query_and_fragment(http_uri) {
            return Err(DPoPError::InvalidProof(format!(
                "htu mismatch: expected {}, got {}",
                strip_query_and_fragment(http_uri),
                claims.htu
            )));
        }

        if claims.iat == 0 {
            return Err(DPoPError::InvalidProof("iat claim is required".to_string()));
        }
        let tolerance = self.settings.iat_tolerance.as_secs() as i64;
        if (now - claims.iat).abs() > tolerance {
            return Err(DPoPError::StaleProof(format!(
                "iat {} is more than {}s from now",
                claims.iat, tolerance
            )));
        }

        if let Some(token) = access_token {
            match &claims.ath {
                Some(ath) if *ath == compute_access_token_hash(token) => {}
                Some(_) => {
                    return Err(DPoPError::InvalidProof(
                        "Access token hash mismatch".to_string(),
                    ));
                }
                None => {
                    return Err(DPoPError::InvalidProof(
                        "Missing access token hash (ath) claim".to_string(),
                    ));
                }
            }
        }

        let ttl = chrono::Duration::seconds(self.settings.jti_lifetime.as_secs() as i64);
        if !self
            .replay_store
            .mark(&format!("dpop:{}", claims.jti), ttl)
            .await?
        {
            return Err(DPoPError::ReplayAttack("JTI already used".to_string()));
        }

        let thumbprint = compute_jwk_thumbprint(&header.jwk)?;
        tracing::debug!(jkt = %thumbprint, htm = %claims.htm, "DPoP proof accepted");

        Ok(Some(DPoPProof {
            header,
            claims,
            token: proof.to_string(),
            thumbprint,
        }))
    }

    /// Start the periodic jti sweep the first time a proof is validated.
    fn ensure_sweeper(&self) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            self.sweeper_started.store(false, Ordering::SeqCst);
            return;
        }
        let interval = self.settings.sweep_interval;
        if interval.is_zero() {
            return;
        }

        let replay_store = self.replay_store.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match replay_store.sweep().await {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "swept expired DPoP jti entries"),
                            Err(err) => tracing::warn!(error = ?err, "DPoP jti sweep failed"),
                        }
                    }
                }
            }
        });
    }
}

fn parse_header(segment: &str) -> Result<DPoPHeader, DPoPError> {
    let header_json = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| DPoPError::InvalidProof(format!("Failed to decode header: {}", e)))?;
    let header: Value = serde_json::from_slice(&header_json)
        .map_err(|e| DPoPError::InvalidProof(format!("Failed to parse header JSON: {}", e)))?;

    let typ = header.get("typ").and_then(Value::as_str).unwrap_or_default();
    if typ != DPOP_JWT_TYPE {
        return Err(DPoPError::InvalidProof(format!(
            "Invalid JWT typ: expected '{}', got '{}'",
            DPOP_JWT_TYPE, typ
        )));
    }

    let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
    if !DPOP_ALGORITHMS.contains(&alg) {
        return Err(DPoPError::InvalidAlgorithm(alg.to_string()));
    }

    let jwk = header
        .get("jwk")
        .filter(|jwk| jwk.is_object())
        .ok_or_else(|| DPoPError::InvalidProof("Missing jwk in header".to_string()))?;
    let kty = jwk.get("kty").and_then(Value::as_str).unwrap_or_default();
    if kty.is_empty() {
        return Err(DPoPError::InvalidProof("jwk is missing kty".to_string()));
    }
    if jwk.get("d").is_some() || kty == "oct" {
        return Err(DPoPError::InvalidProof(
            "jwk must not contain private key material".to_string(),
        ));
    }

    Ok(DPoPHeader {
        typ: typ.to_string(),
        alg: alg.to_string(),
        jwk: jwk.clone(),
    })
}

fn verify_signature(proof: &str, header: &DPoPHeader) -> Result<DPoPClaims, DPoPError> {
    if header.alg == es512::ES512 {
        let key = es512::verifying_key_from_jwk(&header.jwk)
            .map_err(|e| DPoPError::InvalidProof(format!("Unusable JWK: {}", e)))?;
        return es512::decode(proof, &key)
            .map_err(|e| DPoPError::JwtError(format!("signature verification failed: {}", e)));
    }

    let alg = Algorithm::from_str(&header.alg)
        .map_err(|_| DPoPError::InvalidAlgorithm(header.alg.clone()))?;
    let decoding_key = decoding_key(&header.jwk)?;

    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<DPoPClaims>(proof, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| DPoPError::JwtError(format!("signature verification failed: {}", e)))
}

fn decoding_key(jwk: &Value) -> Result<DecodingKey, DPoPError> {
    let jwk: Jwk = serde_json::from_value(jwk.clone())
        .map_err(|e| DPoPError::InvalidProof(format!("Invalid JWK format: {}", e)))?;
    DecodingKey::from_jwk(&jwk)
        .map_err(|e| DPoPError::InvalidProof(format!("Unusable JWK: {}", e)))
}

fn strip_query_and_fragment(uri: &str) -> &str {
    uri.split(['?', '#']).next().unwrap_or(uri)
}

/// base64url SHA-256 of the access token, the `ath` claim
pub fn compute_access_token_hash(access_token: &str) -> String {
    sha256_base64url(access_token.as_bytes())
}

/// RFC 7638 JWK thumbprint over the required members in lexicographic order
pub fn compute_jwk_thumbprint(jwk: &Value) -> Result<String, DPoPError> {
    let member = |name: &str| -> Result<String, DPoPError> {
        let value = jwk
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| DPoPError::Thumbprint(format!("jwk is missing {}", name)))?;
        serde_json::to_string(value).map_err(|e| DPoPError::Thumbprint(e.to_string()))
    };

    let kty = jwk.get("kty").and_then(Value::as_str).unwrap_or_default();
    let canonical = match kty {
        "RSA" => format!(
            r#"{{"e":{},"kty":"RSA","n":{}}}"#,
            member("e")?,
            member("n")?
        ),
        "EC" => format!(
            r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
            member("crv")?,
            member("x")?,
            member("y")?
        ),
        "OKP" => format!(
            r#"{{"crv":{},"kty":"OKP","x":{}}}"#,
            member("crv")?,
            member("x")?
        ),
        other => {
            return Err(DPoPError::Thumbprint(format!(
                "unsupported key type: {}",
                other
            )));
        }
    };

    Ok(sha256_base64url(canonical.as_bytes()))
}
