//! Token endpoint client authentication.
//!
//! One [`ClientAuthenticator`] per `token_endpoint_auth_method`, selected from the
//! [`ClientAuthRegistry`] lookup table.

use crate::errors::{ClientAuthError, MtlsError};
use crate::oauth::client_assertion::{
    JWT_BEARER_ASSERTION_TYPE, read_assertion_identity, verify_client_assertion,
};
use crate::oauth::keys::public_key_from_certificate;
use crate::oauth::mtls::{
    SELF_SIGNED_TLS_CLIENT_AUTH, TLS_CLIENT_AUTH, certificate_fingerprint, is_mtls_enabled,
    supports_mtls_auth_method, validate_mtls_request,
};
use crate::oauth::types::{Application, TokenError};
use crate::storage::traits::{OAuthStorage, ReplayStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub const CLIENT_SECRET_BASIC: &str = "client_secret_basic";
pub const CLIENT_SECRET_POST: &str = "client_secret_post";
pub const PRIVATE_KEY_JWT: &str = "private_key_jwt";
pub const NONE: &str = "none";

/// Credentials presented at the token endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAuthContext<'a> {
    pub client_secret: &'a str,
    pub client_assertion: &'a str,
    pub client_assertion_type: &'a str,
    /// Forwarded client certificate PEM
    pub client_certificate: Option<&'a str>,
    /// Absolute token endpoint URL, the expected assertion audience
    pub token_endpoint: &'a str,
}

/// Successful client authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthOutcome {
    pub method: &'static str,
    /// Fingerprint of the client certificate, set by the mTLS methods
    pub cert_fingerprint: Option<String>,
}

impl ClientAuthOutcome {
    fn new(method: &'static str) -> Self {
        Self {
            method,
            cert_fingerprint: None,
        }
    }

    /// Whether the client proved its identity; grant branches skip their own secret
    /// checks after this.
    pub fn is_verified(&self) -> bool {
        self.method != NONE
    }
}

pub fn is_secret_method(method: &str) -> bool {
    matches!(method, CLIENT_SECRET_BASIC | CLIENT_SECRET_POST)
}

#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    async fn authenticate(
        &self,
        application: &Application,
        ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, ClientAuthError>;
}

/// Public clients
pub struct NoneAuthenticator;

#[async_trait]
impl ClientAuthenticator for NoneAuthenticator {
    async fn authenticate(
        &self,
        _application: &Application,
        _ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, ClientAuthError> {
        Ok(ClientAuthOutcome::new(NONE))
    }
}

/// `client_secret_basic` and `client_secret_post`
pub struct ClientSecretAuthenticator {
    method: &'static str,
}

#[async_trait]
impl ClientAuthenticator for ClientSecretAuthenticator {
    async fn authenticate(
        &self,
        application: &Application,
        ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, ClientAuthError> {
        if application.client_secret != ctx.client_secret {
            return Err(ClientAuthError::InvalidSecret(application.get_id()));
        }
        Ok(ClientAuthOutcome::new(self.method))
    }
}

/// `private_key_jwt`, verified against the client's certificate
pub struct PrivateKeyJwtAuthenticator {
    storage: Arc<dyn OAuthStorage>,
    replay_store: Arc<dyn ReplayStore>,
}

#[async_trait]
impl ClientAuthenticator for PrivateKeyJwtAuthenticator {
    async fn authenticate(
        &self,
        application: &Application,
        ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, ClientAuthError> {
        if ctx.client_assertion_type != JWT_BEARER_ASSERTION_TYPE {
            return Err(ClientAuthError::InvalidAssertionType(
                ctx.client_assertion_type.to_string(),
            ));
        }
        if ctx.client_assertion.is_empty() {
            return Err(ClientAuthError::MissingAssertion);
        }

        let identity = read_assertion_identity(ctx.client_assertion)?;
        let client = self
            .storage
            .get_application_by_client_id(&identity.sub)
            .await?
            .ok_or_else(|| {
                ClientAuthError::InvalidAssertion(format!("unknown client: [{}]", identity.sub))
            })?;
        if client.get_id() != application.get_id() {
            return Err(ClientAuthError::InvalidAssertion(format!(
                "assertion subject [{}] does not match client_id [{}]",
                identity.sub, application.client_id
            )));
        }

        let cert = self
            .storage
            .get_cert_by_application(&client)
            .await?
            .filter(|cert| !cert.certificate.is_empty())
            .ok_or_else(|| {
                ClientAuthError::InvalidAssertion(
                    "no certificate configured for application, required for private_key_jwt authentication"
                        .to_string(),
                )
            })?;
        let public_key = public_key_from_certificate(&cert.certificate)?;

        let now = Utc::now().timestamp();
        let claims =
            verify_client_assertion(ctx.client_assertion, &public_key, ctx.token_endpoint, now)?;

        // exp is guaranteed by verification; remember the jti until then
        let ttl = Duration::seconds(claims.exp.unwrap_or(now) - now);
        let key = format!("client_assertion:{}:{}", client.client_id, claims.jti);
        if !self.replay_store.mark(&key, ttl).await? {
            return Err(ClientAuthError::AssertionReplay(claims.jti));
        }

        Ok(ClientAuthOutcome::new(PRIVATE_KEY_JWT))
    }
}

/// `tls_client_auth` and `self_signed_tls_client_auth`
pub struct MtlsAuthenticator {
    method: &'static str,
}

#[async_trait]
impl ClientAuthenticator for MtlsAuthenticator {
    async fn authenticate(
        &self,
        application: &Application,
        ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, ClientAuthError> {
        // The issuer allow-list only applies under tls_client_auth
        if is_mtls_enabled(application) && !supports_mtls_auth_method(application, self.method) {
            return Err(MtlsError::MethodNotConfigured(self.method.to_string()).into());
        }
        let cert = validate_mtls_request(ctx.client_certificate, application)?;
        Ok(ClientAuthOutcome {
            method: self.method,
            cert_fingerprint: Some(certificate_fingerprint(&cert)),
        })
    }
}

/// Lookup table from auth method name to authenticator
pub struct ClientAuthRegistry {
    methods: HashMap<&'static str, Arc<dyn ClientAuthenticator>>,
}

impl ClientAuthRegistry {
    pub fn new(storage: Arc<dyn OAuthStorage>, replay_store: Arc<dyn ReplayStore>) -> Self {
        let mut methods: HashMap<&'static str, Arc<dyn ClientAuthenticator>> = HashMap::new();
        methods.insert(NONE, Arc::new(NoneAuthenticator));
        methods.insert(
            CLIENT_SECRET_BASIC,
            Arc::new(ClientSecretAuthenticator {
                method: CLIENT_SECRET_BASIC,
            }),
        );
        methods.insert(
            CLIENT_SECRET_POST,
            Arc::new(ClientSecretAuthenticator {
                method: CLIENT_SECRET_POST,
            }),
        );
        methods.insert(
            PRIVATE_KEY_JWT,
            Arc::new(PrivateKeyJwtAuthenticator {
                storage,
                replay_store,
            }),
        );
        methods.insert(
            TLS_CLIENT_AUTH,
            Arc::new(MtlsAuthenticator {
                method: TLS_CLIENT_AUTH,
            }),
        );
        methods.insert(
            SELF_SIGNED_TLS_CLIENT_AUTH,
            Arc::new(MtlsAuthenticator {
                method: SELF_SIGNED_TLS_CLIENT_AUTH,
            }),
        );
        Self { methods }
    }

    /// The configured method, or one inferred from the presented credentials
    pub fn effective_method<'a>(application: &'a Application, ctx: &ClientAuthContext<'_>) -> &'a str {
        if !application.token_endpoint_auth_method.is_empty() {
            &application.token_endpoint_auth_method
        } else if !ctx.client_secret.is_empty() {
            CLIENT_SECRET_POST
        } else if !ctx.client_assertion.is_empty() {
            PRIVATE_KEY_JWT
        } else {
            NONE
        }
    }

    pub async fn authenticate(
        &self,
        application: &Application,
        ctx: &ClientAuthContext<'_>,
    ) -> Result<ClientAuthOutcome, TokenError> {
        let method = Self::effective_method(application, ctx);
        let authenticator = self
            .methods
            .get(method)
            .ok_or_else(|| ClientAuthError::UnsupportedMethod(method.to_string()))?;

        let outcome = authenticator.authenticate(application, ctx).await;
        match &outcome {
            Ok(outcome) => tracing::debug!(
                client_id = %application.client_id,
                method = outcome.method,
                "client authenticated"
            ),
            Err(error) => tracing::warn!(
                client_id = %application.client_id,
                method,
                error = %error,
                "client authentication failed"
            ),
        }
        Ok(outcome?)
    }
}

impl From<ClientAuthError> for TokenError {
    fn from(error: ClientAuthError) -> Self {
        match error {
            ClientAuthError::InvalidSecret(app) => {
                TokenError::invalid_client(format!("client_secret is invalid for application: [{}]", app))
            }
            ClientAuthError::InvalidAssertionType(got) => TokenError::invalid_client(format!(
                "invalid client_assertion_type, expected '{}', got: [{}]",
                JWT_BEARER_ASSERTION_TYPE, got
            )),
            ClientAuthError::MissingAssertion => TokenError::invalid_client(
                "client_assertion is required for private_key_jwt authentication",
            ),
            ClientAuthError::InvalidAssertion(message) => {
                TokenError::invalid_client(format!("invalid client assertion: {}", message))
            }
            ClientAuthError::AssertionReplay(jti) => TokenError::invalid_client(format!(
                "client assertion has already been used: [{}]",
                jti
            )),
            ClientAuthError::UnsupportedMethod(method) => TokenError::invalid_client(format!(
                "unsupported token_endpoint_auth_method: [{}]",
                method
            )),
            ClientAuthError::Mtls(error) => TokenError::invalid_client(mtls_description(&error)),
            ClientAuthError::Key(error) => TokenError::invalid_client(format!(
                "failed to load client certificate: {}",
                error
            )),
            ClientAuthError::Storage(error) => {
                tracing::error!(error = ?error, "storage failure during client authentication");
                TokenError::endpoint_error("client authentication is temporarily unavailable")
            }
        }
    }
}

fn mtls_description(error: &MtlsError) -> String {
    match error {
        MtlsError::CertificateRequired => {
            "client certificate is required for mTLS authentication".to_string()
        }
        MtlsError::InvalidCertificate(message) => format!("invalid client certificate: {}", message),
        MtlsError::NotYetValid => "client certificate is not yet valid".to_string(),
        MtlsError::Expired => "client certificate has expired".to_string(),
        MtlsError::IssuerNotAllowed(issuer) => {
            format!("client certificate issuer not allowed: {}", issuer)
        }
        MtlsError::NotEnabled => "mTLS is not enabled for this application".to_string(),
        MtlsError::MethodNotConfigured(method) => {
            format!("mTLS method {} is not configured for this application", method)
        }
    }
}
