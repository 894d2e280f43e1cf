//! Standardized error types following the `error-tokenwright-<domain>-<number>` format.

use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-tokenwright-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-tokenwright-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-tokenwright-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-tokenwright-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when the storage backend name is not recognized
    #[error("error-tokenwright-config-5 Unknown storage backend '{0}'")]
    UnknownStorageBackend(String),

    /// Error when the seed file cannot be loaded
    #[error("error-tokenwright-config-6 Failed to load seed file '{0}': {1}")]
    SeedLoadFailed(String, String),

    /// Error when a header name is not a valid HTTP header
    #[error("error-tokenwright-config-7 Invalid header name '{0}'")]
    InvalidHeaderName(String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error when the forwarded client certificate header is malformed
    #[error("error-tokenwright-http-1 Invalid client certificate header: {0}")]
    InvalidClientCertificateHeader(String),
}

/// Key material errors raised while loading signing or verification keys
#[derive(Debug, Error)]
pub enum KeyError {
    /// Certificate PEM could not be parsed
    #[error("error-tokenwright-key-1 Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Private key PEM could not be parsed
    #[error("error-tokenwright-key-2 Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Public key algorithm is not RSA or EC
    #[error("error-tokenwright-key-3 Unsupported public key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),

    /// Signing algorithm is not supported
    #[error("error-tokenwright-key-4 Unsupported signing algorithm: {0}")]
    UnsupportedSigningAlgorithm(String),

    /// No certificate is configured or it could not be found
    #[error("error-tokenwright-key-5 Certificate not found: {0}")]
    CertificateNotFound(String),

    /// Public key (JWK or certificate point) could not be loaded
    #[error("error-tokenwright-key-6 Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// JWS could not be produced
    #[error("error-tokenwright-key-7 Signing failed: {0}")]
    SigningFailed(String),

    /// JWS is malformed or its signature does not verify
    #[error("error-tokenwright-key-8 Invalid JWS: {0}")]
    InvalidJws(String),
}

/// Errors raised while building or parsing issued tokens
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// Application token format is not recognized
    #[error("error-tokenwright-claims-1 Unknown application token format: {0}")]
    UnknownTokenFormat(String),

    /// Key material error
    #[error("error-tokenwright-claims-2 {0}")]
    Key(#[from] KeyError),

    /// JWT signing failed
    #[error("error-tokenwright-claims-3 JWT signing failed: {0}")]
    SigningFailed(String),

    /// JWT verification or decoding failed
    #[error("error-tokenwright-claims-4 JWT parsing failed: {0}")]
    ParsingFailed(String),

    /// Claims could not be serialized
    #[error("error-tokenwright-claims-5 Claims serialization failed: {0}")]
    SerializationFailed(String),
}

/// Client authentication errors
#[derive(Debug, Error)]
pub enum ClientAuthError {
    /// Client secret does not match
    #[error("error-tokenwright-client-1 client_secret is invalid for application: [{0}]")]
    InvalidSecret(String),

    /// Client assertion type is not the JWT bearer type
    #[error(
        "error-tokenwright-client-2 invalid client_assertion_type, expected 'urn:ietf:params:oauth:client-assertion-type:jwt-bearer', got: [{0}]"
    )]
    InvalidAssertionType(String),

    /// Client assertion is missing
    #[error(
        "error-tokenwright-client-3 client_assertion is required for private_key_jwt authentication"
    )]
    MissingAssertion,

    /// Client assertion is malformed or fails validation
    #[error("error-tokenwright-client-4 Invalid client assertion: {0}")]
    InvalidAssertion(String),

    /// Client assertion jti was already presented
    #[error("error-tokenwright-client-5 Client assertion replay detected: {0}")]
    AssertionReplay(String),

    /// Token endpoint auth method is not supported
    #[error("error-tokenwright-client-6 unsupported token_endpoint_auth_method: [{0}]")]
    UnsupportedMethod(String),

    /// mTLS validation failed
    #[error("error-tokenwright-client-7 {0}")]
    Mtls(#[from] MtlsError),

    /// Key material could not be loaded
    #[error("error-tokenwright-client-8 {0}")]
    Key(#[from] KeyError),

    /// Backing store failed
    #[error("error-tokenwright-client-9 {0}")]
    Storage(#[from] StorageError),
}

/// mTLS client certificate errors
#[derive(Debug, Error)]
pub enum MtlsError {
    /// No client certificate was presented
    #[error("error-tokenwright-mtls-1 client certificate is required for mTLS authentication")]
    CertificateRequired,

    /// Client certificate could not be parsed
    #[error("error-tokenwright-mtls-2 Invalid client certificate: {0}")]
    InvalidCertificate(String),

    /// Client certificate validity window has not started
    #[error("error-tokenwright-mtls-3 client certificate is not yet valid")]
    NotYetValid,

    /// Client certificate has expired
    #[error("error-tokenwright-mtls-4 client certificate has expired")]
    Expired,

    /// Client certificate issuer is not in the allow-list
    #[error("error-tokenwright-mtls-5 client certificate issuer not allowed: {0}")]
    IssuerNotAllowed(String),

    /// mTLS is not enabled for the application
    #[error("error-tokenwright-mtls-6 mTLS is not enabled for this application")]
    NotEnabled,

    /// The application is configured for a different mTLS method
    #[error("error-tokenwright-mtls-7 mTLS method {0} is not configured for this application")]
    MethodNotConfigured(String),
}

/// DPoP-related errors
#[derive(Debug, Error)]
pub enum DPoPError {
    /// Invalid DPoP proof
    #[error("error-tokenwright-dpop-1 Invalid DPoP proof: {0}")]
    InvalidProof(String),

    /// DPoP replay attack detected
    #[error("error-tokenwright-dpop-2 DPoP replay attack detected: {0}")]
    ReplayAttack(String),

    /// DPoP proof issued outside the accepted time window
    #[error("error-tokenwright-dpop-3 DPoP proof iat outside acceptable time window: {0}")]
    StaleProof(String),

    /// Invalid DPoP algorithm
    #[error("error-tokenwright-dpop-4 Invalid DPoP algorithm: {0}")]
    InvalidAlgorithm(String),

    /// JWT processing error
    #[error("error-tokenwright-dpop-5 JWT processing error: {0}")]
    JwtError(String),

    /// JWT thumbprint error
    #[error("error-tokenwright-dpop-6 JWT thumbprint error: {0}")]
    Thumbprint(String),

    /// Replay store failure
    #[error("error-tokenwright-dpop-7 Replay store failure: {0}")]
    Storage(#[from] StorageError),
}

/// Consent record management errors
#[derive(Debug, Error)]
pub enum ConsentError {
    /// Consent record does not exist
    #[error("error-tokenwright-consent-1 The consent does not exist: {0}")]
    NotFound(String),

    /// Consent record belongs to another user
    #[error("error-tokenwright-consent-2 Unauthorized operation on consent: {0}")]
    Unauthorized(String),

    /// Backing store failed
    #[error("error-tokenwright-consent-3 {0}")]
    Storage(#[from] StorageError),
}

/// WeChat mini-program session errors
#[derive(Debug, Error)]
pub enum WechatError {
    /// No credentials are configured for the named provider
    #[error("error-tokenwright-wechat-1 Unknown WeChat provider: {0}")]
    UnknownProvider(String),

    /// The session request could not be sent or its body could not be read
    #[error("error-tokenwright-wechat-2 Session request failed: {0}")]
    RequestFailed(String),

    /// WeChat rejected the login code
    #[error("error-tokenwright-wechat-3 WeChat returned error {0}: {1}")]
    Rejected(i64, String),
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-tokenwright-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-tokenwright-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when data serialization fails
    #[error("error-tokenwright-storage-3 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when data validation fails
    #[error("error-tokenwright-storage-4 Invalid data: {0}")]
    InvalidData(String),

    /// Error when requested resource is not found
    #[error("error-tokenwright-storage-5 Not found: {0}")]
    NotFound(String),
}
