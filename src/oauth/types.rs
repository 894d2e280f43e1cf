//! OAuth 2.0 / OIDC core types and data structures.
//!
//! Defines the application, token, user and consent records the authorization
//! server works with, together with the request and response shapes of the
//! token endpoint.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Seconds in one hour, used to turn `expire_in_hours` into `expires_in`.
pub const HOUR_SECONDS: f64 = 3600.0;

/// Lifetime of an authorization code, in seconds.
pub const AUTHORIZATION_CODE_LIFETIME: i64 = 5 * 60;

/// OAuth 2.0 grant types understood by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    /// Implicit flow (`token`)
    Token,
    /// Implicit flow (`id_token`)
    IdToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Password => "password",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Token => "token",
            GrantType::IdToken => "id_token",
            GrantType::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl std::str::FromStr for GrantType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "password" => Ok(GrantType::Password),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "token" => Ok(GrantType::Token),
            "id_token" => Ok(GrantType::IdToken),
            "urn:ietf:params:oauth:grant-type:device_code" => Ok(GrantType::DeviceCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(other.to_string()),
        }
    }
}

/// Token formats an application can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    /// Full user snapshot
    Jwt,
    /// Short user
    JwtEmpty,
    /// Selected fields and claim attributes
    JwtCustom,
    /// OIDC standard claims
    JwtStandard,
}

impl std::str::FromStr for TokenFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "JWT" => Ok(TokenFormat::Jwt),
            "JWT-Empty" => Ok(TokenFormat::JwtEmpty),
            "JWT-Custom" => Ok(TokenFormat::JwtCustom),
            "JWT-Standard" => Ok(TokenFormat::JwtStandard),
            other => Err(other.to_string()),
        }
    }
}

/// A registered OAuth client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub owner: String,
    pub name: String,
    pub organization: String,
    pub client_id: String,
    pub client_secret: String,
    /// Name of the signing certificate
    pub cert: String,
    /// Grant types this client may use at the token endpoint
    pub grant_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub expire_in_hours: f64,
    pub refresh_expire_in_hours: f64,
    pub enable_mtls: bool,
    pub mtls_auth_method: String,
    /// Substrings one of which the client certificate issuer DN must contain
    pub allowed_client_cert_issuers: Vec<String>,
    pub token_format: String,
    pub token_signing_method: String,
    pub token_fields: Vec<String>,
    pub token_attributes: Vec<JwtItem>,
    pub redirect_uris: Vec<String>,
    pub consent_policy: String,
    pub is_shared: bool,
    pub enable_sign_up: bool,
    /// Name of the WeChat mini-program provider, when one is configured
    pub wechat_mini_program_provider: Option<String>,
}

impl Application {
    /// Returns the `owner/name` identifier of the application.
    pub fn get_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// `authorization_code` is always allowed; everything else must be listed.
    pub fn is_grant_type_valid(&self, grant_type: &str) -> bool {
        grant_type == GrantType::AuthorizationCode.as_str()
            || self.grant_types.iter().any(|g| g == grant_type)
    }

    pub fn is_redirect_uri_valid(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Access token lifetime in seconds.
    pub fn expires_in(&self) -> i64 {
        (self.expire_in_hours * HOUR_SECONDS) as i64
    }
}

/// Custom claim attribute mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtItem {
    pub name: String,
    pub value: String,
    /// `String` collapses the value to its first element, anything else emits an array
    #[serde(rename = "type")]
    pub item_type: String,
    /// `Existing Field` or `Static Value`
    pub category: String,
}

/// An issued authorization-code / access / refresh bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub owner: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
    pub application: String,
    pub organization: String,
    pub user: String,
    pub code: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds; zero once the token is revoked
    pub expires_in: i64,
    pub scope: String,
    pub token_type: String,
    pub code_challenge: String,
    pub code_is_used: bool,
    /// Unix seconds after which the code can no longer be redeemed
    pub code_expire_in: i64,
    /// base64url SHA-256 of the client certificate the token is bound to
    pub cert_fingerprint: Option<String>,
    /// JWK thumbprint of the DPoP key the token is bound to
    pub dpop_jkt: Option<String>,
}

impl Token {
    pub fn get_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Asymmetric key material used to sign issued tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cert {
    pub owner: String,
    pub name: String,
    pub crypto_algorithm: String,
    /// PEM encoded X.509 certificate
    pub certificate: String,
    /// PEM encoded private key
    pub private_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Role {
    pub owner: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Permission {
    pub owner: String,
    pub name: String,
    pub display_name: String,
}

/// A user record as returned by the user directory.
///
/// The serialized form is also the user snapshot embedded in `JWT` format tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub owner: String,
    pub name: String,
    pub created_time: String,
    pub updated_time: String,
    pub id: String,
    #[serde(rename = "type")]
    pub user_type: String,
    pub password: String,
    pub password_type: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
    pub email: String,
    #[serde(rename = "email_verified")]
    pub email_verified: bool,
    pub phone: String,
    pub country_code: String,
    pub region: String,
    pub location: String,
    pub address: Vec<String>,
    pub affiliation: String,
    pub title: String,
    pub homepage: String,
    pub bio: String,
    pub tag: String,
    pub language: String,
    pub gender: String,
    pub birthday: String,
    pub is_admin: bool,
    pub is_forbidden: bool,
    pub is_deleted: bool,
    pub signup_application: String,
    /// Identifier of the LDAP server the user is bound to
    pub ldap: String,
    /// WeChat openid or unionid
    pub wechat: String,
    pub properties: HashMap<String, String>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    pub groups: Vec<String>,
}

impl User {
    /// Returns the `owner/name` identifier of the user.
    pub fn get_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    pub fn permission_names(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.name.clone()).collect()
    }
}

/// A user's recorded consent to an application's scopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub owner: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
    pub user: String,
    pub application: String,
    pub granted_scopes: Vec<String>,
    pub consent_time: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
}

/// Pending device authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthCache {
    pub user_sign_in: bool,
    pub user_name: String,
    pub application_id: String,
    pub scope: String,
    pub request_at: DateTime<Utc>,
}

/// Device authorization response (RFC 8628 section 3.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// Result of authorization code issuance. `code` is empty when `message` explains a refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Code {
    pub message: String,
    pub code: String,
}

/// Successful token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenWrapper {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

/// Canonical OAuth error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    EndpointError,
    AuthorizationPending,
    ExpiredToken,
}

impl TokenErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenErrorCode::InvalidRequest => "invalid_request",
            TokenErrorCode::InvalidClient => "invalid_client",
            TokenErrorCode::InvalidGrant => "invalid_grant",
            TokenErrorCode::UnauthorizedClient => "unauthorized_client",
            TokenErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            TokenErrorCode::InvalidScope => "invalid_scope",
            TokenErrorCode::EndpointError => "endpoint_error",
            TokenErrorCode::AuthorizationPending => "authorization_pending",
            TokenErrorCode::ExpiredToken => "expired_token",
        }
    }
}

/// Protocol-level token endpoint failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenError {
    pub error: TokenErrorCode,
    pub error_description: String,
}

impl TokenError {
    pub fn new(error: TokenErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(TokenErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(TokenErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(TokenErrorCode::InvalidGrant, description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new(TokenErrorCode::UnsupportedGrantType, description)
    }

    pub fn endpoint_error(description: impl Into<String>) -> Self {
        Self::new(TokenErrorCode::EndpointError, description)
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error.as_str(), self.error_description)
    }
}

impl std::error::Error for TokenError {}

/// Token endpoint request parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub code: String,
    pub code_verifier: String,
    pub scope: String,
    pub nonce: String,
    pub username: String,
    pub password: String,
    pub refresh_token: String,
    pub tag: String,
    pub avatar: String,
    pub device_code: String,
    /// RFC 8707 resource indicator
    pub resource: String,
    pub client_assertion: String,
    pub client_assertion_type: String,
}

/// Transport facts about the token request that do not come from the form body
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Host the request was addressed to, used to derive the issuer
    pub host: String,
    /// PEM encoded client certificate forwarded by the TLS terminator
    pub client_certificate: Option<String>,
    /// Value of the `DPoP` header
    pub dpop_proof: Option<String>,
    pub http_method: String,
    /// Absolute URI of the request, compared against the proof's `htu`
    pub http_uri: String,
}

/// Confirmation claim (RFC 7800) in introspection responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(rename = "x5t#S256", skip_serializing_if = "Option::is_none")]
    pub x5t_s256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
}

/// RFC 7662 introspection response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Generate a secure random token
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random record identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// base64url(SHA-256(input)) without padding.
pub fn sha256_base64url(input: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(input))
}
