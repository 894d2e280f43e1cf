//! Storage trait definitions for the authorization server.
//!
//! Defines the narrow async interfaces through which the grant dispatcher
//! reaches applications, certificates, users, tokens, consent records,
//! device authorizations and the replay-protection cache.

use crate::errors::StorageError;
use crate::oauth::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for resolving registered OAuth clients
#[async_trait]
pub trait ApplicationStore {
    /// Store or replace an application
    async fn store_application(&self, application: &Application) -> Result<()>;

    /// Retrieve an application by its client_id
    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>>;

    /// Retrieve an application by `owner/name`
    async fn get_application(&self, id: &str) -> Result<Option<Application>>;
}

/// Trait for resolving signing certificates
#[async_trait]
pub trait CertStore {
    /// Store or replace a certificate
    async fn store_cert(&self, cert: &Cert) -> Result<()>;

    /// Retrieve the certificate an application signs with
    async fn get_cert_by_application(&self, application: &Application) -> Result<Option<Cert>>;
}

/// Trait for the external user directory
#[async_trait]
pub trait UserDirectory {
    /// Find a user in an organization by name, email or phone
    async fn get_user_by_fields(&self, organization: &str, field: &str) -> Result<Option<User>>;

    /// Retrieve a user by `owner/name`
    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Find a user in an organization by WeChat openid or unionid
    async fn get_user_by_wechat_id(&self, organization: &str, wechat_id: &str)
    -> Result<Option<User>>;

    /// Verify a password against the user's stored hash
    async fn check_password(&self, user: &User, password: &str) -> Result<bool>;

    /// Verify a password by binding to the user's LDAP server
    async fn check_ldap_password(&self, user: &User, password: &str) -> Result<bool>;

    /// Populate the user's roles and permissions
    async fn extend_user_with_roles_and_permissions(&self, user: &mut User) -> Result<()>;

    /// Create a new user
    async fn add_user(&self, user: &User) -> Result<()>;
}

/// Trait for persisting issued tokens
#[async_trait]
pub trait TokenStore {
    /// Store a new token record
    async fn add_token(&self, token: &Token) -> Result<()>;

    /// Delete a token record by `owner/name`
    async fn delete_token(&self, id: &str) -> Result<bool>;

    async fn get_token_by_code(&self, code: &str) -> Result<Option<Token>>;

    async fn get_token_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>>;

    async fn get_token_by_access_token(&self, access_token: &str) -> Result<Option<Token>>;

    /// Atomically flip `code_is_used` from false to true.
    ///
    /// Returns false when the code is unknown or was already used.
    async fn mark_code_used(&self, code: &str) -> Result<bool>;

    /// Replace the stored record that has the same code
    async fn update_token_by_code(&self, code: &str, token: &Token) -> Result<bool>;

    /// Revoke a token by setting `expires_in` to zero
    async fn expire_token(&self, access_token: &str) -> Result<bool>;

    /// Delete tokens that expired more than `retention` ago
    async fn cleanup_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize>;
}

/// Trait for consent records
#[async_trait]
pub trait ConsentStore {
    /// Most recently created record for a (user, application) pair
    async fn get_latest_consent(
        &self,
        user: &str,
        application: &str,
    ) -> Result<Option<ConsentRecord>>;

    /// Insert or replace a record keyed by `owner/name`
    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<()>;

    async fn get_consent(&self, id: &str) -> Result<Option<ConsentRecord>>;

    async fn delete_consent(&self, id: &str) -> Result<bool>;
}

/// Trait for pending device authorizations (RFC 8628)
#[async_trait]
pub trait DeviceAuthStore {
    /// Store a pending authorization under its device and user codes
    async fn store_device_auth(
        &self,
        device_code: &str,
        user_code: &str,
        cache: &DeviceAuthCache,
    ) -> Result<()>;

    async fn get_device_auth(&self, device_code: &str) -> Result<Option<DeviceAuthCache>>;

    /// Record that the user approved the device identified by `user_code`
    async fn complete_device_auth(&self, user_code: &str, user_name: &str) -> Result<bool>;

    /// Remove and return a pending authorization
    async fn take_device_auth(&self, device_code: &str) -> Result<Option<DeviceAuthCache>>;

    /// Drop authorizations requested before `older_than`
    async fn cleanup_device_auth(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// Replay-protection cache keyed by proof or assertion identifiers
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Whether the key is currently remembered
    async fn seen(&self, key: &str) -> Result<bool>;

    /// Remember the key for `ttl`.
    ///
    /// Atomic insert-if-absent: returns false when the key was already present,
    /// which the caller treats as a replay.
    async fn mark(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove expired entries, returning how many were dropped
    async fn sweep(&self) -> Result<usize>;
}

/// Combined storage trait consumed by the authorization server
pub trait OAuthStorage:
    ApplicationStore
    + CertStore
    + UserDirectory
    + TokenStore
    + ConsentStore
    + DeviceAuthStore
    + Send
    + Sync
{
}
