//! In-memory OAuth storage implementation
//!
//! This module provides in-memory implementations for applications, certificates,
//! tokens, consent records and device authorizations.

use crate::errors::StorageError;
use crate::oauth::types::*;
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory implementation for OAuth storage
#[derive(Default)]
pub struct MemoryOAuthStorage {
    applications: Mutex<HashMap<String, Application>>,
    certs: Mutex<HashMap<String, Cert>>,
    tokens: Mutex<HashMap<String, Token>>,
    consents: Mutex<HashMap<String, ConsentRecord>>,
    device_auths: Mutex<HashMap<String, DeviceAuthCache>>,
    device_user_codes: Mutex<HashMap<String, String>>, // user_code -> device_code
    pub(super) users: Mutex<HashMap<String, User>>,
    pub(super) user_roles: Mutex<HashMap<String, Vec<Role>>>,
    pub(super) user_permissions: Mutex<HashMap<String, Vec<Permission>>>,
    pub(super) ldap_passwords: Mutex<HashMap<String, String>>,
}

/// Initial contents for the in-memory stores, read from a JSON document
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MemorySeed {
    pub applications: Vec<Application>,
    pub certs: Vec<Cert>,
    pub users: Vec<User>,
    /// Role assignments keyed by user `owner/name`
    pub user_roles: HashMap<String, Vec<Role>>,
    /// Permission assignments keyed by user `owner/name`
    pub user_permissions: HashMap<String, Vec<Permission>>,
    /// Directory passwords of LDAP-bound users keyed by user `owner/name`
    pub ldap_passwords: HashMap<String, String>,
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| StorageError::SerializationFailed(format!("Lock error: {}", e)))
}

impl MemoryOAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a storage pre-populated from a seed document
    pub fn from_seed(seed: MemorySeed) -> Result<Self> {
        let storage = Self::new();
        {
            let mut applications = lock(&storage.applications)?;
            for application in seed.applications {
                applications.insert(application.get_id(), application);
            }
        }
        {
            let mut certs = lock(&storage.certs)?;
            for cert in seed.certs {
                certs.insert(cert.name.clone(), cert);
            }
        }
        {
            let mut users = lock(&storage.users)?;
            for user in seed.users {
                users.insert(user.get_id(), user);
            }
        }
        *lock(&storage.user_roles)? = seed.user_roles;
        *lock(&storage.user_permissions)? = seed.user_permissions;
        *lock(&storage.ldap_passwords)? = seed.ldap_passwords;
        Ok(storage)
    }

    /// Record the directory password for an LDAP-bound user
    pub fn set_ldap_password(&self, user_id: &str, password: &str) -> Result<()> {
        lock(&self.ldap_passwords)?.insert(user_id.to_string(), password.to_string());
        Ok(())
    }

    /// Assign roles to a user, returned by `extend_user_with_roles_and_permissions`
    pub fn assign_roles(&self, user_id: &str, roles: Vec<Role>) -> Result<()> {
        lock(&self.user_roles)?.insert(user_id.to_string(), roles);
        Ok(())
    }

    /// Assign permissions to a user, returned by `extend_user_with_roles_and_permissions`
    pub fn assign_permissions(&self, user_id: &str, permissions: Vec<Permission>) -> Result<()> {
        lock(&self.user_permissions)?.insert(user_id.to_string(), permissions);
        Ok(())
    }

    fn find_token<F>(&self, predicate: F) -> Result<Option<Token>>
    where
        F: Fn(&Token) -> bool,
    {
        let tokens = lock(&self.tokens)?;
        Ok(tokens.values().find(|t| predicate(t)).cloned())
    }
}

#[async_trait]
impl ApplicationStore for MemoryOAuthStorage {
    async fn store_application(&self, application: &Application) -> Result<()> {
        let mut applications = lock(&self.applications)?;
        applications.insert(application.get_id(), application.clone());
        Ok(())
    }

    async fn get_application_by_client_id(&self, client_id: &str) -> Result<Option<Application>> {
        let applications = lock(&self.applications)?;
        Ok(applications
            .values()
            .find(|app| app.client_id == client_id)
            .cloned())
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        let applications = lock(&self.applications)?;
        Ok(applications.get(id).cloned())
    }
}

#[async_trait]
impl CertStore for MemoryOAuthStorage {
    async fn store_cert(&self, cert: &Cert) -> Result<()> {
        let mut certs = lock(&self.certs)?;
        certs.insert(cert.name.clone(), cert.clone());
        Ok(())
    }

    async fn get_cert_by_application(&self, application: &Application) -> Result<Option<Cert>> {
        if application.cert.is_empty() {
            return Ok(None);
        }
        let certs = lock(&self.certs)?;
        Ok(certs.get(&application.cert).cloned())
    }
}

#[async_trait]
impl TokenStore for MemoryOAuthStorage {
    async fn add_token(&self, token: &Token) -> Result<()> {
        let mut tokens = lock(&self.tokens)?;
        tokens.insert(token.get_id(), token.clone());
        Ok(())
    }

    async fn delete_token(&self, id: &str) -> Result<bool> {
        let mut tokens = lock(&self.tokens)?;
        Ok(tokens.remove(id).is_some())
    }

    async fn get_token_by_code(&self, code: &str) -> Result<Option<Token>> {
        if code.is_empty() {
            return Ok(None);
        }
        self.find_token(|t| t.code == code)
    }

    async fn get_token_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Token>> {
        if refresh_token.is_empty() {
            return Ok(None);
        }
        self.find_token(|t| t.refresh_token == refresh_token)
    }

    async fn get_token_by_access_token(&self, access_token: &str) -> Result<Option<Token>> {
        if access_token.is_empty() {
            return Ok(None);
        }
        self.find_token(|t| t.access_token == access_token)
    }

    async fn mark_code_used(&self, code: &str) -> Result<bool> {
        let mut tokens = lock(&self.tokens)?;
        match tokens.values_mut().find(|t| t.code == code) {
            Some(token) if !token.code_is_used => {
                token.code_is_used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_token_by_code(&self, code: &str, token: &Token) -> Result<bool> {
        let mut tokens = lock(&self.tokens)?;
        let existing = tokens
            .iter()
            .find(|(_, t)| t.code == code)
            .map(|(id, _)| id.clone());
        match existing {
            Some(id) => {
                tokens.remove(&id);
                tokens.insert(token.get_id(), token.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_token(&self, access_token: &str) -> Result<bool> {
        let mut tokens = lock(&self.tokens)?;
        match tokens
            .values_mut()
            .find(|t| t.access_token == access_token)
        {
            Some(token) => {
                token.expires_in = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize> {
        let mut tokens = lock(&self.tokens)?;
        let initial_count = tokens.len();
        tokens.retain(|_, token| {
            token.created_time + Duration::seconds(token.expires_in) + retention > now
        });
        Ok(initial_count - tokens.len())
    }
}

#[async_trait]
impl ConsentStore for MemoryOAuthStorage {
    async fn get_latest_consent(
        &self,
        user: &str,
        application: &str,
    ) -> Result<Option<ConsentRecord>> {
        let consents = lock(&self.consents)?;
        Ok(consents
            .values()
            .filter(|r| r.user == user && r.application == application)
            .max_by_key(|r| r.created_time)
            .cloned())
    }

    async fn upsert_consent(&self, record: &ConsentRecord) -> Result<()> {
        let mut consents = lock(&self.consents)?;
        consents.insert(format!("{}/{}", record.owner, record.name), record.clone());
        Ok(())
    }

    async fn get_consent(&self, id: &str) -> Result<Option<ConsentRecord>> {
        let consents = lock(&self.consents)?;
        Ok(consents.get(id).cloned())
    }

    async fn delete_consent(&self, id: &str) -> Result<bool> {
        let mut consents = lock(&self.consents)?;
        Ok(consents.remove(id).is_some())
    }
}

#[async_trait]
impl DeviceAuthStore for MemoryOAuthStorage {
    async fn store_device_auth(
        &self,
        device_code: &str,
        user_code: &str,
        cache: &DeviceAuthCache,
    ) -> Result<()> {
        lock(&self.device_auths)?.insert(device_code.to_string(), cache.clone());
        lock(&self.device_user_codes)?.insert(user_code.to_string(), device_code.to_string());
        Ok(())
    }

    async fn get_device_auth(&self, device_code: &str) -> Result<Option<DeviceAuthCache>> {
        Ok(lock(&self.device_auths)?.get(device_code).cloned())
    }

    async fn complete_device_auth(&self, user_code: &str, user_name: &str) -> Result<bool> {
        let device_code = match lock(&self.device_user_codes)?.get(user_code) {
            Some(device_code) => device_code.clone(),
            None => return Ok(false),
        };
        let mut device_auths = lock(&self.device_auths)?;
        match device_auths.get_mut(&device_code) {
            Some(cache) => {
                cache.user_sign_in = true;
                cache.user_name = user_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_device_auth(&self, device_code: &str) -> Result<Option<DeviceAuthCache>> {
        let taken = lock(&self.device_auths)?.remove(device_code);
        if taken.is_some() {
            lock(&self.device_user_codes)?.retain(|_, code| code != device_code);
        }
        Ok(taken)
    }

    async fn cleanup_device_auth(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut device_auths = lock(&self.device_auths)?;
        let initial_count = device_auths.len();
        device_auths.retain(|_, cache| cache.request_at >= older_than);
        let removed = initial_count - device_auths.len();
        drop(device_auths);

        let device_auths = lock(&self.device_auths)?;
        lock(&self.device_user_codes)?.retain(|_, code| device_auths.contains_key(code));
        Ok(removed)
    }
}

impl OAuthStorage for MemoryOAuthStorage {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_token(name: &str, code: &str) -> Token {
        Token {
            owner: "admin".to_string(),
            name: name.to_string(),
            created_time: Utc::now(),
            application: "app-example".to_string(),
            organization: "built-in".to_string(),
            user: "alice".to_string(),
            code: code.to_string(),
            access_token: format!("access-{}", name),
            refresh_token: format!("refresh-{}", name),
            expires_in: 3600,
            scope: "openid".to_string(),
            token_type: "Bearer".to_string(),
            code_challenge: String::new(),
            code_is_used: false,
            code_expire_in: Utc::now().timestamp() + AUTHORIZATION_CODE_LIFETIME,
            cert_fingerprint: None,
            dpop_jkt: None,
        }
    }

    #[tokio::test]
    async fn test_token_lookups() {
        let storage = MemoryOAuthStorage::new();
        let token = test_token("t1", "code-1");
        storage.add_token(&token).await.unwrap();

        assert!(storage.get_token_by_code("code-1").await.unwrap().is_some());
        assert!(
            storage
                .get_token_by_refresh_token("refresh-t1")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            storage
                .get_token_by_access_token("access-t1")
                .await
                .unwrap()
                .is_some()
        );
        assert!(storage.get_token_by_code("").await.unwrap().is_none());

        assert!(storage.delete_token("admin/t1").await.unwrap());
        assert!(storage.get_token_by_code("code-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_code_used_is_single_shot() {
        let storage = MemoryOAuthStorage::new();
        storage.add_token(&test_token("t1", "code-1")).await.unwrap();

        assert!(storage.mark_code_used("code-1").await.unwrap());
        assert!(!storage.mark_code_used("code-1").await.unwrap());
        assert!(!storage.mark_code_used("unknown").await.unwrap());

        let token = storage.get_token_by_code("code-1").await.unwrap().unwrap();
        assert!(token.code_is_used);
    }

    #[tokio::test]
    async fn test_expire_token() {
        let storage = MemoryOAuthStorage::new();
        storage.add_token(&test_token("t1", "code-1")).await.unwrap();

        assert!(storage.expire_token("access-t1").await.unwrap());
        assert!(!storage.expire_token("access-missing").await.unwrap());
        let token = storage
            .get_token_by_access_token("access-t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.expires_in, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_respects_retention() {
        let storage = MemoryOAuthStorage::new();
        let mut old = test_token("old", "code-old");
        old.created_time = Utc::now() - Duration::days(10);
        let mut recent = test_token("recent", "code-recent");
        recent.created_time = Utc::now() - Duration::days(2);
        recent.expires_in = 0;
        storage.add_token(&old).await.unwrap();
        storage.add_token(&recent).await.unwrap();
        storage.add_token(&test_token("live", "code-live")).await.unwrap();

        let removed = storage
            .cleanup_expired(Utc::now(), Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_token_by_code("code-old").await.unwrap().is_none());
        assert!(storage.get_token_by_code("code-recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_consent_wins() {
        let storage = MemoryOAuthStorage::new();
        let now = Utc::now();
        let older = ConsentRecord {
            owner: "built-in".to_string(),
            name: "c1".to_string(),
            created_time: now - Duration::hours(1),
            user: "alice".to_string(),
            application: "app-example".to_string(),
            granted_scopes: vec!["openid".to_string(), "email".to_string()],
            consent_time: now - Duration::hours(1),
            expiration_time: None,
        };
        let newer = ConsentRecord {
            name: "c2".to_string(),
            created_time: now,
            granted_scopes: vec!["openid".to_string()],
            ..older.clone()
        };
        storage.upsert_consent(&older).await.unwrap();
        storage.upsert_consent(&newer).await.unwrap();

        let latest = storage
            .get_latest_consent("alice", "app-example")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.name, "c2");
        assert!(
            storage
                .get_latest_consent("bob", "app-example")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_device_auth_lifecycle() {
        let storage = MemoryOAuthStorage::new();
        let cache = DeviceAuthCache {
            user_sign_in: false,
            user_name: String::new(),
            application_id: "admin/app-example".to_string(),
            scope: "openid".to_string(),
            request_at: Utc::now(),
        };
        storage
            .store_device_auth("device-1", "ABCD2345", &cache)
            .await
            .unwrap();

        assert!(
            storage
                .complete_device_auth("ABCD2345", "alice")
                .await
                .unwrap()
        );
        assert!(!storage.complete_device_auth("ZZZZ9999", "alice").await.unwrap());

        let taken = storage.take_device_auth("device-1").await.unwrap().unwrap();
        assert!(taken.user_sign_in);
        assert_eq!(taken.user_name, "alice");
        assert!(storage.get_device_auth("device-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_seed() {
        let seed: MemorySeed = serde_json::from_value(serde_json::json!({
            "applications": [{"owner": "admin", "name": "app-example", "client_id": "client-1", "cert": "cert-1"}],
            "certs": [{"owner": "admin", "name": "cert-1"}],
            "users": [{"owner": "built-in", "name": "alice", "displayName": "Alice"}]
        }))
        .unwrap();
        let storage = MemoryOAuthStorage::from_seed(seed).unwrap();

        let app = storage
            .get_application_by_client_id("client-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(app.get_id(), "admin/app-example");
        assert!(storage.get_cert_by_application(&app).await.unwrap().is_some());
        assert!(storage.get_user("built-in/alice").await.unwrap().is_some());
    }
}
