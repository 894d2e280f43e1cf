//! Device authorization grant (RFC 8628).

use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;

/// Characters a user code is drawn from; no 0/O, 1/I
pub const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const USER_CODE_LENGTH: usize = 8;

/// Seconds the client should wait between polls
pub const POLLING_INTERVAL: i64 = 5;

pub fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_CODE_LENGTH)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Pending device authorizations
pub struct DeviceFlow {
    storage: Arc<dyn OAuthStorage>,
    expiration: Duration,
}

impl DeviceFlow {
    pub fn new(storage: Arc<dyn OAuthStorage>, expiration: Duration) -> Self {
        Self {
            storage,
            expiration,
        }
    }

    /// Register a device and hand back the codes it shows to the user.
    ///
    /// `origin` is the public origin the verification URI is built on.
    pub async fn start(
        &self,
        client_id: &str,
        scope: &str,
        origin: &str,
    ) -> Result<DeviceAuthResponse, TokenError> {
        let application = self
            .storage
            .get_application_by_client_id(client_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| TokenError::invalid_client("client_id is invalid"))?;

        let device_code = generate_token();
        let user_code = generate_user_code();
        let cache = DeviceAuthCache {
            user_sign_in: false,
            user_name: String::new(),
            application_id: application.get_id(),
            scope: scope.to_string(),
            request_at: Utc::now(),
        };
        self.storage
            .store_device_auth(&device_code, &user_code, &cache)
            .await
            .map_err(storage_failure)?;

        tracing::info!(client_id, "device authorization started");
        Ok(DeviceAuthResponse {
            verification_uri: format!("{}/login/oauth/device/{}", origin, user_code),
            device_code,
            user_code,
            expires_in: self.expiration.num_seconds(),
            interval: POLLING_INTERVAL,
        })
    }

    /// Mark the device identified by `user_code` as approved by `user_name`.
    pub async fn approve(&self, user_code: &str, user_name: &str) -> Result<bool, TokenError> {
        self.storage
            .complete_device_auth(user_code, user_name)
            .await
            .map_err(storage_failure)
    }

    /// Resolve a polling request from `application_id` into the approving user's name.
    ///
    /// The pending entry is consumed once the user has signed in, and only by the
    /// application that started it.
    pub async fn poll(
        &self,
        device_code: &str,
        application_id: &str,
    ) -> Result<DeviceAuthCache, TokenError> {
        self.poll_at(device_code, application_id, Utc::now()).await
    }

    async fn poll_at(
        &self,
        device_code: &str,
        application_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceAuthCache, TokenError> {
        let cache = self
            .storage
            .get_device_auth(device_code)
            .await
            .map_err(storage_failure)?
            .ok_or_else(expired)?;

        if cache.application_id != application_id {
            return Err(TokenError::invalid_grant(
                "device code was issued to another application",
            ));
        }

        if !cache.user_sign_in {
            return Err(TokenError::new(
                TokenErrorCode::AuthorizationPending,
                "authorization pending",
            ));
        }
        if cache.request_at + self.expiration < now {
            return Err(expired());
        }

        self.storage
            .take_device_auth(device_code)
            .await
            .map_err(storage_failure)?
            .ok_or_else(expired)
    }

    /// Drop authorizations past their expiration
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize, TokenError> {
        self.storage
            .cleanup_device_auth(now - self.expiration)
            .await
            .map_err(storage_failure)
    }
}

fn expired() -> TokenError {
    TokenError::new(TokenErrorCode::ExpiredToken, "token is expired")
}

fn storage_failure(error: crate::errors::StorageError) -> TokenError {
    tracing::error!(error = ?error, "device authorization storage failure");
    TokenError::endpoint_error("device authorization is temporarily unavailable")
}
