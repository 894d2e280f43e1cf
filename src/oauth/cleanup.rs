//! Periodic removal of expired tokens and stale device authorizations.

use crate::oauth::device::DeviceFlow;
use crate::storage::traits::OAuthStorage;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Retention policy for the cleanup loop
#[derive(Clone, Debug)]
pub struct CleanupSettings {
    pub interval: std::time::Duration,
    /// How long an expired token is kept before it is deleted
    pub token_retention: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60 * 60),
            token_retention: Duration::days(7),
        }
    }
}

/// Run a single cleanup pass, returning how many tokens and device
/// authorizations were removed.
pub async fn cleanup_once(
    storage: &dyn OAuthStorage,
    device: &DeviceFlow,
    settings: &CleanupSettings,
) -> (usize, usize) {
    let now = Utc::now();
    let tokens = match storage.cleanup_expired(now, settings.token_retention).await {
        Ok(removed) => removed,
        Err(err) => {
            tracing::warn!(error = ?err, "token cleanup failed");
            0
        }
    };
    let devices = match device.cleanup(now).await {
        Ok(removed) => removed,
        Err(err) => {
            tracing::warn!(error = %err, "device authorization cleanup failed");
            0
        }
    };
    if tokens > 0 || devices > 0 {
        tracing::info!(tokens, devices, "removed expired records");
    }
    (tokens, devices)
}

/// Loop until `shutdown` is cancelled, cleaning up every `settings.interval`.
pub async fn run_cleanup_loop(
    storage: Arc<dyn OAuthStorage>,
    device: Arc<DeviceFlow>,
    settings: CleanupSettings,
    shutdown: CancellationToken,
) {
    if settings.interval.is_zero() {
        tracing::info!("token cleanup disabled");
        return;
    }

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                cleanup_once(storage.as_ref(), &device, &settings).await;
            }
        }
    }
    tracing::debug!("cleanup loop stopped");
}
