//! Consent decisions made before an authorization code is issued.

use crate::errors::{ConsentError, StorageError};
use crate::oauth::types::{Application, ConsentRecord, generate_id};
use crate::storage::traits::OAuthStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Application consent policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentPolicy {
    /// Never ask
    Skip,
    /// Ask on every authorization
    Always,
    /// Ask until the requested scopes have been granted
    Once,
}

impl From<&str> for ConsentPolicy {
    fn from(value: &str) -> Self {
        match value {
            "" | "skip" => ConsentPolicy::Skip,
            "always" => ConsentPolicy::Always,
            _ => ConsentPolicy::Once,
        }
    }
}

/// Human readable description of a scope for the consent screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDescription {
    pub scope: String,
    pub display_name: String,
    pub description: String,
}

const DEFAULT_SCOPE_DESCRIPTIONS: &[(&str, &str, &str)] = &[
    ("openid", "OpenID", "Verify your identity"),
    ("profile", "Profile", "View your basic profile information"),
    ("email", "Email", "View your email address"),
    ("address", "Address", "View your address"),
    ("phone", "Phone", "View your phone number"),
    (
        "offline_access",
        "Offline Access",
        "Maintain access when you are not actively using the application",
    ),
];

pub fn scope_descriptions(scopes: &[String]) -> Vec<ScopeDescription> {
    scopes
        .iter()
        .map(|scope| {
            match DEFAULT_SCOPE_DESCRIPTIONS
                .iter()
                .find(|(name, _, _)| name == scope)
            {
                Some((name, display_name, description)) => ScopeDescription {
                    scope: name.to_string(),
                    display_name: display_name.to_string(),
                    description: description.to_string(),
                },
                None => ScopeDescription {
                    scope: scope.clone(),
                    display_name: scope.clone(),
                    description: format!("Access to {}", scope),
                },
            }
        })
        .collect()
}

/// Split a space separated scope string, dropping empty entries.
pub fn parse_scopes(scope: &str) -> Vec<String> {
    scope
        .split(' ')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

pub fn contains_all_scopes(granted: &[String], requested: &[String]) -> bool {
    let granted: HashSet<&str> = granted.iter().map(String::as_str).collect();
    requested.iter().all(|scope| granted.contains(scope.as_str()))
}

/// Consent checks and record management
pub struct ConsentEngine {
    storage: Arc<dyn OAuthStorage>,
}

impl ConsentEngine {
    pub fn new(storage: Arc<dyn OAuthStorage>) -> Self {
        Self { storage }
    }

    /// Latest record for the pair, ignoring one whose expiration has passed
    async fn current_consent(
        &self,
        user: &str,
        application: &Application,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsentRecord>, StorageError> {
        let record = self
            .storage
            .get_latest_consent(user, &application.name)
            .await?;
        Ok(record.filter(|r| r.expiration_time.is_none_or(|expires| expires > now)))
    }

    /// Whether the user must be asked before a code is issued for `scope`
    pub async fn check_consent_required(
        &self,
        user: &str,
        application: &Application,
        scope: &str,
    ) -> Result<bool, StorageError> {
        match ConsentPolicy::from(application.consent_policy.as_str()) {
            ConsentPolicy::Skip => Ok(false),
            ConsentPolicy::Always => Ok(true),
            ConsentPolicy::Once => {
                let requested = parse_scopes(scope);
                let granted = self
                    .current_consent(user, application, Utc::now())
                    .await?
                    .is_some_and(|record| contains_all_scopes(&record.granted_scopes, &requested));
                Ok(!granted)
            }
        }
    }

    /// Record a grant, replacing the scopes of the latest record when there is one.
    pub async fn grant_consent(
        &self,
        user: &str,
        application: &Application,
        granted_scopes: Vec<String>,
        expiration_time: Option<DateTime<Utc>>,
    ) -> Result<ConsentRecord, StorageError> {
        let now = Utc::now();
        let record = match self
            .storage
            .get_latest_consent(user, &application.name)
            .await?
        {
            Some(mut existing) => {
                existing.granted_scopes = granted_scopes;
                existing.consent_time = now;
                existing.expiration_time = expiration_time;
                existing
            }
            None => ConsentRecord {
                owner: application.owner.clone(),
                name: generate_id(),
                created_time: now,
                user: user.to_string(),
                application: application.name.clone(),
                granted_scopes,
                consent_time: now,
                expiration_time,
            },
        };

        self.storage.upsert_consent(&record).await?;
        tracing::info!(
            user,
            application = %application.name,
            scopes = %join_scopes(&record.granted_scopes),
            "consent granted"
        );
        Ok(record)
    }

    /// Delete the record `owner/name` on behalf of `user`.
    pub async fn revoke_consent(&self, user: &str, id: &str) -> Result<bool, ConsentError> {
        let record = self
            .storage
            .get_consent(id)
            .await?
            .ok_or_else(|| ConsentError::NotFound(id.to_string()))?;
        if record.user != user {
            return Err(ConsentError::Unauthorized(id.to_string()));
        }
        let deleted = self.storage.delete_consent(id).await?;
        tracing::info!(user, consent = id, "consent revoked");
        Ok(deleted)
    }
}
