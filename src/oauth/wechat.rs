//! WeChat mini-program sign in.
//!
//! Mini programs post a `wx.login` code to the token endpoint with
//! `tag=wechat_miniprogram`. The code is exchanged for a session through the
//! configured provider and the WeChat identity is mapped onto a directory user,
//! creating one when the application allows sign up.

use crate::errors::WechatError;
use crate::oauth::types::*;
use crate::storage::traits::OAuthStorage;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// Token request tag selecting this flow
pub const WECHAT_MINIPROGRAM_TAG: &str = "wechat_miniprogram";

pub const WECHAT_OPEN_ID_PROPERTY: &str = "wechatOpenId";
pub const WECHAT_UNION_ID_PROPERTY: &str = "wechatUnionId";

pub const DEFAULT_WECHAT_API_BASE: &str = "https://api.weixin.qq.com";

/// Result of `jscode2session`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WechatSession {
    pub openid: String,
    pub unionid: String,
    pub session_key: String,
}

/// Exchanges a mini-program login code for a session
#[async_trait]
pub trait WechatSessionProvider: Send + Sync {
    async fn get_session_by_code(
        &self,
        provider: &str,
        code: &str,
    ) -> Result<WechatSession, WechatError>;
}

/// App credentials of a mini-program provider
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WechatProviderCredentials {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionResponse {
    openid: String,
    unionid: String,
    session_key: String,
    errcode: i64,
    errmsg: String,
}

/// Provider that calls the WeChat API
pub struct HttpWechatSessionProvider {
    http_client: reqwest::Client,
    api_base: String,
    providers: HashMap<String, WechatProviderCredentials>,
}

impl HttpWechatSessionProvider {
    pub fn new(
        http_client: reqwest::Client,
        api_base: &str,
        providers: Vec<WechatProviderCredentials>,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            providers: providers
                .into_iter()
                .map(|provider| (provider.name.clone(), provider))
                .collect(),
        }
    }
}

#[async_trait]
impl WechatSessionProvider for HttpWechatSessionProvider {
    async fn get_session_by_code(
        &self,
        provider: &str,
        code: &str,
    ) -> Result<WechatSession, WechatError> {
        let credentials = self
            .providers
            .get(provider)
            .ok_or_else(|| WechatError::UnknownProvider(provider.to_string()))?;

        let response: SessionResponse = self
            .http_client
            .get(format!("{}/sns/jscode2session", self.api_base))
            .query(&[
                ("appid", credentials.client_id.as_str()),
                ("secret", credentials.client_secret.as_str()),
                ("js_code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| WechatError::RequestFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| WechatError::RequestFailed(e.to_string()))?;

        if response.errcode != 0 {
            return Err(WechatError::Rejected(response.errcode, response.errmsg));
        }
        Ok(WechatSession {
            openid: response.openid,
            unionid: response.unionid,
            session_key: response.session_key,
        })
    }
}

/// Usernames are ASCII alphanumeric runs joined by single `-` or `_`.
pub fn is_valid_username(username: &str) -> bool {
    if username.is_empty() || username.len() > 39 {
        return false;
    }
    if username.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let mut previous_separator = true;
    for b in username.bytes() {
        match b {
            b'-' | b'_' if previous_separator => return false,
            b'-' | b'_' => previous_separator = true,
            b if b.is_ascii_alphanumeric() => previous_separator = false,
            _ => return false,
        }
    }
    !previous_separator
}

/// Resolve the directory user behind a mini-program login code.
///
/// Returns the user (with roles and permissions) and the WeChat session.
pub async fn resolve_wechat_user(
    storage: &dyn OAuthStorage,
    sessions: &dyn WechatSessionProvider,
    application: &Application,
    code: &str,
    username: &str,
    avatar: &str,
) -> Result<(User, WechatSession), TokenError> {
    let provider = application
        .wechat_mini_program_provider
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            TokenError::invalid_client("the application does not support wechat mini program")
        })?;

    let session = sessions
        .get_session_by_code(provider, code)
        .await
        .map_err(|e| {
            tracing::warn!(provider, error = %e, "wechat session exchange failed");
            TokenError::invalid_grant(format!("get wechat mini program session error: {}", e))
        })?;

    if session.openid.is_empty() && session.unionid.is_empty() {
        return Err(TokenError::invalid_request(
            "the wechat mini program session is invalid",
        ));
    }

    let organization = &application.organization;
    let mut user = match storage
        .get_user_by_wechat_id(organization, &session.openid)
        .await
        .map_err(directory_failure)?
    {
        Some(user) => Some(user),
        None => storage
            .get_user_by_wechat_id(organization, &session.unionid)
            .await
            .map_err(directory_failure)?,
    };

    if user.is_none() {
        if !application.enable_sign_up {
            return Err(TokenError::invalid_grant(
                "the application does not allow to sign up new account",
            ));
        }

        let name = if is_valid_username(username) {
            username.to_string()
        } else {
            format!("wechat-{}", session.openid)
        };
        let new_user = User {
            owner: organization.clone(),
            name,
            id: generate_id(),
            created_time: chrono::Utc::now().to_rfc3339(),
            avatar: avatar.to_string(),
            signup_application: application.name.clone(),
            wechat: session.openid.clone(),
            user_type: "normal-user".to_string(),
            properties: HashMap::from([
                (WECHAT_OPEN_ID_PROPERTY.to_string(), session.openid.clone()),
                (WECHAT_UNION_ID_PROPERTY.to_string(), session.unionid.clone()),
            ]),
            ..Default::default()
        };
        storage.add_user(&new_user).await.map_err(directory_failure)?;
        tracing::info!(
            user = %new_user.get_id(),
            application = %application.name,
            "signed up wechat mini program user"
        );
        user = Some(new_user);
    }

    let mut user = user.ok_or_else(|| TokenError::endpoint_error("user could not be resolved"))?;
    storage
        .extend_user_with_roles_and_permissions(&mut user)
        .await
        .map_err(directory_failure)?;
    Ok((user, session))
}

fn directory_failure(error: crate::errors::StorageError) -> TokenError {
    tracing::error!(error = ?error, "user directory failure in wechat sign in");
    TokenError::endpoint_error("the user directory is temporarily unavailable")
}
