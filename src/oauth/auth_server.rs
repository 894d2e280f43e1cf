//! Grant dispatcher: authorization codes, the token endpoint, introspection and
//! revocation.

use crate::errors::{ClaimsError, DPoPError, StorageError};
use crate::oauth::claims::{
    ACCESS_TOKEN_TYPE, ClaimsBuilder, GeneratedTokens, REFRESH_TOKEN_TYPE, TokenContext,
};
use crate::oauth::client_auth::{
    ClientAuthContext, ClientAuthOutcome, ClientAuthRegistry, is_secret_method,
};
use crate::oauth::consent::ConsentEngine;
use crate::oauth::device::DeviceFlow;
use crate::oauth::dpop::{DPoPSettings, DPoPValidator};
use crate::oauth::types::*;
use crate::oauth::wechat::{WECHAT_MINIPROGRAM_TAG, WechatSessionProvider, resolve_wechat_user};
use crate::storage::traits::{OAuthStorage, ReplayStore};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path of the token endpoint, used as the expected client assertion audience
pub const TOKEN_ENDPOINT: &str = "/api/login/oauth/access_token";

const FORBIDDEN_USER: &str = "the user is forbidden to sign in, please contact the administrator";

/// Authorization request forwarded by the login controller once the user is known
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizeRequest {
    /// `owner/name` of the signed-in user
    pub user_id: String,
    pub client_id: String,
    pub response_type: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub nonce: String,
    pub code_challenge: String,
}

/// RFC 7662 / RFC 7009 request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenInspectionRequest {
    pub token: String,
    pub token_type_hint: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Outcome of the pre-authorization checks
#[derive(Debug, Clone)]
pub enum LoginCheck {
    /// The request may proceed; the client secret is masked
    Allowed(Application),
    /// The request is refused with a user-facing message
    Rejected(String),
}

/// Tunables for the dispatcher and the validators it owns
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Public origin overriding the one derived from the request host
    pub origin: Option<String>,
    pub dpop: DPoPSettings,
    pub device_code_expiration: chrono::Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            origin: None,
            dpop: DPoPSettings::default(),
            device_code_expiration: chrono::Duration::seconds(120),
        }
    }
}

/// Confirmation keys bound into a token at issuance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TokenBinding {
    cert_fingerprint: Option<String>,
    dpop_jkt: Option<String>,
}

impl TokenBinding {
    fn is_empty(&self) -> bool {
        self.cert_fingerprint.is_none() && self.dpop_jkt.is_none()
    }

    fn apply(&self, token: &mut Token) {
        if self.cert_fingerprint.is_some() {
            token.cert_fingerprint = self.cert_fingerprint.clone();
        }
        if self.dpop_jkt.is_some() {
            token.dpop_jkt = self.dpop_jkt.clone();
        }
    }
}

/// Token endpoint state shared by every request
pub struct AuthServer {
    storage: Arc<dyn OAuthStorage>,
    claims: ClaimsBuilder,
    client_auth: ClientAuthRegistry,
    dpop: DPoPValidator,
    wechat: Arc<dyn WechatSessionProvider>,
    device: Arc<DeviceFlow>,
    consent: ConsentEngine,
}

impl AuthServer {
    pub fn new(
        storage: Arc<dyn OAuthStorage>,
        replay_store: Arc<dyn ReplayStore>,
        wechat: Arc<dyn WechatSessionProvider>,
        settings: ServerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            claims: ClaimsBuilder::new(settings.origin),
            client_auth: ClientAuthRegistry::new(storage.clone(), replay_store.clone()),
            dpop: DPoPValidator::new_with_shutdown(replay_store, settings.dpop, shutdown),
            device: Arc::new(DeviceFlow::new(storage.clone(), settings.device_code_expiration)),
            consent: ConsentEngine::new(storage.clone()),
            wechat,
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn OAuthStorage> {
        &self.storage
    }

    pub fn claims(&self) -> &ClaimsBuilder {
        &self.claims
    }

    pub fn device(&self) -> &Arc<DeviceFlow> {
        &self.device
    }

    pub fn consent(&self) -> &ConsentEngine {
        &self.consent
    }

    /// Validate an authorization request before a code is issued.
    pub async fn check_oauth_login(
        &self,
        client_id: &str,
        response_type: &str,
        redirect_uri: &str,
    ) -> Result<LoginCheck, TokenError> {
        if !matches!(response_type, "code" | "token" | "id_token") {
            return Ok(LoginCheck::Rejected(format!(
                "Grant_type: {} is not supported in this application",
                response_type
            )));
        }

        let Some(mut application) = self
            .storage
            .get_application_by_client_id(client_id)
            .await
            .map_err(internal)?
        else {
            return Ok(LoginCheck::Rejected("Invalid client_id".to_string()));
        };

        if !application.is_redirect_uri_valid(redirect_uri) {
            return Ok(LoginCheck::Rejected(format!(
                "Redirect URI: {} doesn't exist in the allowed Redirect URI list",
                redirect_uri
            )));
        }

        application.client_secret.clear();
        Ok(LoginCheck::Allowed(application))
    }

    /// Mint the token bundle for a signed-in user and hand back its one-time code.
    ///
    /// Rejections come back as a [`Code`] with a message and an empty code.
    pub async fn issue_code(&self, request: &AuthorizeRequest, host: &str) -> Result<Code, TokenError> {
        let Some(mut user) = self.storage.get_user(&request.user_id).await.map_err(internal)? else {
            return Ok(rejected(format!("The user: {} doesn't exist", request.user_id)));
        };
        if user.is_forbidden {
            return Ok(rejected(FORBIDDEN_USER));
        }

        let application = match self
            .check_oauth_login(&request.client_id, &request.response_type, &request.redirect_uri)
            .await?
        {
            LoginCheck::Allowed(application) => application,
            LoginCheck::Rejected(message) => return Ok(rejected(message)),
        };

        self.storage
            .extend_user_with_roles_and_permissions(&mut user)
            .await
            .map_err(internal)?;
        let generated = self
            .mint(&application, &user, &request.nonce, &request.scope, "", host)
            .await?;

        let challenge = if request.code_challenge == "null" {
            ""
        } else {
            request.code_challenge.as_str()
        };
        let mut token = new_token(&application, &user.owner, &user.name, generated, &request.scope);
        token.code_challenge = challenge.to_string();
        token.code_is_used = false;
        self.storage.add_token(&token).await.map_err(internal)?;

        tracing::info!(
            application = %application.name,
            user = %request.user_id,
            token = %token.get_id(),
            "authorization code issued"
        );
        Ok(Code {
            message: String::new(),
            code: token.code,
        })
    }

    /// Token endpoint.
    pub async fn exchange_token(
        &self,
        request: &TokenRequest,
        ctx: &RequestContext,
    ) -> Result<TokenWrapper, TokenError> {
        let application = self
            .storage
            .get_application_by_client_id(&request.client_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_client("client_id is invalid"))?;

        if request.tag.is_empty() && !application.is_grant_type_valid(&request.grant_type) {
            return Err(TokenError::unsupported_grant_type(format!(
                "grant_type: {} is not supported in this application",
                request.grant_type
            )));
        }

        let client = self.authenticate_client(&application, request, ctx).await?;
        let binding = TokenBinding {
            cert_fingerprint: client.as_ref().and_then(|c| c.cert_fingerprint.clone()),
            dpop_jkt: self.dpop_thumbprint(ctx).await?,
        };
        let secret_verified = client.as_ref().is_some_and(ClientAuthOutcome::is_verified);

        let token = if request.tag == WECHAT_MINIPROGRAM_TAG {
            self.wechat_token(&application, request, &ctx.host, &binding).await?
        } else {
            match request.grant_type.parse::<GrantType>() {
                Ok(GrantType::AuthorizationCode) => {
                    self.authorization_code_token(&application, request, secret_verified, &binding)
                        .await?
                }
                Ok(GrantType::Password) => {
                    self.password_token(&application, request, &ctx.host, &binding).await?
                }
                Ok(GrantType::ClientCredentials) => {
                    self.client_credentials_token(&application, request, &ctx.host, secret_verified, &binding)
                        .await?
                }
                Ok(GrantType::Token) | Ok(GrantType::IdToken) => {
                    self.implicit_token(
                        &application,
                        &request.username,
                        &request.scope,
                        &request.nonce,
                        &request.resource,
                        &ctx.host,
                        &binding,
                    )
                    .await?
                }
                Ok(GrantType::DeviceCode) => {
                    self.device_code_token(&application, request, &ctx.host, &binding).await?
                }
                Ok(GrantType::RefreshToken) => {
                    self.refresh_token(&application, request, &ctx.host, secret_verified, &binding)
                        .await?
                }
                Err(grant_type) => {
                    return Err(TokenError::unsupported_grant_type(format!(
                        "grant_type: {} is not supported in this application",
                        grant_type
                    )));
                }
            }
        };

        tracing::info!(
            application = %application.name,
            grant_type = %request.grant_type,
            token = %token.get_id(),
            "token issued"
        );
        Ok(wrap(&token))
    }

    /// Dispatch on the application's auth method. A missing secret for the secret
    /// methods is left to the grant branch, which knows whether PKCE excuses it.
    async fn authenticate_client(
        &self,
        application: &Application,
        request: &TokenRequest,
        ctx: &RequestContext,
    ) -> Result<Option<ClientAuthOutcome>, TokenError> {
        let token_endpoint = format!("{}{}", self.claims.origin_from_host(&ctx.host), TOKEN_ENDPOINT);
        let auth = ClientAuthContext {
            client_secret: &request.client_secret,
            client_assertion: &request.client_assertion,
            client_assertion_type: &request.client_assertion_type,
            client_certificate: ctx.client_certificate.as_deref(),
            token_endpoint: &token_endpoint,
        };
        let method = ClientAuthRegistry::effective_method(application, &auth);
        if is_secret_method(method) && request.client_secret.is_empty() {
            return Ok(None);
        }
        self.client_auth.authenticate(application, &auth).await.map(Some)
    }

    async fn dpop_thumbprint(&self, ctx: &RequestContext) -> Result<Option<String>, TokenError> {
        let Some(proof) = ctx.dpop_proof.as_deref() else {
            return Ok(None);
        };
        let proof = self
            .dpop
            .validate_proof(proof, &ctx.http_method, &ctx.http_uri, None)
            .await
            .map_err(dpop_failure)?;
        Ok(proof.map(|p| p.thumbprint))
    }

    async fn authorization_code_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        secret_verified: bool,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        let code = request.code.as_str();
        if code.is_empty() {
            return Err(TokenError::invalid_request(
                "authorization code should not be empty",
            ));
        }

        let mut token = self
            .storage
            .get_token_by_code(code)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_grant(format!("authorization code: [{}] is invalid", code)))?;

        if token.code_is_used {
            return Err(code_already_used(&token));
        }

        if !token.code_challenge.is_empty() {
            let answer = sha256_base64url(request.code_verifier.as_bytes());
            if answer != token.code_challenge {
                return Err(TokenError::invalid_grant(format!(
                    "verifier is invalid, challengeAnswer: [{}], token.CodeChallenge: [{}]",
                    answer, token.code_challenge
                )));
            }
        }

        // With PKCE an empty secret is allowed, but a supplied one must be right
        if !secret_verified && application.client_secret != request.client_secret {
            if token.code_challenge.is_empty() {
                return Err(TokenError::invalid_client(format!(
                    "client_secret is invalid for application: [{}], token.CodeChallenge: empty",
                    application.get_id()
                )));
            }
            if !request.client_secret.is_empty() {
                return Err(TokenError::invalid_client(format!(
                    "client_secret is invalid for application: [{}], token.CodeChallenge: [{}]",
                    application.get_id(),
                    token.code_challenge
                )));
            }
        }

        if application.name != token.application {
            return Err(TokenError::invalid_grant(format!(
                "the token is for wrong application (client_id), application.Name: [{}], token.Application: [{}]",
                application.name, token.application
            )));
        }

        let now = Utc::now().timestamp();
        if now > token.code_expire_in {
            return Err(TokenError::invalid_grant(format!(
                "authorization code has expired, now: [{}], token.CodeExpireIn: [{}]",
                now, token.code_expire_in
            )));
        }

        // Losing a concurrent exchange is the same as a replay
        if !self.storage.mark_code_used(code).await.map_err(internal)? {
            return Err(code_already_used(&token));
        }
        token.code_is_used = true;

        if !binding.is_empty() {
            binding.apply(&mut token);
            self.storage
                .update_token_by_code(code, &token)
                .await
                .map_err(internal)?;
        }
        Ok(token)
    }

    async fn password_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        host: &str,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        let mut user = self
            .storage
            .get_user_by_fields(&application.organization, &request.username)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_grant("the user does not exist"))?;

        let verified = if !user.ldap.is_empty() {
            self.storage.check_ldap_password(&user, &request.password).await
        } else {
            self.storage.check_password(&user, &request.password).await
        };
        match verified {
            Ok(true) => {}
            Ok(false) => {
                return Err(TokenError::invalid_grant(
                    "invalid username or password: password or code is incorrect",
                ));
            }
            Err(error) => {
                return Err(TokenError::invalid_grant(format!(
                    "invalid username or password: {}",
                    error
                )));
            }
        }

        if user.is_forbidden {
            return Err(TokenError::invalid_grant(FORBIDDEN_USER));
        }

        self.storage
            .extend_user_with_roles_and_permissions(&mut user)
            .await
            .map_err(internal)?;
        let generated = self
            .mint(application, &user, "", &request.scope, &request.resource, host)
            .await?;
        let mut token = new_token(application, &user.owner, &user.name, generated, &request.scope);
        binding.apply(&mut token);
        self.storage.add_token(&token).await.map_err(internal)?;
        Ok(token)
    }

    async fn client_credentials_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        host: &str,
        secret_verified: bool,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        if !secret_verified && application.client_secret != request.client_secret {
            return Err(TokenError::invalid_client("client_secret is invalid"));
        }

        let client_user = User {
            owner: application.owner.clone(),
            id: application.get_id(),
            name: application.name.clone(),
            user_type: "application".to_string(),
            ..Default::default()
        };
        let generated = self
            .mint(application, &client_user, "", &request.scope, &request.resource, host)
            .await?;
        let mut token = new_token(
            application,
            &application.organization,
            &client_user.name,
            generated,
            &request.scope,
        );
        token.refresh_token.clear();
        binding.apply(&mut token);
        self.storage.add_token(&token).await.map_err(internal)?;
        Ok(token)
    }

    #[allow(clippy::too_many_arguments)]
    async fn implicit_token(
        &self,
        application: &Application,
        username: &str,
        scope: &str,
        nonce: &str,
        resource: &str,
        host: &str,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        let mut user = self
            .storage
            .get_user_by_fields(&application.organization, username)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_grant("the user does not exist"))?;
        if user.is_forbidden {
            return Err(TokenError::invalid_grant(FORBIDDEN_USER));
        }

        self.storage
            .extend_user_with_roles_and_permissions(&mut user)
            .await
            .map_err(internal)?;
        let generated = self.mint(application, &user, nonce, scope, resource, host).await?;
        let mut token = new_token(application, &user.owner, &user.name, generated, scope);
        binding.apply(&mut token);
        self.storage.add_token(&token).await.map_err(internal)?;
        Ok(token)
    }

    async fn device_code_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        host: &str,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        let authorization = self
            .device
            .poll(&request.device_code, &application.get_id())
            .await?;
        let scope = if request.scope.is_empty() {
            authorization.scope.as_str()
        } else {
            request.scope.as_str()
        };
        self.implicit_token(
            application,
            &authorization.user_name,
            scope,
            &request.nonce,
            &request.resource,
            host,
            binding,
        )
        .await
    }

    async fn refresh_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        host: &str,
        secret_verified: bool,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        if request.grant_type != GrantType::RefreshToken.as_str() {
            return Err(TokenError::unsupported_grant_type(
                "grant_type should be refresh_token",
            ));
        }
        if !secret_verified
            && !request.client_secret.is_empty()
            && application.client_secret != request.client_secret
        {
            return Err(TokenError::invalid_client("client_secret is invalid"));
        }

        let invalid_refresh = || TokenError::invalid_grant("refresh token is invalid, expired or revoked");
        if request.refresh_token.is_empty() {
            return Err(invalid_refresh());
        }
        let old_token = match self
            .storage
            .get_token_by_refresh_token(&request.refresh_token)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => return Err(invalid_refresh()),
            Err(error) => {
                tracing::warn!(error = ?error, "refresh token lookup failed");
                return Err(invalid_refresh());
            }
        };
        // Revocation zeroes expires_in
        if old_token.expires_in <= 0 {
            return Err(invalid_refresh());
        }

        if old_token
            .dpop_jkt
            .as_ref()
            .is_some_and(|jkt| binding.dpop_jkt.as_ref() != Some(jkt))
        {
            return Err(TokenError::invalid_grant(
                "refresh token is bound to a DPoP key, a proof signed by that key is required",
            ));
        }

        let cert = self
            .storage
            .get_cert_by_application(application)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_grant(format!("cert: {} cannot be found", application.cert)))?;

        let old_claims = self
            .claims
            .parse_token(&request.refresh_token, &cert)
            .map_err(|e| TokenError::invalid_grant(format!("parse refresh token error: {}", e)))?;
        let scope = if request.scope.is_empty() {
            old_claims.scope
        } else {
            request.scope.clone()
        };

        let user_id = format!("{}/{}", application.organization, old_token.user);
        let mut user = self
            .storage
            .get_user(&user_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| TokenError::invalid_grant(format!("The user: {} doesn't exist", user_id)))?;
        if user.is_forbidden {
            return Err(TokenError::invalid_grant(FORBIDDEN_USER));
        }

        self.storage
            .extend_user_with_roles_and_permissions(&mut user)
            .await
            .map_err(internal)?;
        let generated = self
            .claims
            .generate_tokens(&TokenContext {
                application,
                user: &user,
                cert: &cert,
                nonce: "",
                scope: &scope,
                resource: &request.resource,
                host,
                provider: "",
                signin_method: "",
            })
            .map_err(generation_failure)?;

        let mut token = new_token(application, &user.owner, &user.name, generated, &scope);
        binding.apply(&mut token);
        self.storage.add_token(&token).await.map_err(internal)?;
        self.storage
            .delete_token(&old_token.get_id())
            .await
            .map_err(internal)?;

        tracing::debug!(old = %old_token.get_id(), new = %token.get_id(), "refresh token rotated");
        Ok(token)
    }

    async fn wechat_token(
        &self,
        application: &Application,
        request: &TokenRequest,
        host: &str,
        binding: &TokenBinding,
    ) -> Result<Token, TokenError> {
        let (user, session) = resolve_wechat_user(
            self.storage.as_ref(),
            self.wechat.as_ref(),
            application,
            &request.code,
            &request.username,
            &request.avatar,
        )
        .await?;

        let generated = self.mint(application, &user, "", "", "", host).await?;
        let mut token = new_token(application, &user.owner, &user.name, generated, "");
        // Mini programs never redeem a code, so the slot carries the session key
        token.code = session.session_key;
        binding.apply(&mut token);
        self.storage.add_token(&token).await.map_err(internal)?;
        Ok(token)
    }

    /// RFC 7662 introspection.
    pub async fn introspect(
        &self,
        request: &TokenInspectionRequest,
    ) -> Result<IntrospectionResponse, TokenError> {
        let application = self.authenticate_secret_client(request).await?;

        let mut stored = None;
        if !request.token_type_hint.is_empty() {
            stored = self
                .find_token(&request.token, &request.token_type_hint)
                .await?;
            if !stored.as_ref().is_some_and(|t| t.expires_in > 0) {
                return Ok(IntrospectionResponse::inactive());
            }
        }

        let Some(cert) = self
            .storage
            .get_cert_by_application(&application)
            .await
            .map_err(internal)?
        else {
            return Ok(IntrospectionResponse::inactive());
        };
        let claims = match self.claims.parse_token(&request.token, &cert) {
            Ok(claims) => claims,
            Err(error) => {
                tracing::debug!(error = %error, "introspected token did not parse");
                return Ok(IntrospectionResponse::inactive());
            }
        };

        if stored.is_none() {
            stored = self.find_token(&request.token, &claims.token_type).await?;
        }
        let Some(stored) = stored.filter(|t| t.expires_in > 0) else {
            return Ok(IntrospectionResponse::inactive());
        };

        let cnf = if stored.cert_fingerprint.is_some() || stored.dpop_jkt.is_some() {
            Some(Confirmation {
                x5t_s256: stored.cert_fingerprint.clone(),
                jkt: stored.dpop_jkt.clone(),
            })
        } else {
            None
        };

        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
        Ok(IntrospectionResponse {
            active: true,
            scope: non_empty(&claims.scope),
            client_id: Some(request.client_id.clone()),
            username: non_empty(claims.username()),
            token_type: non_empty(&claims.token_type),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            nbf: Some(claims.nbf),
            sub: Some(claims.sub),
            aud: Some(claims.aud),
            iss: Some(claims.iss),
            jti: Some(claims.jti),
            cnf,
        })
    }

    /// RFC 7009 revocation. Tokens that are unknown or belong to another client
    /// are acknowledged without change.
    pub async fn revoke(&self, request: &TokenInspectionRequest) -> Result<(), TokenError> {
        let application = self.authenticate_secret_client(request).await?;

        let hint = if request.token_type_hint.is_empty() {
            ACCESS_TOKEN_TYPE
        } else {
            request.token_type_hint.as_str()
        };
        let mut stored = self.find_token(&request.token, hint).await?;
        if stored.is_none() {
            let fallback = if is_refresh_hint(hint) {
                ACCESS_TOKEN_TYPE
            } else {
                REFRESH_TOKEN_TYPE
            };
            stored = self.find_token(&request.token, fallback).await?;
        }

        let Some(token) = stored else {
            return Ok(());
        };
        if token.application != application.name {
            tracing::warn!(
                client_id = %request.client_id,
                token = %token.get_id(),
                "client attempted to revoke another application's token"
            );
            return Ok(());
        }

        self.storage
            .expire_token(&token.access_token)
            .await
            .map_err(internal)?;
        tracing::info!(token = %token.get_id(), "token revoked");
        Ok(())
    }

    /// RFC 8628 device authorization request.
    pub async fn device_authorize(
        &self,
        client_id: &str,
        scope: &str,
        host: &str,
    ) -> Result<DeviceAuthResponse, TokenError> {
        self.device
            .start(client_id, scope, &self.claims.origin_from_host(host))
            .await
    }

    async fn authenticate_secret_client(
        &self,
        request: &TokenInspectionRequest,
    ) -> Result<Application, TokenError> {
        if request.client_id.is_empty() || request.client_secret.is_empty() {
            return Err(TokenError::invalid_request(
                "client_id and client_secret are required",
            ));
        }
        self.storage
            .get_application_by_client_id(&request.client_id)
            .await
            .map_err(internal)?
            .filter(|app| app.client_secret == request.client_secret)
            .ok_or_else(|| TokenError::invalid_client("Invalid application or wrong clientSecret"))
    }

    async fn find_token(&self, value: &str, token_type: &str) -> Result<Option<Token>, TokenError> {
        if value.is_empty() {
            return Ok(None);
        }
        let found = if is_refresh_hint(token_type) {
            self.storage.get_token_by_refresh_token(value).await
        } else {
            self.storage.get_token_by_access_token(value).await
        };
        found.map_err(internal)
    }

    async fn mint(
        &self,
        application: &Application,
        user: &User,
        nonce: &str,
        scope: &str,
        resource: &str,
        host: &str,
    ) -> Result<GeneratedTokens, TokenError> {
        let cert = self
            .storage
            .get_cert_by_application(application)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                generation_failure(ClaimsError::Key(crate::errors::KeyError::CertificateNotFound(
                    application.cert.clone(),
                )))
            })?;
        self.claims
            .generate_tokens(&TokenContext {
                application,
                user,
                cert: &cert,
                nonce,
                scope,
                resource,
                host,
                provider: "",
                signin_method: "",
            })
            .map_err(generation_failure)
    }
}

fn is_refresh_hint(token_type: &str) -> bool {
    matches!(token_type, "refresh_token" | REFRESH_TOKEN_TYPE)
}

fn new_token(
    application: &Application,
    organization: &str,
    user: &str,
    generated: GeneratedTokens,
    scope: &str,
) -> Token {
    let now = Utc::now();
    Token {
        owner: application.owner.clone(),
        name: generated.name,
        created_time: now,
        application: application.name.clone(),
        organization: organization.to_string(),
        user: user.to_string(),
        code: generate_id(),
        access_token: generated.access_token,
        refresh_token: generated.refresh_token,
        expires_in: application.expires_in(),
        scope: scope.to_string(),
        token_type: "Bearer".to_string(),
        code_challenge: String::new(),
        code_is_used: true,
        code_expire_in: now.timestamp() + AUTHORIZATION_CODE_LIFETIME,
        cert_fingerprint: None,
        dpop_jkt: None,
    }
}

fn wrap(token: &Token) -> TokenWrapper {
    TokenWrapper {
        access_token: token.access_token.clone(),
        id_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        token_type: token.token_type.clone(),
        expires_in: token.expires_in,
        scope: token.scope.clone(),
    }
}

fn rejected(message: impl Into<String>) -> Code {
    Code {
        message: message.into(),
        code: String::new(),
    }
}

fn code_already_used(token: &Token) -> TokenError {
    TokenError::invalid_grant(format!(
        "authorization code has been used for token: [{}]",
        token.get_id()
    ))
}

fn internal(error: StorageError) -> TokenError {
    tracing::error!(error = ?error, "storage failure at the token endpoint");
    TokenError::endpoint_error("internal server error")
}

fn generation_failure(error: ClaimsError) -> TokenError {
    tracing::error!(error = ?error, "token generation failed");
    TokenError::endpoint_error(format!("generate jwt token error: {}", error))
}

fn dpop_failure(error: DPoPError) -> TokenError {
    match error {
        DPoPError::Storage(error) => internal(error),
        DPoPError::InvalidProof(message)
        | DPoPError::ReplayAttack(message)
        | DPoPError::StaleProof(message)
        | DPoPError::InvalidAlgorithm(message)
        | DPoPError::JwtError(message)
        | DPoPError::Thumbprint(message) => {
            tracing::warn!(error = %message, "DPoP proof rejected");
            TokenError::invalid_request(format!("invalid DPoP proof: {}", message))
        }
    }
}
