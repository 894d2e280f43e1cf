//! Token endpoint flows driven through the grant dispatcher over in-memory stores.

mod common;

use common::*;
use tokenwright::oauth::{
    AuthorizeRequest, TokenInspectionRequest,
    types::{RequestContext, TokenErrorCode, TokenRequest, sha256_base64url},
};
use tokenwright::storage::{ApplicationStore, TokenStore};

fn authorize(code_challenge: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        user_id: "built-in/alice".to_string(),
        client_id: "web".to_string(),
        response_type: "code".to_string(),
        redirect_uri: "https://app.example.com/callback".to_string(),
        scope: "openid profile".to_string(),
        state: "xyz".to_string(),
        nonce: "n-0S6_WzA2Mj".to_string(),
        code_challenge: code_challenge.to_string(),
    }
}

fn code_request(code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: "authorization_code".to_string(),
        client_id: "web".to_string(),
        client_secret: "web-secret".to_string(),
        code: code.to_string(),
        ..Default::default()
    }
}

fn password_request() -> TokenRequest {
    TokenRequest {
        grant_type: "password".to_string(),
        client_id: "web".to_string(),
        client_secret: "web-secret".to_string(),
        username: "alice".to_string(),
        password: "wonderland".to_string(),
        scope: "openid".to_string(),
        ..Default::default()
    }
}

fn inspection(token: &str, client_id: &str) -> TokenInspectionRequest {
    TokenInspectionRequest {
        token: token.to_string(),
        token_type_hint: String::new(),
        client_id: client_id.to_string(),
        client_secret: format!("{}-secret", client_id),
    }
}

#[tokio::test]
async fn test_code_exchange_is_single_use() {
    let (server, _) = setup().await;

    let code = server.issue_code(&authorize(""), HOST).await.unwrap();
    assert!(code.message.is_empty());
    assert!(!code.code.is_empty());

    let token = server
        .exchange_token(&code_request(&code.code), &ctx())
        .await
        .unwrap();
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.scope, "openid profile");
    assert_eq!(token.expires_in, 7200);
    assert_eq!(token.id_token, token.access_token);

    let replay = server
        .exchange_token(&code_request(&code.code), &ctx())
        .await
        .unwrap_err();
    assert_eq!(replay.error, TokenErrorCode::InvalidGrant);
    assert!(replay.error_description.starts_with("authorization code has been used"));
}

#[tokio::test]
async fn test_expired_code_is_rejected() {
    let (server, storage) = setup().await;
    let code = server.issue_code(&authorize(""), HOST).await.unwrap();

    let mut stored = storage.get_token_by_code(&code.code).await.unwrap().unwrap();
    stored.code_expire_in = chrono::Utc::now().timestamp() - 1;
    assert!(storage.update_token_by_code(&code.code, &stored).await.unwrap());

    let err = server
        .exchange_token(&code_request(&code.code), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);
    assert!(err.error_description.starts_with("authorization code has expired"));
}

#[tokio::test]
async fn test_code_exchange_errors() {
    let (server, _) = setup().await;
    let code = server.issue_code(&authorize(""), HOST).await.unwrap();

    let mut wrong_secret = code_request(&code.code);
    wrong_secret.client_secret = "nope".to_string();
    let err = server.exchange_token(&wrong_secret, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);

    let err = server
        .exchange_token(&code_request("never-issued"), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);
    assert_eq!(err.error_description, "authorization code: [never-issued] is invalid");

    let err = server.exchange_token(&code_request(""), &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidRequest);

    let mut unknown_client = code_request(&code.code);
    unknown_client.client_id = "ghost".to_string();
    let err = server.exchange_token(&unknown_client, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);

    // The failed attempts above did not consume the code
    assert!(server.exchange_token(&code_request(&code.code), &ctx()).await.is_ok());
}

#[tokio::test]
async fn test_pkce_verifier() {
    let (server, _) = setup().await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = sha256_base64url(verifier.as_bytes());

    let code = server.issue_code(&authorize(&challenge), HOST).await.unwrap();

    let mut request = code_request(&code.code);
    request.client_secret.clear();
    request.code_verifier = "not-the-verifier".to_string();
    let err = server.exchange_token(&request, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);
    assert!(err.error_description.starts_with("verifier is invalid"));

    request.code_verifier = verifier.to_string();
    let token = server.exchange_token(&request, &ctx()).await.unwrap();
    assert!(!token.access_token.is_empty());
}

#[tokio::test]
async fn test_issue_code_rejections() {
    let (server, _) = setup().await;

    let mut unknown_user = authorize("");
    unknown_user.user_id = "built-in/bob".to_string();
    let code = server.issue_code(&unknown_user, HOST).await.unwrap();
    assert!(code.code.is_empty());
    assert_eq!(code.message, "The user: built-in/bob doesn't exist");

    let mut bad_redirect = authorize("");
    bad_redirect.redirect_uri = "https://evil.example.com/callback".to_string();
    let code = server.issue_code(&bad_redirect, HOST).await.unwrap();
    assert!(code.code.is_empty());
    assert!(code.message.contains("doesn't exist in the allowed Redirect URI list"));
}

#[tokio::test]
async fn test_refresh_rotation() {
    let (server, _) = setup().await;
    let first = server.exchange_token(&password_request(), &ctx()).await.unwrap();

    let refresh = TokenRequest {
        grant_type: "refresh_token".to_string(),
        client_id: "web".to_string(),
        client_secret: "web-secret".to_string(),
        refresh_token: first.refresh_token.clone(),
        ..Default::default()
    };
    let second = server.exchange_token(&refresh, &ctx()).await.unwrap();
    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(second.scope, "openid");

    let reused = server.exchange_token(&refresh, &ctx()).await.unwrap_err();
    assert_eq!(reused.error, TokenErrorCode::InvalidGrant);
    assert_eq!(
        reused.error_description,
        "refresh token is invalid, expired or revoked"
    );
}

#[tokio::test]
async fn test_revoked_refresh_token_is_rejected() {
    let (server, _) = setup().await;
    let issued = server.exchange_token(&password_request(), &ctx()).await.unwrap();

    let mut revocation = inspection(&issued.refresh_token, "web");
    revocation.token_type_hint = "refresh_token".to_string();
    server.revoke(&revocation).await.unwrap();

    let refresh = TokenRequest {
        grant_type: "refresh_token".to_string(),
        client_id: "web".to_string(),
        client_secret: "web-secret".to_string(),
        refresh_token: issued.refresh_token,
        ..Default::default()
    };
    let err = server.exchange_token(&refresh, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);
    assert_eq!(err.error_description, "refresh token is invalid, expired or revoked");
}

#[tokio::test]
async fn test_unknown_auth_method_is_invalid_client() {
    let (server, storage) = setup().await;
    let mut odd = application("app-odd", "odd");
    odd.token_endpoint_auth_method = "client_secret_jwt".to_string();
    storage.store_application(&odd).await.unwrap();

    let request = TokenRequest {
        client_id: "odd".to_string(),
        client_secret: "odd-secret".to_string(),
        ..password_request()
    };
    let err = server.exchange_token(&request, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);
    assert_eq!(
        err.error_description,
        "unsupported token_endpoint_auth_method: [client_secret_jwt]"
    );
}

#[tokio::test]
async fn test_password_grant_errors() {
    let (server, _) = setup().await;

    let mut wrong_password = password_request();
    wrong_password.password = "guess".to_string();
    let err = server.exchange_token(&wrong_password, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);

    let mut unknown = password_request();
    unknown.username = "mallory".to_string();
    let err = server.exchange_token(&unknown, &ctx()).await.unwrap_err();
    assert_eq!(err.error_description, "the user does not exist");

    let mut unsupported = password_request();
    unsupported.grant_type = "urn:ietf:params:oauth:grant-type:saml2-bearer".to_string();
    let err = server.exchange_token(&unsupported, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::UnsupportedGrantType);
}

#[tokio::test]
async fn test_dpop_bound_tokens() {
    let (server, _) = setup().await;
    let bound_ctx = RequestContext {
        dpop_proof: Some(dpop_proof("proof-1")),
        ..ctx()
    };
    let token = server.exchange_token(&password_request(), &bound_ctx).await.unwrap();
    assert_eq!(token.token_type, "Bearer");

    let introspection = server
        .introspect(&inspection(&token.access_token, "web"))
        .await
        .unwrap();
    assert!(introspection.active);
    let jkt = introspection.cnf.and_then(|cnf| cnf.jkt);
    assert!(jkt.is_some());

    // The same proof cannot be presented twice
    let err = server.exchange_token(&password_request(), &bound_ctx).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidRequest);

    let refresh = TokenRequest {
        grant_type: "refresh_token".to_string(),
        client_id: "web".to_string(),
        refresh_token: token.refresh_token.clone(),
        ..Default::default()
    };
    let err = server.exchange_token(&refresh, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);

    let proven_ctx = RequestContext {
        dpop_proof: Some(dpop_proof("proof-2")),
        ..ctx()
    };
    let rotated = server.exchange_token(&refresh, &proven_ctx).await.unwrap();
    let introspection = server
        .introspect(&inspection(&rotated.access_token, "web"))
        .await
        .unwrap();
    assert_eq!(introspection.cnf.and_then(|cnf| cnf.jkt), jkt);
}

#[tokio::test]
async fn test_dpop_proof_for_another_endpoint() {
    let (server, _) = setup().await;
    let ctx = RequestContext {
        dpop_proof: Some(dpop_proof("proof-elsewhere")),
        http_uri: "http://localhost:8000/api/login/oauth/introspect".to_string(),
        ..ctx()
    };
    let err = server.exchange_token(&password_request(), &ctx).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidRequest);
    assert!(err.error_description.starts_with("invalid DPoP proof"));
}

#[tokio::test]
async fn test_client_credentials_with_mtls() {
    let (server, _) = setup().await;
    let request = TokenRequest {
        grant_type: "client_credentials".to_string(),
        client_id: "machine".to_string(),
        ..Default::default()
    };

    let acme_ctx = RequestContext {
        client_certificate: Some(ACME_CERT.to_string()),
        ..ctx()
    };
    let token = server.exchange_token(&request, &acme_ctx).await.unwrap();
    assert!(token.refresh_token.is_empty());

    let introspection = server
        .introspect(&inspection(&token.access_token, "machine"))
        .await
        .unwrap();
    assert!(introspection.active);
    assert!(introspection.cnf.and_then(|cnf| cnf.x5t_s256).is_some());

    let globex_ctx = RequestContext {
        client_certificate: Some(GLOBEX_CERT.to_string()),
        ..ctx()
    };
    let err = server.exchange_token(&request, &globex_ctx).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);

    let err = server.exchange_token(&request, &ctx()).await.unwrap_err();
    assert_eq!(
        err.error_description,
        "client certificate is required for mTLS authentication"
    );
}

#[tokio::test]
async fn test_client_credentials_with_private_key_jwt() {
    let (server, _) = setup().await;
    let request = TokenRequest {
        grant_type: "client_credentials".to_string(),
        client_id: "signed".to_string(),
        client_assertion: client_assertion("signed", "assertion-1", 60),
        client_assertion_type: "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
            .to_string(),
        ..Default::default()
    };

    assert!(server.exchange_token(&request, &ctx()).await.is_ok());

    let replay = server.exchange_token(&request, &ctx()).await.unwrap_err();
    assert_eq!(replay.error, TokenErrorCode::InvalidClient);

    let long_lived = TokenRequest {
        client_assertion: client_assertion("signed", "assertion-2", 3600),
        ..request.clone()
    };
    let err = server.exchange_token(&long_lived, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);
    assert!(err.error_description.contains("lifetime"));

    let just_over = TokenRequest {
        client_assertion: client_assertion("signed", "assertion-4", 301),
        ..request.clone()
    };
    let err = server.exchange_token(&just_over, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);
    assert!(err.error_description.contains("lifetime"));

    let at_limit = TokenRequest {
        client_assertion: client_assertion("signed", "assertion-5", 300),
        ..request.clone()
    };
    assert!(server.exchange_token(&at_limit, &ctx()).await.is_ok());

    let other_client = TokenRequest {
        client_assertion: client_assertion("web", "assertion-3", 60),
        ..request
    };
    let err = server.exchange_token(&other_client, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);
}

#[tokio::test]
async fn test_device_flow() {
    let (server, _) = setup().await;
    let started = server.device_authorize("web", "openid", HOST).await.unwrap();
    assert_eq!(started.interval, 5);
    assert!(started.verification_uri.ends_with(&started.user_code));

    let poll = TokenRequest {
        grant_type: DEVICE_CODE_GRANT.to_string(),
        client_id: "web".to_string(),
        device_code: started.device_code.clone(),
        ..Default::default()
    };
    let pending = server.exchange_token(&poll, &ctx()).await.unwrap_err();
    assert_eq!(pending.error, TokenErrorCode::AuthorizationPending);

    assert!(server.device().approve(&started.user_code, "alice").await.unwrap());
    let token = server.exchange_token(&poll, &ctx()).await.unwrap();
    assert_eq!(token.scope, "openid");

    let consumed = server.exchange_token(&poll, &ctx()).await.unwrap_err();
    assert_eq!(consumed.error, TokenErrorCode::ExpiredToken);
}

#[tokio::test]
async fn test_device_code_belongs_to_one_application() {
    let (server, _) = setup().await;
    let started = server.device_authorize("web", "", HOST).await.unwrap();
    server.device().approve(&started.user_code, "alice").await.unwrap();

    let poll = TokenRequest {
        grant_type: DEVICE_CODE_GRANT.to_string(),
        client_id: "signed".to_string(),
        client_assertion: client_assertion("signed", "device-assertion", 60),
        client_assertion_type: "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
            .to_string(),
        device_code: started.device_code.clone(),
        ..Default::default()
    };
    let err = server.exchange_token(&poll, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);

    // The rejected poll leaves the code for its own application
    let owner = TokenRequest {
        grant_type: DEVICE_CODE_GRANT.to_string(),
        client_id: "web".to_string(),
        device_code: started.device_code,
        ..Default::default()
    };
    assert!(server.exchange_token(&owner, &ctx()).await.is_ok());
}

#[tokio::test]
async fn test_introspect_and_revoke() {
    let (server, storage) = setup().await;
    let token = server.exchange_token(&password_request(), &ctx()).await.unwrap();

    let active = server
        .introspect(&inspection(&token.access_token, "web"))
        .await
        .unwrap();
    assert!(active.active);
    assert_eq!(active.username.as_deref(), Some("alice"));
    assert_eq!(active.client_id.as_deref(), Some("web"));
    assert_eq!(active.token_type.as_deref(), Some("access-token"));
    assert!(active.cnf.is_none());

    // Another client cannot revoke it
    server
        .revoke(&inspection(&token.access_token, "machine"))
        .await
        .unwrap();
    assert!(
        server
            .introspect(&inspection(&token.access_token, "web"))
            .await
            .unwrap()
            .active
    );

    server.revoke(&inspection(&token.access_token, "web")).await.unwrap();
    let revoked = server
        .introspect(&inspection(&token.access_token, "web"))
        .await
        .unwrap();
    assert!(!revoked.active);
    assert!(
        storage
            .get_token_by_access_token(&token.access_token)
            .await
            .unwrap()
            .is_some_and(|t| t.expires_in == 0)
    );

    // Unknown tokens are acknowledged
    server.revoke(&inspection("garbage", "web")).await.unwrap();
    assert!(!server.introspect(&inspection("garbage", "web")).await.unwrap().active);

    let mut wrong_secret = inspection(&token.access_token, "web");
    wrong_secret.client_secret = "nope".to_string();
    let err = server.introspect(&wrong_secret).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidClient);
}

#[tokio::test]
async fn test_wechat_mini_program_sign_in() {
    let (server, storage) = setup().await;
    let request = TokenRequest {
        tag: "wechat_miniprogram".to_string(),
        client_id: "web".to_string(),
        client_secret: "web-secret".to_string(),
        code: "wx-login".to_string(),
        username: "mini_user".to_string(),
        ..Default::default()
    };
    let token = server.exchange_token(&request, &ctx()).await.unwrap();
    assert_eq!(token.scope, "");

    let stored = storage
        .get_token_by_access_token(&token.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.code, "session-wx-login");
    assert_eq!(stored.user, "mini_user");

    let bad = TokenRequest {
        code: "bad-code".to_string(),
        ..request
    };
    let err = server.exchange_token(&bad, &ctx()).await.unwrap_err();
    assert_eq!(err.error, TokenErrorCode::InvalidGrant);
}
