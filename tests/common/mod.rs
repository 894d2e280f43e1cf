//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::Arc;
use tokenwright::{
    errors::WechatError,
    oauth::{
        AuthServer, ServerSettings,
        types::{Application, Cert, RequestContext, User},
        wechat::{WechatSession, WechatSessionProvider},
    },
    storage::{
        ApplicationStore, CertStore, MemoryOAuthStorage, MemoryReplayStore, UserDirectory,
    },
};
use tokio_util::sync::CancellationToken;

pub const RSA_CERT: &str = include_str!("../fixtures/signing_rsa_cert.pem");
pub const RSA_KEY: &str = include_str!("../fixtures/signing_rsa_key.pem");
pub const EC_KEY: &str = include_str!("../fixtures/signing_ec_key.pem");
pub const EC_JWK: &str = include_str!("../fixtures/signing_ec_jwk.json");
pub const ACME_CERT: &str = include_str!("../fixtures/client_acme_cert.pem");
pub const GLOBEX_CERT: &str = include_str!("../fixtures/client_globex_cert.pem");

pub const HOST: &str = "localhost:8000";
pub const TOKEN_URI: &str = "http://localhost:8000/api/login/oauth/access_token";
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

pub struct StaticWechat;

#[async_trait]
impl WechatSessionProvider for StaticWechat {
    async fn get_session_by_code(
        &self,
        _provider: &str,
        code: &str,
    ) -> Result<WechatSession, WechatError> {
        if code == "bad-code" {
            return Err(WechatError::Rejected(40029, "invalid code".to_string()));
        }
        Ok(WechatSession {
            openid: format!("openid-{}", code),
            unionid: String::new(),
            session_key: format!("session-{}", code),
        })
    }
}

pub fn application(name: &str, client_id: &str) -> Application {
    Application {
        owner: "admin".to_string(),
        name: name.to_string(),
        organization: "built-in".to_string(),
        client_id: client_id.to_string(),
        client_secret: format!("{}-secret", client_id),
        cert: "cert-rsa".to_string(),
        grant_types: vec![
            "password".to_string(),
            "client_credentials".to_string(),
            "refresh_token".to_string(),
            DEVICE_CODE_GRANT.to_string(),
        ],
        expire_in_hours: 2.0,
        refresh_expire_in_hours: 24.0,
        redirect_uris: vec!["https://app.example.com/callback".to_string()],
        ..Default::default()
    }
}

/// A dispatcher over in-memory stores holding `app-example` (client `web`),
/// an mTLS client (`machine`) and the user `built-in/alice`.
pub async fn setup() -> (Arc<AuthServer>, Arc<MemoryOAuthStorage>) {
    let storage = Arc::new(MemoryOAuthStorage::new());
    storage
        .store_cert(&Cert {
            owner: "admin".to_string(),
            name: "cert-rsa".to_string(),
            crypto_algorithm: "RS256".to_string(),
            certificate: RSA_CERT.to_string(),
            private_key: RSA_KEY.to_string(),
        })
        .await
        .unwrap();

    let mut web = application("app-example", "web");
    web.enable_sign_up = true;
    web.wechat_mini_program_provider = Some("mp".to_string());
    storage.store_application(&web).await.unwrap();

    let mut machine = application("app-machine", "machine");
    machine.token_endpoint_auth_method = "tls_client_auth".to_string();
    machine.enable_mtls = true;
    machine.mtls_auth_method = "tls_client_auth".to_string();
    machine.allowed_client_cert_issuers = vec!["Acme".to_string()];
    storage.store_application(&machine).await.unwrap();

    let mut signed = application("app-signed", "signed");
    signed.token_endpoint_auth_method = "private_key_jwt".to_string();
    storage.store_application(&signed).await.unwrap();

    storage
        .add_user(&User {
            owner: "built-in".to_string(),
            name: "alice".to_string(),
            id: "u-alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "wonderland".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let server = AuthServer::new(
        storage.clone(),
        Arc::new(MemoryReplayStore::new()),
        Arc::new(StaticWechat),
        ServerSettings::default(),
        CancellationToken::new(),
    );
    (Arc::new(server), storage)
}

pub fn ctx() -> RequestContext {
    RequestContext {
        host: HOST.to_string(),
        http_method: "POST".to_string(),
        http_uri: TOKEN_URI.to_string(),
        ..Default::default()
    }
}

pub fn dpop_proof(jti: &str) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.typ = Some("dpop+jwt".to_string());
    header.jwk = Some(serde_json::from_str(EC_JWK).unwrap());
    let claims = json!({
        "jti": jti,
        "htm": "POST",
        "htu": TOKEN_URI,
        "iat": chrono::Utc::now().timestamp(),
    });
    let key = EncodingKey::from_ec_pem(EC_KEY.as_bytes()).unwrap();
    encode(&header, &claims, &key).unwrap()
}

pub fn client_assertion(client_id: &str, jti: &str, lifetime: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims: Value = json!({
        "iss": client_id,
        "sub": client_id,
        "aud": TOKEN_URI,
        "iat": now,
        "exp": now + lifetime,
        "jti": jti,
    });
    let key = EncodingKey::from_rsa_pem(RSA_KEY.as_bytes()).unwrap();
    encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}
