//! HTTP surface tests driving the router with axum-test.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::TestServer;
use base64::prelude::*;
use common::*;
use serde_json::Value;
use std::sync::Arc;
use tokenwright::{
    config::Config,
    http::{AppState, build_router},
};

async fn test_server() -> TestServer {
    let (auth_server, _) = setup().await;
    let app = build_router(AppState {
        config: Arc::new(Config::default()),
        auth_server,
    });
    TestServer::new(app).unwrap()
}

fn host() -> (HeaderName, HeaderValue) {
    (header::HOST, HeaderValue::from_static(HOST))
}

fn basic(client_id: &str, client_secret: &str) -> HeaderValue {
    let encoded = BASE64_STANDARD.encode(format!("{}:{}", client_id, client_secret));
    HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap()
}

#[tokio::test]
async fn test_password_grant_over_http() {
    let server = test_server().await;
    let (name, value) = host();

    let response = server
        .post("/api/login/oauth/access_token")
        .add_header(name, value)
        .add_header(header::AUTHORIZATION, basic("web", "web-secret"))
        .form(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", "wonderland"),
            ("scope", "openid"),
        ])
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "openid");
    assert_eq!(body["expires_in"], 7200);
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_invalid_client_is_401() {
    let server = test_server().await;

    let response = server
        .post("/api/login/oauth/access_token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "web"),
            ("client_secret", "wrong"),
        ])
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");
    assert_eq!(
        body["error_description"],
        "client_secret is invalid for application: [admin/app-example]"
    );
}

#[tokio::test]
async fn test_other_errors_are_400() {
    let server = test_server().await;

    let response = server
        .post("/api/login/oauth/access_token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
            ("code", "missing"),
        ])
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_forwarded_client_certificate() {
    let server = test_server().await;
    let (name, value) = host();
    let encoded = urlencoding::encode(ACME_CERT).into_owned();

    let response = server
        .post("/api/login/oauth/access_token")
        .add_header(name, value)
        .add_header(
            HeaderName::from_static("x-client-cert"),
            HeaderValue::from_str(&encoded).unwrap(),
        )
        .form(&[("grant_type", "client_credentials"), ("client_id", "machine")])
        .await;
    response.assert_status_ok();
    let token: Value = response.json();

    let response = server
        .post("/api/login/oauth/introspect")
        .add_header(header::AUTHORIZATION, basic("machine", "machine-secret"))
        .form(&[("token", token["access_token"].as_str().unwrap())])
        .await;
    response.assert_status_ok();
    let introspection: Value = response.json();
    assert_eq!(introspection["active"], true);
    assert!(introspection["cnf"]["x5t#S256"].is_string());
}

#[tokio::test]
async fn test_dpop_header_is_checked_against_the_endpoint() {
    let server = test_server().await;
    let (name, value) = host();

    let response = server
        .post("/api/login/oauth/access_token")
        .add_header(name, value)
        .add_header(
            HeaderName::from_static("dpop"),
            HeaderValue::from_str(&dpop_proof("http-proof")).unwrap(),
        )
        .form(&[
            ("grant_type", "password"),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
            ("username", "alice"),
            ("password", "wonderland"),
        ])
        .await;
    response.assert_status_ok();
    let token: Value = response.json();

    let response = server
        .post("/api/login/oauth/introspect")
        .form(&[
            ("token", token["access_token"].as_str().unwrap()),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
        ])
        .await;
    let introspection: Value = response.json();
    assert!(introspection["cnf"]["jkt"].is_string());
}

#[tokio::test]
async fn test_revoke_then_introspect() {
    let server = test_server().await;

    let token: Value = server
        .post("/api/login/oauth/access_token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
            ("username", "alice"),
            ("password", "wonderland"),
        ])
        .await
        .json();
    let access_token = token["access_token"].as_str().unwrap().to_string();

    server
        .post("/api/login/oauth/revoke")
        .add_header(header::AUTHORIZATION, basic("web", "web-secret"))
        .form(&[("token", access_token.as_str()), ("token_type_hint", "access_token")])
        .await
        .assert_status_ok();

    let introspection: Value = server
        .post("/api/login/oauth/introspect")
        .add_header(header::AUTHORIZATION, basic("web", "web-secret"))
        .form(&[("token", access_token.as_str())])
        .await
        .json();
    assert_eq!(introspection, serde_json::json!({"active": false}));

    server
        .post("/api/login/oauth/revoke")
        .form(&[("token", access_token.as_str())])
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_device_authorization_endpoint() {
    let server = test_server().await;
    let (name, value) = host();

    let response = server
        .post("/api/device-auth")
        .add_header(name, value)
        .form(&[("client_id", "web"), ("scope", "openid")])
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["expires_in"], 120);
    assert_eq!(body["interval"], 5);
    let user_code = body["user_code"].as_str().unwrap();
    assert_eq!(
        body["verification_uri"],
        format!("http://localhost:8000/login/oauth/device/{}", user_code)
    );

    let response = server
        .post("/api/device-auth")
        .form(&[("client_id", "ghost")])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
