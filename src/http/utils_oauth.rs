//! Request plumbing shared by the OAuth handlers.

use axum::{
    Json,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use base64::prelude::*;

use super::context::AppState;
use crate::errors::HttpError;
use crate::oauth::types::{RequestContext, TokenError, TokenErrorCode};

/// Header carrying the DPoP proof (RFC 9449)
pub const DPOP_HEADER: &str = "dpop";

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let status = match self.error {
            TokenErrorCode::InvalidClient => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(self)).into_response()
    }
}

/// Client id and secret from an `Authorization: Basic` header.
///
/// Both parts are form-urlencoded before base64 (RFC 6749 section 2.3.1).
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(BASE64_STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;
    Some((form_decode(client_id)?, form_decode(client_secret)?))
}

fn form_decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Fill client credentials missing from the form body from the Basic header.
pub fn merge_basic_credentials(headers: &HeaderMap, client_id: &mut String, client_secret: &mut String) {
    let Some((basic_id, basic_secret)) = basic_credentials(headers) else {
        return;
    };
    if client_id.is_empty() {
        *client_id = basic_id;
    } else if *client_id != basic_id {
        return;
    }
    if client_secret.is_empty() {
        *client_secret = basic_secret;
    }
}

/// Host the request was addressed to
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default()
}

/// Collect the transport facts the dispatcher needs: host, forwarded client
/// certificate, DPoP proof and the absolute request URI.
pub fn request_context(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<RequestContext, TokenError> {
    let host = request_host(headers, uri);

    let client_certificate = match headers.get(state.config.mtls_client_cert_header.as_ref()) {
        Some(value) => {
            let pem = value
                .to_str()
                .map_err(|e| HttpError::InvalidClientCertificateHeader(e.to_string()))
                .and_then(|raw| {
                    urlencoding::decode(raw)
                        .map(|pem| pem.into_owned())
                        .map_err(|e| HttpError::InvalidClientCertificateHeader(e.to_string()))
                })
                .map_err(|err| {
                    tracing::debug!(error = %err, "client certificate header rejected");
                    TokenError::invalid_request("client certificate header is not URL encoded PEM")
                })?;
            Some(pem).filter(|pem| !pem.trim().is_empty())
        }
        None => None,
    };

    let dpop_proof = headers
        .get(DPOP_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let origin = state.auth_server.claims().origin_from_host(&host);
    Ok(RequestContext {
        http_uri: format!("{}{}", origin, uri.path()),
        http_method: method.as_str().to_string(),
        host,
        client_certificate,
        dpop_proof,
    })
}
