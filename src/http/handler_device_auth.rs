//! Handles POST /api/device-auth (RFC 8628 device authorization request)

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, Uri},
};
use serde::Deserialize;

use super::{
    context::AppState,
    utils_oauth::{basic_credentials, request_host},
};
use crate::oauth::types::{DeviceAuthResponse, TokenError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceAuthForm {
    pub client_id: String,
    pub scope: String,
}

pub async fn handle_device_auth(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(mut form): Form<DeviceAuthForm>,
) -> Result<Json<DeviceAuthResponse>, TokenError> {
    if form.client_id.is_empty() {
        if let Some((client_id, _)) = basic_credentials(&headers) {
            form.client_id = client_id;
        }
    }
    let host = request_host(&headers, &uri);
    state
        .auth_server
        .device_authorize(&form.client_id, &form.scope, &host)
        .await
        .map(Json)
}
