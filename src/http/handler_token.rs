//! Handles POST /api/login/oauth/access_token

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, Method, Uri},
};

use super::{
    context::AppState,
    utils_oauth::{merge_basic_credentials, request_context},
};
use crate::oauth::types::{TokenError, TokenRequest, TokenWrapper};

pub async fn handle_access_token(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Form(mut request): Form<TokenRequest>,
) -> Result<Json<TokenWrapper>, TokenError> {
    merge_basic_credentials(&headers, &mut request.client_id, &mut request.client_secret);
    let ctx = request_context(&state, &method, &uri, &headers)?;

    match state.auth_server.exchange_token(&request, &ctx).await {
        Ok(token) => Ok(Json(token)),
        Err(err) => {
            tracing::info!(
                grant_type = %request.grant_type,
                client_id = %request.client_id,
                error = %err,
                "token request rejected"
            );
            Err(err)
        }
    }
}
