//! Handles POST /api/login/oauth/introspect (RFC 7662) and
//! POST /api/login/oauth/revoke (RFC 7009)

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::{context::AppState, utils_oauth::merge_basic_credentials};
use crate::oauth::{
    auth_server::TokenInspectionRequest,
    types::{IntrospectionResponse, TokenError},
};

pub async fn handle_introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(mut request): Form<TokenInspectionRequest>,
) -> Result<Json<IntrospectionResponse>, TokenError> {
    merge_basic_credentials(&headers, &mut request.client_id, &mut request.client_secret);
    state.auth_server.introspect(&request).await.map(Json)
}

pub async fn handle_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(mut request): Form<TokenInspectionRequest>,
) -> Result<StatusCode, TokenError> {
    merge_basic_credentials(&headers, &mut request.client_id, &mut request.client_secret);
    state.auth_server.revoke(&request).await?;
    Ok(StatusCode::OK)
}
