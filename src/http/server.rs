//! Router assembling the OAuth endpoints.

use axum::{
    Router,
    http::{Method, header},
    routing::post,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    context::AppState,
    handler_device_auth::handle_device_auth,
    handler_token::handle_access_token,
    handler_token_inspection::{handle_introspect, handle_revoke},
};

/// Build the application router
pub fn build_router(ctx: AppState) -> Router {
    let oauth_routes = Router::new()
        .route("/access_token", post(handle_access_token))
        .route("/introspect", post(handle_introspect))
        .route("/revoke", post(handle_revoke));

    let api_routes = Router::new()
        .nest("/login/oauth", oauth_routes)
        .route("/device-auth", post(handle_device_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static("dpop"),
        ]);

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
