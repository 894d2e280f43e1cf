//! Application state shared by every request handler.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Config;
use crate::oauth::auth_server::AuthServer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Grant dispatcher with its validators and stores
    pub auth_server: Arc<AuthServer>,
}

impl FromRef<AppState> for Arc<AuthServer> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_server.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}
