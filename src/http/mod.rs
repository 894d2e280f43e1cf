//! Axum HTTP surface for the token, introspection, revocation and device
//! authorization endpoints.

pub mod context;
mod handler_device_auth;
mod handler_token;
mod handler_token_inspection;
pub mod server;
mod utils_oauth;

pub use context::AppState;
pub use server::build_router;
