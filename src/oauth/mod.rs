//! OAuth 2.0 / OIDC authorization server core: grant dispatch, client
//! authentication, sender-constrained tokens and consent.

pub mod auth_server;
pub mod claim_attributes;
pub mod claims;
pub mod cleanup;
pub mod client_assertion;
pub mod client_auth;
pub mod consent;
pub mod device;
pub mod dpop;
pub mod es512;
pub mod keys;
pub mod mtls;
pub mod phone;
pub mod types;
pub mod wechat;

// Re-export frequently used items from each module
pub use crate::storage::{
    inmemory::MemoryOAuthStorage,
    traits::{
        ApplicationStore, CertStore, ConsentStore, DeviceAuthStore, OAuthStorage, ReplayStore,
        TokenStore, UserDirectory,
    },
};
pub use auth_server::{
    AuthServer, AuthorizeRequest, LoginCheck, ServerSettings, TOKEN_ENDPOINT,
    TokenInspectionRequest,
};
pub use claims::{ClaimsBuilder, ParsedClaims};
pub use cleanup::{CleanupSettings, run_cleanup_loop};
pub use client_auth::{ClientAuthOutcome, ClientAuthRegistry};
pub use consent::{ConsentEngine, ConsentPolicy};
pub use device::DeviceFlow;
pub use dpop::{DPoPProof, DPoPSettings, DPoPValidator};
pub use types::{
    Application, GrantType, IntrospectionResponse, RequestContext, Token, TokenError,
    TokenErrorCode, TokenRequest, TokenWrapper,
};
pub use wechat::{HttpWechatSessionProvider, WechatSessionProvider};
