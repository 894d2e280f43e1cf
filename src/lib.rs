//! tokenwright: an OAuth 2.0 / OpenID Connect token service.
//!
//! Issues, refreshes, introspects and revokes JWT access tokens for registered
//! applications, with mTLS and DPoP sender-constraining.

pub mod config;
pub mod errors;
pub mod http;
pub mod oauth;
pub mod storage;
