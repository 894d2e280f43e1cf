//! `private_key_jwt` client assertions (RFC 7523).
//!
//! Validation runs in two phases. [`read_assertion_identity`] decodes the payload
//! without checking the signature so the caller can find the client and its
//! certificate; [`verify_client_assertion`] then checks the signature and every
//! time-based claim against a single `now`.

use crate::errors::ClientAuthError;
use crate::oauth::claims::string_or_vec;
use crate::oauth::es512;
use crate::oauth::keys::{ASYMMETRIC_ALGORITHMS, CertificatePublicKey};
use base64::prelude::*;
use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashSet;

pub const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Path suffix accepted as the token endpoint audience on the request's origin
pub const TOKEN_ENDPOINT_PATH: &str = "/login/oauth/access_token";

/// Longest accepted `exp - iat`, in seconds
pub const MAX_ASSERTION_LIFETIME: i64 = 300;

/// How far in the future `iat` may be, in seconds
pub const MAX_ASSERTION_CLOCK_SKEW: i64 = 300;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub sub: String,
    #[serde(deserialize_with = "string_or_vec")]
    pub aud: Vec<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nbf: Option<i64>,
    pub jti: String,
}

fn invalid(message: impl Into<String>) -> ClientAuthError {
    ClientAuthError::InvalidAssertion(message.into())
}

/// Phase one: read the unverified identity claims.
///
/// `sub` must be present and equal to `iss`; both name the client.
pub fn read_assertion_identity(assertion: &str) -> Result<ClientAssertionClaims, ClientAuthError> {
    let parts: Vec<&str> = assertion.split('.').collect();
    if parts.len() != 3 {
        return Err(invalid("Invalid JWT format"));
    }

    let payload = BASE64_URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| invalid("Invalid JWT claims"))?;
    let claims: ClientAssertionClaims =
        serde_json::from_slice(&payload).map_err(|_| invalid("Invalid JWT claims JSON"))?;

    if claims.sub.is_empty() {
        return Err(invalid("Missing 'sub' claim"));
    }
    if claims.sub != claims.iss {
        return Err(invalid(format!(
            "issuer [{}] does not match subject [{}]",
            claims.iss, claims.sub
        )));
    }
    Ok(claims)
}

/// `scheme://host[:port]` of an absolute URL
fn origin_of(url: &str) -> &str {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].find('/') {
        Some(i) => &url[..authority_start + i],
        None => url,
    }
}

fn audience_matches(audience: &[String], token_endpoint: &str) -> bool {
    let origin = origin_of(token_endpoint);
    audience.iter().any(|aud| {
        aud == token_endpoint
            || (aud.ends_with(TOKEN_ENDPOINT_PATH)
                && aud
                    .strip_prefix(origin)
                    .is_some_and(|path| path.starts_with('/')))
    })
}

/// Phase two: verify the signature and the time-bound claims.
pub fn verify_client_assertion(
    assertion: &str,
    public_key: &CertificatePublicKey,
    token_endpoint: &str,
    now: i64,
) -> Result<ClientAssertionClaims, ClientAuthError> {
    let claims = verify_signature(assertion, public_key)?;

    if !audience_matches(&claims.aud, token_endpoint) {
        return Err(invalid("audience does not include the token endpoint"));
    }

    let exp = claims
        .exp
        .ok_or_else(|| invalid("expiration time (exp) is required"))?;
    if exp <= now {
        return Err(invalid("client assertion has expired"));
    }

    if let Some(iat) = claims.iat {
        if iat > now + MAX_ASSERTION_CLOCK_SKEW {
            return Err(invalid("issued-at time (iat) is in the future"));
        }
        if exp - iat > MAX_ASSERTION_LIFETIME {
            return Err(invalid(format!(
                "client assertion lifetime exceeds {} seconds",
                MAX_ASSERTION_LIFETIME
            )));
        }
    }

    if claims.nbf.is_some_and(|nbf| nbf > now) {
        return Err(invalid("client assertion not yet valid (nbf)"));
    }

    if claims.jti.is_empty() {
        return Err(invalid("Missing 'jti' claim"));
    }

    Ok(claims)
}

fn verify_signature(
    assertion: &str,
    public_key: &CertificatePublicKey,
) -> Result<ClientAssertionClaims, ClientAuthError> {
    if es512::is_es512(assertion) {
        let key = public_key.p521().ok_or_else(|| {
            invalid("signing algorithm ES512 does not match the client certificate key")
        })?;
        return es512::decode(assertion, key)
            .map_err(|e| invalid(format!("failed to validate client assertion: {e}")));
    }

    let header = decode_header(assertion).map_err(|e| invalid(format!("Invalid JWT header: {e}")))?;
    if !ASYMMETRIC_ALGORITHMS.contains(&header.alg) {
        return Err(invalid(format!("unsupported signing algorithm: {:?}", header.alg)));
    }
    let key = public_key
        .decoding_key()
        .filter(|_| public_key.supports(header.alg))
        .ok_or_else(|| {
            invalid(format!(
                "signing algorithm {:?} does not match the client certificate key",
                header.alg
            ))
        })?;

    // Time claims are checked by the caller against one clock reading
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<ClientAssertionClaims>(assertion, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| invalid(format!("failed to validate client assertion: {e}")))
}
