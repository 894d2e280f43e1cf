//! ES512 (ECDSA over P-521 with SHA-512) compact JWS.
//!
//! `jsonwebtoken` stops at P-384, so tokens, client assertions and DPoP proofs
//! carrying `alg: ES512` are signed and verified here with `p521`.

use crate::errors::KeyError;
use base64::prelude::*;
use p521::ecdsa::signature::{Signer, Verifier};
use p521::ecdsa::{Signature, SigningKey, VerifyingKey};
use p521::pkcs8::DecodePrivateKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const ES512: &str = "ES512";

/// secp521r1, as found in a certificate's EC key parameters
pub const SECP521R1_OID: &str = "1.3.132.0.35";

/// Byte length of a P-521 field element
const COORDINATE_LENGTH: usize = 66;

/// Read the `alg` header member without verifying anything
pub fn header_algorithm(token: &str) -> Option<String> {
    let segment = token.split('.').next()?;
    let header = BASE64_URL_SAFE_NO_PAD.decode(segment).ok()?;
    let header: Value = serde_json::from_slice(&header).ok()?;
    header.get("alg").and_then(Value::as_str).map(str::to_string)
}

pub fn is_es512(token: &str) -> bool {
    header_algorithm(token).as_deref() == Some(ES512)
}

/// Load a P-521 private key from a PKCS#8 or SEC1 PEM
pub fn signing_key_from_pem(pem: &str) -> Result<SigningKey, KeyError> {
    let secret = p521::SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| p521::SecretKey::from_sec1_pem(pem))
        .map_err(|e| KeyError::InvalidPrivateKey(format!("not a P-521 key: {}", e)))?;
    SigningKey::from_bytes(&secret.to_bytes())
        .map_err(|e| KeyError::InvalidPrivateKey(format!("not a P-521 key: {}", e)))
}

/// Load an uncompressed or compressed SEC1 point
pub fn verifying_key_from_sec1(point: &[u8]) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_sec1_bytes(point)
        .map_err(|e| KeyError::InvalidPublicKey(format!("not a P-521 point: {}", e)))
}

/// Load the public key of an EC JWK on the P-521 curve
pub fn verifying_key_from_jwk(jwk: &Value) -> Result<VerifyingKey, KeyError> {
    let member = |name: &str| jwk.get(name).and_then(Value::as_str).unwrap_or_default();
    if member("kty") != "EC" || member("crv") != "P-521" {
        return Err(KeyError::InvalidPublicKey(format!(
            "ES512 requires an EC P-521 key, got kty [{}] crv [{}]",
            member("kty"),
            member("crv")
        )));
    }

    let coordinate = |name: &str| -> Result<Vec<u8>, KeyError> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(member(name))
            .map_err(|e| KeyError::InvalidPublicKey(format!("jwk {}: {}", name, e)))?;
        if bytes.len() != COORDINATE_LENGTH {
            return Err(KeyError::InvalidPublicKey(format!(
                "jwk {} must be {} bytes",
                name, COORDINATE_LENGTH
            )));
        }
        Ok(bytes)
    };

    let mut point = Vec::with_capacity(1 + 2 * COORDINATE_LENGTH);
    point.push(0x04);
    point.extend(coordinate("x")?);
    point.extend(coordinate("y")?);
    verifying_key_from_sec1(&point)
}

/// Sign `claims` as a compact JWS. `alg` is set on the given header members.
pub fn encode<T: Serialize>(
    mut header: Map<String, Value>,
    claims: &T,
    key: &SigningKey,
) -> Result<String, KeyError> {
    header.insert("alg".to_string(), Value::from(ES512));
    let header = serde_json::to_vec(&header).map_err(|e| KeyError::SigningFailed(e.to_string()))?;
    let claims = serde_json::to_vec(claims).map_err(|e| KeyError::SigningFailed(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(header),
        BASE64_URL_SAFE_NO_PAD.encode(claims)
    );
    let signature: Signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{}.{}",
        signing_input,
        BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

/// Verify an ES512 compact JWS and decode its payload.
///
/// Only the signature is checked; time claims are left to the caller.
pub fn decode<T: DeserializeOwned>(token: &str, key: &VerifyingKey) -> Result<T, KeyError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(KeyError::InvalidJws("Invalid JWT format".to_string()));
    }
    if !is_es512(token) {
        return Err(KeyError::InvalidJws("alg is not ES512".to_string()));
    }

    let signature = BASE64_URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| KeyError::InvalidJws(format!("signature encoding: {}", e)))?;
    let signature = Signature::from_slice(&signature)
        .map_err(|_| KeyError::InvalidJws("malformed signature".to_string()))?;

    let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|_| KeyError::InvalidJws("InvalidSignature".to_string()))?;

    let payload = BASE64_URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| KeyError::InvalidJws(format!("payload encoding: {}", e)))?;
    serde_json::from_slice(&payload).map_err(|e| KeyError::InvalidJws(format!("payload: {}", e)))
}
