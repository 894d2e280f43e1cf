//! Signing and verification key material.
//!
//! Private keys come from the PEM stored on a [`Cert`]; public keys are taken from the
//! subject public key info of the PEM certificate and re-encoded as a `PUBLIC KEY`
//! block for `jsonwebtoken`. P-521 keys go through [`crate::oauth::es512`] instead.

use crate::errors::KeyError;
use crate::oauth::es512::{self, SECP521R1_OID};
use crate::oauth::types::Cert;
use base64::prelude::*;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Map, Value};
use x509_parser::oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION};
use x509_parser::prelude::*;

/// Key families tokens can be signed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA keys, used with RS* and PS* algorithms
    Rsa,
    /// P-256 and P-384 keys, used with ES256 and ES384
    Ec,
    /// P-521 keys, used with ES512
    P521,
}

/// A resolved `token_signing_method`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Jwt(Algorithm),
    Es512,
}

/// Algorithms accepted on signed input (client assertions, stored tokens).
pub const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Resolve an application's `token_signing_method`.
///
/// Empty and unrecognized values fall back to RS256.
pub fn signing_algorithm(method: &str) -> SigningAlgorithm {
    let alg = match method {
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        "PS256" => Algorithm::PS256,
        "PS384" => Algorithm::PS384,
        "PS512" => Algorithm::PS512,
        "ES256" => Algorithm::ES256,
        "ES384" => Algorithm::ES384,
        "ES512" => return SigningAlgorithm::Es512,
        _ => Algorithm::RS256,
    };
    SigningAlgorithm::Jwt(alg)
}

/// The key family an algorithm signs with, or `None` for symmetric and EdDSA algorithms.
pub fn algorithm_family(alg: Algorithm) -> Option<KeyFamily> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Some(KeyFamily::Rsa),
        Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
        _ => None,
    }
}

fn require_private_key(cert: &Cert) -> Result<(), KeyError> {
    if cert.private_key.is_empty() {
        return Err(KeyError::InvalidPrivateKey(format!(
            "the private key field of the cert \"{}\" should not be empty",
            cert.name
        )));
    }
    Ok(())
}

/// Load the private key of a certificate for signing with `alg`
pub fn encoding_key(cert: &Cert, alg: Algorithm) -> Result<EncodingKey, KeyError> {
    require_private_key(cert)?;
    let key = match algorithm_family(alg) {
        Some(KeyFamily::Rsa) => EncodingKey::from_rsa_pem(cert.private_key.as_bytes()),
        Some(KeyFamily::Ec) => EncodingKey::from_ec_pem(cert.private_key.as_bytes()),
        Some(KeyFamily::P521) | None => {
            return Err(KeyError::UnsupportedSigningAlgorithm(format!("{:?}", alg)));
        }
    };
    key.map_err(|e| KeyError::InvalidPrivateKey(format!("cert \"{}\": {}", cert.name, e)))
}

/// Private key of a cert, bound to the algorithm and `kid` it signs with
pub enum TokenSigner {
    Jwt { header: Header, key: EncodingKey },
    Es512 { kid: String, key: p521::ecdsa::SigningKey },
}

impl TokenSigner {
    pub fn new(cert: &Cert, alg: SigningAlgorithm) -> Result<Self, KeyError> {
        match alg {
            SigningAlgorithm::Jwt(alg) => {
                let key = encoding_key(cert, alg)?;
                let mut header = Header::new(alg);
                header.kid = Some(cert.name.clone());
                Ok(Self::Jwt { header, key })
            }
            SigningAlgorithm::Es512 => {
                require_private_key(cert)?;
                let key = es512::signing_key_from_pem(&cert.private_key).map_err(|e| {
                    KeyError::InvalidPrivateKey(format!("cert \"{}\": {}", cert.name, e))
                })?;
                Ok(Self::Es512 {
                    kid: cert.name.clone(),
                    key,
                })
            }
        }
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        match self {
            Self::Jwt { header, key } => {
                encode(header, claims, key).map_err(|e| KeyError::SigningFailed(e.to_string()))
            }
            Self::Es512 { kid, key } => {
                let mut header = Map::new();
                header.insert("typ".to_string(), Value::from("JWT"));
                header.insert("kid".to_string(), Value::from(kid.as_str()));
                es512::encode(header, claims, key)
            }
        }
    }
}

/// Verification half of a certificate's key
pub enum VerificationKey {
    Jwt(DecodingKey),
    P521(p521::ecdsa::VerifyingKey),
}

/// Public key extracted from a PEM certificate
pub struct CertificatePublicKey {
    pub family: KeyFamily,
    pub key: VerificationKey,
}

impl CertificatePublicKey {
    /// Whether `alg` may be verified with this key through `jsonwebtoken`
    pub fn supports(&self, alg: Algorithm) -> bool {
        algorithm_family(alg) == Some(self.family)
    }

    pub fn decoding_key(&self) -> Option<&DecodingKey> {
        match &self.key {
            VerificationKey::Jwt(key) => Some(key),
            VerificationKey::P521(_) => None,
        }
    }

    pub fn p521(&self) -> Option<&p521::ecdsa::VerifyingKey> {
        match &self.key {
            VerificationKey::P521(key) => Some(key),
            VerificationKey::Jwt(_) => None,
        }
    }
}

/// Extract the public key from a PEM encoded X.509 certificate
pub fn public_key_from_certificate(cert_pem: &str) -> Result<CertificatePublicKey, KeyError> {
    if cert_pem.trim().is_empty() {
        return Err(KeyError::InvalidCertificate(
            "the certificate field should not be empty".to_string(),
        ));
    }

    let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| KeyError::InvalidCertificate(format!("Failed to parse X.509 PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents).map_err(|e| {
        KeyError::InvalidCertificate(format!("Failed to parse X.509 certificate: {e}"))
    })?;

    // RSASSA-PSS keys (id-RSASSA-PSS) are not accepted; PS* tokens use plain RSA keys
    let spki = cert.public_key();
    let algorithm = &spki.algorithm.algorithm;
    let family = if *algorithm == OID_PKCS1_RSAENCRYPTION {
        KeyFamily::Rsa
    } else if *algorithm == OID_KEY_TYPE_EC_PUBLIC_KEY {
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|params| params.as_oid().ok())
            .map(|oid| oid.to_id_string());
        if curve.as_deref() == Some(SECP521R1_OID) {
            KeyFamily::P521
        } else {
            KeyFamily::Ec
        }
    } else {
        return Err(KeyError::UnsupportedKeyAlgorithm(algorithm.to_id_string()));
    };

    let public_key_pem = spki_to_pem(spki.raw);
    let key = match family {
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(public_key_pem.as_bytes()).map(VerificationKey::Jwt),
        KeyFamily::Ec => DecodingKey::from_ec_pem(public_key_pem.as_bytes()).map(VerificationKey::Jwt),
        KeyFamily::P521 => {
            let key = es512::verifying_key_from_sec1(&spki.subject_public_key.data)?;
            return Ok(CertificatePublicKey {
                family,
                key: VerificationKey::P521(key),
            });
        }
    }
    .map_err(|e| KeyError::InvalidCertificate(format!("Failed to load public key: {e}")))?;

    Ok(CertificatePublicKey { family, key })
}

fn spki_to_pem(spki_der: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(spki_der);
    let body = encoded
        .as_bytes()
        .chunks(64)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", body)
}
