//! Mutual-TLS client authentication (RFC 8705).
//!
//! TLS is terminated in front of the server; the client certificate reaches us as
//! PEM forwarded in a request header and is validated against the application's
//! mTLS settings.

use crate::errors::MtlsError;
use crate::oauth::types::{Application, sha256_base64url};
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

pub const TLS_CLIENT_AUTH: &str = "tls_client_auth";
pub const SELF_SIGNED_TLS_CLIENT_AUTH: &str = "self_signed_tls_client_auth";

/// A parsed client certificate
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    not_before: i64,
    not_after: i64,
}

impl ClientCertificate {
    pub fn from_pem(pem: &str) -> Result<Self, MtlsError> {
        let (_, pem) = parse_x509_pem(pem.trim().as_bytes())
            .map_err(|e| MtlsError::InvalidCertificate(format!("Failed to parse PEM: {e}")))?;
        Self::from_der(&pem.contents)
    }

    pub fn from_der(der: &[u8]) -> Result<Self, MtlsError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| MtlsError::InvalidCertificate(format!("Failed to parse X.509: {e}")))?;
        let validity = cert.validity();
        Ok(Self {
            der: cert.as_raw().to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
    }
}

pub fn is_mtls_enabled(app: &Application) -> bool {
    app.enable_mtls
}

/// An application supports `method` only when mTLS is on and that exact method is configured.
pub fn supports_mtls_auth_method(app: &Application, method: &str) -> bool {
    is_mtls_enabled(app) && !app.mtls_auth_method.is_empty() && app.mtls_auth_method == method
}

/// Check the validity window and, for `tls_client_auth`, the issuer allow-list.
pub fn validate_client_certificate(
    cert: Option<&ClientCertificate>,
    app: &Application,
    now: DateTime<Utc>,
) -> Result<(), MtlsError> {
    let cert = cert.ok_or(MtlsError::CertificateRequired)?;

    let now = now.timestamp();
    if now < cert.not_before {
        return Err(MtlsError::NotYetValid);
    }
    if now > cert.not_after {
        return Err(MtlsError::Expired);
    }

    if app.mtls_auth_method == TLS_CLIENT_AUTH && !app.allowed_client_cert_issuers.is_empty() {
        let allowed = app
            .allowed_client_cert_issuers
            .iter()
            .any(|issuer| cert.issuer.contains(issuer.as_str()));
        if !allowed {
            return Err(MtlsError::IssuerNotAllowed(cert.issuer.clone()));
        }
    }

    Ok(())
}

/// base64url SHA-256 of the DER encoding, the `x5t#S256` confirmation value
pub fn certificate_fingerprint(cert: &ClientCertificate) -> String {
    sha256_base64url(&cert.der)
}

/// Chain building against trusted roots is not performed; self-signed certificates
/// and issuer-allow-listed certificates are accepted once their validity is checked.
// TODO: verify against a configured CA bundle once trust anchors are part of Config.
pub fn verify_certificate_chain(_cert: &ClientCertificate) -> Result<(), MtlsError> {
    Ok(())
}

pub fn certificate_subject(cert: &ClientCertificate) -> &str {
    cert.subject()
}

/// Validate the forwarded certificate for an mTLS-enabled application.
pub fn validate_mtls_request(
    certificate_pem: Option<&str>,
    app: &Application,
) -> Result<ClientCertificate, MtlsError> {
    if !is_mtls_enabled(app) {
        return Err(MtlsError::NotEnabled);
    }

    let pem = certificate_pem
        .filter(|pem| !pem.trim().is_empty())
        .ok_or(MtlsError::CertificateRequired)?;
    let cert = ClientCertificate::from_pem(pem)?;

    validate_client_certificate(Some(&cert), app, Utc::now())?;
    verify_certificate_chain(&cert)?;

    tracing::debug!(
        subject = certificate_subject(&cert),
        issuer = cert.issuer(),
        "client certificate accepted"
    );
    Ok(cert)
}
