//! Claims builder: turns a user record and grant context into signed JWTs.
//!
//! Every token format is built from one shared [`ClaimContext`]. The format picks
//! which user view is embedded:
//!
//! - `JWT`: the full user snapshot
//! - `JWT-Empty`: a short user
//! - `JWT-Custom`: selected fields plus claim attributes
//! - `JWT-Standard`: OIDC standard claims, gated by scope

use crate::errors::ClaimsError;
use crate::oauth::claim_attributes::{apply_token_attributes, apply_token_fields};
use crate::oauth::consent::parse_scopes;
use crate::oauth::es512;
use crate::oauth::keys::{TokenSigner, public_key_from_certificate, signing_algorithm};
use crate::oauth::phone::to_e164;
use crate::oauth::types::*;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Validation, decode, decode_header};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::net::{IpAddr, SocketAddr};

pub const ACCESS_TOKEN_TYPE: &str = "access-token";
pub const REFRESH_TOKEN_TYPE: &str = "refresh-token";

/// JWT registered claims shared by every token format
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
}

/// Inputs for minting an access/refresh token pair
pub struct TokenContext<'a> {
    pub application: &'a Application,
    pub user: &'a User,
    pub cert: &'a Cert,
    pub nonce: &'a str,
    pub scope: &'a str,
    /// RFC 8707 resource indicator, used as the audience when present
    pub resource: &'a str,
    pub host: &'a str,
    pub provider: &'a str,
    pub signin_method: &'a str,
}

/// A freshly signed token pair and the record name it will be stored under
#[derive(Debug, Clone)]
pub struct GeneratedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub name: String,
}

/// Values common to every claim shape
struct ClaimContext {
    user: User,
    token_type: &'static str,
    nonce: String,
    scope: String,
    azp: String,
    provider: String,
    signin_method: String,
    registered: RegisteredClaims,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JwtClaims<'a> {
    #[serde(flatten)]
    user: &'a User,
    token_type: &'a str,
    #[serde(skip_serializing_if = "String::is_empty")]
    nonce: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    azp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    provider: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    signin_method: String,
    #[serde(flatten)]
    registered: &'a RegisteredClaims,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// User view embedded in `JWT-Empty` tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserShort {
    pub owner: String,
    pub name: String,
    pub id: String,
    pub display_name: String,
    pub avatar: String,
    pub email: String,
    #[serde(rename = "email_verified", skip_serializing_if = "is_false")]
    pub email_verified: bool,
    pub phone: String,
}

impl From<&User> for UserShort {
    fn from(user: &User) -> Self {
        Self {
            owner: user.owner.clone(),
            name: user.name.clone(),
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            phone: user.phone.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShortClaims<'a> {
    #[serde(flatten)]
    user: UserShort,
    token_type: &'a str,
    #[serde(skip_serializing_if = "String::is_empty")]
    nonce: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    azp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    provider: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    signin_method: String,
    #[serde(flatten)]
    registered: &'a RegisteredClaims,
}

/// User view embedded in `JWT-Standard` tokens, named after OIDC standard claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStandard {
    pub owner: String,
    #[serde(rename = "preferred_username", skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub id: String,
    #[serde(rename = "name", skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(rename = "picture", skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "is_false")]
    pub email_verified: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phone: String,
}

impl From<&User> for UserStandard {
    fn from(user: &User) -> Self {
        Self {
            owner: user.owner.clone(),
            name: user.name.clone(),
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            phone: user.phone.clone(),
        }
    }
}

/// OIDC structured address claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcAddress {
    pub formatted: String,
    pub street_address: String,
    pub locality: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

impl From<&User> for OidcAddress {
    fn from(user: &User) -> Self {
        let street_address = user.address.join("\n");
        let formatted = [street_address.as_str(), user.location.as_str(), user.region.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            formatted,
            street_address,
            locality: user.location.clone(),
            region: user.region.clone(),
            postal_code: String::new(),
            country: user.country_code.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StandardClaims<'a> {
    #[serde(flatten)]
    user: UserStandard,
    token_type: &'a str,
    #[serde(skip_serializing_if = "String::is_empty")]
    nonce: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    azp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<OidcAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gender: Option<String>,
    #[serde(rename = "phone_number", skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
    #[serde(rename = "phone_number_verified", skip_serializing_if = "Option::is_none")]
    phone_number_verified: Option<bool>,
    #[serde(flatten)]
    registered: &'a RegisteredClaims,
}

/// Claims recovered from a previously issued token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParsedClaims {
    pub iss: String,
    pub sub: String,
    #[serde(deserialize_with = "string_or_vec")]
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    pub scope: String,
    #[serde(rename = "tokenType")]
    pub token_type: String,
    pub owner: String,
    pub name: String,
    pub preferred_username: String,
    pub azp: String,
}

impl ParsedClaims {
    /// The user name carried by the token, whatever its format
    pub fn username(&self) -> &str {
        if self.preferred_username.is_empty() {
            &self.name
        } else {
            &self.preferred_username
        }
    }
}

pub(crate) fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Copy of `user` with the password hash cleared, for embedding in tokens.
pub fn refine_user(user: &User) -> User {
    let mut user = user.clone();
    user.password = String::new();
    user
}

fn hours(value: f64) -> Duration {
    Duration::milliseconds((value * 3_600_000.0) as i64)
}

/// Builds and parses the tokens the server issues
#[derive(Debug, Clone, Default)]
pub struct ClaimsBuilder {
    /// Configured public origin; wins over the request host
    origin: Option<String>,
}

impl ClaimsBuilder {
    pub fn new(origin: Option<String>) -> Self {
        Self {
            origin: origin.filter(|o| !o.is_empty()),
        }
    }

    /// The issuer for requests addressed to `host`.
    ///
    /// Hosts without a dot (`localhost:8000`) and IP literals are served over
    /// plain HTTP; everything else over HTTPS.
    pub fn origin_from_host(&self, host: &str) -> String {
        if let Some(origin) = &self.origin {
            return origin.clone();
        }
        let protocol = if !host.contains('.') || is_ip_address(host) {
            "http://"
        } else {
            "https://"
        };
        format!("{}{}", protocol, host)
    }

    /// Mint an access/refresh token pair
    pub fn generate_tokens(&self, ctx: &TokenContext<'_>) -> Result<GeneratedTokens, ClaimsError> {
        self.generate_tokens_at(ctx, Utc::now())
    }

    fn generate_tokens_at(
        &self,
        ctx: &TokenContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<GeneratedTokens, ClaimsError> {
        let application = ctx.application;
        let format: TokenFormat = application
            .token_format
            .parse()
            .map_err(ClaimsError::UnknownTokenFormat)?;
        let alg = signing_algorithm(&application.token_signing_method);

        let expire_time = now + hours(application.expire_in_hours);
        let refresh_expire_time = if application.refresh_expire_in_hours == 0.0 {
            expire_time
        } else {
            now + hours(application.refresh_expire_in_hours)
        };

        let name = generate_id();
        let audience = if !ctx.resource.is_empty() {
            vec![ctx.resource.to_string()]
        } else if application.is_shared {
            vec![format!("{}-org-{}", application.client_id, ctx.user.owner)]
        } else {
            vec![application.client_id.clone()]
        };

        let mut claims = ClaimContext {
            user: refine_user(ctx.user),
            token_type: ACCESS_TOKEN_TYPE,
            nonce: ctx.nonce.to_string(),
            scope: ctx.scope.to_string(),
            azp: application.client_id.clone(),
            provider: ctx.provider.to_string(),
            signin_method: ctx.signin_method.to_string(),
            registered: RegisteredClaims {
                iss: self.origin_from_host(ctx.host),
                sub: ctx.user.id.clone(),
                aud: audience,
                exp: expire_time.timestamp(),
                nbf: now.timestamp(),
                iat: now.timestamp(),
                jti: format!("{}/{}", application.owner, name),
            },
        };

        let access_claims = claims_for_format(format, &claims, application)?;
        claims.token_type = REFRESH_TOKEN_TYPE;
        claims.registered.exp = refresh_expire_time.timestamp();
        let refresh_claims = claims_for_format(format, &claims, application)?;

        let signer = TokenSigner::new(ctx.cert, alg)?;
        let access_token = signer
            .sign(&access_claims)
            .map_err(|e| ClaimsError::SigningFailed(e.to_string()))?;
        let refresh_token = signer
            .sign(&refresh_claims)
            .map_err(|e| ClaimsError::SigningFailed(e.to_string()))?;

        Ok(GeneratedTokens {
            access_token,
            refresh_token,
            name,
        })
    }

    /// Verify a token against the application's certificate and return its claims.
    ///
    /// Expired tokens are rejected. Only RSA and ECDSA family algorithms matching
    /// the certificate's key are accepted.
    pub fn parse_token(&self, token: &str, cert: &Cert) -> Result<ParsedClaims, ClaimsError> {
        let public_key = public_key_from_certificate(&cert.certificate)?;

        if es512::is_es512(token) {
            let key = public_key.p521().ok_or_else(|| {
                ClaimsError::ParsingFailed("unexpected signing method: ES512".to_string())
            })?;
            let claims: ParsedClaims =
                es512::decode(token, key).map_err(|e| ClaimsError::ParsingFailed(e.to_string()))?;
            if claims.exp < Utc::now().timestamp() {
                return Err(ClaimsError::ParsingFailed("ExpiredSignature".to_string()));
            }
            return Ok(claims);
        }

        let header = decode_header(token).map_err(|e| ClaimsError::ParsingFailed(e.to_string()))?;
        let key = public_key
            .decoding_key()
            .filter(|_| public_key.supports(header.alg))
            .ok_or_else(|| {
                ClaimsError::ParsingFailed(format!("unexpected signing method: {:?}", header.alg))
            })?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        decode::<ParsedClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| ClaimsError::ParsingFailed(e.to_string()))
    }
}

fn is_ip_address(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || host.parse::<SocketAddr>().is_ok()
}

fn to_json<T: Serialize>(claims: &T) -> Result<Value, ClaimsError> {
    serde_json::to_value(claims).map_err(|e| ClaimsError::SerializationFailed(e.to_string()))
}

fn claims_for_format(
    format: TokenFormat,
    claims: &ClaimContext,
    application: &Application,
) -> Result<Value, ClaimsError> {
    match format {
        TokenFormat::Jwt => to_json(&JwtClaims {
            user: &claims.user,
            token_type: claims.token_type,
            nonce: claims.nonce.clone(),
            scope: claims.scope.clone(),
            azp: claims.azp.clone(),
            provider: claims.provider.clone(),
            signin_method: claims.signin_method.clone(),
            registered: &claims.registered,
        }),
        TokenFormat::JwtEmpty => to_json(&ShortClaims {
            user: UserShort::from(&claims.user),
            token_type: claims.token_type,
            nonce: claims.nonce.clone(),
            scope: claims.scope.clone(),
            azp: claims.azp.clone(),
            provider: claims.provider.clone(),
            signin_method: claims.signin_method.clone(),
            registered: &claims.registered,
        }),
        TokenFormat::JwtStandard => to_json(&standard_claims(claims)),
        TokenFormat::JwtCustom => custom_claims(claims, application),
    }
}

fn standard_claims(claims: &ClaimContext) -> StandardClaims<'_> {
    let user = &claims.user;
    let scopes = parse_scopes(&claims.scope);
    let has_scope = |s: &str| scopes.iter().any(|scope| scope == s);

    let address = has_scope("address").then(|| OidcAddress::from(user));
    let gender = (has_scope("profile") && !user.gender.is_empty()).then(|| user.gender.clone());
    let phone_number = if has_scope("phone") {
        to_e164(&user.phone, &user.country_code)
    } else {
        None
    };
    let phone_number_verified = phone_number.as_ref().map(|_| true);

    StandardClaims {
        user: UserStandard::from(user),
        token_type: claims.token_type,
        nonce: claims.nonce.clone(),
        scope: claims.scope.clone(),
        azp: claims.azp.clone(),
        address,
        gender,
        phone_number,
        phone_number_verified,
        registered: &claims.registered,
    }
}

fn custom_claims(claims: &ClaimContext, application: &Application) -> Result<Value, ClaimsError> {
    let registered = &claims.registered;
    let mut map = Map::new();
    map.insert("iss".to_string(), json!(registered.iss));
    map.insert("sub".to_string(), json!(registered.sub));
    map.insert("aud".to_string(), json!(registered.aud));
    map.insert("exp".to_string(), json!(registered.exp));
    map.insert("nbf".to_string(), json!(registered.nbf));
    map.insert("iat".to_string(), json!(registered.iat));
    map.insert("jti".to_string(), json!(registered.jti));
    map.insert("tokenType".to_string(), json!(claims.token_type));
    if !claims.azp.is_empty() {
        map.insert("azp".to_string(), json!(claims.azp));
    }
    map.insert("nonce".to_string(), json!(claims.nonce));
    map.insert("scope".to_string(), json!(claims.scope));

    let fields = &application.token_fields;
    if fields.iter().any(|f| f == "signinMethod") {
        map.insert("signinMethod".to_string(), json!(claims.signin_method));
    }
    if fields.iter().any(|f| f == "provider") {
        map.insert("provider".to_string(), json!(claims.provider));
    }

    let user_json = match to_json(&claims.user)? {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    apply_token_fields(&mut map, &claims.user, &user_json, fields);
    apply_token_attributes(
        &mut map,
        &claims.user,
        &user_json,
        &application.token_attributes,
    );

    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    const RSA_CERT: &str = include_str!("../../tests/fixtures/signing_rsa_cert.pem");
    const RSA_KEY: &str = include_str!("../../tests/fixtures/signing_rsa_key.pem");
    const EC_CERT: &str = include_str!("../../tests/fixtures/signing_ec_cert.pem");
    const EC_KEY: &str = include_str!("../../tests/fixtures/signing_ec_key.pem");
    const P521_CERT: &str = include_str!("../../tests/fixtures/signing_p521_cert.pem");
    const P521_KEY: &str = include_str!("../../tests/fixtures/signing_p521_key.pem");

    fn rsa_cert() -> Cert {
        Cert {
            owner: "admin".to_string(),
            name: "cert-rsa".to_string(),
            crypto_algorithm: "RS256".to_string(),
            certificate: RSA_CERT.to_string(),
            private_key: RSA_KEY.to_string(),
        }
    }

    fn application(format: &str) -> Application {
        Application {
            owner: "admin".to_string(),
            name: "app-example".to_string(),
            organization: "built-in".to_string(),
            client_id: "client-1".to_string(),
            cert: "cert-rsa".to_string(),
            expire_in_hours: 1.0,
            refresh_expire_in_hours: 24.0,
            token_format: format.to_string(),
            ..Default::default()
        }
    }

    fn user() -> User {
        User {
            owner: "built-in".to_string(),
            name: "alice".to_string(),
            id: "u-1".to_string(),
            display_name: "Alice".to_string(),
            password: "secret-hash".to_string(),
            email: "alice@example.com".to_string(),
            phone: "4155552671".to_string(),
            country_code: "US".to_string(),
            gender: "female".to_string(),
            address: vec!["1 Main St".to_string()],
            tag: "staff".to_string(),
            ..Default::default()
        }
    }

    fn payload(token: &str) -> Value {
        let part = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    fn header(token: &str) -> Value {
        let part = token.split('.').next().unwrap();
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    fn generate(app: &Application, cert: &Cert, scope: &str, resource: &str) -> GeneratedTokens {
        let user = user();
        let builder = ClaimsBuilder::new(None);
        builder
            .generate_tokens(&TokenContext {
                application: app,
                user: &user,
                cert,
                nonce: "n-0S6_WzA2Mj",
                scope,
                resource,
                host: "auth.example.com",
                provider: "",
                signin_method: "Password",
            })
            .unwrap()
    }

    #[test]
    fn test_origin_from_host() {
        let builder = ClaimsBuilder::new(None);
        assert_eq!(builder.origin_from_host("localhost:8000"), "http://localhost:8000");
        assert_eq!(builder.origin_from_host("192.168.0.10"), "http://192.168.0.10");
        assert_eq!(
            builder.origin_from_host("192.168.0.10:8000"),
            "http://192.168.0.10:8000"
        );
        assert_eq!(
            builder.origin_from_host("door.example.com"),
            "https://door.example.com"
        );

        let configured = ClaimsBuilder::new(Some("https://login.example.org".to_string()));
        assert_eq!(
            configured.origin_from_host("localhost:8000"),
            "https://login.example.org"
        );
    }

    #[test]
    fn test_jwt_format_embeds_refined_user() {
        let app = application("JWT");
        let tokens = generate(&app, &rsa_cert(), "openid profile", "");

        let claims = payload(&tokens.access_token);
        assert_eq!(claims["iss"], "https://auth.example.com");
        assert_eq!(claims["sub"], "u-1");
        assert_eq!(claims["aud"], json!(["client-1"]));
        assert_eq!(claims["name"], "alice");
        assert_eq!(claims["displayName"], "Alice");
        assert_eq!(claims["password"], "");
        assert_eq!(claims["tag"], "staff");
        assert_eq!(claims["tokenType"], "access-token");
        assert_eq!(claims["azp"], "client-1");
        assert_eq!(claims["signinMethod"], "Password");
        assert_eq!(claims["jti"], format!("admin/{}", tokens.name));
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            3600
        );
        assert_eq!(header(&tokens.access_token)["kid"], "cert-rsa");

        let refresh = payload(&tokens.refresh_token);
        assert_eq!(refresh["tokenType"], "refresh-token");
        assert_eq!(
            refresh["exp"].as_i64().unwrap() - refresh["iat"].as_i64().unwrap(),
            24 * 3600
        );
    }

    #[test]
    fn test_refresh_expiry_falls_back_to_access_expiry() {
        let mut app = application("JWT-Empty");
        app.expire_in_hours = 0.5;
        app.refresh_expire_in_hours = 0.0;
        let tokens = generate(&app, &rsa_cert(), "openid", "");

        let access = payload(&tokens.access_token);
        let refresh = payload(&tokens.refresh_token);
        assert_eq!(access["exp"], refresh["exp"]);
        assert_eq!(
            access["exp"].as_i64().unwrap() - access["iat"].as_i64().unwrap(),
            1800
        );
        assert!(access.get("address").is_none());
        assert_eq!(access["displayName"], "Alice");
    }

    #[test]
    fn test_standard_format_is_scope_gated() {
        let app = application("JWT-Standard");
        let tokens = generate(&app, &rsa_cert(), "openid", "");
        let claims = payload(&tokens.access_token);
        assert_eq!(claims["preferred_username"], "alice");
        assert_eq!(claims["name"], "Alice");
        assert!(claims.get("address").is_none());
        assert!(claims.get("gender").is_none());
        assert!(claims.get("phone_number").is_none());

        let tokens = generate(&app, &rsa_cert(), "openid profile address phone", "");
        let claims = payload(&tokens.access_token);
        assert_eq!(claims["gender"], "female");
        assert_eq!(claims["address"]["street_address"], "1 Main St");
        assert_eq!(claims["phone_number"], "+14155552671");
        assert_eq!(claims["phone_number_verified"], true);
    }

    #[test]
    fn test_custom_format() {
        let mut app = application("JWT-Custom");
        app.token_fields = vec!["DisplayName".to_string(), "provider".to_string()];
        app.token_attributes = vec![JwtItem {
            name: "principal".to_string(),
            value: "$user.owner/$user.name".to_string(),
            item_type: "String".to_string(),
            category: "Static Value".to_string(),
        }];
        let tokens = generate(&app, &rsa_cert(), "openid", "");

        let claims = payload(&tokens.access_token);
        assert_eq!(claims["displayName"], "Alice");
        assert_eq!(claims["principal"], "built-in/alice");
        assert_eq!(claims["provider"], "");
        assert!(claims.get("signinMethod").is_none());
        assert!(claims.get("email").is_none());
        assert_eq!(claims["nonce"], "n-0S6_WzA2Mj");

        let refresh = payload(&tokens.refresh_token);
        assert_eq!(refresh["tokenType"], "refresh-token");
    }

    #[test]
    fn test_resource_and_shared_audience() {
        let app = application("JWT");
        let tokens = generate(&app, &rsa_cert(), "", "https://api.example.com");
        assert_eq!(
            payload(&tokens.access_token)["aud"],
            json!(["https://api.example.com"])
        );

        let mut shared = application("JWT");
        shared.is_shared = true;
        let tokens = generate(&shared, &rsa_cert(), "", "");
        assert_eq!(
            payload(&tokens.access_token)["aud"],
            json!(["client-1-org-built-in"])
        );
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let app = application("JWT-Unknown");
        let user = user();
        let result = ClaimsBuilder::default().generate_tokens(&TokenContext {
            application: &app,
            user: &user,
            cert: &rsa_cert(),
            nonce: "",
            scope: "",
            resource: "",
            host: "localhost",
            provider: "",
            signin_method: "",
        });
        assert!(matches!(result, Err(ClaimsError::UnknownTokenFormat(_))));
    }

    #[test]
    fn test_parse_round_trip_rsa_and_ec() {
        let app = application("JWT");
        let cert = rsa_cert();
        let tokens = generate(&app, &cert, "openid email", "");
        let parsed = ClaimsBuilder::default()
            .parse_token(&tokens.refresh_token, &cert)
            .unwrap();
        assert_eq!(parsed.scope, "openid email");
        assert_eq!(parsed.token_type, "refresh-token");
        assert_eq!(parsed.username(), "alice");

        let mut ec_app = application("JWT-Standard");
        ec_app.token_signing_method = "ES256".to_string();
        let ec_cert = Cert {
            name: "cert-ec".to_string(),
            certificate: EC_CERT.to_string(),
            private_key: EC_KEY.to_string(),
            ..Default::default()
        };
        let tokens = generate(&ec_app, &ec_cert, "openid", "");
        assert_eq!(header(&tokens.access_token)["alg"], "ES256");
        let parsed = ClaimsBuilder::default()
            .parse_token(&tokens.access_token, &ec_cert)
            .unwrap();
        assert_eq!(parsed.username(), "alice");
        assert_eq!(parsed.aud, vec!["client-1".to_string()]);
    }

    #[test]
    fn test_es512_tokens() {
        let mut app = application("JWT-Empty");
        app.token_signing_method = "ES512".to_string();
        let cert = Cert {
            name: "cert-p521".to_string(),
            certificate: P521_CERT.to_string(),
            private_key: P521_KEY.to_string(),
            ..Default::default()
        };
        let tokens = generate(&app, &cert, "openid", "");
        assert_eq!(header(&tokens.access_token)["alg"], "ES512");
        assert_eq!(header(&tokens.access_token)["kid"], "cert-p521");

        let parsed = ClaimsBuilder::default()
            .parse_token(&tokens.refresh_token, &cert)
            .unwrap();
        assert_eq!(parsed.token_type, "refresh-token");
        assert_eq!(parsed.scope, "openid");

        assert!(
            ClaimsBuilder::default()
                .parse_token(&tokens.access_token, &rsa_cert())
                .is_err()
        );
    }

    #[test]
    fn test_parse_rejects_wrong_certificate() {
        let app = application("JWT");
        let tokens = generate(&app, &rsa_cert(), "openid", "");
        let ec_cert = Cert {
            certificate: EC_CERT.to_string(),
            ..Default::default()
        };
        assert!(
            ClaimsBuilder::default()
                .parse_token(&tokens.access_token, &ec_cert)
                .is_err()
        );
    }
}
