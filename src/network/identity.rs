//! Sign-In Identity
//!
//! Turns an external sign-in token into the local user's identity.
//! Tokens are issued elsewhere; this side only verifies them.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::lobby::user::UserId;

/// Token validation settings.
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    /// Required "iss", if any.
    pub issuer: Option<String>,
    /// Required "aud", if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl IdentityConfig {
    /// Read `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether any verification key is present.
    pub fn has_key(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a sign-in token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInClaims {
    /// Provider's user id.
    pub sub: String,
    /// Expiry, unix seconds. Zero means none.
    #[serde(default)]
    pub exp: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Optional display name chosen at the provider.
    #[serde(default)]
    pub name: Option<String>,
}

/// Sign-in failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No key to verify with.
    #[error("no sign-in key configured")]
    NotConfigured,
    /// Malformed token.
    #[error("malformed sign-in token")]
    Malformed,
    /// Bad signature.
    #[error("sign-in token signature mismatch")]
    BadSignature,
    /// Past its expiry.
    #[error("sign-in token expired")]
    Expired,
    /// Wrong issuer or audience.
    #[error("sign-in token not meant for this lobby service")]
    WrongRecipient,
    /// Empty subject.
    #[error("sign-in token has no subject")]
    NoSubject,
    /// Anything else from the JWT library.
    #[error("sign-in token rejected: {0}")]
    Rejected(String),
}

/// The signed-in local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub user_id: UserId,
    /// Name to start with.
    pub display_name: String,
}

impl Identity {
    /// Identity for an id with its generated name.
    pub fn new(user_id: UserId) -> Self {
        let display_name = default_display_name(&user_id);
        Self { user_id, display_name }
    }

    /// Random identity for offline play.
    pub fn anonymous() -> Self {
        Self::new(UserId::generate())
    }
}

const ADJECTIVES: [&str; 16] = [
    "Amber", "Brave", "Calm", "Dapper", "Eager", "Fuzzy", "Gentle", "Hasty",
    "Jolly", "Keen", "Lucky", "Mellow", "Nimble", "Plucky", "Quiet", "Rusty",
];

const NOUNS: [&str; 16] = [
    "Badger", "Comet", "Dingo", "Falcon", "Gecko", "Heron", "Ibis", "Jackal",
    "Koala", "Lynx", "Marten", "Newt", "Otter", "Puffin", "Raven", "Walrus",
];

/// Name derived from the user id. Same id, same name.
pub fn default_display_name(id: &UserId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"relay-lobby-name:");
    hasher.update(id.as_str().as_bytes());
    let hash = hasher.finalize();

    let adjective = ADJECTIVES[(hash[0] & 0x0f) as usize];
    let noun = NOUNS[(hash[1] & 0x0f) as usize];
    format!("{} {} {:02}", adjective, noun, hash[2] % 100)
}

/// Verify a sign-in token and build the local identity from it.
pub fn validate_sign_in(token: &str, config: &IdentityConfig) -> Result<Identity, IdentityError> {
    let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => (
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| IdentityError::Rejected(format!("bad public key: {}", e)))?,
            Algorithm::RS256,
        ),
        (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
        (None, None) => return Err(IdentityError::NotConfigured),
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = HashSet::new();
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let claims = decode::<SignInClaims>(token, &key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(IdentityError::NoSubject);
    }
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > claims.exp {
            return Err(IdentityError::Expired);
        }
    }

    let mut identity = Identity::new(UserId::new(claims.sub));
    if let Some(name) = claims.name.filter(|n| !n.trim().is_empty()) {
        identity.display_name = name;
    }
    Ok(identity)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> IdentityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => IdentityError::Expired,
        ErrorKind::InvalidSignature => IdentityError::BadSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => IdentityError::WrongRecipient,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => IdentityError::Malformed,
        _ => IdentityError::Rejected(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "lobby-test-secret-0123456789abcdef";

    fn token(sub: &str, exp: u64, name: Option<&str>) -> String {
        let claims = SignInClaims {
            sub: sub.into(),
            exp,
            iss: Some("identity-provider".into()),
            name: name.map(str::to_string),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .unwrap()
    }

    fn config() -> IdentityConfig {
        IdentityConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    fn in_an_hour() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 3600
    }

    #[test]
    fn test_sign_in_uses_subject() {
        let identity = validate_sign_in(&token("player-7", in_an_hour(), None), &config()).unwrap();
        assert_eq!(identity.user_id, UserId::new("player-7"));
        assert_eq!(identity.display_name, default_display_name(&UserId::new("player-7")));
    }

    #[test]
    fn test_sign_in_prefers_token_name() {
        let identity =
            validate_sign_in(&token("player-7", in_an_hour(), Some("Rosa")), &config()).unwrap();
        assert_eq!(identity.display_name, "Rosa");
    }

    #[test]
    fn test_expired_rejected() {
        let result = validate_sign_in(&token("player-7", 1, None), &config());
        assert!(matches!(result, Err(IdentityError::Expired)));

        let lenient = IdentityConfig { skip_expiry: true, ..config() };
        assert!(validate_sign_in(&token("player-7", 1, None), &lenient).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let other = IdentityConfig {
            secret: Some("a-completely-different-secret!!".into()),
            ..Default::default()
        };
        let result = validate_sign_in(&token("player-7", in_an_hour(), None), &other);
        assert!(matches!(result, Err(IdentityError::BadSignature)));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let result = validate_sign_in(&token("", in_an_hour(), None), &config());
        assert!(matches!(result, Err(IdentityError::NoSubject)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let strict = IdentityConfig { issuer: Some("lobby-service".into()), ..config() };
        let result = validate_sign_in(&token("player-7", in_an_hour(), None), &strict);
        assert!(matches!(result, Err(IdentityError::WrongRecipient)));
    }

    #[test]
    fn test_unconfigured() {
        let result = validate_sign_in("a.b.c", &IdentityConfig::default());
        assert!(matches!(result, Err(IdentityError::NotConfigured)));
    }

    #[test]
    fn test_generated_names_are_stable() {
        let a = UserId::new("a");
        assert_eq!(default_display_name(&a), default_display_name(&a));
        assert!(!default_display_name(&a).is_empty());

        let anon = Identity::anonymous();
        assert_eq!(anon.display_name, default_display_name(&anon.user_id));
    }
}
