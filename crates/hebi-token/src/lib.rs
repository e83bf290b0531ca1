//! Session tokens exchanged between the auth gateway, the launcher and the
//! browser.
//!
//! A session token is an HS256-signed JWT whose payload carries the
//! authenticated user's FedID under the `username` claim. The auth gateway is
//! the only minter; both services verify. The signing key is process-wide
//! configuration and the algorithm is fixed at build time.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;
use thiserror::Error;

/// Name of the browser cookie carrying the session token.
pub const COOKIE_NAME: &str = "token";

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign session token")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid session token")]
    Verify(#[source] jsonwebtoken::errors::Error),
}

/// A verified session token.
///
/// The payload is kept as a raw JSON map so that a token which verifies but
/// does not carry a `username` claim is still representable; callers decide
/// how to handle that case.
#[derive(Debug, Clone)]
pub struct SessionToken {
    claims: serde_json::Map<String, Value>,
}

impl SessionToken {
    /// Signs a token whose payload is `{"username": <username>}`.
    pub fn mint(key: &str, username: &str) -> Result<String, TokenError> {
        let mut claims = serde_json::Map::new();
        claims.insert("username".to_owned(), Value::String(username.to_owned()));

        jsonwebtoken::encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .map_err(TokenError::Sign)
    }

    /// Verifies the signature and returns the decoded payload.
    pub fn verify(key: &str, token: &str) -> Result<Self, TokenError> {
        // Session tokens carry no registered claims, only `username`.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<serde_json::Map<String, Value>>(
            token,
            &DecodingKey::from_secret(key.as_bytes()),
            &validation,
        )
        .map_err(TokenError::Verify)?;

        Ok(Self { claims: data.claims })
    }

    pub fn username(&self) -> Option<&str> {
        self.claims.get("username").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &str = "an-arbitrary-signing-secret";

    #[test]
    fn round_trip() {
        let token = SessionToken::mint(KEY, "abc12345").unwrap();
        let verified = SessionToken::verify(KEY, &token).unwrap();
        assert_eq!(verified.username(), Some("abc12345"));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = SessionToken::mint(KEY, "abc12345").unwrap();
        assert!(SessionToken::verify("some-other-secret", &token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SessionToken::verify(KEY, "definitely-not-a-jwt").is_err());
    }

    proptest! {
        #[test]
        fn any_username_round_trips(username in "[a-z0-9]{1,16}") {
            let token = SessionToken::mint(KEY, &username).unwrap();
            let verified = SessionToken::verify(KEY, &token).unwrap();
            prop_assert_eq!(verified.username(), Some(username.as_str()));
        }

        #[test]
        fn tampered_tokens_are_rejected(username in "[a-z0-9]{1,16}", flip in 0usize..64) {
            let token = SessionToken::mint(KEY, &username).unwrap();
            let mut bytes = token.into_bytes();
            let idx = flip % bytes.len();
            // Flip a bit somewhere in the compact encoding; either the
            // base64 becomes invalid or the signature no longer matches.
            bytes[idx] ^= 0x01;
            let Ok(tampered) = String::from_utf8(bytes) else {
                return Ok(());
            };
            prop_assert!(SessionToken::verify(KEY, &tampered).is_err());
        }
    }
}
