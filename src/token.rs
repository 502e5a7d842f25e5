//! Manage json web tokens.

use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Default lifetime of a token, in seconds.
pub const EXPIRATION_TIME: u64 = 60 * 60 * 24 * 30; // 30 days.

type Result<T> = std::result::Result<T, TokenError>;

/// Reasons for a token to be refused.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    Subject,
    #[error("system time is before unix epoch")]
    Clock(#[from] SystemTimeError),
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the instance that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    name: String,
    expires_in: u64,
}

impl TokenManager {
    /// Create a new [`TokenManager`] signing with an HMAC secret.
    pub fn new(name: &str, secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            name: name.to_owned(),
            expires_in: EXPIRATION_TIME,
        }
    }

    /// Set token lifetime, in seconds.
    pub fn expiration(mut self, expires_in: u64) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Token lifetime, in seconds.
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Create a new token for `user_id`.
    pub fn create(&self, user_id: UserId) -> Result<String> {
        let time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        self.sign(&Claims {
            exp: time + self.expires_in,
            iat: time,
            iss: self.name.clone(),
            sub: user_id.to_string(),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        Ok(encode(&Header::new(self.algorithm), claims, &self.encoding_key)?)
    }

    /// Decode and check a token.
    ///
    /// Fails when the signature does not match, when the token is malformed
    /// or expired, or when its subject is not a user id.
    pub fn decode(&self, token: &str) -> Result<UserId> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims =
            decode::<Claims>(token, &self.decoding_key, &validation)?.claims;

        claims.sub.parse().map_err(|_| TokenError::Subject)
    }
}
