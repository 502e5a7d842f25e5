//! Cryptographic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::Argon2 as ArgonConfig;

const GRAVATAR_URL: &str = "https://www.gravatar.com/avatar";

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
#[derive(Clone)]
pub struct PasswordManager {
    params: Params,
    /// PHC of a throwaway password, hashed with `params`. Verified when the
    /// account is unknown so both sign in failures cost one Argon2 run.
    decoy: String,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let salt = SaltString::generate(&mut OsRng);
        let decoy = argon2_with(params.clone())
            .hash_password(b"notedly-decoy-password", &salt)
            .map_err(|err| CryptoError::Argon2(err.to_string()))?
            .to_string();

        Ok(Self { params, decoy })
    }

    fn argon2(&self) -> Argon2<'static> {
        argon2_with(self.params.clone())
    }

    /// Hash password using Argon2id with a fresh random salt.
    ///
    /// Hashing is CPU-bound, it runs on the blocking thread pool.
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2();
        let password = Zeroizing::new(password.to_owned());

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| CryptoError::Argon2(e.to_string()))
        })
        .await?
    }

    /// Verify password against a PHC.
    ///
    /// A mismatch is `Ok(false)`. A stored hash that cannot be parsed is an
    /// error.
    pub async fn verify_password(
        &self,
        password: &str,
        phc_hash: &str,
    ) -> Result<bool> {
        let argon2 = self.argon2();
        let password = Zeroizing::new(password.to_owned());
        let phc_hash = phc_hash.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&phc_hash)
                .map_err(|e| CryptoError::Argon2(e.to_string()))?;

            Ok(argon2.verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await?
    }

    /// Run a verification against the decoy hash and discard the outcome.
    ///
    /// Called on the unknown account path of sign in.
    pub async fn verify_decoy(&self, password: &str) -> Result<()> {
        self.verify_password(password, &self.decoy).await.map(|_| ())
    }
}

fn argon2_with(params: Params) -> Argon2<'static> {
    Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params)
}

/// Normalize an email address before storage or lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Build the Gravatar URL of a normalized email.
pub fn avatar(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    let hash = hex::encode(hasher.finalize());

    format!("{GRAVATAR_URL}/{hash}?d=identicon")
}

#[cfg(test)]
pub(crate) fn light_params() -> ArgonConfig {
    ArgonConfig {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }
}
