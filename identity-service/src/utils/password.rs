use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::config::PasswordHashingConfig;
use crate::services::ServiceError;

pub const SALT_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
/// Stored hash layout: `salt || derived key`.
pub const HASH_SIZE: usize = SALT_SIZE + KEY_SIZE;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Argon2id hasher producing a 48-byte `salt || key` blob.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(config: &PasswordHashingConfig) -> Result<Self, ServiceError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| ServiceError::InvalidArgument(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self { params })
    }

    /// Hash a password with a fresh random salt.
    pub fn hash_password(&self, password: &Password) -> Result<Vec<u8>, ServiceError> {
        if password.is_blank() {
            return Err(ServiceError::InvalidArgument(
                "Password cannot be empty".to_string(),
            ));
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(password, &salt)?;

        let mut hash = Vec::with_capacity(HASH_SIZE);
        hash.extend_from_slice(&salt);
        hash.extend_from_slice(&key);

        tracing::debug!("Password hashed using Argon2id");
        Ok(hash)
    }

    /// Verify a password against a stored hash using constant-time comparison.
    ///
    /// A stored hash of the wrong length is treated as a mismatch, not an
    /// error.
    pub fn verify_password(&self, password: &Password, stored_hash: &[u8]) -> Result<bool, ServiceError> {
        if password.is_blank() {
            return Err(ServiceError::InvalidArgument(
                "Password cannot be empty".to_string(),
            ));
        }

        if stored_hash.len() != HASH_SIZE {
            tracing::warn!(
                expected = HASH_SIZE,
                actual = stored_hash.len(),
                "Stored password hash has unexpected length"
            );
            return Ok(false);
        }

        let (salt, expected) = stored_hash.split_at(SALT_SIZE);
        let computed = match self.derive_key(password, salt) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(error = %e, "Password verification failed to derive key");
                return Ok(false);
            }
        };

        let is_valid: bool = computed[..].ct_eq(expected).into();
        if !is_valid {
            tracing::debug!("Password verification failed");
        }
        Ok(is_valid)
    }

    /// [`Self::hash_password`] on the blocking pool.
    pub async fn hash_password_async(&self, password: Password) -> Result<Vec<u8>, ServiceError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_password(&password))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))?
    }

    /// [`Self::verify_password`] on the blocking pool.
    pub async fn verify_password_async(
        &self,
        password: Password,
        stored_hash: Vec<u8>,
    ) -> Result<bool, ServiceError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_password(&password, &stored_hash))
            .await
            .map_err(|e| {
                ServiceError::Internal(anyhow::anyhow!("Password verification task failed: {}", e))
            })?
    }

    fn derive_key(&self, password: &Password, salt: &[u8]) -> Result<[u8; KEY_SIZE], ServiceError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password.as_str().as_bytes(), salt, &mut key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Argon2 key derivation failed: {}", e)))?;
        Ok(key)
    }
}
