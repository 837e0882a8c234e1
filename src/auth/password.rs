/// Password Hashing and Verification
///
/// New digests are Argon2id PHC strings with a random salt, so there is no
/// 72-byte truncation. Bcrypt digests carried over from the previous
/// deployment still verify and are flagged for rehashing.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::AppError;

#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl CredentialHasher {
    /// Hasher with explicit Argon2id cost parameters (memory in KiB).
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a password into a self-describing digest
    ///
    /// # Errors
    /// Returns error only if the underlying hash primitive fails
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Check a password against a stored digest.
    ///
    /// Malformed or unrecognized digests verify as `false`.
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        if is_bcrypt(digest) {
            return bcrypt::verify(password, digest).unwrap_or(false);
        }

        match PasswordHash::new(digest) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Unrecognized password digest format: {}", e);
                false
            }
        }
    }

    /// Legacy digests should be replaced after the next successful login.
    pub fn needs_rehash(&self, digest: &str) -> bool {
        is_bcrypt(digest)
    }
}

fn is_bcrypt(digest: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"]
        .iter()
        .any(|prefix| digest.starts_with(prefix))
}
