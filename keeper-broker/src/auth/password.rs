use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use keeper_core::{Error, Result};
use tracing::warn;

use crate::config::PasswordConfig;

/// Argon2id hashing, run on the blocking pool.
#[derive(Debug, Clone)]
pub struct PasswordService {
    params: Params,
}

impl PasswordService {
    pub fn new(config: &PasswordConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|err| Error::Config(format!("invalid argon2 parameters: {err}")))?;
        Ok(Self { params })
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// PHC string of `password` under a fresh random salt.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let hasher = self.hasher();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| Error::Config(format!("password hashing failed: {err}")))
        })
        .await
        .map_err(|err| Error::Storage(format!("password hashing task failed: {err}")))?
    }

    /// `false` on mismatch or on a stored hash that cannot be parsed.
    pub async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool> {
        let hasher = self.hasher();
        let password = password.to_owned();
        let stored_hash = stored_hash.to_owned();
        tokio::task::spawn_blocking(move || match PasswordHash::new(&stored_hash) {
            Ok(parsed) => hasher.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(err) => {
                warn!(error = %err, "stored password hash is malformed");
                false
            }
        })
        .await
        .map_err(|err| Error::Storage(format!("password verification task failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordService {
        PasswordService::new(&PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn hashes_verify_only_the_original_password() {
        let service = cheap();
        let hash = service.hash("correct horse").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(service.verify("correct horse", &hash).await.unwrap());
        assert!(!service.verify("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn salts_differ_between_hashes() {
        let service = cheap();
        let a = service.hash("pw").await.unwrap();
        let b = service.hash("pw").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_does_not_verify() {
        assert!(!cheap().verify("pw", "plaintext").await.unwrap());
    }

    #[test]
    fn invalid_params_are_config_errors() {
        let err = PasswordService::new(&PasswordConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
