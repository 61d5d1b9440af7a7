use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{debug, error};

use crate::config::HashConfig;

/// Argon2id hashing with a configured cost; the async methods run on the
/// blocking pool so request workers are not stalled.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
    // same cost as real hashes, matches no password anyone can send
    decoy: Arc<str>,
}

impl CredentialHasher {
    pub fn new(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {}", e))?;
        let mut hasher = Self {
            params,
            decoy: Arc::from(""),
        };
        let secret = SaltString::generate(&mut OsRng);
        hasher.decoy = Arc::from(hasher.hash_blocking(secret.as_str())?);
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash_blocking(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Malformed hashes never verify.
    pub fn verify_blocking(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "stored hash is not a valid PHC string");
                return false;
            }
        };
        // parameters come from the PHC string, not from self
        self.argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    pub async fn hash(&self, plain: String) -> anyhow::Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&plain))
            .await
            .context("password hashing task failed")?
    }

    pub async fn verify(&self, plain: String, hash: String) -> anyhow::Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&plain, &hash))
            .await
            .context("password verification task failed")
    }

    /// Spends one verification on the decoy hash so a lookup miss costs as
    /// much as a wrong password. Always false.
    pub async fn verify_decoy(&self, plain: String) -> anyhow::Result<bool> {
        let decoy = self.decoy.to_string();
        self.verify(plain, decoy).await
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(&HashConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .expect("cheap params are valid")
}
