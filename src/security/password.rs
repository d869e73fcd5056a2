use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::shared::error::CrmError;

#[derive(Debug, Clone)]
pub struct Argon2Config {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

fn hasher(config: &Argon2Config) -> Result<Argon2<'static>, CrmError> {
    let params = Params::new(
        config.memory_cost_kib,
        config.time_cost,
        config.parallelism,
        None,
    )
    .map_err(|e| CrmError::Internal(format!("Invalid Argon2 parameters: {e}")))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes with Argon2id and a random salt. CPU bound; call it from a
/// blocking task.
pub fn hash_password(password: &str) -> Result<String, CrmError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher(&Argon2Config::default())?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CrmError::Internal(format!("Failed to hash password: {e}")))?;

    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, CrmError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| CrmError::Internal(format!("Invalid password hash format: {e}")))?;

    // Parameters come from the PHC string, not from the default config.
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CrmError::Internal(format!("Password verification failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let password = "vendas2024";
        let hash = hash_password(password).expect("Failed to hash");

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(password, &hash).expect("Verify failed"));
        assert!(!verify_password("vendas2025", &hash).expect("Verify failed"));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same-password1").expect("hash");
        let b = hash_password("same-password1").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
