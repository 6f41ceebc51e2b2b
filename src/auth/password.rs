//! Password and client-secret hashing (argon2id).

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(input: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(input.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Verification uses the parameters embedded in the stored hash.
pub fn verify_password(input: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("parse password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(input.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2 hashing is CPU-bound; keep it off the async workers.
pub async fn hash_password_blocking(input: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&input)).await?
}

pub async fn verify_password_blocking(input: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&input, &hash)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let a = hash_password("same-input").unwrap();
        let b = hash_password("same-input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("x", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn blocking_helpers_round_trip() {
        let hash = hash_password_blocking("s3cret-pass".to_string()).await.unwrap();
        assert!(verify_password_blocking("s3cret-pass".to_string(), hash)
            .await
            .unwrap());
    }
}
