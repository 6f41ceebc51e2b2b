//! Credential generation and at-rest secret encryption.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "ak_";
/// Characters of the key kept in clear for display (`ak_` + 8)
const DISPLAY_PREFIX_LEN: usize = 11;
const NONCE_LEN: usize = 12;

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    thread_rng().fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// `ak_` followed by 256 bits of base64url randomness.
pub fn generate_api_key() -> String {
    format!("{}{}", API_KEY_PREFIX, random_token())
}

/// Keys are looked up by hash, so a fast unsalted digest is used.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn api_key_display_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

pub fn generate_client_secret() -> String {
    random_token()
}

/// Alphanumeric only, so it can be embedded in SQL and URLs without escaping.
pub fn generate_db_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// AES-256-GCM box for secrets stored in the database.
///
/// Stored form is base64(nonce || ciphertext).
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = general_purpose::STANDARD
            .decode(key_b64.trim())
            .context("Secret key is not valid base64")?;
        if key.len() != 32 {
            bail!("Secret key must be 32 bytes, got {}", key.len());
        }
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow!("create cipher: {e}"))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encrypt secret: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = general_purpose::STANDARD
            .decode(stored)
            .context("Stored secret is not valid base64")?;
        if raw.len() <= NONCE_LEN {
            bail!("Stored secret is truncated");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("decrypt secret: {e}"))?;

        String::from_utf8(plaintext).context("Stored secret is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        general_purpose::STANDARD.encode([42u8; 32])
    }

    #[test]
    fn api_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), 3 + 43);
        assert_eq!(api_key_display_prefix(&key).len(), 11);
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn api_key_hash_is_stable_hex() {
        let hash = hash_api_key("ak_example");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_api_key("ak_example"));
        assert_ne!(hash, hash_api_key("ak_other"));
    }

    #[test]
    fn db_password_is_alphanumeric() {
        let pw = generate_db_password();
        assert_eq!(pw.len(), 32);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn secret_box_round_trip() {
        let sb = SecretBox::from_base64_key(&key()).unwrap();
        let stored = sb.encrypt("tenant-password").unwrap();
        assert_ne!(stored, "tenant-password");
        assert_eq!(sb.decrypt(&stored).unwrap(), "tenant-password");
        // fresh nonce each time
        assert_ne!(stored, sb.encrypt("tenant-password").unwrap());
    }

    #[test]
    fn secret_box_rejects_tampering_and_bad_keys() {
        let sb = SecretBox::from_base64_key(&key()).unwrap();
        let stored = sb.encrypt("value").unwrap();
        let mut raw = general_purpose::STANDARD.decode(&stored).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(sb.decrypt(&general_purpose::STANDARD.encode(raw)).is_err());

        let other = SecretBox::from_base64_key(&general_purpose::STANDARD.encode([1u8; 32])).unwrap();
        assert!(other.decrypt(&stored).is_err());

        assert!(SecretBox::from_base64_key("c2hvcnQ=").is_err());
    }
}
