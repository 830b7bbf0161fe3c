//! Credential vault: authenticated encryption for tenant provider API keys.
//!
//! One symmetric key, derived once from the configured master secret, seals
//! every tenant's credentials. That makes the master secret a cross-tenant
//! blast radius: compromise of the single key exposes all tenants at once.
//! Per-tenant data keys wrapped by the master key would narrow that, at the
//! cost of a token format change; until then the trade-off stays documented
//! here rather than hidden.
//!
//! Token format: `b64(iv):b64(tag):b64(ciphertext)` with a fresh random
//! 16-byte IV per call, so encrypting the same plaintext twice yields
//! different tokens.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// AES-256-GCM with the 16-byte IV the persisted token format carries.
type VaultCipher = AesGcm<Aes256, U16>;

const MIN_MASTER_KEY_CHARS: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("master encryption key must be at least {MIN_MASTER_KEY_CHARS} characters")]
    KeyTooShort,
    #[error("cipher initialization failed")]
    Cipher,
    #[error("credential token failed integrity verification")]
    DataIntegrity,
    #[error("credential payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct CredentialVault {
    cipher: VaultCipher,
}

impl CredentialVault {
    /// Derives the symmetric key as a one-way hash of the master secret;
    /// the key is held for the process lifetime. Secrets shorter than 32
    /// characters are rejected outright.
    pub fn new(master_key: &str) -> Result<Self, VaultError> {
        if master_key.len() < MIN_MASTER_KEY_CHARS {
            return Err(VaultError::KeyTooShort);
        }
        let key = Sha256::digest(master_key.as_bytes());
        let cipher = VaultCipher::new_from_slice(&key).map_err(|_| VaultError::Cipher)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let iv: [u8; IV_LEN] = Uuid::new_v4().into_bytes();
        let nonce = Nonce::<U16>::from_slice(&iv);
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Cipher)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            STANDARD.encode(iv),
            STANDARD.encode(tag),
            STANDARD.encode(ciphertext)
        ))
    }

    /// Verifies the authentication tag before returning plaintext. A
    /// malformed token or any tampering fails with `DataIntegrity`; partial
    /// plaintext is never returned.
    pub fn decrypt(&self, token: &str) -> Result<String, VaultError> {
        let mut segments = token.split(':');
        let (Some(iv_b64), Some(tag_b64), Some(ct_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VaultError::DataIntegrity);
        };

        let iv = STANDARD
            .decode(iv_b64)
            .map_err(|_| VaultError::DataIntegrity)?;
        let tag = STANDARD
            .decode(tag_b64)
            .map_err(|_| VaultError::DataIntegrity)?;
        let ciphertext = STANDARD
            .decode(ct_b64)
            .map_err(|_| VaultError::DataIntegrity)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(VaultError::DataIntegrity);
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_ref())
            .map_err(|_| VaultError::DataIntegrity)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::DataIntegrity)
    }

    pub fn encrypt_object(&self, value: &Value) -> Result<String, VaultError> {
        let plaintext = serde_json::to_string(value)?;
        self.encrypt(&plaintext)
    }

    pub fn decrypt_object(&self, token: &str) -> Result<Value, VaultError> {
        let plaintext = self.decrypt(token)?;
        Ok(serde_json::from_str(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    const TEST_KEY: &str = "unit-test-master-key-0123456789abcdef";

    fn vault() -> CredentialVault {
        CredentialVault::new(TEST_KEY).unwrap()
    }

    #[test]
    fn rejects_short_master_key() {
        assert!(matches!(
            CredentialVault::new("too-short"),
            Err(VaultError::KeyTooShort)
        ));
    }

    #[test]
    fn round_trips_plaintext() {
        let vault = vault();
        let token = vault.encrypt("exotel-api-key-123").unwrap();
        assert_eq!(vault.decrypt(&token).unwrap(), "exotel-api-key-123");
    }

    #[test]
    fn round_trips_structured_secrets() {
        let vault = vault();
        let keys = json!({"stt": "deepgram-key", "tts": "eleven-key", "llm": "openai-key"});
        let token = vault.encrypt_object(&keys).unwrap();
        assert_eq!(vault.decrypt_object(&token).unwrap(), keys);
    }

    #[test]
    fn same_plaintext_yields_different_tokens() {
        let vault = vault();
        let first = vault.encrypt("secret").unwrap();
        let second = vault.encrypt("secret").unwrap();
        assert_ne!(first, second);
        assert_eq!(vault.decrypt(&first).unwrap(), "secret");
        assert_eq!(vault.decrypt(&second).unwrap(), "secret");
    }

    #[test]
    fn token_has_three_base64_segments() {
        let vault = vault();
        let token = vault.encrypt("secret").unwrap();
        let segments: Vec<&str> = token.split(':').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(STANDARD.decode(segments[0]).unwrap().len(), 16);
        assert_eq!(STANDARD.decode(segments[1]).unwrap().len(), 16);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity() {
        let vault = vault();
        let token = vault.encrypt("secret-material").unwrap();
        let segments: Vec<&str> = token.split(':').collect();
        let mut ciphertext = STANDARD.decode(segments[2]).unwrap();
        ciphertext[0] ^= 0x01;
        let tampered = format!(
            "{}:{}:{}",
            segments[0],
            segments[1],
            STANDARD.encode(ciphertext)
        );
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::DataIntegrity)
        ));
    }

    #[test]
    fn tampered_tag_fails_integrity() {
        let vault = vault();
        let token = vault.encrypt("secret-material").unwrap();
        let segments: Vec<&str> = token.split(':').collect();
        let mut tag = STANDARD.decode(segments[1]).unwrap();
        tag[0] ^= 0x01;
        let tampered = format!("{}:{}:{}", segments[0], STANDARD.encode(tag), segments[2]);
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::DataIntegrity)
        ));
    }

    #[test]
    fn missing_segment_fails_integrity() {
        let vault = vault();
        let token = vault.encrypt("secret").unwrap();
        let truncated = token.rsplit_once(':').map(|(head, _)| head).unwrap();
        assert!(matches!(
            vault.decrypt(truncated),
            Err(VaultError::DataIntegrity)
        ));
        assert!(matches!(
            vault.decrypt("not-a-token"),
            Err(VaultError::DataIntegrity)
        ));
    }
}
