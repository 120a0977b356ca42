//! Field-level encryption for health data at rest.

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid encoding")]
    InvalidEncoding,
    #[error("invalid UTF-8")]
    InvalidUtf8,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("IO error: {0}")]
    IoError(String),
}

/// ChaCha20-Poly1305 cipher for individual text columns.
///
/// Ciphertext is stored as base64(nonce ‖ ciphertext) with a fresh random
/// nonce per value.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher(..)")
    }
}

impl FieldCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Cipher with a fresh random key (tests and throwaway stores).
    pub fn random() -> Self {
        Self::new(generate_key())
    }

    /// Load the key file, creating it (mode 0600) if absent.
    pub fn from_key_file(path: &Path) -> Result<Self, SecretError> {
        load_or_create_key(path).map(Self::new)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &combined,
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecretError> {
        let combined = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
            .map_err(|_| SecretError::InvalidEncoding)?;

        if combined.len() < NONCE_LEN {
            return Err(SecretError::InvalidEncoding);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = ChaCha20Poly1305::new((&self.key).into());

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SecretError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
    }

    /// Serialize to JSON, then encrypt. Used for structured fields such as page lists.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, SecretError> {
        let json = serde_json::to_string(value).map_err(|e| SecretError::Json(e.to_string()))?;
        self.encrypt(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, SecretError> {
        let json = self.decrypt(encoded)?;
        serde_json::from_str(&json).map_err(|e| SecretError::Json(e.to_string()))
    }
}

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
    key
}

/// Load or create the secret key file (base64, one line).
pub fn load_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], SecretError> {
    if path.exists() {
        let encoded =
            std::fs::read_to_string(path).map_err(|e| SecretError::IoError(e.to_string()))?;
        let bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
                .map_err(|_| SecretError::InvalidEncoding)?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SecretError::InvalidKeyLength)?;
        return Ok(key);
    }

    let key = generate_key();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SecretError::IoError(e.to_string()))?;
    }
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key);
    std::fs::write(path, &encoded).map_err(|e| SecretError::IoError(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SecretError::IoError(e.to_string()))?;
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let cipher = FieldCipher::random();
        let evidence = "New onset seizure with postictal confusion";
        let encrypted = cipher.encrypt(evidence).unwrap();
        assert!(!encrypted.contains("seizure"));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), evidence);
    }

    #[test]
    fn fresh_nonce_per_value() {
        let cipher = FieldCipher::random();
        let a = cipher.encrypt("MRN: 12345").unwrap();
        let b = cipher.encrypt("MRN: 12345").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), cipher.decrypt(&b).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = FieldCipher::random().encrypt("secret").unwrap();
        assert!(matches!(
            FieldCipher::random().decrypt(&encrypted),
            Err(SecretError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = FieldCipher::random();
        let encrypted = cipher.encrypt("secret").unwrap();
        let mut bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &encrypted).unwrap();
        if let Some(b) = bytes.last_mut() {
            *b ^= 0x01;
        }
        let tampered = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);
        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn short_payload_is_invalid_encoding() {
        let cipher = FieldCipher::random();
        assert!(matches!(cipher.decrypt("AAAA"), Err(SecretError::InvalidEncoding)));
        assert!(matches!(cipher.decrypt("%%%"), Err(SecretError::InvalidEncoding)));
    }

    #[test]
    fn json_fields() {
        let cipher = FieldCipher::random();
        let pages = vec!["Page one".to_string(), "MRN: A1".to_string()];
        let encrypted = cipher.encrypt_json(&pages).unwrap();
        let back: Vec<String> = cipher.decrypt_json(&encrypted).unwrap();
        assert_eq!(back, pages);
    }

    #[test]
    fn key_file_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("secret.key");

        let key = load_or_create_key(&path).unwrap();
        assert!(path.exists());
        assert_eq!(load_or_create_key(&path).unwrap(), key);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn bad_key_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        std::fs::write(&path, "c2hvcnQ=").unwrap();
        assert!(matches!(load_or_create_key(&path), Err(SecretError::InvalidKeyLength)));
    }
}
