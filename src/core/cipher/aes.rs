//! AES-256-GCM backend.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Nonce;

use super::{check_key, Cipher, NONCE_LEN};
use crate::error::{CipherError, Result};

/// AES-256-GCM with a 96-bit nonce and 128-bit tag.
pub struct Aes256Gcm;

impl Cipher for Aes256Gcm {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn seal(&self, key: &[u8], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()).into())
    }

    fn open(&self, key: &[u8], nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::AuthenticationFailed.into())
    }
}
