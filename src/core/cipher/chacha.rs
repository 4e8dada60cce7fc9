//! ChaCha20-Poly1305 backend.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::Nonce;

use super::{check_key, Cipher, NONCE_LEN};
use crate::error::{CipherError, Result};

/// ChaCha20-Poly1305 (RFC 8439).
pub struct ChaCha20Poly1305;

impl Cipher for ChaCha20Poly1305 {
    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }

    fn seal(&self, key: &[u8], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()).into())
    }

    fn open(&self, key: &[u8], nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::AuthenticationFailed.into())
    }
}
