//! Cipher engine.
//!
//! Stateless authenticated encryption and key derivation. Every function here
//! is a pure function of its inputs (plus the OS RNG for salts and nonces).
//!
//! ## Wire format
//!
//! [`encrypt`] and [`encrypt_deterministic`] return `nonce ‖ ciphertext ‖ tag`
//! with a 12-byte nonce and a 16-byte tag. [`decrypt`] rejects anything shorter
//! than 28 bytes as malformed before touching the key.
//!
//! ## Adding a New Algorithm
//!
//! 1. Implement the `Cipher` trait in a new file (e.g., `xchacha.rs`)
//! 2. Add a variant to [`Algorithm`] and its tag to `Algorithm::from_tag`
//! 3. Existing records keep their tag, so old data stays readable

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::trace;
use zeroize::Zeroizing;

use crate::error::{CipherError, Result};

mod aes;
mod algorithm;
mod chacha;
mod kdf;
mod key;
pub(crate) mod record;

pub use aes::Aes256Gcm;
pub use algorithm::Algorithm;
pub use chacha::ChaCha20Poly1305;
pub use kdf::{derive_key, derive_key_with, KdfParams};
pub use key::MasterKey;
pub use record::{EncryptedRecord, RECORD_VERSION};

/// Key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;

/// Nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// An AEAD primitive.
///
/// Implementations take a 32-byte key and a 12-byte nonce. `seal` returns
/// `ciphertext ‖ tag`; `open` takes the same layout and fails with
/// `CipherError::AuthenticationFailed` on any mismatch.
pub trait Cipher {
    /// Algorithm tag stored alongside each record.
    fn name(&self) -> &'static str;

    /// Encrypt and authenticate `plaintext`.
    fn seal(&self, key: &[u8], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Verify and decrypt `ciphertext ‖ tag`.
    fn open(&self, key: &[u8], nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>>;
}

/// Reject keys that are not exactly 256 bits.
pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        }
        .into());
    }
    Ok(())
}

/// Generate a random 32-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random 256-bit key.
pub fn generate_key() -> MasterKey {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    MasterKey::from_bytes(bytes)
}

/// Generate a random nonce.
pub(crate) fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive a nonce as `HMAC-SHA256(key, context ‖ 0x00 ‖ plaintext)[0..12]`.
pub(crate) fn derive_nonce(key: &[u8], context: &[u8], plaintext: &[u8]) -> Result<[u8; NONCE_LEN]> {
    check_key(key)?;
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
    mac.update(context);
    mac.update(&[0x00]);
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    Ok(nonce)
}

fn frame(nonce: &[u8; NONCE_LEN], sealed: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&sealed);
    out
}

/// Encrypt with the default algorithm and a fresh random nonce.
///
/// # Errors
///
/// Returns `CipherError::InvalidKeyLength` if `key` is not 32 bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    encrypt_with(Algorithm::default(), plaintext, key)
}

/// Encrypt with an explicit algorithm and a fresh random nonce.
pub fn encrypt_with(algorithm: Algorithm, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    trace!(
        algorithm = algorithm.tag(),
        plaintext_len = plaintext.len(),
        "encrypting"
    );
    let nonce = random_nonce();
    let sealed = algorithm.cipher().seal(key, &nonce, plaintext)?;
    Ok(frame(&nonce, sealed))
}

/// Encrypt so that identical `(key, context, plaintext)` give identical output.
///
/// The nonce is derived from the plaintext and context under the key, so
/// unchanged values produce byte-identical ciphertext. Only safe when each
/// key is private to one environment; `context` (typically the variable
/// name) keeps two variables with the same value from sharing a nonce.
pub fn encrypt_deterministic(plaintext: &[u8], key: &[u8], context: &[u8]) -> Result<Vec<u8>> {
    encrypt_deterministic_with(Algorithm::default(), plaintext, key, context)
}

/// Deterministic encryption with an explicit algorithm.
pub fn encrypt_deterministic_with(
    algorithm: Algorithm,
    plaintext: &[u8],
    key: &[u8],
    context: &[u8],
) -> Result<Vec<u8>> {
    let nonce = derive_nonce(key, context, plaintext)?;
    trace!(
        algorithm = algorithm.tag(),
        plaintext_len = plaintext.len(),
        "encrypting deterministically"
    );
    let sealed = algorithm.cipher().seal(key, &nonce, plaintext)?;
    Ok(frame(&nonce, sealed))
}

/// Decrypt output of [`encrypt`] or [`encrypt_deterministic`].
///
/// # Errors
///
/// - `CipherError::InvalidKeyLength` if `key` is not 32 bytes
/// - `CipherError::Malformed` if the input is shorter than nonce + tag
/// - `CipherError::AuthenticationFailed` on tampering or a wrong key
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    decrypt_with(Algorithm::default(), ciphertext, key)
}

/// Decrypt with an explicit algorithm.
pub fn decrypt_with(
    algorithm: Algorithm,
    ciphertext: &[u8],
    key: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    check_key(key)?;
    if ciphertext.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Malformed(format!(
            "{} bytes is shorter than nonce + tag ({} bytes)",
            ciphertext.len(),
            NONCE_LEN + TAG_LEN
        ))
        .into());
    }
    trace!(ciphertext_len = ciphertext.len(), "decrypting");

    let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce);

    let plaintext = algorithm.cipher().open(key, &nonce_arr, sealed)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};

    fn key() -> MasterKey {
        generate_key()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let k = key();
        let ct = encrypt(b"secret-value", k.as_bytes()).unwrap();
        let pt = decrypt(&ct, k.as_bytes()).unwrap();
        assert_eq!(pt.as_slice(), b"secret-value");
    }

    #[test]
    fn test_roundtrip_binary_and_empty() {
        let k = key();
        for value in [&b""[..], b"\0\0\x01", b"line1\nline2\r\n\xff"] {
            let ct = encrypt(value, k.as_bytes()).unwrap();
            assert_eq!(decrypt(&ct, k.as_bytes()).unwrap().as_slice(), value);
        }
    }

    #[test]
    fn test_random_nonce_differs() {
        let k = key();
        let a = encrypt(b"same", k.as_bytes()).unwrap();
        let b = encrypt(b"same", k.as_bytes()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic_is_stable() {
        let k = key();
        let a = encrypt_deterministic(b"v", k.as_bytes(), b"API_KEY").unwrap();
        let b = encrypt_deterministic(b"v", k.as_bytes(), b"API_KEY").unwrap();
        assert_eq!(a, b);
        assert_eq!(decrypt(&a, k.as_bytes()).unwrap().as_slice(), b"v");
    }

    #[test]
    fn test_deterministic_context_changes_output() {
        let k = key();
        let a = encrypt_deterministic(b"v", k.as_bytes(), b"API_KEY").unwrap();
        let b = encrypt_deterministic(b"v", k.as_bytes(), b"DB_URL").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ct = encrypt(b"secret", key().as_bytes()).unwrap();
        let err = decrypt(&ct, key().as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_bit_flips_fail() {
        let k = key();
        let ct = encrypt(b"tamper me", k.as_bytes()).unwrap();
        for i in 0..ct.len() {
            let mut bad = ct.clone();
            bad[i] ^= 0x01;
            assert!(
                decrypt(&bad, k.as_bytes()).is_err(),
                "flip at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_short_input_is_malformed() {
        let k = key();
        let err = decrypt(&[0u8; NONCE_LEN + TAG_LEN - 1], k.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_bad_key_length_rejected() {
        for len in [0usize, 16, 31, 33, 64] {
            let err = encrypt(b"x", &vec![7u8; len]).unwrap_err();
            assert!(matches!(
                err,
                Error::Cipher(CipherError::InvalidKeyLength { got, .. }) if got == len
            ));
        }
    }

    #[test]
    fn test_algorithms_are_not_interchangeable() {
        let k = key();
        let ct = encrypt_with(Algorithm::ChaCha20Poly1305, b"x", k.as_bytes()).unwrap();
        assert!(decrypt_with(Algorithm::Aes256Gcm, &ct, k.as_bytes()).is_err());
        assert_eq!(
            decrypt_with(Algorithm::ChaCha20Poly1305, &ct, k.as_bytes())
                .unwrap()
                .as_slice(),
            b"x"
        );
    }

    #[test]
    fn test_salt_is_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
