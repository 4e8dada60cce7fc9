//! Encrypted record: the persisted form of a variable.
//!
//! Binary fields are base64 in the serialized form so records can live in
//! JSON files and git-tracked blobs alike.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{derive_nonce, random_nonce, Algorithm, NONCE_LEN, TAG_LEN};
use crate::error::{CipherError, Result};

/// Current record format version.
pub const RECORD_VERSION: u32 = 1;

/// An authenticated ciphertext plus the header needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Algorithm tag, checked before any cryptographic operation.
    pub algorithm: String,
    /// Record format version.
    pub version: u32,
    /// KDF salt of the key that sealed this record (empty for random keys).
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    /// Unix timestamp (seconds) when the record was sealed.
    pub created_at: i64,
}

impl EncryptedRecord {
    /// Seal `plaintext` with a random nonce.
    pub fn seal(algorithm: Algorithm, key: &[u8], plaintext: &[u8], salt: &[u8]) -> Result<Self> {
        let nonce = random_nonce();
        Self::seal_with_nonce(algorithm, key, nonce, plaintext, salt, now())
    }

    /// Seal `plaintext` with a nonce derived from `(key, context, plaintext)`.
    ///
    /// `created_at` is supplied by the caller so that re-sealing an unchanged
    /// value can reproduce the record byte for byte.
    pub fn seal_deterministic(
        algorithm: Algorithm,
        key: &[u8],
        plaintext: &[u8],
        context: &[u8],
        salt: &[u8],
        created_at: i64,
    ) -> Result<Self> {
        let nonce = derive_nonce(key, context, plaintext)?;
        Self::seal_with_nonce(algorithm, key, nonce, plaintext, salt, created_at)
    }

    fn seal_with_nonce(
        algorithm: Algorithm,
        key: &[u8],
        nonce: [u8; NONCE_LEN],
        plaintext: &[u8],
        salt: &[u8],
        created_at: i64,
    ) -> Result<Self> {
        let mut sealed = algorithm.cipher().seal(key, &nonce, plaintext)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(Self {
            algorithm: algorithm.tag().to_string(),
            version: RECORD_VERSION,
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext: sealed,
            tag,
            created_at,
        })
    }

    /// Validate the header and resolve the algorithm.
    ///
    /// # Errors
    ///
    /// Fails closed on unknown algorithms, future versions and wrong
    /// nonce/tag lengths.
    pub fn algorithm(&self) -> Result<Algorithm> {
        let algorithm = Algorithm::from_tag(&self.algorithm)?;
        if self.version == 0 || self.version > RECORD_VERSION {
            return Err(CipherError::UnsupportedVersion {
                found: self.version,
                supported: RECORD_VERSION,
            }
            .into());
        }
        if self.nonce.len() != NONCE_LEN {
            return Err(CipherError::Malformed(format!(
                "nonce is {} bytes, expected {}",
                self.nonce.len(),
                NONCE_LEN
            ))
            .into());
        }
        if self.tag.len() != TAG_LEN {
            return Err(CipherError::Malformed(format!(
                "tag is {} bytes, expected {}",
                self.tag.len(),
                TAG_LEN
            ))
            .into());
        }
        Ok(algorithm)
    }

    /// Verify and decrypt.
    pub fn open(&self, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let algorithm = self.algorithm()?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.nonce);

        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);

        let plaintext = algorithm.cipher().open(key, &nonce, &sealed)?;
        Ok(Zeroizing::new(plaintext))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Serde adapter: `Vec<u8>` as standard base64.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
