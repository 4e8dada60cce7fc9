//! Algorithm registry.
//!
//! Records carry the algorithm tag they were sealed with; lookups by tag fail
//! closed so a record written by a newer build is never misread.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Aes256Gcm, ChaCha20Poly1305, Cipher};
use crate::error::{CipherError, Error};

/// Known AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Algorithm {
    /// AES-256-GCM (default)
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl Algorithm {
    /// Every registered algorithm.
    pub const ALL: &'static [Algorithm] = &[Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305];

    /// Look up an algorithm by its stored tag.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::UnknownAlgorithm` for unregistered tags.
    pub fn from_tag(tag: &str) -> Result<Self, CipherError> {
        match tag {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(CipherError::UnknownAlgorithm(other.to_string())),
        }
    }

    /// The tag stored alongside records.
    pub fn tag(&self) -> &'static str {
        self.cipher().name()
    }

    /// The implementation behind this tag.
    pub fn cipher(&self) -> &'static dyn Cipher {
        match self {
            Self::Aes256Gcm => &Aes256Gcm,
            Self::ChaCha20Poly1305 => &ChaCha20Poly1305,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).map_err(Error::from)
    }
}

impl From<Algorithm> for String {
    fn from(a: Algorithm) -> Self {
        a.tag().to_string()
    }
}

impl TryFrom<String> for Algorithm {
    type Error = CipherError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_tag(&s)
    }
}
