//! Argon2id key derivation.
//!
//! Turns a password and salt into a 256-bit [`MasterKey`]. Cost parameters are
//! tunable; the defaults follow the OWASP Argon2id baseline (19 MiB, t=2, p=1).

use argon2::{Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MasterKey, KEY_LEN};
use crate::error::{CipherError, Result};

/// Minimum accepted salt length.
const MIN_SALT_LEN: usize = 16;

/// Floor for memory cost outside the test profile (KiB).
const MIN_MEMORY_KIB: u32 = 8 * 1024;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and benchmarks. Never use for real data.
    pub fn fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject parameters below the production floor. [`KdfParams::fast`]
    /// is accepted as is.
    pub fn validate(&self) -> Result<()> {
        if *self == Self::fast() {
            return Ok(());
        }
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(CipherError::KdfFailed(format!(
                "memory cost {} KiB is below the minimum of {} KiB",
                self.memory_kib, MIN_MEMORY_KIB
            ))
            .into());
        }
        if self.iterations == 0 || self.parallelism == 0 {
            return Err(CipherError::KdfFailed(
                "iterations and parallelism must be at least 1".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Derive a key with the default cost parameters.
///
/// Identical `(password, salt)` always yield the identical key.
///
/// # Errors
///
/// Returns `CipherError::KdfFailed` if the salt is shorter than 16 bytes.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<MasterKey> {
    derive_key_with(password, salt, &KdfParams::default())
}

/// Derive a key with explicit cost parameters.
pub fn derive_key_with(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<MasterKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CipherError::KdfFailed(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            salt.len()
        ))
        .into());
    }

    debug!(
        memory_kib = params.memory_kib,
        iterations = params.iterations,
        "deriving key"
    );

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CipherError::KdfFailed(e.to_string()))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| CipherError::KdfFailed(e.to_string()))?;

    Ok(MasterKey::from_bytes(out))
}
