//! Copying variables between backends.

use tracing::{debug, info};
use zeroize::Zeroizing;

use super::Backend;
use crate::error::{BackendError, Result};

/// Copy every variable from `source` into `dest`, then verify the copy.
///
/// All values are read and decrypted before the first write, so a source
/// that can't be fully read leaves `dest` untouched. `source` is never
/// modified. Returns the number of variables copied.
///
/// # Errors
///
/// Returns `BackendError::Migration` naming how far the copy got.
pub fn migrate(source: &dyn Backend, dest: &mut dyn Backend) -> Result<usize> {
    let mut keys = source.list()?;
    keys.sort();
    let total = keys.len();
    info!(
        from = source.name(),
        to = dest.name(),
        environment = %source.environment(),
        total,
        "migrating variables"
    );

    let fail = |copied: usize, reason: String| BackendError::Migration {
        copied,
        total,
        reason,
    };

    let mut staged: Vec<(String, Zeroizing<Vec<u8>>, bool)> = Vec::with_capacity(total);
    for key in keys {
        let value = source
            .get(&key)
            .map_err(|e| fail(0, format!("reading {}: {}", key, e)))?;
        let sealed = source
            .is_sealed(&key)
            .map_err(|e| fail(0, format!("reading {}: {}", key, e)))?;
        staged.push((key, value, sealed));
    }

    for (copied, (key, value, sealed)) in staged.iter().enumerate() {
        dest.set(key, value, *sealed)
            .map_err(|e| fail(copied, format!("writing {}: {}", key, e)))?;
        debug!(key = %key, "copied");
    }

    for (key, value, _) in &staged {
        let copy = dest
            .get(key)
            .map_err(|e| fail(total, format!("verifying {}: {}", key, e)))?;
        if copy.as_slice() != value.as_slice() {
            return Err(fail(total, format!("verifying {}: value mismatch", key)).into());
        }
    }

    info!(count = total, "migration verified");
    Ok(total)
}
