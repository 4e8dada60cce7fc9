//! Keystore selection.
//!
//! Picks the native credential vault when the platform has one, otherwise
//! the encrypted-file keystore.

use super::{FileKeystore, Keystore};
use crate::error::Result;
use tracing::info;
#[cfg(target_os = "macos")]
use tracing::warn;

#[cfg(target_os = "macos")]
use super::keychain::Keychain;

/// Default keystore for this host.
///
/// On macOS: Keychain (reads fall back to the file keystore), unless
/// `LOCKBOX_NO_KEYCHAIN` is set.
/// Other platforms: the encrypted file keystore.
pub fn default_keystore() -> Result<Box<dyn Keystore>> {
    #[cfg(target_os = "macos")]
    {
        if should_use_keychain() {
            info!("using macOS Keychain keystore");
            match Keychain::new() {
                Ok(keychain) => {
                    return Ok(Box::new(KeychainThenFile {
                        keychain,
                        file: FileKeystore::default_location()?,
                    }));
                }
                Err(e) => warn!(error = %e, "failed to initialize Keychain keystore"),
            }
        } else {
            info!("Keychain disabled (LOCKBOX_NO_KEYCHAIN)");
        }
    }

    let file = FileKeystore::default_location()?;
    info!(dir = %file.dir().display(), "using file keystore");
    Ok(Box::new(file))
}

#[cfg(target_os = "macos")]
fn should_use_keychain() -> bool {
    std::env::var(crate::core::constants::ENV_NO_KEYCHAIN).is_err()
}

/// Writes go to the Keychain; reads fall back to keys left in the file keystore.
#[cfg(target_os = "macos")]
struct KeychainThenFile {
    keychain: Keychain,
    file: FileKeystore,
}

#[cfg(target_os = "macos")]
impl Keystore for KeychainThenFile {
    fn store(&self, service: &str, account: &str, data: &[u8]) -> Result<()> {
        self.keychain.store(service, account, data)
    }

    fn retrieve(&self, service: &str, account: &str) -> Result<Vec<u8>> {
        match self.keychain.retrieve(service, account) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => self.file.retrieve(service, account),
            Err(e) => Err(e),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        self.keychain.delete(service, account)?;
        self.file.delete(service, account)
    }

    fn list(&self, service: &str) -> Result<Vec<String>> {
        let mut accounts = self.keychain.list(service)?;
        accounts.extend(self.file.list(service)?);
        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }

    fn name(&self) -> &'static str {
        "keychain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_default_keystore_is_file_off_macos() {
        // Construction never touches the filesystem.
        if let Ok(ks) = default_keystore() {
            assert_eq!(ks.name(), "file");
        }
    }
}
