//! Test support utilities for lockbox integration tests.
//!
//! Provides isolated project fixtures for the library API and the binary.

#![allow(dead_code)]

pub mod assertions;
pub mod commands;
pub mod git;
pub mod skip;

#[allow(unused_imports)]
pub use assertions::*;

use std::path::Path;

use lockbox::core::cipher::KdfParams;
use lockbox::core::config::BackendType;
use lockbox::core::keys::StaticPassword;
use lockbox::core::keystore::FileKeystore;
use lockbox::core::vault::Vault;
use tempfile::TempDir;

/// Password used by every fixture.
pub const PASSWORD: &str = "pw123";

/// Test environment with isolated temp directories.
///
/// `dir` holds the project, `home` stands in for `$LOCKBOX_HOME`. No
/// process-global state is mutated, so tests can run in parallel.
pub struct Test {
    pub dir: TempDir,
    pub home: TempDir,
}

impl Test {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let home = TempDir::new().expect("failed to create temp home");
        Self { dir, home }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Keystore under the temp home, shared by every vault of this test.
    pub fn keystore(&self) -> FileKeystore {
        FileKeystore::new(self.home.path().join("keystore"))
    }

    /// Initialize a project with `backend` and open it as `alice`.
    pub fn init(&self, backend: BackendType) -> Vault<FileKeystore> {
        Vault::init_with(
            self.root(),
            "acme",
            backend,
            self.keystore(),
            Box::new(StaticPassword::new(PASSWORD)),
        )
        .expect("failed to initialize project")
        .with_kdf_params(KdfParams::fast())
        .with_user("alice")
    }

    /// Reopen the project as `user`.
    pub fn open_as(&self, user: &str) -> Vault<FileKeystore> {
        open_at(self.root(), self.keystore(), user)
    }
}

/// Open the project at `root` as `user` with the fixture password.
pub fn open_at(root: &Path, keystore: FileKeystore, user: &str) -> Vault<FileKeystore> {
    Vault::open_with(root, keystore, Box::new(StaticPassword::new(PASSWORD)))
        .expect("failed to open project")
        .with_kdf_params(KdfParams::fast())
        .with_user(user)
}

/// Standard variables used across tests.
pub const STANDARD_VARS: &[(&str, &str)] = &[
    ("DATABASE_URL", "postgres://localhost/mydb"),
    ("API_KEY", "sk-test-12345"),
    ("JWT_SECRET", "super-secret-jwt-token"),
    ("REDIS_URL", "redis://localhost:6379"),
];
