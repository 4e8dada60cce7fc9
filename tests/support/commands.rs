//! Command helper methods for Test.

use super::{Test, PASSWORD};
use assert_cmd::Command;
use std::process::Output;

impl Test {
    /// A `lockbox` command isolated to this test.
    ///
    /// Keys go to the file keystore under the temp home; the password and
    /// acting user come from the environment.
    pub fn cmd(&self) -> Command {
        #[allow(deprecated)]
        let mut cmd = Command::cargo_bin("lockbox").expect("failed to find lockbox binary");
        cmd.env("LOCKBOX_HOME", self.home.path());
        cmd.env("LOCKBOX_NO_KEYCHAIN", "1");
        cmd.env("LOCKBOX_PASSWORD", PASSWORD);
        cmd.env("LOCKBOX_USER", "alice");
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("LOCKBOX_LOG");
        cmd.current_dir(self.dir.path());
        cmd
    }

    /// Run `lockbox` with `args`.
    pub fn run(&self, args: &[&str]) -> Output {
        self.cmd()
            .args(args)
            .output()
            .expect("failed to run lockbox")
    }

    /// Run `lockbox` as `user`.
    pub fn run_as(&self, user: &str, args: &[&str]) -> Output {
        self.cmd()
            .env("LOCKBOX_USER", user)
            .args(args)
            .output()
            .expect("failed to run lockbox")
    }

    /// Shortcut for `lockbox init`.
    pub fn init_cmd(&self, backend: &str) -> Output {
        self.run(&["init", "--project", "acme", "--backend", backend])
    }

    /// Shortcut for `lockbox set`.
    pub fn set(&self, key: &str, val: &str) -> Output {
        self.run(&["set", key, val])
    }

    /// Shortcut for `lockbox get`.
    pub fn get(&self, key: &str) -> Output {
        self.run(&["get", key])
    }

    /// Initialize with `backend`, asserting success.
    pub fn init_cli(backend: &str) -> Self {
        let t = Self::new();
        super::assert_success(&t.init_cmd(backend));
        t
    }
}
