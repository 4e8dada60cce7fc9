//! Lockbox - encrypted, versioned variables for every environment.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lockbox::cli::output;
use lockbox::cli::{execute, Cli};
use lockbox::error::{AccessError, ConfigError, Error, KeystoreError};

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("LOCKBOX_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("lockbox=debug")
        } else {
            EnvFilter::new("lockbox=warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .init();

    if let Err(e) = execute(cli.command, cli.env) {
        let suggestion = match &e {
            Error::Config(ConfigError::NotInitialized) => Some("run: lockbox init"),
            Error::Keystore(KeystoreError::NoPassword(_)) => {
                Some("set LOCKBOX_PASSWORD or run in a terminal")
            }
            Error::Access(AccessError::Denied { .. }) => {
                Some("ask an environment admin to run: lockbox grant <user>")
            }
            _ => None,
        };

        output::error(&e.to_string());
        if let Some(hint) = suggestion {
            output::hint(hint);
        }
        std::process::exit(1);
    }
}
