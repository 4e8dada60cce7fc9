//! Core library components.
//!
//! Everything below the CLI: encryption, key management, storage backends,
//! conflict resolution, access control and the [`vault::Vault`] facade.

pub mod access;
pub mod backend;
pub mod cipher;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod domain;
pub mod keys;
pub mod keystore;
pub mod types;
pub mod validation;
pub mod vault;
