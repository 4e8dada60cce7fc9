//! Lockbox - encrypted, versioned variables for every environment.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface
//! │   ├── init          # Initialize a project
//! │   ├── secrets       # set / get / rm / list
//! │   ├── history       # Version history and audit log
//! │   ├── rotate        # Key rotation
//! │   ├── migrate       # Backend migration
//! │   ├── sync          # Git pull with conflict resolution
//! │   └── access        # grant / revoke
//! └── core/             # Core library components
//!     ├── cipher/       # AEAD engine, KDF, encrypted records
//!     ├── keystore/     # Key storage: keychain, file, memory
//!     ├── keys          # Key manager: derivation, caching, rotation
//!     ├── backend/      # Variable storage
//!     │   ├── file      # One JSON document per environment
//!     │   ├── sql       # SQLite with history and audit log
//!     │   └── git       # One blob per variable, git-tracked
//!     ├── conflict      # Merge conflict detection and resolution
//!     ├── access        # Per-environment access control
//!     ├── config        # .lockbox.toml management
//!     └── vault         # Facade tying it all together
//! ```
//!
//! # Features
//!
//! - AES-256-GCM and ChaCha20-Poly1305 with Argon2id key derivation
//! - Per-environment or per-project keys held in the OS keychain
//! - Interchangeable file, SQLite and git backends with migration
//! - Strategy-driven resolution of git merge conflicts
//! - Version history and audit log on the SQL backend

pub mod cli;
pub mod core;
pub mod error;
