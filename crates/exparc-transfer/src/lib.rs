//! Exparc Transfer Library
//!
//! This crate provides the transfer provider abstraction and its
//! implementations: a remote-shell provider that drives `ssh`/`scp` through
//! operator-overridable command templates, and a local filesystem provider.
//!
//! # URL conventions
//!
//! Every provider owns a base URL (`scp://host[:port]/base/path` or
//! `file:///base/path`). Replica URLs handled by a provider must live under
//! its base URL. Archive bundles are pushed to a URL generated under the base
//! (see [`keys::generate_archive_url`]), and offline replicas address a file
//! inside a bundle through the URL fragment (see [`keys::offline_replica_url`]).

pub mod commands;
pub mod executor;
pub mod factory;
pub mod keys;
#[cfg(feature = "transfer-local")]
pub mod local;
#[cfg(feature = "transfer-scp")]
pub mod scp;
pub mod traits;

// Re-export commonly used types
pub use commands::{safe_substitute, CommandTemplates};
pub use executor::{CommandOutput, RemoteExecutor};
pub use factory::{create_provider, ProviderRegistry};
#[cfg(feature = "transfer-local")]
pub use local::LocalTransfer;
#[cfg(feature = "transfer-scp")]
pub use scp::ScpTransfer;
pub use traits::{FetchedFile, FileSource, TransferError, TransferProvider, TransferResult};
