//! Exparc Core Library
//!
//! This crate provides the domain models, error types, configuration and the
//! archive workflow state machine shared by all exparc components.

pub mod config;
pub mod error;
pub mod location_types;
pub mod models;
pub mod state;

// Re-export commonly used types
pub use config::{ArchiveConfig, LocationConfig, ProviderParams};
pub use error::{AppError, LogLevel};
pub use location_types::{LocationKind, ProviderKind};
pub use state::{transition, ArchiveEvent, ArchiveState, ErrorKind};
