//! Exparc Database Layer
//!
//! This crate provides the metadata store boundary used by the archiving
//! services: the [`MetadataStore`] trait, a PostgreSQL implementation built
//! from sqlx repositories, and an in-memory implementation.

// Module declarations
pub mod db;
pub mod memory;
pub mod store;

// Re-exports: Repositories
pub use db::{ArchiveRepository, ExperimentRepository, LocationRepository, ReplicaRepository};

// Re-exports: Transaction utilities
pub use db::transaction::{with_transaction, TransactionGuard};

// Re-exports: Store implementations
pub use memory::InMemoryStore;
pub use store::{MetadataStore, PgMetadataStore};
