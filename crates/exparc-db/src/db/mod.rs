//! Database repositories for data access layer
//!
//! Each repository is responsible for one group of tables and exposes the
//! queries the archiver needs. Row structs map query results onto the domain
//! models from `exparc-core`.
//
// Experiments, datasets, datafiles and owners
pub mod experiment;
//
// Locations and replicas
pub mod replica;
//
// Archive records
pub mod archive;
//
// Transaction utilities
pub mod transaction;

pub use archive::ArchiveRepository;
pub use experiment::ExperimentRepository;
pub use replica::{LocationRepository, ReplicaRepository};
