//! Domain models
//!
//! Experiments own datasets (many-to-many), datasets own datafiles, and each
//! datafile is represented by replicas held at locations. Archives record
//! completed bundle pushes.

pub mod archive;
pub mod experiment;
pub mod replica;

pub use archive::{Archive, NewArchive};
pub use experiment::{
    manifest_path_in_archive, Datafile, Dataset, DatasetTree, Experiment, ExperimentTree,
};
pub use replica::{select_preferred_replica, LocatedReplica, Location, NewReplica, Replica};
