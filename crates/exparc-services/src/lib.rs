//! Exparc Services Layer
//!
//! Orchestration on top of the metadata store and the transfer providers:
//! bundle building, replica lifecycle, archive records and the end-to-end
//! archive workflow that ties them together.

pub mod archive;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod record;
pub mod workflow;

pub use archive::{ArchiveBuilder, BundleSummary, SkippedDatafile};
pub use error::{WorkflowError, WorkflowResult};
pub use lifecycle::{LifecycleSummary, ReconcileSummary, ReplicaLifecycleManager};
pub use manifest::{JsonManifestExporter, ManifestExporter};
pub use record::ArchiveRecordBuilder;
pub use workflow::{ArchiveFailure, ArchiveOptions, ArchiveOutcome, ArchiveWorkflow};
