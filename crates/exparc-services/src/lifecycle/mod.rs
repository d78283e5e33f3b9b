//! Replica lifecycle: purging online copies, replacing them with offline
//! copies inside an archive, and repairing interrupted replacements.

mod reconcile;
mod service;

pub use reconcile::ReconcileSummary;
pub use service::{LifecycleSummary, ReplicaLifecycleManager};
