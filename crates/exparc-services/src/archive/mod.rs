//! Bundle building.

mod service;

pub use service::{ArchiveBuilder, BundleSummary, SkippedDatafile};
