use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write-once record of one completed archival operation.
///
/// The experiment fields are a snapshot taken when the bundle was pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: i64,
    pub experiment_id: i64,
    pub experiment_title: String,
    pub experiment_owner: String,
    pub experiment_url: String,
    pub archive_url: String,
    pub archive_created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArchive {
    pub experiment_id: i64,
    pub experiment_title: String,
    pub experiment_owner: String,
    pub experiment_url: String,
    pub archive_url: String,
}
