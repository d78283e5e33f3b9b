//! Archive records.

use exparc_core::models::{Archive, Experiment, NewArchive};
use exparc_core::{AppError, ArchiveConfig};
use exparc_db::MetadataStore;
use std::sync::Arc;

use crate::error::WorkflowResult;

/// Persists the description of a completed archive.
#[derive(Clone)]
pub struct ArchiveRecordBuilder {
    store: Arc<dyn MetadataStore>,
    config: ArchiveConfig,
}

impl ArchiveRecordBuilder {
    pub fn new(store: Arc<dyn MetadataStore>, config: ArchiveConfig) -> Self {
        Self { store, config }
    }

    /// Canonical URL of `experiment`: its own URL, or the configured base
    /// joined with its id.
    pub fn experiment_url(&self, experiment: &Experiment) -> String {
        match &experiment.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => self.config.default_experiment_url(experiment.id),
        }
    }

    /// Snapshot `experiment` and persist a new record for `archive_url`.
    /// Every call creates a new record.
    #[tracing::instrument(skip(self, experiment), fields(experiment_id = experiment.id))]
    pub async fn record(&self, experiment: &Experiment, archive_url: &str) -> WorkflowResult<Archive> {
        let owner = self
            .store
            .get_username(experiment.created_by)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", experiment.created_by)))?;

        let archive = self
            .store
            .create_archive(NewArchive {
                experiment_id: experiment.id,
                experiment_title: experiment.title.clone(),
                experiment_owner: owner,
                experiment_url: self.experiment_url(experiment),
                archive_url: archive_url.to_string(),
            })
            .await?;

        tracing::info!(archive_id = archive.id, archive_url = %archive.archive_url, "Archive recorded");
        Ok(archive)
    }
}
