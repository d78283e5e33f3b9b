//! End-to-end archive workflow: build → push → purge → record.

use exparc_core::models::Archive;
use exparc_core::{
    transition, AppError, ArchiveConfig, ArchiveEvent, ArchiveState, LocationKind, LogLevel,
};
use exparc_db::MetadataStore;
use exparc_transfer::ProviderRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::archive::{ArchiveBuilder, BundleSummary};
use crate::error::{WorkflowError, WorkflowResult};
use crate::lifecycle::{LifecycleSummary, ReplicaLifecycleManager};
use crate::manifest::ManifestExporter;
use crate::record::ArchiveRecordBuilder;

/// Per-run options.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Name of the location the bundle is pushed to.
    pub location: String,
    /// Replace online copies with offline copies inside the bundle.
    pub remove_online: bool,
}

impl ArchiveOptions {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            location: config.archive_location.clone(),
            remove_online: config.remove_online,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub state: ArchiveState,
    pub archive: Archive,
    pub bundle: BundleSummary,
    /// `None` when online copies were kept.
    pub lifecycle: Option<LifecycleSummary>,
}

/// A workflow run that stopped before completing.
///
/// `state` is where the run stopped: `Failed` for errors that cannot succeed
/// on retry, otherwise the state of the step that failed.
#[derive(Debug, Error)]
#[error("archive workflow stopped in state {state}: {error}")]
pub struct ArchiveFailure {
    pub state: ArchiveState,
    #[source]
    pub error: WorkflowError,
}

struct StateTracker {
    experiment_id: i64,
    state: ArchiveState,
}

impl StateTracker {
    fn advance(&mut self, event: ArchiveEvent) {
        let next = transition(self.state, event);
        tracing::debug!(
            experiment_id = self.experiment_id,
            from = %self.state,
            to = %next,
            event = ?event,
            "Archive state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, error: WorkflowError) -> ArchiveFailure {
        self.advance(ArchiveEvent::Error(error.kind()));
        ArchiveFailure {
            state: self.state,
            error,
        }
    }
}

/// Archives one experiment at a time.
#[derive(Clone)]
pub struct ArchiveWorkflow {
    store: Arc<dyn MetadataStore>,
    providers: ProviderRegistry,
    builder: ArchiveBuilder,
    lifecycle: ReplicaLifecycleManager,
    records: ArchiveRecordBuilder,
    config: ArchiveConfig,
}

impl ArchiveWorkflow {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        providers: ProviderRegistry,
        exporter: Arc<dyn ManifestExporter>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            builder: ArchiveBuilder::new(store.clone(), providers.clone(), exporter)
                .with_temp_dir(config.temp_dir.clone()),
            lifecycle: ReplicaLifecycleManager::new(store.clone(), providers.clone()),
            records: ArchiveRecordBuilder::new(store.clone(), config.clone()),
            store,
            providers,
            config,
        }
    }

    pub fn lifecycle(&self) -> &ReplicaLifecycleManager {
        &self.lifecycle
    }

    /// Run the whole workflow for `experiment_id`.
    #[tracing::instrument(skip(self, options), fields(location = %options.location))]
    pub async fn run(
        &self,
        experiment_id: i64,
        options: &ArchiveOptions,
    ) -> Result<ArchiveOutcome, ArchiveFailure> {
        let start = Instant::now();
        let mut tracker = StateTracker {
            experiment_id,
            state: ArchiveState::Pending,
        };
        tracker.advance(ArchiveEvent::Start);

        match self.execute(experiment_id, options, &mut tracker).await {
            Ok(outcome) => {
                tracing::info!(
                    archive_url = %outcome.archive.archive_url,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Experiment archived"
                );
                Ok(outcome)
            }
            Err(error) => {
                let failure = tracker.fail(error);
                log_failure(&failure);
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        experiment_id: i64,
        options: &ArchiveOptions,
        tracker: &mut StateTracker,
    ) -> WorkflowResult<ArchiveOutcome> {
        let location = self
            .store
            .get_location_by_name(&options.location)
            .await?
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Archive location '{}' is not registered",
                    options.location
                ))
            })?;
        if location.kind != LocationKind::Offline {
            return Err(AppError::Config(format!(
                "Archive location '{}' is {}, not offline",
                location.name, location.kind
            ))
            .into());
        }
        let provider = self.providers.get(&location.name)?;
        let tree = self.store.experiment_tree(experiment_id).await?;

        let mut spool = tempfile::Builder::new();
        spool.prefix("exparc_bundle_").suffix(".tar.gz");
        let bundle_file = match &self.config.temp_dir {
            Some(dir) => spool.tempfile_in(dir)?,
            None => spool.tempfile()?,
        };
        let bundle = self.builder.build(&tree, bundle_file.reopen()?).await?;
        tracker.advance(ArchiveEvent::BundleBuilt);

        let archive_url = provider
            .put_archive(bundle_file.path(), &tree.experiment)
            .await?;
        bundle_file.close()?;
        tracker.advance(ArchiveEvent::BundlePushed);

        let lifecycle = if options.remove_online {
            let summary = self
                .lifecycle
                .purge_and_archive(&tree.experiment, Some(&archive_url), &location)
                .await?;
            tracker.advance(ArchiveEvent::ReplicasPurged);
            Some(summary)
        } else {
            tracker.advance(ArchiveEvent::PurgeSkipped);
            None
        };

        let archive = self.records.record(&tree.experiment, &archive_url).await?;
        tracker.advance(ArchiveEvent::RecordCreated);

        Ok(ArchiveOutcome {
            state: tracker.state,
            archive,
            bundle,
            lifecycle,
        })
    }
}

fn log_failure(failure: &ArchiveFailure) {
    let state = failure.state;
    let error = &failure.error;
    match error.log_level() {
        LogLevel::Debug => tracing::debug!(state = %state, error = %error, "Archive workflow stopped"),
        LogLevel::Warn => tracing::warn!(state = %state, error = %error, "Archive workflow stopped"),
        LogLevel::Error => tracing::error!(state = %state, error = %error, "Archive workflow stopped"),
    }
}
