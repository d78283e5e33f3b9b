use exparc_core::models::{Dataset, Experiment, LocatedReplica, Location, NewReplica};
use exparc_core::LocationKind;
use exparc_db::MetadataStore;
use exparc_transfer::keys::offline_replica_url;
use exparc_transfer::ProviderRegistry;
use serde::Serialize;
use std::sync::Arc;

use crate::error::WorkflowResult;

/// Counts of what a lifecycle pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleSummary {
    pub deleted_datasets: Vec<i64>,
    pub detached_datasets: Vec<i64>,
    /// Online copies physically removed.
    pub removed_replicas: usize,
    /// Offline replicas created to point into the archive.
    pub created_replicas: usize,
    /// Replica rows deleted.
    pub retired_replicas: u64,
}

/// Moves the replicas of an experiment between the online and offline state.
///
/// Only datasets owned by the processed experiment alone are touched
/// physically. A dataset shared with other experiments is detached from this
/// one and keeps its datafiles and replicas.
#[derive(Clone)]
pub struct ReplicaLifecycleManager {
    store: Arc<dyn MetadataStore>,
    providers: ProviderRegistry,
}

impl ReplicaLifecycleManager {
    pub fn new(store: Arc<dyn MetadataStore>, providers: ProviderRegistry) -> Self {
        Self { store, providers }
    }

    pub(crate) fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Whether `dataset` has no owner besides the experiment being processed.
    pub(crate) async fn is_exclusive(&self, dataset: &Dataset) -> WorkflowResult<bool> {
        Ok(self.store.experiment_count_for_dataset(dataset.id).await? <= 1)
    }

    pub(crate) async fn online_replicas(&self, datafile_id: i64) -> WorkflowResult<Vec<LocatedReplica>> {
        Ok(self
            .store
            .replicas_for_datafile(datafile_id, Some(LocationKind::Online))
            .await?)
    }

    /// Physically remove one copy through the provider of its location.
    pub(crate) async fn remove_copy(&self, located: &LocatedReplica) -> WorkflowResult<()> {
        let provider = self.providers.get(&located.location.name)?;
        provider.remove_file(&located.replica).await?;
        tracing::debug!(
            replica_id = located.replica.id,
            location = %located.location.name,
            url = %located.replica.url,
            "Online copy removed"
        );
        Ok(())
    }

    /// Remove an experiment with every dataset, datafile and online copy it
    /// owns exclusively. Shared datasets are detached.
    #[tracing::instrument(skip(self, experiment), fields(experiment_id = experiment.id))]
    pub async fn purge(&self, experiment: &Experiment) -> WorkflowResult<LifecycleSummary> {
        let mut summary = LifecycleSummary::default();

        for dataset in self.store.datasets_for_experiment(experiment.id).await? {
            if !self.is_exclusive(&dataset).await? {
                self.store.detach_dataset(experiment.id, dataset.id).await?;
                summary.detached_datasets.push(dataset.id);
                continue;
            }

            for datafile in self.store.datafiles_for_dataset(dataset.id).await? {
                for located in self.online_replicas(datafile.id).await? {
                    self.remove_copy(&located).await?;
                    summary.removed_replicas += 1;
                }
            }
            self.store.delete_dataset(dataset.id).await?;
            summary.deleted_datasets.push(dataset.id);
        }

        self.store.delete_experiment(experiment.id).await?;

        tracing::info!(
            deleted_datasets = summary.deleted_datasets.len(),
            detached_datasets = summary.detached_datasets.len(),
            removed_replicas = summary.removed_replicas,
            "Experiment purged"
        );
        Ok(summary)
    }

    /// Remove the online copies of an experiment's exclusively owned
    /// datafiles, replacing each with one offline replica inside the bundle at
    /// `archive_url` when one is given.
    ///
    /// Per datafile the replacement is staged before the old rows are retired.
    /// A failure between the two leaves both rows in place for
    /// [`ReplicaLifecycleManager::reconcile`] to clean up.
    #[tracing::instrument(skip(self, experiment, archive_location), fields(experiment_id = experiment.id, archive_location = %archive_location.name))]
    pub async fn purge_and_archive(
        &self,
        experiment: &Experiment,
        archive_url: Option<&str>,
        archive_location: &Location,
    ) -> WorkflowResult<LifecycleSummary> {
        let mut summary = LifecycleSummary::default();

        for dataset in self.store.datasets_for_experiment(experiment.id).await? {
            if !self.is_exclusive(&dataset).await? {
                self.store.detach_dataset(experiment.id, dataset.id).await?;
                summary.detached_datasets.push(dataset.id);
                continue;
            }

            for datafile in self.store.datafiles_for_dataset(dataset.id).await? {
                let online = self.online_replicas(datafile.id).await?;
                let Some(first) = online.first() else {
                    continue;
                };

                for located in &online {
                    self.remove_copy(located).await?;
                    summary.removed_replicas += 1;
                }

                if let Some(archive_url) = archive_url {
                    let replacement = NewReplica {
                        datafile_id: datafile.id,
                        url: offline_replica_url(
                            archive_url,
                            &datafile.path_in_archive(experiment.id),
                        ),
                        protocol: first.replica.protocol.clone(),
                        verified: true,
                        stay_remote: false,
                        location_id: archive_location.id,
                    };
                    let staged = self.store.create_replica(replacement).await?;
                    summary.created_replicas += 1;
                    tracing::debug!(
                        datafile_id = datafile.id,
                        replica_id = staged.id,
                        url = %staged.url,
                        "Offline replica staged"
                    );
                }

                let ids: Vec<i64> = online.iter().map(|r| r.replica.id).collect();
                summary.retired_replicas += self.store.delete_replicas(&ids).await?;
            }
        }

        tracing::info!(
            removed_replicas = summary.removed_replicas,
            created_replicas = summary.created_replicas,
            detached_datasets = summary.detached_datasets.len(),
            "Online replicas replaced"
        );
        Ok(summary)
    }
}
