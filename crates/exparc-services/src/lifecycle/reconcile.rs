use exparc_core::models::{Datafile, Experiment, LocatedReplica};
use exparc_core::LocationKind;
use exparc_transfer::keys::path_in_fragment;
use serde::Serialize;

use super::ReplicaLifecycleManager;
use crate::error::WorkflowResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Datafiles that had stale online rows.
    pub datafiles: usize,
    pub retired_replicas: u64,
    /// Stale copies whose physical removal failed. Their rows are retired anyway.
    pub removal_failures: usize,
}

impl ReplicaLifecycleManager {
    /// Retire online replica rows left behind by an interrupted
    /// [`purge_and_archive`](Self::purge_and_archive).
    ///
    /// A datafile is considered archived when it has a verified offline
    /// replica whose URL fragment addresses the datafile's own entry in an
    /// experiment bundle. Archive records are not consulted: the run may have
    /// stopped before writing one. Remaining online copies are removed
    /// (failures are logged) and their rows deleted. Running this twice
    /// changes nothing the second time.
    #[tracing::instrument(skip(self, experiment), fields(experiment_id = experiment.id))]
    pub async fn reconcile(&self, experiment: &Experiment) -> WorkflowResult<ReconcileSummary> {
        let store = self.store();
        let mut summary = ReconcileSummary::default();

        for dataset in store.datasets_for_experiment(experiment.id).await? {
            if !self.is_exclusive(&dataset).await? {
                continue;
            }

            for datafile in store.datafiles_for_dataset(dataset.id).await? {
                let offline = store
                    .replicas_for_datafile(datafile.id, Some(LocationKind::Offline))
                    .await?;
                if !offline
                    .iter()
                    .any(|r| addresses_bundle_entry(r, &datafile, experiment.id))
                {
                    continue;
                }

                let stale = self.online_replicas(datafile.id).await?;
                if stale.is_empty() {
                    continue;
                }

                for located in &stale {
                    if let Err(e) = self.remove_copy(located).await {
                        tracing::warn!(
                            replica_id = located.replica.id,
                            url = %located.replica.url,
                            error = %e,
                            "Failed to remove stale online copy"
                        );
                        summary.removal_failures += 1;
                    }
                }

                let ids: Vec<i64> = stale.iter().map(|r| r.replica.id).collect();
                summary.retired_replicas += store.delete_replicas(&ids).await?;
                summary.datafiles += 1;
            }
        }

        tracing::info!(
            datafiles = summary.datafiles,
            retired_replicas = summary.retired_replicas,
            "Reconciliation finished"
        );
        Ok(summary)
    }
}

fn addresses_bundle_entry(
    located: &LocatedReplica,
    datafile: &Datafile,
    experiment_id: i64,
) -> bool {
    located.replica.verified
        && path_in_fragment(&located.replica.url).as_deref()
            == Some(datafile.path_in_archive(experiment_id).as_str())
}
