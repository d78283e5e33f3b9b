//! Metadata store abstraction
//!
//! The archiving services only see [`MetadataStore`], so they run unchanged
//! against PostgreSQL ([`PgMetadataStore`]) or the in-memory store used by
//! tests ([`crate::memory::InMemoryStore`]).

use async_trait::async_trait;
use exparc_core::models::{
    Archive, Datafile, Dataset, DatasetTree, Experiment, ExperimentTree, LocatedReplica, Location,
    NewArchive, NewReplica, Replica,
};
use exparc_core::{AppError, LocationKind};
use sqlx::PgPool;

use crate::db::{ArchiveRepository, ExperimentRepository, LocationRepository, ReplicaRepository};

/// Metadata operations needed by the archiver.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, AppError>;

    /// Display name of a user.
    async fn get_username(&self, user_id: i64) -> Result<Option<String>, AppError>;

    async fn datasets_for_experiment(&self, experiment_id: i64) -> Result<Vec<Dataset>, AppError>;

    /// Number of experiments owning a dataset. A dataset is exclusively owned
    /// when this is 1.
    async fn experiment_count_for_dataset(&self, dataset_id: i64) -> Result<i64, AppError>;

    async fn datafiles_for_dataset(&self, dataset_id: i64) -> Result<Vec<Datafile>, AppError>;

    /// Replicas of a datafile, optionally restricted to one location kind.
    async fn replicas_for_datafile(
        &self,
        datafile_id: i64,
        kind: Option<LocationKind>,
    ) -> Result<Vec<LocatedReplica>, AppError>;

    /// Persist a new replica. The write is durable when this returns.
    async fn create_replica(&self, replica: NewReplica) -> Result<Replica, AppError>;

    /// Bulk delete replica rows by id.
    async fn delete_replicas(&self, ids: &[i64]) -> Result<u64, AppError>;

    /// Delete a dataset together with its datafiles and their replica rows.
    async fn delete_dataset(&self, dataset_id: i64) -> Result<(), AppError>;

    /// Unlink a dataset from an experiment without touching the dataset.
    async fn detach_dataset(&self, experiment_id: i64, dataset_id: i64) -> Result<(), AppError>;

    async fn delete_experiment(&self, experiment_id: i64) -> Result<(), AppError>;

    async fn create_archive(&self, archive: NewArchive) -> Result<Archive, AppError>;

    async fn archives_for_experiment(&self, experiment_id: i64) -> Result<Vec<Archive>, AppError>;

    async fn get_location_by_name(&self, name: &str) -> Result<Option<Location>, AppError>;

    /// Load an experiment with every dataset and datafile reachable from it.
    async fn experiment_tree(&self, experiment_id: i64) -> Result<ExperimentTree, AppError> {
        let experiment = self
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("experiment {}", experiment_id)))?;

        let mut datasets = Vec::new();
        for dataset in self.datasets_for_experiment(experiment_id).await? {
            let datafiles = self.datafiles_for_dataset(dataset.id).await?;
            datasets.push(DatasetTree { dataset, datafiles });
        }

        Ok(ExperimentTree {
            experiment,
            datasets,
        })
    }
}

/// PostgreSQL-backed metadata store built from the sqlx repositories.
#[derive(Clone)]
pub struct PgMetadataStore {
    experiments: ExperimentRepository,
    locations: LocationRepository,
    replicas: ReplicaRepository,
    archives: ArchiveRepository,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            experiments: ExperimentRepository::new(pool.clone()),
            locations: LocationRepository::new(pool.clone()),
            replicas: ReplicaRepository::new(pool.clone()),
            archives: ArchiveRepository::new(pool),
        }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, AppError> {
        self.experiments.get(id).await
    }

    async fn get_username(&self, user_id: i64) -> Result<Option<String>, AppError> {
        self.experiments.get_username(user_id).await
    }

    async fn datasets_for_experiment(&self, experiment_id: i64) -> Result<Vec<Dataset>, AppError> {
        self.experiments.datasets_for_experiment(experiment_id).await
    }

    async fn experiment_count_for_dataset(&self, dataset_id: i64) -> Result<i64, AppError> {
        self.experiments.experiment_count_for_dataset(dataset_id).await
    }

    async fn datafiles_for_dataset(&self, dataset_id: i64) -> Result<Vec<Datafile>, AppError> {
        self.experiments.datafiles_for_dataset(dataset_id).await
    }

    async fn replicas_for_datafile(
        &self,
        datafile_id: i64,
        kind: Option<LocationKind>,
    ) -> Result<Vec<LocatedReplica>, AppError> {
        self.replicas.for_datafile(datafile_id, kind).await
    }

    async fn create_replica(&self, replica: NewReplica) -> Result<Replica, AppError> {
        self.replicas.create(replica).await
    }

    async fn delete_replicas(&self, ids: &[i64]) -> Result<u64, AppError> {
        self.replicas.delete_many(ids).await
    }

    async fn delete_dataset(&self, dataset_id: i64) -> Result<(), AppError> {
        self.experiments.delete_dataset(dataset_id).await
    }

    async fn detach_dataset(&self, experiment_id: i64, dataset_id: i64) -> Result<(), AppError> {
        self.experiments
            .detach_dataset(experiment_id, dataset_id)
            .await
    }

    async fn delete_experiment(&self, experiment_id: i64) -> Result<(), AppError> {
        self.experiments.delete_experiment(experiment_id).await
    }

    async fn create_archive(&self, archive: NewArchive) -> Result<Archive, AppError> {
        self.archives.create(archive).await
    }

    async fn archives_for_experiment(&self, experiment_id: i64) -> Result<Vec<Archive>, AppError> {
        self.archives.for_experiment(experiment_id).await
    }

    async fn get_location_by_name(&self, name: &str) -> Result<Option<Location>, AppError> {
        self.locations.get_by_name(name).await
    }
}
