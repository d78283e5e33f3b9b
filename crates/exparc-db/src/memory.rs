//! In-memory metadata store.
//!
//! Holds the same relations as the PostgreSQL schema in ordered maps behind
//! one mutex. Ids are allocated from a single counter shared by every table.

use async_trait::async_trait;
use chrono::Utc;
use exparc_core::models::{
    Archive, Datafile, Dataset, Experiment, LocatedReplica, Location, NewArchive, NewReplica,
    Replica,
};
use exparc_core::{AppError, LocationKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::store::MetadataStore;

#[derive(Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, String>,
    experiments: BTreeMap<i64, Experiment>,
    datasets: BTreeMap<i64, Dataset>,
    /// (experiment_id, dataset_id)
    links: BTreeSet<(i64, i64)>,
    datafiles: BTreeMap<i64, Datafile>,
    locations: BTreeMap<i64, Location>,
    replicas: BTreeMap<i64, Replica>,
    archives: Vec<Archive>,
    fail_replica_deletes: bool,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_replica(&mut self, replica: NewReplica) -> Replica {
        let replica = Replica {
            id: self.allocate_id(),
            datafile_id: replica.datafile_id,
            url: replica.url,
            protocol: replica.protocol,
            verified: replica.verified,
            stay_remote: replica.stay_remote,
            location_id: replica.location_id,
        };
        self.replicas.insert(replica.id, replica.clone());
        replica
    }
}

/// Metadata store kept entirely in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, username: &str) -> i64 {
        let mut state = self.state();
        let id = state.allocate_id();
        state.users.insert(id, username.to_string());
        id
    }

    pub fn add_experiment(&self, title: &str, owner_id: i64, url: Option<&str>) -> Experiment {
        let mut state = self.state();
        let experiment = Experiment {
            id: state.allocate_id(),
            title: title.to_string(),
            description: None,
            created_by: owner_id,
            url: url.map(String::from),
        };
        state.experiments.insert(experiment.id, experiment.clone());
        experiment
    }

    /// Create a dataset owned by every experiment in `experiment_ids`.
    pub fn add_dataset(&self, experiment_ids: &[i64], description: &str) -> Dataset {
        let mut state = self.state();
        let dataset = Dataset {
            id: state.allocate_id(),
            description: description.to_string(),
        };
        state.datasets.insert(dataset.id, dataset.clone());
        for experiment_id in experiment_ids {
            state.links.insert((*experiment_id, dataset.id));
        }
        dataset
    }

    pub fn add_datafile(&self, dataset_id: i64, filename: &str) -> Datafile {
        let mut state = self.state();
        let datafile = Datafile {
            id: state.allocate_id(),
            dataset_id,
            filename: filename.to_string(),
            size: None,
            checksum: None,
        };
        state.datafiles.insert(datafile.id, datafile.clone());
        datafile
    }

    pub fn add_location(&self, name: &str, kind: LocationKind, url: &str) -> Location {
        let mut state = self.state();
        let location = Location {
            id: state.allocate_id(),
            name: name.to_string(),
            kind,
            url: url.to_string(),
        };
        state.locations.insert(location.id, location.clone());
        location
    }

    pub fn add_replica(&self, replica: NewReplica) -> Replica {
        self.state().insert_replica(replica)
    }

    /// Every replica row of `datafile_id`, in id order.
    pub fn replicas_of(&self, datafile_id: i64) -> Vec<Replica> {
        self.state()
            .replicas
            .values()
            .filter(|r| r.datafile_id == datafile_id)
            .cloned()
            .collect()
    }

    pub fn has_dataset(&self, dataset_id: i64) -> bool {
        self.state().datasets.contains_key(&dataset_id)
    }

    pub fn has_datafile(&self, datafile_id: i64) -> bool {
        self.state().datafiles.contains_key(&datafile_id)
    }

    pub fn has_experiment(&self, experiment_id: i64) -> bool {
        self.state().experiments.contains_key(&experiment_id)
    }

    /// Make every following `delete_replicas` call fail, simulating a crash
    /// between staging replacement replicas and retiring the old rows.
    pub fn fail_replica_deletes(&self, fail: bool) {
        self.state().fail_replica_deletes = fail;
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, AppError> {
        Ok(self.state().experiments.get(&id).cloned())
    }

    async fn get_username(&self, user_id: i64) -> Result<Option<String>, AppError> {
        Ok(self.state().users.get(&user_id).cloned())
    }

    async fn datasets_for_experiment(&self, experiment_id: i64) -> Result<Vec<Dataset>, AppError> {
        let state = self.state();
        Ok(state
            .links
            .iter()
            .filter(|(e, _)| *e == experiment_id)
            .filter_map(|(_, d)| state.datasets.get(d).cloned())
            .collect())
    }

    async fn experiment_count_for_dataset(&self, dataset_id: i64) -> Result<i64, AppError> {
        let count = self
            .state()
            .links
            .iter()
            .filter(|(_, d)| *d == dataset_id)
            .count();
        Ok(count as i64)
    }

    async fn datafiles_for_dataset(&self, dataset_id: i64) -> Result<Vec<Datafile>, AppError> {
        Ok(self
            .state()
            .datafiles
            .values()
            .filter(|f| f.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn replicas_for_datafile(
        &self,
        datafile_id: i64,
        kind: Option<LocationKind>,
    ) -> Result<Vec<LocatedReplica>, AppError> {
        let state = self.state();
        let mut located = Vec::new();
        for replica in state.replicas.values().filter(|r| r.datafile_id == datafile_id) {
            let location = state.locations.get(&replica.location_id).ok_or_else(|| {
                AppError::Internal(format!(
                    "replica {} references unknown location {}",
                    replica.id, replica.location_id
                ))
            })?;
            if kind.map_or(true, |k| k == location.kind) {
                located.push(LocatedReplica {
                    replica: replica.clone(),
                    location: location.clone(),
                });
            }
        }
        Ok(located)
    }

    async fn create_replica(&self, replica: NewReplica) -> Result<Replica, AppError> {
        let mut state = self.state();
        if !state.datafiles.contains_key(&replica.datafile_id) {
            return Err(AppError::NotFound(format!("datafile {}", replica.datafile_id)));
        }
        if !state.locations.contains_key(&replica.location_id) {
            return Err(AppError::NotFound(format!("location {}", replica.location_id)));
        }
        Ok(state.insert_replica(replica))
    }

    async fn delete_replicas(&self, ids: &[i64]) -> Result<u64, AppError> {
        let mut state = self.state();
        if state.fail_replica_deletes {
            return Err(AppError::Internal("replica delete failed".to_string()));
        }
        let removed = ids
            .iter()
            .filter(|id| state.replicas.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_dataset(&self, dataset_id: i64) -> Result<(), AppError> {
        let mut state = self.state();
        let datafile_ids: BTreeSet<i64> = state
            .datafiles
            .values()
            .filter(|f| f.dataset_id == dataset_id)
            .map(|f| f.id)
            .collect();
        state
            .replicas
            .retain(|_, r| !datafile_ids.contains(&r.datafile_id));
        state.datafiles.retain(|id, _| !datafile_ids.contains(id));
        state.links.retain(|(_, d)| *d != dataset_id);
        state.datasets.remove(&dataset_id);
        Ok(())
    }

    async fn detach_dataset(&self, experiment_id: i64, dataset_id: i64) -> Result<(), AppError> {
        self.state().links.remove(&(experiment_id, dataset_id));
        Ok(())
    }

    async fn delete_experiment(&self, experiment_id: i64) -> Result<(), AppError> {
        let mut state = self.state();
        if state.experiments.remove(&experiment_id).is_none() {
            return Err(AppError::NotFound(format!("experiment {}", experiment_id)));
        }
        state.links.retain(|(e, _)| *e != experiment_id);
        Ok(())
    }

    async fn create_archive(&self, archive: NewArchive) -> Result<Archive, AppError> {
        let mut state = self.state();
        let archive = Archive {
            id: state.allocate_id(),
            experiment_id: archive.experiment_id,
            experiment_title: archive.experiment_title,
            experiment_owner: archive.experiment_owner,
            experiment_url: archive.experiment_url,
            archive_url: archive.archive_url,
            archive_created: Utc::now(),
        };
        state.archives.push(archive.clone());
        Ok(archive)
    }

    async fn archives_for_experiment(&self, experiment_id: i64) -> Result<Vec<Archive>, AppError> {
        Ok(self
            .state()
            .archives
            .iter()
            .filter(|a| a.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    async fn get_location_by_name(&self, name: &str) -> Result<Option<Location>, AppError> {
        Ok(self
            .state()
            .locations
            .values()
            .find(|l| l.name == name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_replica(datafile_id: i64, location_id: i64) -> NewReplica {
        NewReplica {
            datafile_id,
            url: format!("file:///data/{}", datafile_id),
            protocol: "file".into(),
            verified: true,
            stay_remote: false,
            location_id,
        }
    }

    #[tokio::test]
    async fn experiment_tree_follows_links() {
        let store = InMemoryStore::new();
        let owner = store.add_user("alice");
        let exp = store.add_experiment("run", owner, None);
        let other = store.add_experiment("other", owner, None);
        let ds = store.add_dataset(&[exp.id], "mine");
        store.add_dataset(&[other.id], "theirs");
        let df = store.add_datafile(ds.id, "a.txt");

        let tree = store.experiment_tree(exp.id).await.unwrap();
        assert_eq!(tree.datasets.len(), 1);
        assert_eq!(tree.datafiles().map(|f| f.id).collect::<Vec<_>>(), vec![df.id]);

        let missing = store.experiment_tree(9999).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn replicas_filter_by_location_kind() {
        let store = InMemoryStore::new();
        let ds = store.add_dataset(&[], "d");
        let df = store.add_datafile(ds.id, "f");
        let online = store.add_location("online", LocationKind::Online, "file:///on");
        let offline = store.add_location("archive", LocationKind::Offline, "file:///off");
        store.add_replica(new_replica(df.id, online.id));
        store.add_replica(new_replica(df.id, offline.id));

        let all = store.replicas_for_datafile(df.id, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let only_online = store
            .replicas_for_datafile(df.id, Some(LocationKind::Online))
            .await
            .unwrap();
        assert_eq!(only_online.len(), 1);
        assert_eq!(only_online[0].location.name, "online");
    }

    #[tokio::test]
    async fn delete_dataset_cascades_to_datafiles_and_replicas() {
        let store = InMemoryStore::new();
        let owner = store.add_user("u");
        let exp = store.add_experiment("e", owner, None);
        let ds = store.add_dataset(&[exp.id], "d");
        let df = store.add_datafile(ds.id, "f");
        let loc = store.add_location("online", LocationKind::Online, "file:///on");
        store.add_replica(new_replica(df.id, loc.id));

        store.delete_dataset(ds.id).await.unwrap();

        assert!(!store.has_dataset(ds.id));
        assert!(!store.has_datafile(df.id));
        assert!(store.replicas_of(df.id).is_empty());
        assert_eq!(store.experiment_count_for_dataset(ds.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_replica_rejects_unknown_references() {
        let store = InMemoryStore::new();
        let err = store.create_replica(new_replica(1, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failing_deletes_leave_rows_in_place() {
        let store = InMemoryStore::new();
        let ds = store.add_dataset(&[], "d");
        let df = store.add_datafile(ds.id, "f");
        let loc = store.add_location("online", LocationKind::Online, "file:///on");
        let replica = store.add_replica(new_replica(df.id, loc.id));

        store.fail_replica_deletes(true);
        assert!(store.delete_replicas(&[replica.id]).await.is_err());
        assert_eq!(store.replicas_of(df.id).len(), 1);

        store.fail_replica_deletes(false);
        assert_eq!(store.delete_replicas(&[replica.id]).await.unwrap(), 1);
    }
}
