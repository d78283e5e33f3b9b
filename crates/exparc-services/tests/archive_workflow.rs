use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use exparc_core::models::{Datafile, Experiment, Location, NewReplica};
use exparc_core::{
    ArchiveConfig, ArchiveState, ErrorKind, LocationConfig, LocationKind, ProviderKind,
    ProviderParams,
};
use exparc_db::{InMemoryStore, MetadataStore};
use exparc_services::{ArchiveOptions, ArchiveWorkflow, JsonManifestExporter, WorkflowError};
use exparc_transfer::keys::offline_replica_url;
use exparc_transfer::{LocalTransfer, ProviderRegistry};
use flate2::read::GzDecoder;
use tempfile::TempDir;

/// One online directory, one archive directory and an in-memory catalogue.
struct Fixture {
    online_dir: TempDir,
    archive_dir: TempDir,
    store: InMemoryStore,
    online: Location,
    archive: Location,
    providers: ProviderRegistry,
}

impl Fixture {
    async fn new() -> Self {
        let online_dir = tempfile::tempdir().unwrap();
        let archive_dir = tempfile::tempdir().unwrap();
        let online_url = format!("file://{}", online_dir.path().display());
        let archive_url = format!("file://{}", archive_dir.path().display());

        let store = InMemoryStore::new();
        let online = store.add_location("online", LocationKind::Online, &online_url);
        let archive = store.add_location("archive", LocationKind::Offline, &archive_url);

        let mut providers = ProviderRegistry::new();
        providers.insert(Arc::new(
            LocalTransfer::new("online", &online_url, false).await.unwrap(),
        ));
        providers.insert(Arc::new(
            LocalTransfer::new("archive", &archive_url, false).await.unwrap(),
        ));

        Self {
            online_dir,
            archive_dir,
            store,
            online,
            archive,
            providers,
        }
    }

    fn workflow(&self) -> ArchiveWorkflow {
        let config = ArchiveConfig {
            experiment_url_base: "http://portal.example/experiment/view".to_string(),
            ..ArchiveConfig::default()
        };
        ArchiveWorkflow::new(
            Arc::new(self.store.clone()),
            self.providers.clone(),
            Arc::new(JsonManifestExporter),
            config,
        )
    }

    /// Register `filename` in `dataset_id` with a verified online replica.
    /// The file is written to disk only when `content` is given.
    fn online_file(&self, dataset_id: i64, filename: &str, content: Option<&[u8]>) -> Datafile {
        let datafile = self.store.add_datafile(dataset_id, filename);
        let relative = format!("{}/{}", dataset_id, filename);
        if let Some(content) = content {
            let path = self.online_dir.path().join(&relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        self.store.add_replica(NewReplica {
            datafile_id: datafile.id,
            url: format!("{}/{}", self.online.url, relative),
            protocol: "file".to_string(),
            verified: true,
            stay_remote: false,
            location_id: self.online.id,
        });
        datafile
    }

    fn online_path(&self, dataset_id: i64, filename: &str) -> std::path::PathBuf {
        self.online_dir
            .path()
            .join(format!("{}/{}", dataset_id, filename))
    }
}

fn options(remove_online: bool) -> ArchiveOptions {
    ArchiveOptions {
        location: "archive".to_string(),
        remove_online,
    }
}

fn bundle_entries(archive_dir: &Path, archive_url: &str) -> Vec<(String, Vec<u8>)> {
    let name = archive_url.rsplit('/').next().unwrap();
    let file = std::fs::File::open(archive_dir.join(name)).unwrap();
    let mut bundle = tar::Archive::new(GzDecoder::new(file));
    bundle
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut content).unwrap();
            (path, content)
        })
        .collect()
}

fn seed_experiment(fixture: &Fixture, title: &str) -> Experiment {
    let owner = fixture.store.add_user("alice");
    fixture.store.add_experiment(title, owner, None)
}

#[tokio::test]
async fn bundle_follows_the_path_convention() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "Beamline 7");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    fixture.online_file(ds.id, "frame_001.img", Some(b"first frame"));

    let outcome = fixture.workflow().run(exp.id, &options(false)).await.unwrap();
    assert_eq!(outcome.state, ArchiveState::Complete);
    assert!(outcome.lifecycle.is_none());

    let entries = bundle_entries(fixture.archive_dir.path(), &outcome.archive.archive_url);
    let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
    let data_path = format!("{}/{}/frame_001.img", exp.id, ds.id);
    assert_eq!(paths, vec![format!("{}/Manifest", exp.id).as_str(), data_path.as_str()]);
    assert_eq!(entries[1].1, b"first frame");

    let manifest: serde_json::Value = serde_json::from_slice(&entries[0].1).unwrap();
    assert_eq!(manifest["title"], "Beamline 7");

    let name = outcome.archive.archive_url.rsplit('/').next().unwrap();
    assert!(name.starts_with(&format!("{}-", exp.id)));
    assert!(name.ends_with("-archive.tar.gz"));
    assert_eq!(
        outcome.archive.experiment_url,
        format!("http://portal.example/experiment/view/{}", exp.id)
    );
}

#[tokio::test]
async fn unreachable_datafile_is_skipped_and_the_rest_archived() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "partial");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    fixture.online_file(ds.id, "a.dat", Some(b"a"));
    let missing = fixture.online_file(ds.id, "b.dat", None);
    fixture.online_file(ds.id, "c.dat", Some(b"c"));

    let outcome = fixture.workflow().run(exp.id, &options(false)).await.unwrap();

    let entries = bundle_entries(fixture.archive_dir.path(), &outcome.archive.archive_url);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].0, format!("{}/{}/a.dat", exp.id, ds.id));
    assert_eq!(entries[2].0, format!("{}/{}/c.dat", exp.id, ds.id));
    assert_eq!(outcome.bundle.skipped.len(), 1);
    assert_eq!(outcome.bundle.skipped[0].datafile_id, missing.id);
}

#[tokio::test]
async fn online_replicas_are_replaced_by_one_offline_replica() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "replace");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let first = fixture.online_file(ds.id, "one.dat", Some(b"1"));
    let second = fixture.online_file(ds.id, "two words.dat", Some(b"2"));
    let bare = fixture.store.add_datafile(ds.id, "bare.dat");

    let outcome = fixture.workflow().run(exp.id, &options(true)).await.unwrap();
    let lifecycle = outcome.lifecycle.unwrap();
    assert_eq!(lifecycle.removed_replicas, 2);
    assert_eq!(lifecycle.created_replicas, 2);
    assert_eq!(lifecycle.retired_replicas, 2);

    for datafile in [&first, &second] {
        let replicas = fixture.store.replicas_of(datafile.id);
        assert_eq!(replicas.len(), 1);
        let replica = &replicas[0];
        assert!(replica.verified);
        assert_eq!(replica.location_id, fixture.archive.id);
        assert_eq!(replica.protocol, "file");
        assert_eq!(
            replica.url,
            offline_replica_url(
                &outcome.archive.archive_url,
                &datafile.path_in_archive(exp.id)
            )
        );
        assert!(!fixture.online_path(ds.id, &datafile.filename).exists());
    }
    assert!(fixture.store.replicas_of(bare.id).is_empty());
    assert!(fixture.store.has_experiment(exp.id));
}

#[tokio::test]
async fn shared_dataset_keeps_its_online_copies() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "archived");
    let other = seed_experiment(&fixture, "still online");
    let own = fixture.store.add_dataset(&[exp.id], "own");
    let shared = fixture.store.add_dataset(&[exp.id, other.id], "shared");
    let own_file = fixture.online_file(own.id, "own.dat", Some(b"own"));
    let shared_file = fixture.online_file(shared.id, "shared.dat", Some(b"shared"));

    let outcome = fixture.workflow().run(exp.id, &options(true)).await.unwrap();
    let lifecycle = outcome.lifecycle.unwrap();
    assert_eq!(lifecycle.detached_datasets, vec![shared.id]);

    let shared_replicas = fixture.store.replicas_of(shared_file.id);
    assert_eq!(shared_replicas.len(), 1);
    assert_eq!(shared_replicas[0].location_id, fixture.online.id);
    assert!(fixture.online_path(shared.id, "shared.dat").exists());
    assert!(fixture.store.has_dataset(shared.id));

    let remaining = fixture.store.datasets_for_experiment(other.id).await.unwrap();
    assert_eq!(remaining.len(), 1);

    let own_replicas = fixture.store.replicas_of(own_file.id);
    assert_eq!(own_replicas[0].location_id, fixture.archive.id);
}

#[tokio::test]
async fn archiving_twice_creates_two_records() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "twice");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    fixture.online_file(ds.id, "x.dat", Some(b"x"));
    let workflow = fixture.workflow();

    let first = workflow.run(exp.id, &options(false)).await.unwrap();
    let second = workflow.run(exp.id, &options(false)).await.unwrap();
    assert_ne!(first.archive.id, second.archive.id);

    let records = fixture.store.archives_for_experiment(exp.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|a| a.experiment_owner == "alice"));
}

#[tokio::test]
async fn unknown_archive_location_fails_the_run() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "misconfigured");

    let options = ArchiveOptions {
        location: "tape".to_string(),
        remove_online: true,
    };
    let failure = fixture.workflow().run(exp.id, &options).await.unwrap_err();
    assert_eq!(failure.state, ArchiveState::Failed);
    assert_eq!(failure.error.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn online_location_cannot_hold_bundles() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "misdirected");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let datafile = fixture.online_file(ds.id, "f.dat", Some(b"f"));

    let options = ArchiveOptions {
        location: "online".to_string(),
        remove_online: true,
    };
    let failure = fixture.workflow().run(exp.id, &options).await.unwrap_err();
    assert_eq!(failure.state, ArchiveState::Failed);
    assert_eq!(failure.error.kind(), ErrorKind::Configuration);
    assert_eq!(fixture.store.replicas_of(datafile.id)[0].location_id, fixture.online.id);
}

#[tokio::test]
async fn missing_experiment_is_a_store_failure() {
    let fixture = Fixture::new().await;

    let failure = fixture.workflow().run(999, &options(false)).await.unwrap_err();
    assert_eq!(failure.state, ArchiveState::Building);
    assert!(matches!(failure.error, WorkflowError::Store(_)));
}

#[tokio::test]
async fn failed_push_leaves_online_replicas_untouched() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "unpushed");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let datafile = fixture.online_file(ds.id, "keep.dat", Some(b"keep"));

    // Same catalogue, but the archive location is a remote shell whose copy
    // command always fails.
    let tape_dir = tempfile::tempdir().unwrap();
    let tape_url = format!("scp://localhost{}", tape_dir.path().display());
    fixture.store.add_location("tape", LocationKind::Offline, &tape_url);
    let commands: HashMap<String, String> = [("ssh", ""), ("scp_to", "exit 1")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut providers = fixture.providers.clone();
    let tape = ProviderRegistry::from_configs(&[LocationConfig {
        name: "tape".to_string(),
        kind: LocationKind::Offline,
        url: tape_url,
        provider: ProviderKind::Scp,
        params: ProviderParams {
            username: Some("archiver".to_string()),
            commands,
            ..ProviderParams::default()
        },
    }])
    .await
    .unwrap();
    providers.insert(tape.get("tape").unwrap());

    let workflow = ArchiveWorkflow::new(
        Arc::new(fixture.store.clone()),
        providers,
        Arc::new(JsonManifestExporter),
        ArchiveConfig::default(),
    );
    let options = ArchiveOptions {
        location: "tape".to_string(),
        remove_online: true,
    };
    let failure = workflow.run(exp.id, &options).await.unwrap_err();

    assert_eq!(failure.state, ArchiveState::Transferring);
    assert_eq!(failure.error.kind(), ErrorKind::Transport);
    assert!(fixture.archives_empty(exp.id).await);
    assert_eq!(fixture.store.replicas_of(datafile.id)[0].location_id, fixture.online.id);
    assert!(fixture.online_path(ds.id, "keep.dat").exists());
}

#[tokio::test]
async fn reconcile_finishes_a_run_stopped_while_purging() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "interrupted");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let datafile = fixture.online_file(ds.id, "f.dat", Some(b"f"));
    let workflow = fixture.workflow();

    fixture.store.fail_replica_deletes(true);
    let failure = workflow.run(exp.id, &options(true)).await.unwrap_err();
    fixture.store.fail_replica_deletes(false);

    assert_eq!(failure.state, ArchiveState::Purging);
    assert!(fixture.archives_empty(exp.id).await);
    assert_eq!(fixture.store.replicas_of(datafile.id).len(), 2);

    let summary = workflow.lifecycle().reconcile(&exp).await.unwrap();
    assert_eq!(summary.datafiles, 1);
    assert_eq!(summary.retired_replicas, 1);
    // The copy was already removed before the run stopped.
    assert_eq!(summary.removal_failures, 1);

    let replicas = fixture.store.replicas_of(datafile.id);
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].location_id, fixture.archive.id);
    assert!(replicas[0].verified);

    let again = workflow.lifecycle().reconcile(&exp).await.unwrap();
    assert_eq!(again.retired_replicas, 0);
    assert_eq!(again.datafiles, 0);
}

#[tokio::test]
async fn reconcile_ignores_offline_rows_for_other_bundle_entries() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "mismatched");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let datafile = fixture.online_file(ds.id, "f.dat", Some(b"f"));
    fixture.store.add_replica(NewReplica {
        datafile_id: datafile.id,
        url: offline_replica_url(
            &format!("{}/{}-old-archive.tar.gz", fixture.archive.url, exp.id),
            &format!("{}/{}/other.dat", exp.id, ds.id),
        ),
        protocol: "file".to_string(),
        verified: true,
        stay_remote: false,
        location_id: fixture.archive.id,
    });

    let summary = fixture.workflow().lifecycle().reconcile(&exp).await.unwrap();
    assert_eq!(summary.datafiles, 0);
    assert_eq!(fixture.store.replicas_of(datafile.id).len(), 2);
    assert!(fixture.online_path(ds.id, "f.dat").exists());
}

#[tokio::test]
async fn several_online_copies_collapse_into_one_offline_replica() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "mirrored");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");
    let datafile = fixture.online_file(ds.id, "f.dat", Some(b"f"));

    let mirror = fixture.online_path(ds.id, "mirror.dat");
    std::fs::write(&mirror, b"f").unwrap();
    fixture.store.add_replica(NewReplica {
        datafile_id: datafile.id,
        url: format!("{}/{}/mirror.dat", fixture.online.url, ds.id),
        protocol: "other".to_string(),
        verified: true,
        stay_remote: false,
        location_id: fixture.online.id,
    });

    let outcome = fixture.workflow().run(exp.id, &options(true)).await.unwrap();
    let lifecycle = outcome.lifecycle.unwrap();
    assert_eq!(lifecycle.removed_replicas, 2);
    assert_eq!(lifecycle.created_replicas, 1);
    assert_eq!(lifecycle.retired_replicas, 2);

    let replicas = fixture.store.replicas_of(datafile.id);
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].location_id, fixture.archive.id);
    assert_eq!(replicas[0].protocol, "file");
    assert!(!fixture.online_path(ds.id, "f.dat").exists());
    assert!(!mirror.exists());
}

#[tokio::test]
async fn fetches_are_spooled_in_the_configured_temp_dir() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "spooled");
    let ds = fixture.store.add_dataset(&[exp.id], "scan");

    // A remote online location served by the local shell; every fetch logs
    // the spool path it copied into.
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_url = format!("scp://localhost{}", remote_dir.path().display());
    let remote = fixture.store.add_location("remote", LocationKind::Online, &remote_url);
    std::fs::write(remote_dir.path().join("r.dat"), b"remote").unwrap();
    let datafile = fixture.store.add_datafile(ds.id, "r.dat");
    fixture.store.add_replica(NewReplica {
        datafile_id: datafile.id,
        url: format!("{}/r.dat", remote_url),
        protocol: "scp".to_string(),
        verified: true,
        stay_remote: false,
        location_id: remote.id,
    });

    let log = remote_dir.path().join("fetches.log");
    let scp_from = format!(
        r#"cp "${{remote}}" "${{local}}" && echo "${{local}}" >> "{}""#,
        log.display()
    );
    let commands: HashMap<String, String> = [("ssh", ""), ("scp_from", scp_from.as_str())]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut providers = fixture.providers.clone();
    let registry = ProviderRegistry::from_configs(&[LocationConfig {
        name: "remote".to_string(),
        kind: LocationKind::Online,
        url: remote_url,
        provider: ProviderKind::Scp,
        params: ProviderParams {
            username: Some("archiver".to_string()),
            commands,
            ..ProviderParams::default()
        },
    }])
    .await
    .unwrap();
    providers.insert(registry.get("remote").unwrap());

    let spool = tempfile::tempdir().unwrap();
    let workflow = ArchiveWorkflow::new(
        Arc::new(fixture.store.clone()),
        providers,
        Arc::new(JsonManifestExporter),
        ArchiveConfig {
            temp_dir: Some(spool.path().to_path_buf()),
            ..ArchiveConfig::default()
        },
    );
    let outcome = workflow.run(exp.id, &options(false)).await.unwrap();

    let entries = bundle_entries(fixture.archive_dir.path(), &outcome.archive.archive_url);
    assert_eq!(entries[1].1, b"remote");
    let logged = std::fs::read_to_string(&log).unwrap();
    let fetched = Path::new(logged.trim());
    assert_eq!(fetched.parent(), Some(spool.path()));
    assert!(!fetched.exists());
}

#[tokio::test]
async fn purge_removes_exclusive_data_and_detaches_shared() {
    let fixture = Fixture::new().await;
    let exp = seed_experiment(&fixture, "doomed");
    let other = seed_experiment(&fixture, "survivor");
    let own = fixture.store.add_dataset(&[exp.id], "own");
    let shared = fixture.store.add_dataset(&[exp.id, other.id], "shared");
    let own_file = fixture.online_file(own.id, "own.dat", Some(b"own"));
    let shared_file = fixture.online_file(shared.id, "shared.dat", Some(b"shared"));

    let summary = fixture.workflow().lifecycle().purge(&exp).await.unwrap();
    assert_eq!(summary.deleted_datasets, vec![own.id]);
    assert_eq!(summary.detached_datasets, vec![shared.id]);
    assert_eq!(summary.removed_replicas, 1);

    assert!(!fixture.store.has_experiment(exp.id));
    assert!(!fixture.store.has_datafile(own_file.id));
    assert!(!fixture.online_path(own.id, "own.dat").exists());
    assert!(fixture.store.has_datafile(shared_file.id));
    assert!(fixture.online_path(shared.id, "shared.dat").exists());
}

impl Fixture {
    async fn archives_empty(&self, experiment_id: i64) -> bool {
        self.store
            .archives_for_experiment(experiment_id)
            .await
            .unwrap()
            .is_empty()
    }
}
