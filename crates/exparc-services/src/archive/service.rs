use exparc_core::models::{manifest_path_in_archive, select_preferred_replica, Datafile, ExperimentTree};
use exparc_core::LocationKind;
use exparc_db::MetadataStore;
use exparc_transfer::{FetchedFile, ProviderRegistry};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tar::{Builder, Header};

use crate::error::{WorkflowError, WorkflowResult};
use crate::manifest::ManifestExporter;

/// A datafile left out of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDatafile {
    pub datafile_id: i64,
    pub path: String,
    pub reason: String,
}

/// What went into one bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleSummary {
    pub experiment_id: i64,
    /// Entry paths in bundle order, manifest first.
    pub entries: Vec<String>,
    pub skipped: Vec<SkippedDatafile>,
}

/// Builds the tar/gzip bundle of an experiment.
///
/// Datafiles are fetched one at a time from their preferred verified online
/// replica. A datafile whose source is unreachable, or that has no such
/// replica, is skipped and logged; any other failure aborts the build.
#[derive(Clone)]
pub struct ArchiveBuilder {
    store: Arc<dyn MetadataStore>,
    providers: ProviderRegistry,
    exporter: Arc<dyn ManifestExporter>,
    temp_dir: Option<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        providers: ProviderRegistry,
        exporter: Arc<dyn ManifestExporter>,
    ) -> Self {
        Self {
            store,
            providers,
            exporter,
            temp_dir: None,
        }
    }

    /// Spool manifests and fetched datafiles into `dir` instead of the system
    /// temp directory.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    fn spool_file(&self, prefix: &str) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    /// Write the bundle of `tree` to `sink`. The sink is flushed and dropped
    /// before this returns.
    #[tracing::instrument(skip(self, tree, sink), fields(experiment_id = tree.experiment.id))]
    pub async fn build<W: Write + Send>(
        &self,
        tree: &ExperimentTree,
        sink: W,
    ) -> WorkflowResult<BundleSummary> {
        let start = Instant::now();
        let experiment_id = tree.experiment.id;
        let mut summary = BundleSummary {
            experiment_id,
            ..Default::default()
        };

        let mut manifest = self.spool_file("exparc_manifest_")?;
        self.exporter
            .export(tree, manifest.as_file_mut())
            .map_err(WorkflowError::Manifest)?;

        let mut bundle = Builder::new(GzEncoder::new(sink, Compression::default()));

        let manifest_path = manifest_path_in_archive(experiment_id);
        append_file(&mut bundle, &manifest_path, manifest.reopen()?)?;
        summary.entries.push(manifest_path);
        manifest.close()?;

        for datafile in tree.datafiles() {
            let path = datafile.path_in_archive(experiment_id);
            match self.fetch(datafile).await? {
                Ok(fetched) => {
                    append_file(&mut bundle, &path, File::open(fetched.path())?)?;
                    summary.entries.push(path);
                }
                Err(reason) => {
                    tracing::warn!(
                        datafile_id = datafile.id,
                        path = %path,
                        reason = %reason,
                        "Skipping datafile"
                    );
                    summary.skipped.push(SkippedDatafile {
                        datafile_id: datafile.id,
                        path,
                        reason,
                    });
                }
            }
        }

        let mut sink = bundle.into_inner()?.finish()?;
        sink.flush()?;
        drop(sink);

        tracing::info!(
            entries = summary.entries.len(),
            skipped = summary.skipped.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Bundle built"
        );
        Ok(summary)
    }

    /// Fetch the content of `datafile`. The inner `Err` carries the reason a
    /// datafile is skipped; the outer error aborts the build.
    async fn fetch(
        &self,
        datafile: &Datafile,
    ) -> WorkflowResult<Result<FetchedFile, String>> {
        let replicas = self
            .store
            .replicas_for_datafile(datafile.id, Some(LocationKind::Online))
            .await?;
        let Some(preferred) = select_preferred_replica(&replicas, true) else {
            return Ok(Err("no verified online replica".to_string()));
        };

        let provider = self.providers.get(&preferred.location.name)?;
        match provider
            .open_for_read(&preferred.replica, self.temp_dir.as_deref())
            .await
        {
            Ok(fetched) => Ok(Ok(fetched)),
            Err(e) if e.is_unreachable() => Ok(Err(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Append the whole of `file` under `path` with a fresh header.
fn append_file<W: Write>(bundle: &mut Builder<W>, path: &str, file: File) -> std::io::Result<()> {
    let size = file.metadata()?.len();
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    bundle.append_data(&mut header, path, file.take(size))
}
