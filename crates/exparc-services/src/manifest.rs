//! Manifest exporters.
//!
//! The manifest is the descriptive metadata document stored as the first
//! entry of every bundle.

use anyhow::{Context, Result};
use exparc_core::models::ExperimentTree;
use serde::Serialize;
use std::io::Write;

/// Renders the manifest of an experiment.
pub trait ManifestExporter: Send + Sync {
    /// Write the manifest for `tree` to `writer`. Failures abort the build.
    fn export(&self, tree: &ExperimentTree, writer: &mut dyn Write) -> Result<()>;
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    experiment_id: i64,
    title: &'a str,
    description: Option<&'a str>,
    datasets: Vec<ManifestDataset<'a>>,
}

#[derive(Serialize)]
struct ManifestDataset<'a> {
    id: i64,
    description: &'a str,
    datafiles: Vec<ManifestDatafile<'a>>,
}

#[derive(Serialize)]
struct ManifestDatafile<'a> {
    id: i64,
    filename: &'a str,
    path: String,
    size: Option<i64>,
    checksum: Option<&'a str>,
}

/// JSON manifest listing every dataset and datafile with its bundle path.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonManifestExporter;

impl ManifestExporter for JsonManifestExporter {
    fn export(&self, tree: &ExperimentTree, writer: &mut dyn Write) -> Result<()> {
        let experiment_id = tree.experiment.id;
        let document = ManifestDocument {
            experiment_id,
            title: &tree.experiment.title,
            description: tree.experiment.description.as_deref(),
            datasets: tree
                .datasets
                .iter()
                .map(|d| ManifestDataset {
                    id: d.dataset.id,
                    description: &d.dataset.description,
                    datafiles: d
                        .datafiles
                        .iter()
                        .map(|f| ManifestDatafile {
                            id: f.id,
                            filename: &f.filename,
                            path: f.path_in_archive(experiment_id),
                            size: f.size,
                            checksum: f.checksum.as_deref(),
                        })
                        .collect(),
                })
                .collect(),
        };

        serde_json::to_writer_pretty(&mut *writer, &document)
            .context("Failed to serialize manifest")?;
        writer.flush().context("Failed to flush manifest")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exparc_core::models::{Datafile, Dataset, DatasetTree, Experiment};

    #[test]
    fn json_manifest_lists_bundle_paths() {
        let tree = ExperimentTree {
            experiment: Experiment {
                id: 4,
                title: "Crystal".into(),
                description: Some("diffraction".into()),
                created_by: 1,
                url: None,
            },
            datasets: vec![DatasetTree {
                dataset: Dataset {
                    id: 9,
                    description: "scan".into(),
                },
                datafiles: vec![Datafile {
                    id: 11,
                    dataset_id: 9,
                    filename: "frame.img".into(),
                    size: Some(10),
                    checksum: None,
                }],
            }],
        };

        let mut out = Vec::new();
        JsonManifestExporter.export(&tree, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["experiment_id"], 4);
        assert_eq!(value["datasets"][0]["datafiles"][0]["path"], "4/9/frame.img");
    }
}
