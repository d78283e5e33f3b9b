use serde::{Deserialize, Serialize};

/// The unit of archiving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Id of the owning user.
    pub created_by: i64,
    /// Canonical URL, when the experiment was registered with one.
    pub url: Option<String>,
}

/// A grouping of datafiles, possibly shared by several experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub description: String,
}

/// A single logical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datafile {
    pub id: i64,
    pub dataset_id: i64,
    pub filename: String,
    pub size: Option<i64>,
    pub checksum: Option<String>,
}

impl Datafile {
    /// Entry path of this datafile inside the bundle of `experiment_id`.
    ///
    /// Bundle paths always use `/`, whatever the host path separator.
    pub fn path_in_archive(&self, experiment_id: i64) -> String {
        format!("{}/{}/{}", experiment_id, self.dataset_id, self.filename)
    }
}

/// Entry path of the manifest inside the bundle of `experiment_id`.
pub fn manifest_path_in_archive(experiment_id: i64) -> String {
    format!("{}/Manifest", experiment_id)
}

/// An experiment with every dataset and datafile reachable from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentTree {
    pub experiment: Experiment,
    pub datasets: Vec<DatasetTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetTree {
    pub dataset: Dataset,
    pub datafiles: Vec<Datafile>,
}

impl ExperimentTree {
    pub fn datafiles(&self) -> impl Iterator<Item = &Datafile> {
        self.datasets.iter().flat_map(|d| d.datafiles.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_paths_use_forward_slashes() {
        let datafile = Datafile {
            id: 9,
            dataset_id: 7,
            filename: "f.txt".to_string(),
            size: None,
            checksum: None,
        };
        assert_eq!(datafile.path_in_archive(3), "3/7/f.txt");
        assert_eq!(manifest_path_in_archive(3), "3/Manifest");
    }
}
