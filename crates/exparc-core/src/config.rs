//! Configuration module
//!
//! Process configuration comes from the environment (with `.env` support);
//! storage locations come from a JSON document named by
//! `ARCHIVE_LOCATIONS_FILE`.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::location_types::{LocationKind, ProviderKind};

// Common constants
const MAX_CONNECTIONS: u32 = 5;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXPERIMENT_URL_BASE: &str = "http://localhost/experiment/view";
const DEFAULT_ARCHIVE_LOCATION: &str = "archive";

/// Parameters handed to a transfer provider at construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderParams {
    pub username: Option<String>,
    pub key_filename: Option<String>,
    #[serde(default)]
    pub trust_length: bool,
    /// Per-location overrides of the remote command templates.
    #[serde(default)]
    pub commands: HashMap<String, String>,
}

/// Static definition of one storage location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    pub kind: LocationKind,
    pub url: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub params: ProviderParams,
}

impl LocationConfig {
    /// Load location definitions from a JSON array.
    pub fn load_all(path: &Path) -> Result<Vec<LocationConfig>, anyhow::Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read locations file {}: {}", path.display(), e)
        })?;
        let locations: Vec<LocationConfig> = serde_json::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("Invalid locations file {}: {}", path.display(), e)
        })?;

        let mut seen = std::collections::HashSet::new();
        for location in &locations {
            if !seen.insert(location.name.as_str()) {
                return Err(anyhow::anyhow!(
                    "Location '{}' is defined more than once in {}",
                    location.name,
                    path.display()
                ));
            }
        }
        Ok(locations)
    }
}

/// Archiver configuration.
#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub experiment_url_base: String,
    pub archive_location: String,
    pub locations_file: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub remove_online: bool,
    pub environment: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            experiment_url_base: DEFAULT_EXPERIMENT_URL_BASE.to_string(),
            archive_location: DEFAULT_ARCHIVE_LOCATION.to_string(),
            locations_file: None,
            temp_dir: None,
            remove_online: true,
            environment: "development".to_string(),
        }
    }
}

impl ArchiveConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let config = ArchiveConfig {
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            experiment_url_base: env::var("DEFAULT_EXPERIMENT_URL_BASE")
                .unwrap_or_else(|_| DEFAULT_EXPERIMENT_URL_BASE.to_string()),
            archive_location: env::var("ARCHIVE_LOCATION")
                .unwrap_or_else(|_| DEFAULT_ARCHIVE_LOCATION.to_string()),
            locations_file: env::var("ARCHIVE_LOCATIONS_FILE").ok().map(PathBuf::from),
            temp_dir: env::var("ARCHIVE_TEMP_DIR").ok().map(PathBuf::from),
            remove_online: env::var("ARCHIVE_REMOVE_ONLINE")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(true),
            environment,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.experiment_url_base.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "DEFAULT_EXPERIMENT_URL_BASE cannot be empty"
            ));
        }
        if self.archive_location.trim().is_empty() {
            return Err(anyhow::anyhow!("ARCHIVE_LOCATION cannot be empty"));
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(anyhow::anyhow!(
                    "ARCHIVE_TEMP_DIR {} is not a directory",
                    dir.display()
                ));
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn database_url(&self) -> Result<&str, anyhow::Error> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))
    }

    /// Canonical URL of an experiment that was not registered with one.
    pub fn default_experiment_url(&self, experiment_id: i64) -> String {
        format!(
            "{}/{}",
            self.experiment_url_base.trim_end_matches('/'),
            experiment_id
        )
    }

    pub fn locations(&self) -> Result<Vec<LocationConfig>, anyhow::Error> {
        let path = self
            .locations_file
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ARCHIVE_LOCATIONS_FILE must be set"))?;
        LocationConfig::load_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_experiment_url_joins_base_and_id() {
        let config = ArchiveConfig {
            experiment_url_base: "https://data.example.org/experiment/view/".to_string(),
            ..ArchiveConfig::default()
        };
        assert_eq!(
            config.default_experiment_url(42),
            "https://data.example.org/experiment/view/42"
        );
    }

    #[test]
    fn validate_rejects_empty_archive_location() {
        let config = ArchiveConfig {
            archive_location: " ".to_string(),
            ..ArchiveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_locations_parses_params_and_commands() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "archive", "kind": "offline", "url": "scp://tape.example.org/archive",
                  "provider": "scp",
                  "params": {{"username": "archiver", "trust_length": true,
                              "commands": {{"post_put_archive": "chmod 444 \"${{path}}\""}}}}}},
                {{"name": "local", "kind": "online", "url": "file:///var/lib/exparc", "provider": "local"}}
            ]"#
        )
        .unwrap();

        let locations = LocationConfig::load_all(file.path()).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].kind, LocationKind::Offline);
        assert_eq!(locations[0].params.username.as_deref(), Some("archiver"));
        assert!(locations[0].params.trust_length);
        assert!(locations[0].params.commands.contains_key("post_put_archive"));
        assert_eq!(locations[1].provider, ProviderKind::Local);
        assert_eq!(locations[1].params, ProviderParams::default());
    }

    #[test]
    fn load_locations_rejects_duplicate_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "a", "kind": "online", "url": "file:///x", "provider": "local"}},
                {{"name": "a", "kind": "online", "url": "file:///y", "provider": "local"}}
            ]"#
        )
        .unwrap();
        assert!(LocationConfig::load_all(file.path()).is_err());
    }
}
