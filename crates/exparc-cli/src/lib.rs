use anyhow::{Context, Result};
use exparc_core::{ArchiveConfig, LocationConfig};
use exparc_db::MetadataStore;
use exparc_transfer::ProviderRegistry;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;

/// Initialize tracing for the CLI. Logs go to stderr so stdout stays JSON;
/// production environments log JSON lines.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("exparc=info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Connect to the metadata database and apply pending migrations.
pub async fn setup_database(config: &ArchiveConfig) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(config.database_url()?)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Build one provider per configured location.
pub async fn load_providers(locations: &[LocationConfig]) -> Result<ProviderRegistry> {
    let registry = ProviderRegistry::from_configs(locations)
        .await
        .context("Failed to construct transfer providers")?;
    tracing::debug!(locations = ?registry.names(), "Transfer providers ready");
    Ok(registry)
}

/// Compare the locations file with the catalogue.
///
/// A configured location missing from the catalogue is only logged, since no
/// replica can reference it. A kind or url mismatch is an error: replicas
/// would be classified or addressed against the wrong storage.
pub async fn verify_locations(
    store: &dyn MetadataStore,
    locations: &[LocationConfig],
) -> Result<()> {
    for configured in locations {
        let Some(registered) = store.get_location_by_name(&configured.name).await? else {
            tracing::warn!(location = %configured.name, "Configured location is not registered");
            continue;
        };
        if registered.kind != configured.kind {
            anyhow::bail!(
                "Location '{}' is configured as {} but registered as {}",
                configured.name,
                configured.kind,
                registered.kind
            );
        }
        if registered.url.trim_end_matches('/') != configured.url.trim_end_matches('/') {
            anyhow::bail!(
                "Location '{}' is configured with url {} but registered with {}",
                configured.name,
                configured.url,
                registered.url
            );
        }
    }
    Ok(())
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exparc_core::{LocationKind, ProviderKind, ProviderParams};
    use exparc_db::InMemoryStore;
    use std::io::Write;

    fn local(name: &str, kind: LocationKind, url: &str) -> LocationConfig {
        LocationConfig {
            name: name.to_string(),
            kind,
            url: url.to_string(),
            provider: ProviderKind::Local,
            params: ProviderParams::default(),
        }
    }

    #[tokio::test]
    async fn providers_are_loaded_from_the_locations_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "online", "kind": "online", "url": "file://{0}/online", "provider": "local"}},
                {{"name": "archive", "kind": "offline", "url": "file://{0}/archive", "provider": "local"}}
            ]"#,
            dir.path().display()
        )
        .unwrap();

        let config = ArchiveConfig {
            locations_file: Some(file.path().to_path_buf()),
            ..ArchiveConfig::default()
        };
        let registry = load_providers(&config.locations().unwrap()).await.unwrap();
        assert_eq!(registry.names(), vec!["archive", "online"]);
        assert!(registry.get("archive").unwrap().is_alive().await);
    }

    #[test]
    fn missing_locations_file_is_reported() {
        let config = ArchiveConfig::default();
        assert!(config.locations().is_err());
    }

    #[tokio::test]
    async fn matching_locations_verify() {
        let store = InMemoryStore::new();
        store.add_location("online", LocationKind::Online, "file:///data/online");
        let configured = [
            local("online", LocationKind::Online, "file:///data/online/"),
            local("scratch", LocationKind::Online, "file:///data/scratch"),
        ];
        verify_locations(&store, &configured).await.unwrap();
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let store = InMemoryStore::new();
        store.add_location("archive", LocationKind::Online, "file:///data/archive");
        let configured = [local("archive", LocationKind::Offline, "file:///data/archive")];
        let err = verify_locations(&store, &configured).await.unwrap_err();
        assert!(err.to_string().contains("configured as offline but registered as online"));
    }

    #[tokio::test]
    async fn url_mismatch_is_rejected() {
        let store = InMemoryStore::new();
        store.add_location("online", LocationKind::Online, "file:///data/online");
        let configured = [local("online", LocationKind::Online, "file:///elsewhere")];
        assert!(verify_locations(&store, &configured).await.is_err());
    }
}
