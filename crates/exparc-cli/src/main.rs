//! exparc: archive experiments from online storage into tar/gzip bundles.
//!
//! Configuration comes from the environment (see `ArchiveConfig::from_env`);
//! storage locations are read from `ARCHIVE_LOCATIONS_FILE`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use exparc_cli::{init_tracing, load_providers, print_json, setup_database, verify_locations};
use exparc_core::models::Experiment;
use exparc_core::ArchiveConfig;
use exparc_db::{MetadataStore, PgMetadataStore};
use exparc_services::{
    ArchiveOptions, ArchiveWorkflow, JsonManifestExporter, ReplicaLifecycleManager,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "exparc", about = "Experiment archiver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a location's endpoint answers
    Ping {
        /// Location name
        location: String,
    },
    /// Bundle an experiment and push it to the archive location
    Archive {
        /// Experiment id
        experiment_id: i64,
        /// Archive location (defaults to ARCHIVE_LOCATION)
        #[arg(long)]
        location: Option<String>,
        /// Keep online copies instead of replacing them with offline replicas
        #[arg(long)]
        keep_online: bool,
    },
    /// Delete an experiment with its exclusively owned data
    Purge {
        /// Experiment id
        experiment_id: i64,
    },
    /// Retire online replicas left behind by an interrupted archive run
    Reconcile {
        /// Experiment id
        experiment_id: i64,
    },
    /// List archive records of an experiment
    Archives {
        /// Experiment id
        experiment_id: i64,
    },
}

async fn load_experiment(store: &dyn MetadataStore, id: i64) -> anyhow::Result<Experiment> {
    store
        .get_experiment(id)
        .await?
        .with_context(|| format!("Experiment {} not found", id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ArchiveConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.is_production());
    let locations = config.locations()?;
    let providers = load_providers(&locations).await?;

    if let Commands::Ping { location } = &cli.command {
        let provider = providers.get(location)?;
        let alive = provider.is_alive().await;
        print_json(&serde_json::json!({
            "location": location,
            "base_url": provider.base_url(),
            "alive": alive,
        }))?;
        if !alive {
            anyhow::bail!("Location '{}' is not reachable", location);
        }
        return Ok(());
    }

    let pool = setup_database(&config).await?;
    let store: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::new(pool));
    verify_locations(store.as_ref(), &locations).await?;

    match cli.command {
        Commands::Ping { .. } => {}
        Commands::Archive {
            experiment_id,
            location,
            keep_online,
        } => {
            let mut options = ArchiveOptions::from_config(&config);
            if let Some(location) = location {
                options.location = location;
            }
            if keep_online {
                options.remove_online = false;
            }

            let workflow = ArchiveWorkflow::new(
                store,
                providers,
                Arc::new(JsonManifestExporter),
                config,
            );
            match workflow.run(experiment_id, &options).await {
                Ok(outcome) => print_json(&outcome)?,
                Err(failure) => {
                    print_json(&serde_json::json!({
                        "experiment_id": experiment_id,
                        "state": failure.state,
                        "error": failure.error.to_string(),
                    }))?;
                    return Err(failure).context("Archive run did not complete");
                }
            }
        }
        Commands::Purge { experiment_id } => {
            let experiment = load_experiment(store.as_ref(), experiment_id).await?;
            let lifecycle = ReplicaLifecycleManager::new(store, providers);
            let summary = lifecycle.purge(&experiment).await?;
            print_json(&summary)?;
        }
        Commands::Reconcile { experiment_id } => {
            let experiment = load_experiment(store.as_ref(), experiment_id).await?;
            let lifecycle = ReplicaLifecycleManager::new(store, providers);
            let summary = lifecycle.reconcile(&experiment).await?;
            print_json(&summary)?;
        }
        Commands::Archives { experiment_id } => {
            let archives = store.archives_for_experiment(experiment_id).await?;
            print_json(&archives)?;
        }
    }

    Ok(())
}
