//! # Fraud Alerts Service Entry Point

use alerts::{
    config::ConfigLoader,
    db::init_pool,
    server::{AppState, run_server},
    telemetry::init_tracing,
};
use anyhow::Context;
use clap::Parser;
use migration::{Migrator, MigratorTrait};

#[derive(Debug, Parser)]
#[command(name = "alerts", version, about = "Fraud alert lifecycle and real-time delivery service")]
struct Cli {
    /// Apply pending migrations and exit
    #[arg(long)]
    migrate_only: bool,

    /// Print the redacted configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    if cli.print_config {
        println!("{}", config.redacted_json()?);
        return Ok(());
    }

    init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = init_pool(&config).await?;

    if config.run_migrations || cli.migrate_only {
        Migrator::up(&db, None)
            .await
            .context("failed to apply migrations")?;
        tracing::info!("Migrations applied");
    }
    if cli.migrate_only {
        return Ok(());
    }

    let state = AppState::build(config, db)?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
        }
    });

    run_server(state).await
}
