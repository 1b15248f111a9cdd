//! # Catalog Sync Main Entry Point
//!
//! `serve` (the default) runs the management API together with the batch queue worker and the
//! stale-run sweeper. `migrate` applies migrations. `sync` performs one inline run from the
//! command line.

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use catalog_sync::config::{AppConfig, ConfigLoader};
use catalog_sync::models::sync_run::DispatchMode;
use catalog_sync::models::sync_state::SyncType;
use catalog_sync::queue::{BATCH_QUEUE, JobQueue, QueueWorker};
use catalog_sync::server::{AppState, run_server};
use catalog_sync::source::{ShopifyClientFactory, StoreCredentials};
use catalog_sync::sync::{
    ExecutionTracker, StaleRunSweeper, SyncOptions, SyncOptionsInput, SyncOrchestrator,
};
use catalog_sync::{db, telemetry};

#[derive(Debug, Parser)]
#[command(name = "catalog-sync", version, about = "Mirror a store catalog into a local item store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the management API, queue worker and sweeper
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Run one sync inline and print its summary
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Store identifier items are recorded under
    #[arg(long)]
    store: String,
    /// Shop domain, e.g. acme.myshopify.com
    #[arg(long)]
    shop_domain: String,
    /// Admin API access token
    #[arg(long, env = "CATALOG_SYNC_SHOP_TOKEN", hide_env_values = true)]
    token: String,
    /// Ignore the watermark and reconcile deletions
    #[arg(long)]
    full: bool,
    /// Stop after this many distinct items
    #[arg(long)]
    max_items: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Loaded configuration");
    }

    let db = db::init_pool(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::Migrate => {
            Migrator::up(&db, None).await.context("running migrations")?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Sync(args) => {
            Migrator::up(&db, None).await.context("running migrations")?;
            sync_once(config, db, args).await
        }
    }
}

fn build_orchestrator(config: &AppConfig, db: &DatabaseConnection) -> SyncOrchestrator {
    let queue = JobQueue::new(
        db.clone(),
        BATCH_QUEUE,
        config.queue.max_attempts,
        config.retry_policy.clone(),
    );
    SyncOrchestrator::new(
        db.clone(),
        queue,
        ExecutionTracker::new(),
        Arc::new(ShopifyClientFactory::new(config.source.shopify())),
        config.sync.clone(),
    )
}

async fn serve(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    Migrator::up(&db, None).await.context("running migrations")?;

    let orchestrator = build_orchestrator(&config, &db);
    let queue = orchestrator.queue().clone();
    let shutdown = CancellationToken::new();

    let worker = QueueWorker::new(
        queue.clone(),
        Arc::new(orchestrator.batch_worker()),
        config.queue.clone(),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let sweeper = StaleRunSweeper::new(orchestrator.clone(), queue, config.sweeper.clone());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!(error = %err, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let state = AppState::new(Arc::new(config), db, orchestrator);
    let served = run_server(state, shutdown.clone()).await;

    shutdown.cancel();
    for (name, handle) in [("queue worker", worker_handle), ("sweeper", sweeper_handle)] {
        if let Err(err) = handle.await {
            error!(task = name, error = %err, "Background task panicked");
        }
    }

    served
}

async fn sync_once(config: AppConfig, db: DatabaseConnection, args: SyncArgs) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config, &db);

    let input = SyncOptionsInput {
        force_full_sync: Some(args.full),
        max_items: args.max_items,
        dispatch: Some(DispatchMode::Inline),
        ..SyncOptionsInput::default()
    };
    let options = SyncOptions::resolve(input, &config.sync)?;
    let credentials = StoreCredentials {
        shop_domain: args.shop_domain,
        access_token: args.token,
    };

    let summary = orchestrator
        .run_sync(&args.store, SyncType::Products, credentials, options)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
