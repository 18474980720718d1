use std::sync::Arc;

use clap::Parser;
use probewatch::{
    IngestionService,
    actors::{MaintenanceHandle, MaintenanceSettings},
    alerts::AlertEvaluator,
    api::{ApiState, spawn_api_server},
    config::{HubConfig, read_config_file},
    storage::{StorageBackend, sqlite::SqliteBackend},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short, env = "PROBEWATCH_CONFIG")]
    file: Option<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("probewatch", LevelFilter::DEBUG),
        ("probewatch_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => HubConfig::default(),
    };
    config.apply_env_overrides();

    let policy = config.alerts.policy()?;
    let settings = MaintenanceSettings::try_from(&config.storage)?;

    let backend = SqliteBackend::new(&config.storage.path).await?;
    let store: Arc<dyn StorageBackend> = Arc::new(backend);
    info!("{}", store.get_stats().await?);

    let maintenance = MaintenanceHandle::spawn(store.clone(), settings);

    let ingest = Arc::new(IngestionService::new(
        store.clone(),
        AlertEvaluator::new(policy),
        config.ingest.storage_timeout(),
    ));

    let state = ApiState::new(ingest, Some(maintenance.clone()));
    let addr = spawn_api_server(config.api.clone(), state).await?;
    info!("hub ready on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    maintenance.shutdown().await;
    if let Err(e) = store.close().await {
        error!("error closing storage: {e}");
    }

    Ok(())
}
