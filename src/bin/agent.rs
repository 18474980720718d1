use std::time::Duration;

use clap::Parser;
use probewatch::{
    probe::{HubClient, default_collector},
    storage::AgentConfig,
    util::{get_default_hub_url, get_default_server_id},
};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Base URL of the hub
    #[arg(long, env = "PROBEWATCH_HUB_URL", default_value_t = get_default_hub_url())]
    hub_url: String,

    /// API key sent as bearer token
    #[arg(long, env = "PROBEWATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Identity of this server (default: hostname)
    #[arg(long, env = "PROBEWATCH_SERVER_ID", default_value_t = get_default_server_id())]
    server_id: String,

    /// Seconds between two snapshots
    #[arg(long, env = "PROBEWATCH_INTERVAL", default_value_t = 60)]
    interval: u64,

    /// Request timeout in seconds
    #[arg(long, env = "PROBEWATCH_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Push a single snapshot and exit
    #[arg(long)]
    once: bool,

    /// Ignore the agent config stored on the hub
    #[arg(long)]
    no_remote_config: bool,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("probewatch", LevelFilter::DEBUG),
        ("probewatch_agent", LevelFilter::TRACE),
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

    let timeout = Duration::from_secs(args.timeout);
    let mut client = HubClient::new(&args.hub_url, args.api_key.clone(), timeout)?;
    let mut collector = default_collector(args.server_id.clone());

    let mut period = args.interval;
    let mut send = true;
    if !args.no_remote_config {
        if let Some(config) = remote_config(&client, &args.server_id).await {
            period = u64::from(config.update_interval);
            send = config.send_to_api;
            if config.api_url.is_some() || config.api_key.is_some() {
                client = HubClient::new(
                    config.api_url.as_deref().unwrap_or(&args.hub_url),
                    config.api_key.or_else(|| args.api_key.clone()),
                    timeout,
                )?;
            }
        }
    }

    if send {
        info!(
            "pushing snapshots for {} to {} every {period}s",
            args.server_id,
            client.endpoint(),
        );
    } else {
        info!("collecting snapshots for {} every {period}s without pushing", args.server_id);
    }

    if args.once {
        let snapshot = collector.collect().await?;
        if send {
            client.push(&snapshot).await?;
        }
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(period.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => push_once(&mut *collector, &client, send).await,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

/// Settings the hub keeps for this server, `None` if there are none or the
/// hub cannot be asked
async fn remote_config(client: &HubClient, server_id: &str) -> Option<AgentConfig> {
    match client.fetch_config(server_id).await {
        Ok(Some(config)) => {
            debug!("using agent config from hub: {config:?}");
            Some(config)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("could not fetch agent config, using local settings: {e:#}");
            None
        }
    }
}

#[instrument(skip_all)]
async fn push_once(
    collector: &mut dyn probewatch::probe::MetricsCollector,
    client: &HubClient,
    send: bool,
) {
    let snapshot = match collector.collect().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("error while collecting metrics: {e}");
            return;
        }
    };

    if !send {
        trace!("collected snapshot, pushing is disabled");
        return;
    }

    match client.push(&snapshot).await {
        Ok(result) => debug!(
            "pushed snapshot: {} alerts triggered, {} resolved",
            result.alerts_triggered.len(),
            result.alerts_resolved.len()
        ),
        // Failures are retried with the next snapshot
        Err(e) => error!("{}: error during push: {e:#}", client.endpoint()),
    }
}
