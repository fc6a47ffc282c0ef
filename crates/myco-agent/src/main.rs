//! mycod - chamber controller daemon.
//!
//! Run with: `cargo run -p myco-agent`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use myco_agent::remote::HttpTransport;
use myco_agent::{AppState, Config, SyncAgent, api, run_control_loop};
use myco_control::{MockDriver, MockSampler};
use myco_ledger::Ledger;

/// Chamber controller daemon: control loop, sync agent, and REST API.
#[derive(Parser, Debug)]
#[command(name = "mycod")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Ledger database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the background sync agent (offline mode).
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("myco_agent=info".parse()?)
                .add_directive("myco_ledger=info".parse()?)
                .add_directive("myco_control=info".parse()?),
        )
        .init();

    // Load and validate configuration; an invalid threshold table stops
    // the daemon here, before any control logic runs.
    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)?,
        None => Config::load_default()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    // Open the ledger, recovering from corruption if needed.
    let (ledger, recovery) =
        Ledger::open_with_recovery(&config.storage.path, config.storage.ledger_config())?;
    if recovery.reinitialized {
        warn!(
            entries_lost = recovery.entries_lost,
            "ledger was reinitialized after corruption"
        );
    }

    // The physical adapters. The simulated sampler and driver stand in
    // until a hardware backend is wired up; everything downstream only
    // sees the traits.
    let sampler = Arc::new(MockSampler::new(&config.device.id));
    let driver = Arc::new(MockDriver::new());

    let sync_enabled = config.sync.enabled() && !args.no_sync;
    let sync_settings = config.sync.clone();
    let bind = config.server.bind.clone();

    let state = AppState::new(ledger, config, sampler, driver);
    state.recover(Some(&recovery)).await?;

    // Background tasks: the control tick and the sync agent.
    let control_handle = tokio::spawn(run_control_loop(Arc::clone(&state)));
    let sync_handle = if sync_enabled {
        let transport = HttpTransport::new(
            sync_settings.endpoint.clone(),
            Duration::from_secs(sync_settings.request_timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!("sync transport: {e}"))?;
        let agent = SyncAgent::new(Arc::clone(&state), transport);
        Some(tokio::spawn(agent.run()))
    } else {
        info!("sync agent disabled");
        None
    };

    // HTTP API.
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = bind.parse()?;
    info!("starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown_state.shutdown.signal();
        })
        .await?;

    // The control loop finishes its current tick; the sync agent drains
    // within its grace period.
    state.shutdown.signal();
    let _ = control_handle.await;
    if let Some(handle) = sync_handle {
        let grace = Duration::from_secs(sync_settings.shutdown_grace_secs + 1);
        if tokio::time::timeout(grace, handle).await.is_err() {
            warn!("sync agent did not stop within the grace period");
        }
    }

    info!("mycod stopped");
    Ok(())
}
