//! Daemon entry point: loads configuration, installs the tracing
//! subscriber, initializes the core, and serves the WebSocket hub while
//! the orchestrator's cycle runs in the background.

use std::sync::Arc;

use arbiter_core::{Core, CoreConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arbiterd", about = "AI-guided arbitrage pipeline and bot orchestrator")]
struct Cli {
    /// Path to an optional config.toml overlay.
    #[arg(long, env = "ARBITER_CONFIG")]
    config: Option<String>,

    /// Address the connection hub binds to.
    #[arg(long, env = "ARBITER_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Start the autonomous opportunity-discovery loop immediately.
    #[arg(long)]
    autonomous: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = CoreConfig::load(cli.config.as_deref())?;

    let core = Core::initialize(config).await?;
    if cli.autonomous {
        core.start_autonomous_mode();
    }

    tokio::spawn(orchestrator_cycle_loop(core.clone()));

    let addr: std::net::SocketAddr = cli.bind.parse()?;
    let router = arbiter_core::hub::server::router(core.hub.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving connection hub");
    axum::serve(listener, router).await?;

    Ok(())
}

async fn orchestrator_cycle_loop(core: Arc<arbiter_core::facade::Core>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        ticker.tick().await;
        core.orchestrator.run_cycle().await;
        let reaped = core.hub.reap_stale();
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reaped stale connections");
        }
    }
}
