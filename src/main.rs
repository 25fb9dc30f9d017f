//! ==============================================================================
//! main.rs - climate dashboard client entry point
//! ==============================================================================
//!
//! purpose:
//!     connects to the climate backend, keeps a merged reading timeline up to
//!     date and serves it as a local dashboard.
//!
//! responsibilities:
//!     - load configuration (dashboard.toml, env and cli overrides)
//!     - start the dashboard (history fetch + live stream + timeline owner)
//!     - serve the screen and json api
//!     - tear everything down on ctrl-c
//!
//! architecture:
//!
//! ```text
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                   rust client (this binary)                  │
//!     │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//!     │  │ history      │  │ live stream  │  │ web server       │   │
//!     │  │ (one-shot)   │  │ (ws, 10s     │  │ (port 3000)      │   │
//!     │  │              │  │  reconnect)  │  │                  │   │
//!     │  └──────┬───────┘  └──────┬───────┘  └────────┬─────────┘   │
//!     │         └────────┬────────┘                   │ reads       │
//!     │            ┌─────┴─────┐                ┌─────┴─────┐       │
//!     │            │  driver   │───── writes ──>│ overview  │       │
//!     │            └───────────┘                └───────────┘       │
//!     └─────────────────────────────────────────────────────────────┘
//!                    │ http GET              │ websocket
//!                    ▼                       ▼
//!             /api/data/, /api/device/   /ws/currentData/
//! ```
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use climate_dashboard::config::{self, DashboardConfig};
use climate_dashboard::web::{self, WebState};
use climate_dashboard::{logging, Dashboard};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "climate-dashboard")]
#[command(about = "Live climate dashboard client")]
struct Cli {
    /// config file (default: config/dashboard.toml or ../config/dashboard.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// backend host[:port], overrides the config file and the environment
    #[arg(long)]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let config = match &cli.config {
        Some(path) => DashboardConfig::load(path)
            .with_context(|| format!("cannot use config {}", path.display()))?,
        None => DashboardConfig::load_or_default(),
    }
    .with_hostname_override(std::env::var(config::HOSTNAME_ENV).ok(), cli.hostname);

    logging::init(&config.logging);
    log::info!("===========================================================");
    log::info!("  Climate Dashboard - live client");
    log::info!("===========================================================");
    config.log_summary();

    // step 2: history fetch + live stream + timeline owner
    let dashboard = Dashboard::start(&config);

    // step 3: web server in background
    let web_state = WebState::new(&dashboard);
    let bind = config.server.bind.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = web::run_server(&bind, web_state).await {
            log::error!("[WEB] server error: {:#}", e);
        }
    });

    // step 4: run until ctrl-c
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    log::info!("[MAIN] shutting down");

    server.abort();
    dashboard.shutdown().await;
    Ok(())
}
