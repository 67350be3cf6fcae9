//! Automation engine server
//!
//! Usage: `automation-engine <config.yaml>`
//!
//! Loads module types, templates and rules from the configuration file,
//! keeps persistent state in `.storage/` next to it and runs until Ctrl-C.

mod builtin;
mod service;

use anyhow::{Context, Result};
use ha_config::AutomationFile;
use ha_event_bus::EventBus;
use ha_registries::Registries;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use service::AutomationService;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config_path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: automation-engine <config.yaml>")?;

    info!(path = %config_path.display(), "Starting automation engine");

    let file = AutomationFile::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let registries = Arc::new(Registries::new(config_dir));
    registries
        .load_all()
        .await
        .context("failed to load persisted state")?;

    let bus = Arc::new(EventBus::new());
    let service = AutomationService::new(registries, bus, &file.engine);
    let report = service.load(file).await;
    service.start();

    info!(
        rules = service.engine().rule_uids().len(),
        idle = report.idle,
        "Automation engine is running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    service.stop().await;

    Ok(())
}
