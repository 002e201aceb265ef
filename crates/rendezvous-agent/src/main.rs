//! # rendezvous-agent
//!
//! The `rendezvous` binary: resolves settings, starts the relay and status
//! listeners on loopback, and runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rendezvous_settings::{RendezvousSettings, load_settings_from_path, settings_path, validate};
use rendezvous_server::{RendezvousServer, ServerConfig};

/// Local peer rendezvous relay.
#[derive(Parser, Debug)]
#[command(name = "rendezvous", about = "Local peer rendezvous relay", version)]
struct Cli {
    /// Host to bind (loopback only).
    #[arg(long)]
    host: Option<String>,

    /// Relay listener port (0 for auto-assign).
    #[arg(long)]
    relay_port: Option<u16>,

    /// Status listener port (0 for auto-assign).
    #[arg(long)]
    status_port: Option<u16>,

    /// Settings file (defaults to `~/.rendezvous/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `rendezvous_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply flags over file and environment values.
    fn apply(&self, settings: &mut RendezvousSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.relay_port {
            settings.server.relay_port = port;
        }
        if let Some(port) = self.status_port {
            settings.server.status_port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Load, override, and validate settings.
fn resolve_settings(args: &Cli, path: &Path) -> Result<RendezvousSettings> {
    let mut settings = load_settings_from_path(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = resolve_settings(&args, &path)?;

    rendezvous_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics_handle = rendezvous_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RendezvousServer::new(ServerConfig::from(settings.server)).with_metrics(metrics_handle);
    let (addrs, listeners) = server.listen().await.context("Failed to bind listeners")?;

    tracing::info!(
        "Rendezvous relay on ws://{} (status on ws://{})",
        addrs.relay,
        addrs.status
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let aborted = server.shutdown().graceful_shutdown(listeners, None).await;
    if aborted.is_empty() {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!(?aborted, "Shutdown complete, some listeners were aborted");
    }
    Ok(())
}
