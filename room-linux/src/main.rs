// Room detection daemon: LAN proximity beacons gate an mDNS mesh session.

mod adapter;
mod beacon;
mod config;
mod console;
mod detection;
mod mesh;
mod store;
mod transport;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use room_core::RoomCore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::beacon::{LanBroadcaster, LanScanner};
use crate::detection::{Adapters, RoomDetection};
use crate::mesh::MdnsMesh;
use crate::store::KeyValueStore;

#[derive(Parser)]
#[command(name = "roomdetect", version, about = "Detect people in the same room and chat with them")]
struct Cli {
    /// Config file (default: ~/.config/roomdetect/config.toml, then /etc/roomdetect/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Display name for a newly created profile
    #[arg(long)]
    name: Option<String>,
    /// Do not start detection until `/start`
    #[arg(long)]
    idle: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref());

    // RUST_LOG wins over the configured level. Logs go to stderr; stdout is the console.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cfg.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;
    let store = KeyValueStore::open(&state_dir);
    let default_name = cli
        .name
        .or_else(|| cfg.display_name.clone())
        .unwrap_or_else(default_display_name);
    let profile = store.load_or_create_profile(&default_name);
    info!(state = %store.path().display(), "profile store");

    let core = RoomCore::with_timeouts(profile, cfg.eviction_timeout(), cfg.invite_timeout());
    let major = core.local_major();
    let local = core.local_profile().id.clone();
    info!(id = %local, name = %core.local_profile().display_name, %major, "roomdetect starting");

    let adapters = Adapters {
        broadcaster: Box::new(LanBroadcaster::new(major, cfg.discovery_port)),
        scanner: Box::new(LanScanner::new(major, cfg.discovery_port, cfg.lan_level())),
        mesh: Box::new(MdnsMesh::new(local, cfg.mesh_port)),
    };
    let (actor, handle) = RoomDetection::new(core, adapters, store, cfg.sweep_interval());
    let actor = tokio::spawn(actor.run());

    if !cli.idle {
        let status = handle.start().await?;
        info!(?status, "detection running");
    }
    tokio::spawn(console::print_chats(handle.clone()));
    tokio::spawn(console::log_room_changes(handle.clone()));
    tokio::spawn(console::run_console(handle.clone()));

    shutdown_signal().await?;
    info!("shutting down");
    handle.shutdown().await?;
    actor.await?;
    Ok(())
}

fn default_display_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "Anonymous".to_string())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
