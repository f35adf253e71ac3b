//! dbshell entry point.
//!
//! Runs each command-line argument as a command against the first configured
//! connection and prints the results.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- saved connections, log level
//!  └─ spawn_driver(MemoryDriver)    -- driver thread
//!  └─ Server::new(master) + Server::new(mirror)
//!  └─ sync_servers(master, mirror)  -- mirror sees what master does
//!  └─ master.connect()
//!  └─ notification loop on the mirror
//!       ├─ FinishedConnect  -> post every command
//!       ├─ ChildAdded       -> print the value
//!       └─ FinishedExecute  -> stop after the last command
//! ```
//!
//! Commands are posted on the master and observed on the mirror, so the
//! output doubles as a check that mirroring works end to end.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use dbshell_server::application::notifications::Notification;
use dbshell_server::application::server::Server;
use dbshell_server::application::sync_bridge::sync_servers;
use dbshell_server::infrastructure::channel::spawn_driver;
use dbshell_server::infrastructure::driver::MemoryDriver;
use dbshell_server::infrastructure::storage::config::{load_config, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The config is read first because it carries the fallback log level.
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("using default configuration: {e}");
    }

    let commands: Vec<String> = std::env::args().skip(1).collect();
    let settings = config
        .connections
        .first()
        .cloned()
        .unwrap_or_default()
        .to_settings();
    info!(
        connection = %settings.connection_name,
        address = %settings.host,
        commands = commands.len(),
        "dbshell starting"
    );

    // ── Driver and facades ────────────────────────────────────────────────────
    let handle = spawn_driver(Arc::new(MemoryDriver::new(settings)))?;
    let master = Server::new(handle.clone(), true);
    let mirror = Server::new(handle, false);
    sync_servers(&master, &mirror);
    master.start();
    mirror.start();

    let delimiter = mirror.output_delimiter();
    let mut notifications = mirror.notifications().subscribe();
    master.connect();

    // ── Notification loop ─────────────────────────────────────────────────────
    let mut remaining = commands.len();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                debug!(?notification, "mirror notification");
                match notification {
                    Notification::FinishedConnect(r) => {
                        if let Some(e) = r.error {
                            error!("connect to {} failed: {e}", mirror.address());
                            break;
                        }
                        info!("connected to {}", mirror.name());
                        if remaining == 0 {
                            break;
                        }
                        for command in &commands {
                            master.execute(command.clone());
                        }
                    }
                    Notification::RootCreated(r) => info!("> {}", r.root.text),
                    Notification::ChildAdded(item) => print!("{}{delimiter}", item.text),
                    Notification::FinishedExecute(r) => {
                        if let Some(e) = r.error {
                            warn!("{}: {e}", r.request.command);
                        }
                        remaining = remaining.saturating_sub(1);
                        if remaining == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                master.stop_current_event();
                break;
            }
        }
    }

    master.close();
    mirror.close();
    info!("dbshell stopped");
    Ok(())
}
