//! Offline maintenance for a slotward booking log.
//!
//! The engine itself is a library; the service that embeds it owns the log
//! while running. This tool works on the log at `SLOTWARD_DATA_DIR` while
//! that service is stopped:
//!
//! * `slotward check` reads the log and reports intact records and any torn tail.
//! * `slotward compact` repairs a torn tail and rewrites the log to one
//!   record per booking.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use slotward::catalog::InMemoryCatalog;
use slotward::config::Config;
use slotward::engine::Engine;
use slotward::gateway::MockGateway;
use slotward::notify::NotifyHub;
use slotward::wal::Wal;

const USAGE: &str = "usage: slotward <check|compact>";

fn check(config: &Config) -> std::io::Result<()> {
    let path = config.wal_path();
    let replay = Wal::replay(&path)?;
    info!("{}: {} intact records", path.display(), replay.events.len());
    match replay.discarded_at {
        Some(offset) => warn!("torn tail at byte {offset}; `slotward compact` will drop it"),
        None => info!("no torn tail"),
    }
    Ok(())
}

async fn compact(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)?;
    // Replay and compaction never call the catalogue, gateway or notifier.
    let engine = Arc::new(Engine::open(
        config.engine_config(),
        Arc::new(InMemoryCatalog::new()),
        Arc::new(MockGateway::new()),
        Arc::new(NotifyHub::new()),
    )?);
    engine.compact_wal().await?;
    info!("compacted {}", config.wal_path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let result = match std::env::args().nth(1).as_deref() {
        Some("check") => check(&config).map_err(Into::into),
        Some("compact") => compact(&config).await,
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
