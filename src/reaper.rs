use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::reservation::ReservationHolder;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that periodically evicts expired reservations.
pub async fn run_sweeper(
    reservations: Arc<ReservationHolder>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        let swept = reservations.sweep_expired(crate::engine::now_ms());
        if swept > 0 {
            info!("swept {swept} expired reservations");
            metrics::counter!(crate::observability::RESERVATIONS_SWEPT_TOTAL).increment(swept as u64);
        }
        metrics::gauge!(crate::observability::RESERVATIONS_HELD).set(reservations.len() as f64);
    }
    debug!("reservation sweeper stopped");
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction after {appends} appends failed: {e}");
        }
    }
    debug!("WAL compactor stopped");
}

/// The engine's background tasks, stopped together.
pub struct Maintenance {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    reservations: Arc<ReservationHolder>,
}

impl Maintenance {
    pub fn start(engine: Arc<Engine>, sweep_interval: Duration, compact_threshold: u64) -> Self {
        Self::start_with(engine, sweep_interval, compact_threshold, COMPACT_CHECK_INTERVAL)
    }

    pub fn start_with(
        engine: Arc<Engine>,
        sweep_interval: Duration,
        compact_threshold: u64,
        compact_check: Duration,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let reservations = engine.reservations.clone();
        let tasks = vec![
            tokio::spawn(run_sweeper(reservations.clone(), sweep_interval, rx.clone())),
            tokio::spawn(run_compactor(engine, compact_threshold, compact_check, rx)),
        ];
        Self {
            shutdown,
            tasks,
            reservations,
        }
    }

    /// Stop both loops, then drop every reservation still held.
    /// Returns how many were discarded.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("maintenance task ended abnormally: {e}");
            }
        }
        let drained = self.reservations.drain();
        info!("discarded {drained} pending reservations at shutdown");
        drained
    }
}
