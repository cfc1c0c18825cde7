use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "slotward_reservations_total";

/// Counter: confirmation attempts. Labels: outcome.
pub const CONFIRMATIONS_TOTAL: &str = "slotward_confirmations_total";

/// Histogram: end-to-end confirmation latency in seconds, gateway included.
pub const CONFIRM_DURATION_SECONDS: &str = "slotward_confirm_duration_seconds";

/// Counter: reschedule attempts. Labels: outcome.
pub const RESCHEDULES_TOTAL: &str = "slotward_reschedules_total";

/// Counter: webhook reconciliations. Labels: outcome.
pub const RECONCILIATIONS_TOTAL: &str = "slotward_reconciliations_total";

/// Histogram: payment-gateway verify latency in seconds.
pub const GATEWAY_CALL_DURATION_SECONDS: &str = "slotward_gateway_call_duration_seconds";

/// Counter: notifications that failed or timed out.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "slotward_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: reservations currently held, expired-but-unswept included.
pub const RESERVATIONS_HELD: &str = "slotward_reservations_held";

/// Counter: reservations evicted by the sweeper.
pub const RESERVATIONS_SWEPT_TOTAL: &str = "slotward_reservations_swept_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotward_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotward_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const COMPACTIONS_TOTAL: &str = "slotward_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// Called once by the embedding service, typically with `Config::metrics_port`.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
