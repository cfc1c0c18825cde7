use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineConfig, WorkingHours};

/// Process settings, read from `SLOTWARD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    /// Appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub gateway_timeout: Duration,
    pub open_hour: u32,
    pub close_hour: u32,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            reservation_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            gateway_timeout: Duration::from_millis(10_000),
            open_hour: 9,
            close_hour: 18,
            metrics_port: None,
        }
    }
}

fn var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw:?}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let mut cfg = Self {
            data_dir: lookup("SLOTWARD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            reservation_ttl: var(&lookup, "SLOTWARD_RESERVATION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.reservation_ttl),
            sweep_interval: var(&lookup, "SLOTWARD_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            compact_threshold: var(&lookup, "SLOTWARD_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            gateway_timeout: var(&lookup, "SLOTWARD_GATEWAY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.gateway_timeout),
            open_hour: var(&lookup, "SLOTWARD_OPEN_HOUR").unwrap_or(d.open_hour),
            close_hour: var(&lookup, "SLOTWARD_CLOSE_HOUR").unwrap_or(d.close_hour),
            metrics_port: var(&lookup, "SLOTWARD_METRICS_PORT"),
        };
        if cfg.open_hour >= cfg.close_hour || cfg.close_hour > 24 {
            tracing::warn!(
                "invalid working hours {}..{}, using {}..{}",
                cfg.open_hour,
                cfg.close_hour,
                d.open_hour,
                d.close_hour
            );
            cfg.open_hour = d.open_hour;
            cfg.close_hour = d.close_hour;
        }
        if cfg.sweep_interval.is_zero() {
            cfg.sweep_interval = d.sweep_interval;
        }
        cfg
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut ec = EngineConfig::new(self.wal_path());
        ec.reservation_ttl = self.reservation_ttl;
        ec.gateway_timeout = self.gateway_timeout;
        ec.hours = WorkingHours {
            open_minute: self.open_hour * 60,
            close_minute: self.close_hour * 60,
            ..WorkingHours::default()
        };
        ec
    }
}
