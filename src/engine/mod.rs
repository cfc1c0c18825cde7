mod availability;
mod confirm;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reconcile;
mod reschedule;
mod reserve;

pub use availability::{format_hhmm, free_slot_starts, merge_overlapping, parse_hhmm, WorkingHours};
pub use conflict::find_conflict;
pub use error::EngineError;
pub use reconcile::{reservation_from_metadata, reservation_metadata};
pub use reserve::{ReservationRequest, ReservationTicket};

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::catalog::ServiceCatalog;
use crate::gateway::PaymentGateway;
use crate::model::*;
use crate::notify::{Notification, Notifier};
use crate::reservation::ReservationHolder;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<ProviderLedger>>;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub wal_path: PathBuf,
    pub reservation_ttl: Duration,
    /// Upper bound on any single payment-gateway call.
    pub gateway_timeout: Duration,
    pub notify_timeout: Duration,
    pub hours: WorkingHours,
}

impl EngineConfig {
    pub fn new(wal_path: PathBuf) -> Self {
        Self {
            wal_path,
            reservation_ttl: Duration::from_secs(30 * 60),
            gateway_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(2),
            hours: WorkingHours::default(),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is pending are folded
/// into one batch and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every caller hears about a failure, so none of the batch may survive on disk.
    if let Err(ref e) = result {
        warn!("WAL batch of {} failed: {e}", batch.len());
        if let Err(rollback) = wal.rollback() {
            result = Err(io::Error::other(format!("{e}; rollback failed: {rollback}")));
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Transaction scope ────────────────────────────────────

/// Write access to one provider's ledger. Every durable write happens while
/// one of these is held; compaction waits for all of them to finish.
pub(super) struct LedgerTxn {
    _gate: OwnedRwLockReadGuard<()>,
    ledger: OwnedRwLockWriteGuard<ProviderLedger>,
}

impl Deref for LedgerTxn {
    type Target = ProviderLedger;

    fn deref(&self) -> &ProviderLedger {
        &self.ledger
    }
}

impl DerefMut for LedgerTxn {
    fn deref_mut(&mut self) -> &mut ProviderLedger {
        &mut self.ledger
    }
}

pub struct Engine {
    pub(super) ledgers: DashMap<Ulid, SharedLedger>,
    /// booking id → provider id
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// gateway intent id → booking id
    pub(super) intent_index: DashMap<String, Ulid>,
    /// reservation id → booking id it was confirmed into
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) compaction_gate: Arc<RwLock<()>>,
    pub reservations: Arc<ReservationHolder>,
    pub(super) catalog: Arc<dyn ServiceCatalog>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) config: EngineConfig,
}

impl Engine {
    /// Replay the WAL and start its writer task. Must run inside a tokio runtime.
    pub fn open(
        config: EngineConfig,
        catalog: Arc<dyn ServiceCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&config.wal_path)?;
        if let Some(offset) = replay.discarded_at {
            warn!(
                "discarding torn WAL tail at byte {offset} of {}",
                config.wal_path.display()
            );
            Wal::truncate(&config.wal_path, offset)?;
        }
        let wal = Wal::open(&config.wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            booking_index: DashMap::new(),
            intent_index: DashMap::new(),
            reservation_index: DashMap::new(),
            wal_tx,
            compaction_gate: Arc::new(RwLock::new(())),
            reservations: Arc::new(ReservationHolder::new(config.reservation_ttl)),
            catalog,
            gateway,
            notifier,
            config,
        };

        // Sole owner of every ledger here, so try_write never contends.
        for event in &replay.events {
            let ledger = engine.ledger(event.provider_id());
            let Ok(mut guard) = ledger.try_write() else {
                return Err(io::Error::other("replay: ledger unexpectedly locked"));
            };
            engine.apply(&mut guard, event);
        }
        info!(
            "replayed {} events into {} provider ledgers",
            replay.events.len(),
            engine.ledgers.len()
        );

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get or create the ledger for a provider.
    pub(super) fn ledger(&self, provider_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(provider_id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderLedger::new(provider_id))))
            .value()
            .clone()
    }

    pub(super) fn existing_ledger(&self, provider_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(provider_id).map(|e| e.value().clone())
    }

    /// Open the write scope for one provider.
    pub(super) async fn begin(&self, provider_id: Ulid) -> LedgerTxn {
        let gate = self.compaction_gate.clone().read_owned().await;
        let ledger = self.ledger(provider_id).write_owned().await;
        LedgerTxn { _gate: gate, ledger }
    }

    /// Write scope for the provider that owns `booking_id`.
    pub(super) async fn begin_for_booking(&self, booking_id: Ulid) -> Result<LedgerTxn, EngineError> {
        let provider_id = self
            .booking_index
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        Ok(self.begin(provider_id).await)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Make the event durable, then apply it. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        txn: &mut LedgerTxn,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(txn, event);
        Ok(())
    }

    /// Apply an event to a ledger and the global indexes (caller holds the lock).
    fn apply(&self, ledger: &mut ProviderLedger, event: &Event) {
        match event {
            Event::BookingConfirmed { booking, payment } => {
                self.booking_index.insert(booking.id, booking.provider_id);
                self.intent_index
                    .insert(payment.external_reference.clone(), booking.id);
                self.reservation_index.insert(booking.reservation_id, booking.id);
                ledger.payments.insert(booking.id, payment.clone());
                ledger.insert_booking(booking.clone());
            }
            Event::BookingRescheduled { id, span, .. } => {
                if let Some(mut booking) = ledger.remove_booking(*id) {
                    booking.span = *span;
                    ledger.insert_booking(booking);
                }
            }
            Event::BookingStatusChanged {
                id,
                status,
                payment_status,
                ..
            } => {
                if let Some(booking) = ledger.booking_mut(id) {
                    booking.status = *status;
                    booking.payment_status = *payment_status;
                }
                if let Some(payment) = ledger.payments.get_mut(id) {
                    payment.status = *payment_status;
                }
            }
        }
    }

    /// Best-effort delivery; failures are logged and counted, never returned.
    pub(super) async fn dispatch(&self, notifications: Vec<Notification>) {
        for n in notifications {
            let kind = n.kind;
            let outcome = tokio::time::timeout(self.config.notify_timeout, self.notifier.notify(n)).await;
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "timed out".to_string(),
            };
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!(?kind, "notification dropped: {err}");
        }
    }
}
