use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotificationKind, Recipient};

use super::reschedule::{authorize, counterparties};
use super::{Engine, EngineError, LedgerTxn, WalCommand};

fn transition(booking: &Booking, to: BookingStatus) -> Result<(), EngineError> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: booking.status,
            to,
        })
    }
}

impl Engine {
    async fn change_status(
        &self,
        txn: &mut LedgerTxn,
        booking: &Booking,
        status: BookingStatus,
        payment_status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        let event = Event::BookingStatusChanged {
            id: booking.id,
            provider_id: booking.provider_id,
            status,
            payment_status,
        };
        self.persist_and_apply(txn, &event).await?;
        txn.booking(&booking.id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", booking.id))
    }

    /// Mark a confirmed booking as delivered. Provider or admin only.
    pub async fn complete_booking(&self, booking_id: Ulid, caller: Caller) -> Result<Booking, EngineError> {
        let mut txn = self.begin_for_booking(booking_id).await?;
        let booking = txn
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        if !(caller.is_admin() || caller.is_provider_of(&booking)) {
            return Err(EngineError::Forbidden);
        }
        transition(&booking, BookingStatus::Completed)?;
        let updated = self
            .change_status(&mut txn, &booking, BookingStatus::Completed, booking.payment_status)
            .await?;
        drop(txn);

        info!(booking = %booking_id, by = %caller.id, "booking completed");
        self.dispatch(vec![Notification {
            sender: caller.id,
            receiver: Recipient::User(updated.customer_id),
            message: "How was your appointment? Leave feedback".into(),
            kind: NotificationKind::FeedbackRequested,
            data: serde_json::json!({ "booking_id": booking_id.to_string() }),
        }])
        .await;
        Ok(updated)
    }

    /// Cancel a pending or confirmed booking. A paid payment is marked
    /// refunded and the slot returns to the free pool.
    pub async fn cancel_booking(&self, booking_id: Ulid, caller: Caller) -> Result<Booking, EngineError> {
        let mut txn = self.begin_for_booking(booking_id).await?;
        let booking = txn
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        authorize(&caller, &booking)?;
        transition(&booking, BookingStatus::Cancelled)?;

        let payment_status = match booking.payment_status {
            PaymentStatus::Paid => PaymentStatus::Refunded,
            other => other,
        };
        let updated = self
            .change_status(&mut txn, &booking, BookingStatus::Cancelled, payment_status)
            .await?;
        drop(txn);

        info!(
            booking = %booking_id,
            by = %caller.id,
            "booking cancelled, payment {}",
            updated.payment_status
        );
        let notices = counterparties(&caller, &updated)
            .into_iter()
            .map(|receiver| Notification {
                sender: caller.id,
                receiver,
                message: "A booking was cancelled".into(),
                kind: NotificationKind::BookingCancelled,
                data: serde_json::json!({
                    "booking_id": booking_id.to_string(),
                    "payment_status": updated.payment_status.as_str(),
                }),
            })
            .collect();
        self.dispatch(notices).await;
        Ok(updated)
    }

    /// Rewrite the WAL as one `BookingConfirmed` per booking in its current
    /// state. Blocks every writer until the new file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            for booking in &guard.bookings {
                let Some(payment) = guard.payments.get(&booking.id) else {
                    warn!(booking = %booking.id, "booking without payment skipped by compaction");
                    continue;
                };
                events.push(Event::BookingConfirmed {
                    booking: booking.clone(),
                    payment: payment.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} bookings");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
