use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notification, NotificationKind, Recipient};

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

/// Customer, provider or an admin may touch a booking; nobody else.
pub(super) fn authorize(caller: &Caller, booking: &Booking) -> Result<(), EngineError> {
    if caller.is_admin() || caller.is_customer_of(booking) || caller.is_provider_of(booking) {
        Ok(())
    } else {
        Err(EngineError::Forbidden)
    }
}

/// Whoever should hear about a change `caller` made to `booking`.
pub(super) fn counterparties(caller: &Caller, booking: &Booking) -> Vec<Recipient> {
    if caller.is_customer_of(booking) {
        vec![Recipient::User(booking.provider_id)]
    } else if caller.is_provider_of(booking) {
        vec![Recipient::User(booking.customer_id)]
    } else {
        vec![
            Recipient::User(booking.customer_id),
            Recipient::User(booking.provider_id),
        ]
    }
}

impl Engine {
    /// Move a booking to a new slot, keeping its identity, duration and status.
    pub async fn reschedule(
        &self,
        booking_id: Ulid,
        new_date: NaiveDate,
        new_slot: &str,
        caller: Caller,
    ) -> Result<Booking, EngineError> {
        let result = self.reschedule_inner(booking_id, new_date, new_slot, caller).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(crate::observability::RESCHEDULES_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn reschedule_inner(
        &self,
        booking_id: Ulid,
        new_date: NaiveDate,
        new_slot: &str,
        caller: Caller,
    ) -> Result<Booking, EngineError> {
        let mut txn = self.begin_for_booking(booking_id).await?;
        let booking = txn
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        authorize(&caller, &booking)?;
        if !booking.status.can_reschedule() {
            return Err(EngineError::InvalidInput("booking can no longer be rescheduled"));
        }

        let new_span = self
            .config
            .hours
            .slot_span(new_date, new_slot, booking.duration_minutes)?;
        validate_span(&new_span)?;
        if new_span == booking.span {
            return Ok(booking);
        }
        check_no_conflict(&txn, &new_span, Some(booking_id))?;

        let event = Event::BookingRescheduled {
            id: booking_id,
            provider_id: booking.provider_id,
            span: new_span,
        };
        self.persist_and_apply(&mut txn, &event).await?;
        let updated = txn
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        drop(txn);

        info!(
            booking = %booking_id,
            by = %caller.id,
            "rescheduled [{}, {}) -> [{}, {})",
            booking.span.start, booking.span.end, new_span.start, new_span.end
        );

        let data = serde_json::json!({
            "booking_id": booking_id.to_string(),
            "old_start": booking.span.start,
            "new_start": new_span.start,
            "new_end": new_span.end,
        });
        let notices = counterparties(&caller, &updated)
            .into_iter()
            .map(|receiver| Notification {
                sender: caller.id,
                receiver,
                message: format!("Booking moved to {new_date} {new_slot}"),
                kind: NotificationKind::BookingRescheduled,
                data: data.clone(),
            })
            .collect();
        self.dispatch(notices).await;

        Ok(updated)
    }
}
