use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::limits::MAX_BOOKINGS_PER_PROVIDER;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, Recipient};

use super::conflict::check_no_conflict;
use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Turn a held reservation into a durable confirmed booking plus its paid
    /// payment. This is the only path that writes such a pair.
    ///
    /// Calling it again with the same reservation fails with `NotFound`:
    /// the reservation is released inside the same write scope that commits
    /// the booking.
    pub async fn confirm_reservation(
        &self,
        reservation_id: Ulid,
        payment_intent_id: &str,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.confirm_inner(reservation_id, payment_intent_id).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(crate::observability::CONFIRMATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::CONFIRM_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::gauge!(crate::observability::RESERVATIONS_HELD).set(self.reservations.len() as f64);
        result
    }

    async fn confirm_inner(&self, reservation_id: Ulid, payment_intent_id: &str) -> Result<Booking, EngineError> {
        let reservation = self
            .reservations
            .retrieve(&reservation_id, now_ms())
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        if let Some(ref bound) = reservation.payment_intent_id
            && bound != payment_intent_id
        {
            return Err(EngineError::InvalidInput("payment intent does not belong to this reservation"));
        }

        // Outside any lock: the gateway may be slow.
        self.verify_payment(payment_intent_id).await?;

        let mut txn = self.begin(reservation.provider_id).await;

        // A concurrent confirm of the same reservation may have committed
        // while we were talking to the gateway.
        let reservation = self
            .reservations
            .retrieve(&reservation_id, now_ms())
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        if self.reservation_index.contains_key(&reservation_id) {
            self.reservations.release(&reservation_id);
            return Err(EngineError::NotFound("reservation", reservation_id));
        }
        if self.intent_index.contains_key(payment_intent_id) {
            return Err(EngineError::PaymentAlreadyUsed(payment_intent_id.to_string()));
        }
        if txn.bookings.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many bookings for provider"));
        }
        check_no_conflict(&txn, &reservation.span, None)?;

        let booking_id = Ulid::new();
        let booking = Booking {
            id: booking_id,
            service_id: reservation.service_id,
            provider_id: reservation.provider_id,
            customer_id: reservation.customer_id,
            span: reservation.span,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            duration_minutes: (reservation.span.duration_ms() / MINUTE_MS) as u32,
            confirmed_at: Some(now_ms()),
            location: reservation.location.clone(),
            reservation_id,
        };
        let payment = Payment {
            id: Ulid::new(),
            booking_id,
            amount: reservation.amount,
            currency: reservation.currency.clone(),
            status: PaymentStatus::Paid,
            external_reference: payment_intent_id.to_string(),
        };

        let event = Event::BookingConfirmed {
            booking: booking.clone(),
            payment: payment.clone(),
        };
        // On failure nothing is applied and the reservation stays held for a retry.
        self.persist_and_apply(&mut txn, &event).await?;
        self.reservations.release(&reservation_id);
        drop(txn);

        info!(
            booking = %booking.id,
            provider = %booking.provider_id,
            reservation = %reservation_id,
            "confirmed booking [{}, {}) paid by {}",
            booking.span.start, booking.span.end, payment.external_reference
        );

        self.dispatch(confirmation_notices(&booking, &payment)).await;
        Ok(booking)
    }

    /// Ask the gateway whether the intent has been paid, bounded by the
    /// configured timeout.
    pub(super) async fn verify_payment(&self, payment_intent_id: &str) -> Result<(), EngineError> {
        let started = Instant::now();
        let verification =
            tokio::time::timeout(self.config.gateway_timeout, self.gateway.verify_intent(payment_intent_id)).await;
        metrics::histogram!(crate::observability::GATEWAY_CALL_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match verification {
            Err(_) => Err(EngineError::GatewayTimeout),
            Ok(Err(GatewayError::UnknownIntent(_))) => Err(EngineError::PaymentNotCompleted),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(v)) if v.succeeded => Ok(()),
            Ok(Ok(_)) => Err(EngineError::PaymentNotCompleted),
        }
    }
}

fn confirmation_notices(booking: &Booking, payment: &Payment) -> Vec<Notification> {
    let data = serde_json::json!({
        "booking_id": booking.id.to_string(),
        "service_id": booking.service_id.to_string(),
        "start": booking.span.start,
        "end": booking.span.end,
        "amount": payment.amount,
        "currency": payment.currency,
    });
    vec![
        Notification {
            sender: booking.customer_id,
            receiver: Recipient::User(booking.provider_id),
            message: "You have a new confirmed booking".into(),
            kind: NotificationKind::BookingConfirmed,
            data: data.clone(),
        },
        Notification {
            sender: booking.customer_id,
            receiver: Recipient::Admins,
            message: format!("Payment of {} {} received", payment.amount, payment.currency),
            kind: NotificationKind::PaymentReceived,
            data,
        },
    ]
}
