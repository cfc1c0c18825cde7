use std::str::FromStr;

use tracing::{info, warn};

use crate::gateway::{GatewayError, IntentMetadata};
use crate::limits::MAX_METADATA_VALUE_LEN;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

const RESERVATION_ID: &str = "reservation_id";
const CUSTOMER_ID: &str = "customer_id";
const SERVICE_ID: &str = "service_id";
const PROVIDER_ID: &str = "provider_id";
const START: &str = "start";
const END: &str = "end";
const AMOUNT: &str = "amount";
const CURRENCY: &str = "currency";
const LOCATION: &str = "location";

/// Everything needed to rebuild a reservation, stored on the payment intent.
pub fn reservation_metadata(reservation: &Reservation) -> IntentMetadata {
    let mut meta = IntentMetadata::new();
    meta.insert(RESERVATION_ID.into(), reservation.id.to_string());
    meta.insert(CUSTOMER_ID.into(), reservation.customer_id.to_string());
    meta.insert(SERVICE_ID.into(), reservation.service_id.to_string());
    meta.insert(PROVIDER_ID.into(), reservation.provider_id.to_string());
    meta.insert(START.into(), reservation.span.start.to_string());
    meta.insert(END.into(), reservation.span.end.to_string());
    meta.insert(AMOUNT.into(), reservation.amount.to_string());
    meta.insert(CURRENCY.into(), reservation.currency.clone());
    if let Some(ref loc) = reservation.location {
        meta.insert(LOCATION.into(), loc.clone());
    }
    meta
}

fn field<'a>(meta: &'a IntentMetadata, key: &'static str) -> Result<&'a str, EngineError> {
    let value = meta
        .get(key)
        .ok_or(EngineError::InvalidInput("payment intent metadata incomplete"))?;
    if value.len() > MAX_METADATA_VALUE_LEN {
        return Err(EngineError::LimitExceeded("payment intent metadata value too long"));
    }
    Ok(value)
}

fn parsed<T: FromStr>(meta: &IntentMetadata, key: &'static str) -> Result<T, EngineError> {
    field(meta, key)?
        .parse()
        .map_err(|_| EngineError::InvalidInput("payment intent metadata malformed"))
}

/// Inverse of [`reservation_metadata`]. The rebuilt reservation is stamped
/// `created_at = now` so it is live for a full TTL.
pub fn reservation_from_metadata(meta: &IntentMetadata, now: Ms) -> Result<Reservation, EngineError> {
    let start: Ms = parsed(meta, START)?;
    let end: Ms = parsed(meta, END)?;
    if start >= end {
        return Err(EngineError::InvalidInput("payment intent metadata malformed"));
    }
    let location = match meta.get(LOCATION) {
        Some(_) => Some(field(meta, LOCATION)?.to_string()),
        None => None,
    };
    Ok(Reservation {
        id: parsed(meta, RESERVATION_ID)?,
        customer_id: parsed(meta, CUSTOMER_ID)?,
        service_id: parsed(meta, SERVICE_ID)?,
        provider_id: parsed(meta, PROVIDER_ID)?,
        span: Span::new(start, end),
        amount: parsed(meta, AMOUNT)?,
        currency: field(meta, CURRENCY)?.to_string(),
        location,
        created_at: now,
        payment_intent_id: None,
    })
}

impl Engine {
    /// Settle a payment intent reported by the gateway (webhook replay).
    ///
    /// Safe to call any number of times: once the intent backs a payment the
    /// existing booking is returned. If the reservation was lost (restart or
    /// expiry) it is rebuilt from the intent metadata first.
    pub async fn reconcile_intent(&self, payment_intent_id: &str) -> Result<Booking, EngineError> {
        let result = self.reconcile_inner(payment_intent_id).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(crate::observability::RECONCILIATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn reconcile_inner(&self, payment_intent_id: &str) -> Result<Booking, EngineError> {
        if let Some(booking) = self.booking_for_intent(payment_intent_id).await {
            return Ok(booking);
        }

        let record = tokio::time::timeout(self.config.gateway_timeout, self.gateway.fetch_intent(payment_intent_id))
            .await
            .map_err(|_| EngineError::GatewayTimeout)?
            .map_err(|e| match e {
                GatewayError::UnknownIntent(_) => EngineError::PaymentNotCompleted,
                other => other.into(),
            })?;
        if !record.succeeded {
            return Err(EngineError::PaymentNotCompleted);
        }

        let now = now_ms();
        let mut reservation = reservation_from_metadata(&record.metadata, now)?;
        if reservation.amount != record.amount || reservation.currency != record.currency {
            return Err(EngineError::InvalidInput("payment intent does not match its metadata"));
        }

        if let Some(booking_id) = self.reservation_index.get(&reservation.id).map(|e| *e.value()) {
            warn!(
                reservation = %reservation.id,
                booking = %booking_id,
                "intent {payment_intent_id} paid for a reservation already confirmed by another intent"
            );
            return Err(EngineError::PaymentAlreadyUsed(payment_intent_id.to_string()));
        }

        reservation.payment_intent_id = Some(payment_intent_id.to_string());
        // A still-live reservation wins over the rebuilt copy.
        let held = self.reservations.restore(reservation, now);
        info!(reservation = %held.id, "reconciling intent {payment_intent_id}");
        self.confirm_reservation(held.id, payment_intent_id).await
    }
}
