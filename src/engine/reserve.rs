use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::reconcile::reservation_metadata;
use super::{now_ms, Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub date: NaiveDate,
    /// `HH:MM`, UTC.
    pub slot: String,
    /// Minor currency units.
    pub amount: u64,
    pub currency: String,
    pub location: Option<String>,
}

/// What the client needs to complete checkout with the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationTicket {
    pub reservation_id: Ulid,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub span: Span,
}

fn validate_request(req: &ReservationRequest) -> Result<(), EngineError> {
    if req.amount == 0 {
        return Err(EngineError::InvalidInput("amount must be positive"));
    }
    if req.currency.trim().is_empty() {
        return Err(EngineError::InvalidInput("currency is required"));
    }
    if req.currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::LimitExceeded("currency code too long"));
    }
    if let Some(ref loc) = req.location
        && loc.len() > MAX_LOCATION_LEN
    {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    Ok(())
}

impl Engine {
    /// Hold a slot and open a payment intent for it.
    ///
    /// The conflict check here is advisory: two customers may hold
    /// overlapping reservations, and confirmation decides between them.
    pub async fn create_reservation(&self, req: ReservationRequest) -> Result<ReservationTicket, EngineError> {
        let result = self.create_reservation_inner(req).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::gauge!(crate::observability::RESERVATIONS_HELD).set(self.reservations.len() as f64);
        result
    }

    async fn create_reservation_inner(&self, req: ReservationRequest) -> Result<ReservationTicket, EngineError> {
        validate_request(&req)?;
        let service = self
            .catalog
            .get_service(req.service_id)
            .await
            .ok_or(EngineError::NotFound("service", req.service_id))?;
        if service.provider_id != req.provider_id {
            return Err(EngineError::InvalidInput("provider does not offer this service"));
        }
        if req.amount != service.base_price {
            return Err(EngineError::InvalidInput("amount does not match the service price"));
        }
        if service.duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("service duration too long"));
        }

        let span = self
            .config
            .hours
            .slot_span(req.date, &req.slot, service.duration_minutes)?;
        validate_span(&span)?;

        if let Some(ledger) = self.existing_ledger(&req.provider_id) {
            let guard = ledger.read().await;
            if let Err(e) = check_no_conflict(&guard, &span, None) {
                debug!(provider = %req.provider_id, "advisory conflict for {} {}", req.date, req.slot);
                return Err(e);
            }
        }

        let reservation = self.reservations.reserve(
            NewReservation {
                customer_id: req.customer_id,
                service_id: req.service_id,
                provider_id: req.provider_id,
                span,
                amount: req.amount,
                currency: req.currency,
                location: req.location,
            },
            now_ms(),
        )?;

        let intent = tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.create_intent(
                reservation.amount,
                &reservation.currency,
                reservation_metadata(&reservation),
            ),
        )
        .await;
        let intent = match intent {
            Ok(Ok(intent)) => intent,
            Ok(Err(e)) => {
                self.reservations.release(&reservation.id);
                return Err(e.into());
            }
            Err(_) => {
                self.reservations.release(&reservation.id);
                return Err(EngineError::GatewayTimeout);
            }
        };
        self.reservations.attach_intent(&reservation.id, &intent.intent_id);

        info!(
            reservation = %reservation.id,
            provider = %reservation.provider_id,
            "reserved {} {} pending payment {}",
            req.date, req.slot, intent.intent_id
        );
        Ok(ReservationTicket {
            reservation_id: reservation.id,
            payment_intent_id: intent.intent_id,
            client_secret: intent.client_secret,
            span,
        })
    }
}
