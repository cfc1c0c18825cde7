use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > Ms::from(MAX_SERVICE_DURATION_MINUTES) * MINUTE_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First active booking in `ledger` overlapping `span`, ignoring `exclude`.
pub fn find_conflict(ledger: &ProviderLedger, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    ledger
        .active_overlapping(span)
        .find(|b| Some(b.id) != exclude && b.span().overlaps(span))
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    ledger: &ProviderLedger,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ledger, span, exclude) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

impl Engine {
    /// Advisory check against a snapshot of the provider's bookings. The
    /// authoritative check runs again inside the write scope.
    pub async fn has_conflict(&self, provider_id: Ulid, span: Span, exclude_booking_id: Option<Ulid>) -> bool {
        let Some(ledger) = self.existing_ledger(&provider_id) else {
            return false;
        };
        let guard = ledger.read().await;
        find_conflict(&guard, &span, exclude_booking_id).is_some()
    }
}
