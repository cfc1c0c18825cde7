use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        let provider_id = *self.booking_index.get(&booking_id)?.value();
        let ledger = self.existing_ledger(&provider_id)?;
        let guard = ledger.read().await;
        guard.booking(&booking_id).cloned()
    }

    /// The payment attached to a booking.
    pub async fn get_payment(&self, booking_id: Ulid) -> Option<Payment> {
        let provider_id = *self.booking_index.get(&booking_id)?.value();
        let ledger = self.existing_ledger(&provider_id)?;
        let guard = ledger.read().await;
        guard.payments.get(&booking_id).cloned()
    }

    /// Every booking for a provider, any status, ordered by start.
    pub async fn bookings_for_provider(&self, provider_id: Ulid) -> Vec<Booking> {
        let Some(ledger) = self.existing_ledger(&provider_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard.bookings.clone()
    }

    /// Booking paid for by a gateway intent, if one has been committed.
    pub async fn booking_for_intent(&self, payment_intent_id: &str) -> Option<Booking> {
        let booking_id = *self.intent_index.get(payment_intent_id)?.value();
        self.get_booking(booking_id).await
    }
}
