use std::time::Duration;

use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_RESERVATIONS;
use crate::model::{Ms, NewReservation, Reservation};

/// Transient slot claims held while a payment round-trip is in flight.
///
/// Entries live only in this process. They never block other candidates;
/// overlapping claims are settled by the confirmation transaction. An entry
/// older than the TTL is invisible to `retrieve` even before the sweeper
/// removes it.
pub struct ReservationHolder {
    entries: DashMap<Ulid, Reservation>,
    ttl_ms: Ms,
}

impl ReservationHolder {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms: ttl.as_millis() as Ms,
        }
    }

    pub fn ttl_ms(&self) -> Ms {
        self.ttl_ms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, reservation: &Reservation, now: Ms) -> bool {
        reservation.created_at + self.ttl_ms <= now
    }

    pub fn reserve(&self, new: NewReservation, now: Ms) -> Result<Reservation, EngineError> {
        if self.entries.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many pending reservations"));
        }
        let reservation = Reservation {
            id: Ulid::new(),
            customer_id: new.customer_id,
            service_id: new.service_id,
            provider_id: new.provider_id,
            span: new.span,
            amount: new.amount,
            currency: new.currency,
            location: new.location,
            created_at: now,
            payment_intent_id: None,
        };
        self.entries.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    /// Bind the gateway intent that pays for this reservation.
    pub fn attach_intent(&self, id: &Ulid, intent_id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(mut r) => {
                r.payment_intent_id = Some(intent_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Put back a reservation rebuilt from elsewhere (payment-intent metadata).
    /// A live entry already held under the same id wins; an expired one is
    /// replaced, since it is as good as evicted.
    pub fn restore(&self, reservation: Reservation, now: Ms) -> Reservation {
        let mut entry = self.entries.entry(reservation.id).or_insert_with(|| reservation.clone());
        if self.is_expired(&entry, now) {
            *entry = reservation;
        }
        entry.value().clone()
    }

    pub fn retrieve(&self, id: &Ulid, now: Ms) -> Option<Reservation> {
        self.entries
            .get(id)
            .filter(|r| !self.is_expired(r, now))
            .map(|r| r.value().clone())
    }

    /// Idempotent.
    pub fn release(&self, id: &Ulid) -> Option<Reservation> {
        self.entries.remove(id).map(|(_, r)| r)
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub fn sweep_expired(&self, now: Ms) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, r| r.created_at + self.ttl_ms > now);
        before.saturating_sub(self.entries.len())
    }

    /// Discard everything; used at shutdown.
    pub fn drain(&self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
