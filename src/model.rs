use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC) — the only timestamp type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of `minutes` starting at `start`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

/// `true` iff `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings count toward the no-overlap invariant.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Completed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    /// Only bookings that have not happened yet may move in time.
    pub fn can_reschedule(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Durable records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub customer_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Copied from the service when the booking is created.
    pub duration_minutes: u32,
    pub confirmed_at: Option<Ms>,
    pub location: Option<String>,
    pub reservation_id: Ulid,
}

impl Booking {
    pub fn span(&self) -> Span {
        self.span
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    /// Minor currency units.
    pub amount: u64,
    pub currency: String,
    pub status: PaymentStatus,
    pub external_reference: String,
}

/// Transient hold on a slot while the payment round-trip is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub span: Span,
    pub amount: u64,
    pub currency: String,
    pub location: Option<String>,
    pub created_at: Ms,
    /// Gateway intent opened for this reservation, once known.
    pub payment_intent_id: Option<String>,
}

/// Everything a reservation needs except its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub span: Span,
    pub amount: u64,
    pub currency: String,
    pub location: Option<String>,
}

// ── Callers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

/// Authenticated identity of whoever invoked an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Ulid,
    pub role: Role,
}

impl Caller {
    pub fn customer(id: Ulid) -> Self {
        Self { id, role: Role::Customer }
    }

    pub fn provider(id: Ulid) -> Self {
        Self { id, role: Role::Provider }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_customer_of(&self, booking: &Booking) -> bool {
        self.role == Role::Customer && self.id == booking.customer_id
    }

    pub fn is_provider_of(&self, booking: &Booking) -> bool {
        self.role == Role::Provider && self.id == booking.provider_id
    }
}

// ── Per-provider ledger ──────────────────────────────────────────

/// All bookings of one provider plus their payments. The provider's lock
/// around this struct is the transaction scope for every durable write.
#[derive(Debug, Clone)]
pub struct ProviderLedger {
    pub provider_id: Ulid,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Keyed by booking id.
    pub payments: HashMap<Ulid, Payment>,
}

impl ProviderLedger {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            bookings: Vec::new(),
            payments: HashMap::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings whose span overlaps the query window, any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Active bookings whose span overlaps the query window.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.status.is_active())
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// A confirmed booking and its payment travel in one record so they are
/// durable together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingConfirmed {
        booking: Booking,
        payment: Payment,
    },
    BookingRescheduled {
        id: Ulid,
        provider_id: Ulid,
        span: Span,
    },
    BookingStatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: BookingStatus,
        payment_status: PaymentStatus,
    },
}

impl Event {
    pub fn provider_id(&self) -> Ulid {
        match self {
            Event::BookingConfirmed { booking, .. } => booking.provider_id,
            Event::BookingRescheduled { provider_id, .. }
            | Event::BookingStatusChanged { provider_id, .. } => *provider_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn booking_at(start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            service_id: Ulid::new(),
            provider_id: Ulid::new(),
            customer_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            payment_status: PaymentStatus::Paid,
            duration_minutes: ((end - start) / MINUTE_MS) as u32,
            confirmed_at: Some(0),
            location: None,
            reservation_id: Ulid::new(),
        }
    }

    #[test]
    fn overlap_half_open() {
        assert!(overlaps(0, 10, 5, 15));
        assert!(overlaps(5, 15, 0, 10));
        assert!(overlaps(0, 10, 2, 3));
        assert!(!overlaps(0, 10, 10, 20));
        assert!(!overlaps(10, 20, 0, 10));
        assert!(!overlaps(0, 10, 20, 30));
    }

    #[test]
    fn span_from_minutes() {
        let s = Span::from_minutes(9 * H, 90);
        assert_eq!(s.end, 10 * H + 30 * MINUTE_MS);
        assert_eq!(s.duration_ms(), 90 * MINUTE_MS);
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Confirmed));
        for s in [Pending, Confirmed, Completed, Cancelled] {
            assert!(!s.can_transition_to(s));
            assert_eq!(s.is_terminal(), !s.can_reschedule());
        }
    }

    #[test]
    fn active_set() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }

    #[test]
    fn ledger_keeps_bookings_sorted() {
        let mut ledger = ProviderLedger::new(Ulid::new());
        ledger.insert_booking(booking_at(12 * H, 13 * H, BookingStatus::Confirmed));
        ledger.insert_booking(booking_at(9 * H, 10 * H, BookingStatus::Confirmed));
        ledger.insert_booking(booking_at(10 * H, 11 * H, BookingStatus::Confirmed));
        let starts: Vec<Ms> = ledger.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![9 * H, 10 * H, 12 * H]);
    }

    #[test]
    fn ledger_overlapping_skips_cancelled_when_active() {
        let mut ledger = ProviderLedger::new(Ulid::new());
        ledger.insert_booking(booking_at(9 * H, 10 * H, BookingStatus::Cancelled));
        ledger.insert_booking(booking_at(10 * H, 11 * H, BookingStatus::Confirmed));
        ledger.insert_booking(booking_at(14 * H, 15 * H, BookingStatus::Completed));

        let query = Span::new(9 * H, 12 * H);
        assert_eq!(ledger.overlapping(&query).count(), 2);
        assert_eq!(ledger.active_overlapping(&query).count(), 1);
    }

    #[test]
    fn ledger_remove_booking() {
        let mut ledger = ProviderLedger::new(Ulid::new());
        let b = booking_at(9 * H, 10 * H, BookingStatus::Confirmed);
        let id = b.id;
        ledger.insert_booking(b);
        assert!(ledger.remove_booking(id).is_some());
        assert!(ledger.remove_booking(id).is_none());
        assert!(ledger.bookings.is_empty());
    }
}
