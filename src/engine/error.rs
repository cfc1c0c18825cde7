use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// `(what, id)` — a service, booking or reservation is missing or expired.
    NotFound(&'static str, Ulid),
    /// The slot collides with an active booking.
    Conflict(Ulid),
    PaymentNotCompleted,
    /// The payment intent already backs another payment.
    PaymentAlreadyUsed(String),
    Forbidden,
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidSlot(String),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    Gateway(String),
    GatewayTimeout,
    WalError(String),
}

impl EngineError {
    /// Transient failures the client may retry with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Gateway(_) | EngineError::GatewayTimeout | EngineError::WalError(_)
        )
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::PaymentNotCompleted => "payment_not_completed",
            EngineError::PaymentAlreadyUsed(_) => "payment_already_used",
            EngineError::Forbidden => "forbidden",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidSlot(_) => "invalid_slot",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Gateway(_) => "gateway",
            EngineError::GatewayTimeout => "gateway_timeout",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::Conflict(id) => write!(f, "slot already booked (conflicts with {id})"),
            EngineError::PaymentNotCompleted => write!(f, "payment not completed"),
            EngineError::PaymentAlreadyUsed(intent) => {
                write!(f, "payment intent {intent} already used")
            }
            EngineError::Forbidden => write!(f, "access denied"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::InvalidSlot(msg) => write!(f, "invalid slot: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Gateway(e) => write!(f, "payment gateway error: {e}"),
            EngineError::GatewayTimeout => write!(f, "payment gateway timed out"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::UnknownIntent(id) => EngineError::Gateway(format!("unknown intent {id}")),
            GatewayError::Unavailable(msg) => EngineError::Gateway(msg),
        }
    }
}
