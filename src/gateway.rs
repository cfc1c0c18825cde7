use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

/// Opaque key/value pairs stored on the intent by the gateway.
pub type IntentMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentVerification {
    pub succeeded: bool,
}

/// The gateway's own record of an intent, as a webhook would deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRecord {
    pub intent_id: String,
    pub succeeded: bool,
    pub amount: u64,
    pub currency: String,
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    UnknownIntent(String),
    Unavailable(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::UnknownIntent(id) => write!(f, "unknown payment intent: {id}"),
            GatewayError::Unavailable(msg) => write!(f, "gateway unavailable: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Third-party payment processor. Untrusted: every success claim is
/// re-verified server-side before a booking is written.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn verify_intent(&self, intent_id: &str) -> Result<IntentVerification, GatewayError>;

    async fn fetch_intent(&self, intent_id: &str) -> Result<IntentRecord, GatewayError>;
}

/// In-process gateway used by tests and the standalone binary.
/// Intents start unpaid; `succeed` simulates the customer completing checkout.
pub struct MockGateway {
    intents: DashMap<String, IntentRecord>,
    auto_succeed: AtomicBool,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            intents: DashMap::new(),
            auto_succeed: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Every new intent is created already paid.
    pub fn auto_succeeding() -> Self {
        let gw = Self::new();
        gw.auto_succeed.store(true, Ordering::Relaxed);
        gw
    }

    pub fn succeed(&self, intent_id: &str) -> bool {
        match self.intents.get_mut(intent_id) {
            Some(mut rec) => {
                rec.succeeded = true;
                true
            }
            None => false,
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Latency added to every verify/fetch call.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Register an intent directly, as if created by another process.
    pub fn insert(&self, record: IntentRecord) {
        self.intents.insert(record.intent_id.clone(), record);
    }

    /// Replace an intent's metadata, e.g. to simulate tampering.
    pub fn metadata_mut(&self, intent_id: &str, f: impl FnOnce(&mut IntentMetadata)) {
        if let Some(mut rec) = self.intents.get_mut(intent_id) {
            f(&mut rec.metadata);
        }
    }

    async fn simulate_latency(&self) -> Result<(), GatewayError> {
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(GatewayError::Unavailable("mock gateway offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        metadata: IntentMetadata,
    ) -> Result<PaymentIntent, GatewayError> {
        self.simulate_latency().await?;
        let intent_id = format!("pi_{}", Ulid::new());
        let client_secret = format!("{intent_id}_secret_{}", Ulid::new());
        self.intents.insert(
            intent_id.clone(),
            IntentRecord {
                intent_id: intent_id.clone(),
                succeeded: self.auto_succeed.load(Ordering::Relaxed),
                amount,
                currency: currency.to_string(),
                metadata,
            },
        );
        Ok(PaymentIntent { intent_id, client_secret })
    }

    async fn verify_intent(&self, intent_id: &str) -> Result<IntentVerification, GatewayError> {
        self.simulate_latency().await?;
        let rec = self
            .intents
            .get(intent_id)
            .ok_or_else(|| GatewayError::UnknownIntent(intent_id.to_string()))?;
        Ok(IntentVerification { succeeded: rec.succeeded })
    }

    async fn fetch_intent(&self, intent_id: &str) -> Result<IntentRecord, GatewayError> {
        self.simulate_latency().await?;
        self.intents
            .get(intent_id)
            .map(|rec| rec.value().clone())
            .ok_or_else(|| GatewayError::UnknownIntent(intent_id.to_string()))
    }
}
