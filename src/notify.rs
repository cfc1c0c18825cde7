use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    User(Ulid),
    /// Every administrator; fan-out is the dispatcher's concern.
    Admins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    BookingConfirmed,
    PaymentReceived,
    BookingRescheduled,
    BookingCancelled,
    FeedbackRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub sender: Ulid,
    pub receiver: Recipient,
    pub message: String,
    pub kind: NotificationKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification dispatch failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Outbound notification dispatch. Callers treat it as fire-and-forget.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Broadcast hub keyed by recipient. Delivery is best-effort: a recipient
/// nobody is listening for simply drops the message.
pub struct NotifyHub {
    channels: DashMap<Recipient, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a recipient. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Recipient) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn send(&self, notification: &Notification) {
        if let Some(sender) = self.channels.get(&notification.receiver) {
            let _ = sender.send(notification.clone());
        }
    }

    pub fn remove(&self, recipient: &Recipient) {
        self.channels.remove(recipient);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.send(&notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(receiver: Recipient) -> Notification {
        Notification {
            sender: Ulid::new(),
            receiver,
            message: "New booking".into(),
            kind: NotificationKind::BookingConfirmed,
            data: serde_json::json!({ "booking_id": Ulid::new().to_string() }),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let provider = Recipient::User(Ulid::new());
        let mut rx = hub.subscribe(provider);

        let n = note(provider);
        hub.notify(n.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn recipients_are_isolated() {
        let hub = NotifyHub::new();
        let mut admins = hub.subscribe(Recipient::Admins);
        hub.notify(note(Recipient::User(Ulid::new()))).await.unwrap();
        assert!(admins.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.notify(note(Recipient::Admins)).await.unwrap();
        hub.remove(&Recipient::Admins);
    }
}
