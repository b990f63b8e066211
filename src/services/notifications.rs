use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Template kinds the storefront sends. Content formatting happens in the
/// external dispatcher; the payload here is opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmed,
    PaymentFailed,
    PaymentTimeout,
    RefundIssued,
}

/// Delivery seam for the external notification dispatcher.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), String>;
}

/// Default channel: structured log only. Stands in for the external
/// dispatcher in development and tests.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn deliver(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), String> {
        info!(%user_id, ?kind, %payload, "notification");
        Ok(())
    }
}

/// Fire-and-forget notification dispatch.
///
/// Failures are logged and swallowed: a notification must never roll back
/// an order or a payment transition.
#[derive(Clone)]
pub struct NotificationService {
    channel: Arc<dyn NotificationChannel>,
}

impl NotificationService {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    #[instrument(skip(self, payload))]
    pub async fn send(&self, user_id: Uuid, kind: NotificationKind, payload: Value) {
        if let Err(e) = self.channel.deliver(user_id, kind, payload).await {
            warn!(%user_id, ?kind, error = %e, "Notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        async fn deliver(
            &self,
            _user_id: Uuid,
            _kind: NotificationKind,
            _payload: Value,
        ) -> Result<(), String> {
            Err("downstream unavailable".to_string())
        }
    }

    pub(crate) struct CountingChannel(pub AtomicUsize);

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        async fn deliver(
            &self,
            _user_id: Uuid,
            _kind: NotificationKind,
            _payload: Value,
        ) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let service = NotificationService::new(Arc::new(FailingChannel));
        // Must not panic or propagate
        service
            .send(
                Uuid::new_v4(),
                NotificationKind::PaymentFailed,
                serde_json::json!({}),
            )
            .await;
    }

    #[tokio::test]
    async fn successful_delivery_reaches_channel() {
        let channel = Arc::new(CountingChannel(AtomicUsize::new(0)));
        let service = NotificationService::new(channel.clone());

        service
            .send(
                Uuid::new_v4(),
                NotificationKind::OrderConfirmed,
                serde_json::json!({"order_number": "FC-20250101-ABC123"}),
            )
            .await;

        assert_eq!(channel.0.load(Ordering::SeqCst), 1);
    }
}
