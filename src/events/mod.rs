use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send: a full or closed channel is logged, never
    /// propagated. Domain operations must not fail because observability
    /// fell behind.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Events emitted by the commerce core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        identity: String,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        identity: String,
        product_id: Uuid,
    },
    CartItemRemoved {
        identity: String,
        product_id: Uuid,
    },
    CartCleared {
        identity: String,
    },
    CartMerged {
        user_id: Uuid,
        session_id: String,
        merged_lines: usize,
    },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderItemStatusChanged {
        order_id: Uuid,
        item_id: Uuid,
        new_status: String,
    },

    // Payment events
    PaymentIntentCreated {
        order_id: Uuid,
        intent_id: String,
        amount: Decimal,
    },
    PaymentCompleted {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        transaction_id: Uuid,
        reason: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    PaymentTimedOut {
        order_id: Uuid,
        transaction_id: Uuid,
    },

    // Stock events
    StockDeducted {
        product_id: Uuid,
        quantity: i32,
        order_id: Uuid,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Drains the event channel. Today this is an audit log; anything that
/// must not be lost (payment transitions, notifications) is written by the
/// services themselves, not here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "event: order status changed");
            }
            Event::PaymentCompleted {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, %transaction_id, "event: payment completed");
            }
            Event::PaymentFailed {
                order_id,
                transaction_id,
                reason,
            } => {
                warn!(%order_id, %transaction_id, %reason, "event: payment failed");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::OrderCreated(Uuid::nil()))
            .await
            .expect("send should succeed");

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, Uuid::nil()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error
        sender.send_or_log(Event::with_data("orphan".into())).await;
    }
}
