use crate::{
    config::AppConfig,
    entities::{
        order, payment_transaction, webhook_event, Order, OrderStatus, PaymentStatus,
        PaymentTransaction,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::{NotificationKind, NotificationService},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Gateway webhook event kinds this service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    PaymentSucceeded,
    PaymentFailed,
    PaymentRefunded,
}

impl WebhookKind {
    /// Maps the gateway's event-type strings. Unknown types are ignored
    /// rather than rejected so new gateway events never break the endpoint.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "payment.succeeded" | "charge.succeeded" | "payment_intent.succeeded" => {
                Some(Self::PaymentSucceeded)
            }
            "payment.failed" | "charge.failed" | "payment_intent.payment_failed" => {
                Some(Self::PaymentFailed)
            }
            "payment.refunded" | "charge.refunded" => Some(Self::PaymentRefunded),
            _ => None,
        }
    }
}

/// What happened to a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State was transitioned and side effects fired.
    Processed,
    /// Replay (same event id) or stale transition; nothing changed.
    AlreadyProcessed,
    /// Event type this service does not handle.
    Ignored,
    /// No local transaction matches the intent id.
    UnknownIntent,
}

/// Applies asynchronous payment outcomes to local state.
///
/// Transaction lifecycle: pending -> completed | failed, refunded only
/// from completed. Order status follows the payment outcome. Every
/// webhook application is idempotent: the event id is inserted into the
/// ledger inside the same transaction as the state change, so a gateway
/// retry of an already-processed event is a no-op with no second
/// notification.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifications: Arc<NotificationService>,
    config: Arc<AppConfig>,
}

/// Side effects deferred until after the commit.
struct PostCommit {
    user_id: Uuid,
    order_id: Uuid,
    transaction_id: Uuid,
    order_number: String,
    kind: WebhookKind,
    failure_reason: Option<String>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifications: Arc<NotificationService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifications,
            config,
        }
    }

    /// Processes one gateway webhook event. Safe to re-run: dedup is by
    /// event id, and transitions are guarded by the state machine.
    #[instrument(skip(self))]
    pub async fn process_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        intent_id: &str,
        failure_reason: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(kind) = WebhookKind::from_event_type(event_type) else {
            info!(event_type, "Ignoring unhandled webhook event type");
            return Ok(WebhookOutcome::Ignored);
        };

        let txn = self.db.begin().await?;

        // Claim the event id first; a replay fails the unique constraint.
        let ledger_entry = webhook_event::ActiveModel {
            event_id: Set(event_id.to_string()),
            event_type: Set(event_type.to_string()),
            processed_at: Set(Utc::now()),
        };
        if let Err(e) = ledger_entry.insert(&txn).await {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                txn.rollback().await?;
                info!(event_id, "Webhook event already processed");
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
            return Err(e.into());
        }

        let Some(transaction) = PaymentTransaction::find()
            .filter(payment_transaction::Column::IntentId.eq(intent_id))
            .one(&txn)
            .await?
        else {
            // Leave the event unclaimed so a later replay can succeed
            // once the transaction exists.
            txn.rollback().await?;
            warn!(intent_id, "Webhook references unknown payment intent");
            return Ok(WebhookOutcome::UnknownIntent);
        };

        let target = match kind {
            WebhookKind::PaymentSucceeded => PaymentStatus::Completed,
            WebhookKind::PaymentFailed => PaymentStatus::Failed,
            WebhookKind::PaymentRefunded => PaymentStatus::Refunded,
        };
        if !transaction.status.can_transition_to(target) {
            txn.rollback().await?;
            info!(
                event_id,
                from = ?transaction.status,
                to = ?target,
                "Stale webhook transition; no-op"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let post = self
            .apply_transition(&txn, transaction, kind, failure_reason)
            .await?;

        txn.commit().await?;

        self.fire_side_effects(post).await;
        Ok(WebhookOutcome::Processed)
    }

    /// Applies the refund transition for a transaction whose gateway
    /// refund already went through (operator-initiated path).
    #[instrument(skip(self))]
    pub async fn apply_refund(&self, transaction_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let transaction = PaymentTransaction::find_by_id(transaction_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Transaction {} not found", transaction_id))
            })?;

        if !transaction
            .status
            .can_transition_to(PaymentStatus::Refunded)
        {
            txn.rollback().await?;
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot refund a {:?} transaction",
                transaction.status
            )));
        }

        let post = self
            .apply_transition(&txn, transaction, WebhookKind::PaymentRefunded, None)
            .await?;

        txn.commit().await?;

        self.fire_side_effects(post).await;
        Ok(())
    }

    /// Fires a one-shot timeout notification for transactions still
    /// pending past the configured window. The transaction itself stays
    /// pending; a late webhook can still settle it.
    #[instrument(skip(self))]
    pub async fn check_payment_timeouts(&self) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.payment_timeout_minutes);

        let stale = PaymentTransaction::find()
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending))
            .filter(payment_transaction::Column::CreatedAt.lt(cutoff))
            .filter(payment_transaction::Column::TimeoutNotifiedAt.is_null())
            .all(&*self.db)
            .await?;

        let mut notified = 0usize;
        for transaction in stale {
            let order = Order::find_by_id(transaction.order_id).one(&*self.db).await?;
            let Some(order) = order else {
                warn!(transaction_id = %transaction.id, "Pending transaction without order");
                continue;
            };

            let transaction_id = transaction.id;
            let mut active: payment_transaction::ActiveModel = transaction.into();
            active.timeout_notified_at = Set(Some(Utc::now()));
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            self.notifications
                .send(
                    order.user_id,
                    NotificationKind::PaymentTimeout,
                    json!({ "order_number": order.order_number }),
                )
                .await;

            self.event_sender
                .send_or_log(Event::PaymentTimedOut {
                    order_id: order.id,
                    transaction_id,
                })
                .await;

            notified += 1;
        }

        if notified > 0 {
            info!(notified, "Sent payment timeout notifications");
        }
        Ok(notified)
    }

    /// Transition the transaction and its order inside the caller's
    /// database transaction; returns the side effects to fire after
    /// commit.
    async fn apply_transition(
        &self,
        txn: &DatabaseTransaction,
        transaction: payment_transaction::Model,
        kind: WebhookKind,
        failure_reason: Option<&str>,
    ) -> Result<PostCommit, ServiceError> {
        let order = Order::find_by_id(transaction.order_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", transaction.order_id))
            })?;

        if kind == WebhookKind::PaymentSucceeded {
            self.check_completed_amount_invariant(txn, &order, &transaction)
                .await?;
        }

        let transaction_id = transaction.id;
        let order_id = order.id;
        let user_id = order.user_id;
        let order_number = order.order_number.clone();

        let mut tx_active: payment_transaction::ActiveModel = transaction.into();
        let mut order_active: order::ActiveModel = order.clone().into();
        let old_order_status = order.status;
        let mut new_order_status = old_order_status;

        match kind {
            WebhookKind::PaymentSucceeded => {
                tx_active.status = Set(PaymentStatus::Completed);
                tx_active.failure_reason = Set(None);
                if old_order_status.can_transition_to(OrderStatus::Confirmed) {
                    new_order_status = OrderStatus::Confirmed;
                    order_active.status = Set(OrderStatus::Confirmed);
                }
                order_active.payment_failed = Set(false);
            }
            WebhookKind::PaymentFailed => {
                tx_active.status = Set(PaymentStatus::Failed);
                tx_active.failure_reason =
                    Set(Some(failure_reason.unwrap_or("payment failed").to_string()));
                // The order stays pending, flagged for retry.
                order_active.payment_failed = Set(true);
            }
            WebhookKind::PaymentRefunded => {
                tx_active.status = Set(PaymentStatus::Refunded);
                if old_order_status.can_transition_to(OrderStatus::Refunded) {
                    new_order_status = OrderStatus::Refunded;
                    order_active.status = Set(OrderStatus::Refunded);
                }
            }
        }

        tx_active.updated_at = Set(Utc::now());
        tx_active.update(txn).await?;

        order_active.version = Set(order.version + 1);
        order_active.updated_at = Set(Utc::now());
        order_active.update(txn).await?;

        if new_order_status != old_order_status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: format!("{:?}", old_order_status).to_lowercase(),
                    new_status: format!("{:?}", new_order_status).to_lowercase(),
                })
                .await;
        }

        Ok(PostCommit {
            user_id,
            order_id,
            transaction_id,
            order_number,
            kind,
            failure_reason: failure_reason.map(str::to_string),
        })
    }

    /// Completed payments for an order must never exceed its total.
    async fn check_completed_amount_invariant(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        incoming: &payment_transaction::Model,
    ) -> Result<(), ServiceError> {
        let completed = PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(order.id))
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Completed))
            .all(txn)
            .await?;

        let settled: Decimal = completed.iter().map(|t| t.amount).sum();
        if settled + incoming.amount > order.total_amount {
            return Err(ServiceError::Conflict(format!(
                "Completing transaction {} would overpay order {}",
                incoming.id, order.order_number
            )));
        }
        Ok(())
    }

    async fn fire_side_effects(&self, post: PostCommit) {
        match post.kind {
            WebhookKind::PaymentSucceeded => {
                self.notifications
                    .send(
                        post.user_id,
                        NotificationKind::OrderConfirmed,
                        json!({ "order_number": post.order_number }),
                    )
                    .await;
                self.event_sender
                    .send_or_log(Event::PaymentCompleted {
                        order_id: post.order_id,
                        transaction_id: post.transaction_id,
                    })
                    .await;
            }
            WebhookKind::PaymentFailed => {
                self.notifications
                    .send(
                        post.user_id,
                        NotificationKind::PaymentFailed,
                        json!({
                            "order_number": post.order_number,
                            "reason": post.failure_reason,
                        }),
                    )
                    .await;
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        order_id: post.order_id,
                        transaction_id: post.transaction_id,
                        reason: post.failure_reason.unwrap_or_default(),
                    })
                    .await;
            }
            WebhookKind::PaymentRefunded => {
                self.notifications
                    .send(
                        post.user_id,
                        NotificationKind::RefundIssued,
                        json!({ "order_number": post.order_number }),
                    )
                    .await;
                self.event_sender
                    .send_or_log(Event::PaymentRefunded {
                        order_id: post.order_id,
                        transaction_id: post.transaction_id,
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_mapping() {
        assert_eq!(
            WebhookKind::from_event_type("payment.succeeded"),
            Some(WebhookKind::PaymentSucceeded)
        );
        assert_eq!(
            WebhookKind::from_event_type("charge.succeeded"),
            Some(WebhookKind::PaymentSucceeded)
        );
        assert_eq!(
            WebhookKind::from_event_type("payment_intent.payment_failed"),
            Some(WebhookKind::PaymentFailed)
        );
        assert_eq!(
            WebhookKind::from_event_type("charge.refunded"),
            Some(WebhookKind::PaymentRefunded)
        );
        assert_eq!(WebhookKind::from_event_type("customer.created"), None);
        assert_eq!(WebhookKind::from_event_type(""), None);
    }
}
