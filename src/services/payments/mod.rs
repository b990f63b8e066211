pub mod gateway;
pub mod reconciliation;

pub use gateway::{GatewayError, HttpPaymentGateway, PaymentGateway, PaymentIntent};
pub use reconciliation::{ReconciliationService, WebhookKind, WebhookOutcome};

use crate::{
    entities::{
        order, payment_transaction, Order, PaymentStatus, PaymentTransaction,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::notifications::{NotificationKind, NotificationService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Drives payment intents for orders through the gateway adapter.
///
/// Checkout inserts the initial `pending` transaction; this service takes
/// it from there. Intent creation failures never unwind an order: a card
/// decline marks the attempt failed so the shopper can retry, and network
/// or configuration trouble leaves the transaction pending for later
/// reconciliation.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    notifications: Arc<NotificationService>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            notifications,
        }
    }

    /// Creates a gateway intent for the order's newest pending
    /// transaction and records the intent id.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn initiate_payment(&self, order: &order::Model) -> Result<(), ServiceError> {
        let transaction = PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(order.id))
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No pending transaction for order {}", order.id))
            })?;

        let metadata = json!({
            "order_id": order.id,
            "order_number": order.order_number,
        });

        match self
            .gateway
            .create_intent(transaction.amount, &transaction.currency, metadata)
            .await
        {
            Ok(intent) => {
                let transaction_id = transaction.id;
                let amount = transaction.amount;
                let mut active: payment_transaction::ActiveModel = transaction.into();
                active.intent_id = Set(Some(intent.intent_id.clone()));
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;

                self.event_sender
                    .send_or_log(Event::PaymentIntentCreated {
                        order_id: order.id,
                        intent_id: intent.intent_id,
                        amount,
                    })
                    .await;

                info!(%transaction_id, "Payment intent created");
                Ok(())
            }
            Err(GatewayError::Card(reason)) => {
                // Definitive decline: mark the attempt failed so the
                // shopper can retry with another method.
                let transaction_id = transaction.id;
                let mut active: payment_transaction::ActiveModel = transaction.into();
                active.status = Set(PaymentStatus::Failed);
                active.failure_reason = Set(Some(reason.clone()));
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;

                self.flag_payment_failed(order.id).await?;

                self.notifications
                    .send(
                        order.user_id,
                        NotificationKind::PaymentFailed,
                        json!({ "order_number": order.order_number, "reason": reason }),
                    )
                    .await;

                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        order_id: order.id,
                        transaction_id,
                        reason,
                    })
                    .await;

                Err(GatewayError::Card("card declined".into()).into())
            }
            Err(err) => {
                // Retryable or operator-facing: the transaction stays
                // pending and reconciliation or a retry resolves it.
                warn!(order_id = %order.id, error = %err, "Intent creation did not complete");
                Err(err.into())
            }
        }
    }

    /// Opens a fresh pending transaction after a failed attempt and
    /// initiates it. An order accumulates transaction rows over time.
    #[instrument(skip(self))]
    pub async fn retry_payment(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let has_settled = PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Completed))
            .one(&*self.db)
            .await?
            .is_some();
        if has_settled {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }

        let previous = PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No transactions for order {}", order_id))
            })?;

        if previous.status == PaymentStatus::Pending {
            return self.initiate_payment(&order).await;
        }

        let replacement = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(previous.amount),
            currency: Set(previous.currency.clone()),
            payment_method: Set(previous.payment_method.clone()),
            intent_id: Set(None),
            status: Set(PaymentStatus::Pending),
            failure_reason: Set(None),
            timeout_notified_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        replacement.insert(&*self.db).await?;

        self.initiate_payment(&order).await
    }

    /// Operator-initiated refund: refunds through the gateway, then
    /// applies the refund transition locally.
    #[instrument(skip(self, reconciliation))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
        reconciliation: &ReconciliationService,
    ) -> Result<(), ServiceError> {
        let transaction = PaymentTransaction::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Completed))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidOperation(
                    "Order has no completed payment to refund".to_string(),
                )
            })?;

        if let Some(amount) = amount {
            if amount <= Decimal::ZERO || amount > transaction.amount {
                return Err(ServiceError::ValidationError(format!(
                    "Refund amount must be between 0 and {}",
                    transaction.amount
                )));
            }
        }

        let intent_id = transaction.intent_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("Transaction has no gateway intent".to_string())
        })?;

        self.gateway.refund(&intent_id, amount).await.map_err(|e| {
            error!(order_id = %order_id, error = %e, "Gateway refund failed");
            ServiceError::from(e)
        })?;

        reconciliation.apply_refund(transaction.id).await
    }

    async fn flag_payment_failed(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.payment_failed = Set(true);
        active.version = Set(version + 1);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }
}
