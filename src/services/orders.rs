use crate::{
    entities::{
        order, order_item, product, Order, OrderItem, OrderStatus, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order with its items, as returned to the storefront.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Read and fulfillment operations on placed orders. Creation lives in
/// the checkout service; payment-driven status changes live in
/// reconciliation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Fetches an order with items, enforcing ownership.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// Lists a user's orders, newest first.
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::PlacedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Advances one item to the next fulfillment step. Items move
    /// independently because a multi-store order ships per store; when
    /// every item has shipped (or is delivered), the order's coarse status
    /// catches up.
    #[instrument(skip(self))]
    pub async fn advance_item_status(
        &self,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let item = OrderItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;

        if item.order_id != order_id {
            return Err(ServiceError::InvalidOperation(
                "Item does not belong to this order".to_string(),
            ));
        }

        let next = item.status.next().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Item is already {:?}",
                item.status
            ))
        })?;

        let mut active: order_item::ActiveModel = item.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        self.roll_up_order_status(&txn, order_id).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderItemStatusChanged {
                order_id,
                item_id,
                new_status: format!("{:?}", next).to_lowercase(),
            })
            .await;

        Ok(updated)
    }

    /// Records the carrier tracking code once a shipment exists.
    #[instrument(skip(self))]
    pub async fn set_tracking_code(
        &self,
        order_id: Uuid,
        tracking_code: String,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.tracking_code = Set(Some(tracking_code));
        active.version = Set(version + 1);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Cancels a not-yet-shipped order and returns its stock to the
    /// catalog in the same transaction. Refunds for already-captured
    /// payments go through the payment service separately.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(ServiceError::InvalidOperation(format!(
                "A {:?} order can no longer be cancelled",
                order.status
            )));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        // Stock was deducted at placement; cancelling puts it back.
        for item in &items {
            let restored = Product::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).add(item.quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .exec(&txn)
                .await?;
            if restored.rows_affected == 0 {
                warn!(product_id = %item.product_id, "Cancelled item references missing product");
            }
        }

        let old_status = order.status;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.version = Set(version + 1);
        active.updated_at = Set(Utc::now());
        let cancelled = active.update(&txn).await?;

        txn.commit().await?;

        info!(%order_id, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", old_status).to_lowercase(),
                new_status: "cancelled".to_string(),
            })
            .await;

        Ok(cancelled)
    }

    /// When all items reach shipped/delivered, move the coarse order
    /// status along with them.
    async fn roll_up_order_status(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        use crate::entities::ItemStatus;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;
        if items.is_empty() {
            return Ok(());
        }

        let order = Order::find_by_id(order_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let target = if items.iter().all(|i| i.status == ItemStatus::Delivered) {
            Some(OrderStatus::Delivered)
        } else if items
            .iter()
            .all(|i| matches!(i.status, ItemStatus::Shipped | ItemStatus::Delivered))
        {
            Some(OrderStatus::Shipped)
        } else if items.iter().any(|i| i.status != ItemStatus::Pending) {
            Some(OrderStatus::Processing)
        } else {
            None
        };

        if let Some(target) = target {
            if order.status != target && order.status.can_transition_to(target) {
                let version = order.version;
                let mut active: order::ActiveModel = order.into();
                active.status = Set(target);
                active.version = Set(version + 1);
                active.updated_at = Set(Utc::now());
                active.update(txn).await?;
            }
        }
        Ok(())
    }
}
