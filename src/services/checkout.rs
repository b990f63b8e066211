use crate::{
    config::AppConfig,
    entities::{
        cart_item, order, order_item, payment_transaction, product, user_address, ItemStatus,
        Order, OrderStatus, PaymentStatus, Product, UserAddress,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::{CartLine, CartService, Identity},
        discounts::DiscountService,
        payments::PaymentService,
        pricing::PricingService,
    },
};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Delivery options offered at checkout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
    Scheduled,
}

/// Delivery address as submitted at checkout.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, utoipa::ToSchema)]
pub struct AddressInput {
    pub label: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Address line is required"))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 3, max = 20, message = "Postal code is required"))]
    pub postal_code: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct PlaceOrderInput {
    #[validate]
    pub address: AddressInput,
    pub shipping_method: ShippingMethod,
    pub discount_code: Option<String>,
    #[validate(length(min = 1, max = 40, message = "Payment method is required"))]
    pub payment_method: String,
}

/// Converts a finalized cart into an order aggregate.
///
/// Everything happens inside one database transaction: stock is re-read
/// and decremented, totals are recomputed from live prices, the order with
/// its items and the initial pending payment transaction are inserted, and
/// the cart is cleared. Either the whole aggregate exists and the cart is
/// empty, or nothing changed at all.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    cart: Arc<CartService>,
    pricing: Arc<PricingService>,
    discounts: Arc<DiscountService>,
    payments: Arc<PaymentService>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        cart: Arc<CartService>,
        pricing: Arc<PricingService>,
        discounts: Arc<DiscountService>,
        payments: Arc<PaymentService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart,
            pricing,
            discounts,
            payments,
            config,
        }
    }

    /// Places an order from the user's current cart.
    ///
    /// Client-side totals are never an input here: pricing is recomputed
    /// authoritatively from the cart contents read inside the transaction.
    /// Stock is validated with a conditional decrement, so two concurrent
    /// checkouts cannot oversell: the loser's transaction rolls back with
    /// `InsufficientStock` and its cart is untouched.
    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        input: PlaceOrderInput,
    ) -> Result<order::Model, ServiceError> {
        input.validate()?;

        // Holding the cart lock keeps a concurrent add from racing the
        // cart clear at the end of the transaction.
        let identity = Identity::User(user_id);
        let _cart_guard = self.cart.acquire_identity_lock(&identity).await;

        let txn = self.db.begin().await?;
        let assembled = self.assemble(&txn, user_id, &input).await;

        let order = match assembled {
            Ok(order) => {
                txn.commit().await.map_err(|e| {
                    error!(%user_id, error = %e, "Order transaction failed to commit");
                    ServiceError::OrderCreationFailed
                })?;
                order
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(%user_id, error = %rollback_err, "Order transaction rollback failed");
                }
                return Err(classify_assembly_error(user_id, e));
            }
        };

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order placed"
        );

        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;

        // Payment runs after the order is durable. A gateway failure here
        // never unwinds the order; it surfaces through the payment
        // transaction state and notifications instead.
        if let Err(e) = self.payments.initiate_payment(&order).await {
            warn!(order_id = %order.id, error = %e, "Payment initiation deferred");
        }

        Ok(order)
    }

    /// The transactional body of checkout. Runs with the caller's
    /// transaction; any error causes a full rollback.
    async fn assemble(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        input: &PlaceOrderInput,
    ) -> Result<order::Model, ServiceError> {
        let lines = self.cart.user_line_items(txn, user_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        // Re-validate and deduct stock line by line with a guarded update;
        // a concurrent checkout that won the race leaves zero rows
        // affected and fails this whole transaction.
        for line in &lines {
            self.deduct_stock(txn, line).await?;
        }

        let pricing = self
            .pricing
            .compute_totals(txn, &lines, Some(user_id), input.discount_code.as_deref())
            .await?;

        let address = self
            .resolve_address(txn, user_id, &input.address)
            .await?;

        let order_number = self.generate_unique_order_number(txn).await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(user_id),
            primary_store_id: Set(lines[0].store_id),
            user_address_id: Set(address.id),
            status: Set(OrderStatus::Pending),
            payment_failed: Set(false),
            subtotal: Set(pricing.subtotal),
            discount_total: Set(pricing.discount_total),
            delivery_fee: Set(pricing.delivery_fee),
            tax_total: Set(pricing.tax_total),
            total_amount: Set(pricing.total),
            delivery_address: Set(address.formatted()),
            shipping_method: Set(input.shipping_method.to_string()),
            tracking_code: Set(None),
            placed_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let order = order.insert(txn).await?;

        // Prices stamped here are final; order history never re-reads the
        // catalog.
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                store_id: Set(line.store_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.line_total),
                status: Set(ItemStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
            };
            item.insert(txn).await?;

            self.event_sender
                .send_or_log(Event::StockDeducted {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    order_id,
                })
                .await;
        }

        self.discounts
            .record_redemptions(txn, user_id, order_id, &pricing.applied_discounts)
            .await?;

        let transaction = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(pricing.total),
            currency: Set(self.config.default_currency.clone()),
            payment_method: Set(input.payment_method.clone()),
            intent_id: Set(None),
            status: Set(PaymentStatus::Pending),
            failure_reason: Set(None),
            timeout_notified_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        transaction.insert(txn).await?;

        // Clearing the cart inside the same transaction means a rollback
        // never loses the shopper's cart.
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(txn)
            .await?;

        Ok(order)
    }

    /// Conditional stock decrement: only succeeds while enough stock
    /// remains at commit time.
    async fn deduct_stock(
        &self,
        txn: &DatabaseTransaction,
        line: &CartLine,
    ) -> Result<(), ServiceError> {
        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(line.quantity),
            )
            .filter(product::Column::Id.eq(line.product_id))
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::StockQuantity.gte(line.quantity))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            let available = Product::find_by_id(line.product_id)
                .one(txn)
                .await?
                .filter(|p| p.is_active)
                .map(|p| p.stock_quantity)
                .unwrap_or(0);

            return Err(ServiceError::InsufficientStock {
                product_id: line.product_id,
                requested: line.quantity,
                available,
            });
        }
        Ok(())
    }

    /// Reuses an exact matching saved address or inserts a new one. The
    /// user's first address becomes their default.
    async fn resolve_address(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        input: &AddressInput,
    ) -> Result<user_address::Model, ServiceError> {
        let mut query = UserAddress::find()
            .filter(user_address::Column::UserId.eq(user_id))
            .filter(user_address::Column::Line1.eq(input.line1.clone()))
            .filter(user_address::Column::City.eq(input.city.clone()))
            .filter(user_address::Column::PostalCode.eq(input.postal_code.clone()));
        query = match &input.line2 {
            Some(line2) => query.filter(user_address::Column::Line2.eq(line2.clone())),
            None => query.filter(user_address::Column::Line2.is_null()),
        };
        let existing = query.one(txn).await?;

        if let Some(address) = existing {
            return Ok(address);
        }

        let has_any = UserAddress::find()
            .filter(user_address::Column::UserId.eq(user_id))
            .one(txn)
            .await?
            .is_some();

        let address = user_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            label: Set(input.label.clone()),
            line1: Set(input.line1.clone()),
            line2: Set(input.line2.clone()),
            city: Set(input.city.clone()),
            postal_code: Set(input.postal_code.clone()),
            phone: Set(input.phone.clone()),
            is_default: Set(!has_any),
            created_at: Set(Utc::now()),
        };
        Ok(address.insert(txn).await?)
    }

    /// Generates an order number and verifies uniqueness inside the
    /// transaction, regenerating on the (rare) collision.
    async fn generate_unique_order_number(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = generate_order_number(Utc::now());
            let taken = Order::find()
                .filter(order::Column::OrderNumber.eq(candidate.clone()))
                .one(txn)
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
            warn!(candidate, "Order number collision; regenerating");
        }
        Err(ServiceError::InternalError(
            "Could not generate a unique order number".to_string(),
        ))
    }
}

/// Expected failures pass through to the caller with their detail;
/// anything else is logged with context and collapsed into the opaque
/// `OrderCreationFailed`.
fn classify_assembly_error(user_id: Uuid, e: ServiceError) -> ServiceError {
    match e {
        ServiceError::InsufficientStock { .. }
        | ServiceError::ValidationError(_)
        | ServiceError::InvalidCartState(_)
        | ServiceError::InvalidOperation(_)
        | ServiceError::NotFound(_)
        | ServiceError::Forbidden(_) => e,
        other => {
            error!(%user_id, error = %other, "Order assembly failed; transaction rolled back");
            ServiceError::OrderCreationFailed
        }
    }
}

/// Date plus six random alphanumerics, e.g. `FC-20250807-4F7K2Q`.
fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("FC-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_shape() {
        let now = "2025-08-07T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let number = generate_order_number(now);

        assert!(number.starts_with("FC-20250807-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!suffix.chars().any(|c| c.is_ascii_lowercase()));
        assert!(number.len() <= 50);
    }

    #[test]
    fn order_numbers_are_collision_resistant() {
        let now = Utc::now();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            seen.insert(generate_order_number(now));
        }
        // 36^6 possibilities per day; 1000 draws should not collide.
        assert!(seen.len() > 990);
    }

    #[test]
    fn expected_failures_keep_their_detail() {
        let user_id = Uuid::new_v4();
        let stock_err = ServiceError::InsufficientStock {
            product_id: Uuid::new_v4(),
            requested: 5,
            available: 3,
        };
        assert!(matches!(
            classify_assembly_error(user_id, stock_err),
            ServiceError::InsufficientStock { available: 3, .. }
        ));

        let db_err = ServiceError::InternalError("connection lost".into());
        assert!(matches!(
            classify_assembly_error(user_id, db_err),
            ServiceError::OrderCreationFailed
        ));
    }

    #[test]
    fn shipping_method_round_trips_through_strings() {
        assert_eq!(ShippingMethod::Standard.to_string(), "standard");
        assert_eq!(
            "express".parse::<ShippingMethod>().unwrap(),
            ShippingMethod::Express
        );
        assert!("overnight".parse::<ShippingMethod>().is_err());
    }
}
