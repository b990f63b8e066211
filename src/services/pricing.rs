use crate::{
    config::AppConfig,
    errors::ServiceError,
    services::cart::CartLine,
    services::discounts::{AppliedDiscount, DiscountService, RejectedDiscount},
    entities::Store,
};
use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Authoritative price breakdown for a cart. Derived, never stored:
/// recomputed on every cart view and again at checkout submission, so
/// client-displayed totals are only ever advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingResult {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub delivery_fee: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub applied_discounts: Vec<AppliedDiscount>,
    /// Discounts that were considered but did not apply, with the reason.
    pub available_discounts: Vec<RejectedDiscount>,
}

/// Computes cart totals. Pure with respect to persisted state except for
/// reading discount rules and store delivery fees.
#[derive(Clone)]
pub struct PricingService {
    discounts: Arc<DiscountService>,
    config: Arc<AppConfig>,
}

impl PricingService {
    pub fn new(discounts: Arc<DiscountService>, config: Arc<AppConfig>) -> Self {
        Self { discounts, config }
    }

    /// Computes subtotal, discounts, delivery fee, tax and total for a set
    /// of cart lines.
    ///
    /// Fee policy: a single-store cart pays that store's fee; a cart
    /// spanning stores pays the global flat fee once. A free-delivery
    /// discount zeroes the fee either way.
    #[instrument(skip(self, conn, lines), fields(line_count = lines.len()))]
    pub async fn compute_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[CartLine],
        user_id: Option<Uuid>,
        discount_code: Option<&str>,
    ) -> Result<PricingResult, ServiceError> {
        validate_lines(lines)?;

        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        let resolution = self
            .discounts
            .resolve(conn, subtotal, user_id, discount_code)
            .await?;
        let discount_total = resolution.total().min(subtotal);

        let delivery_fee = if lines.is_empty() || resolution.grants_free_delivery() {
            Decimal::ZERO
        } else {
            self.delivery_fee_for(conn, lines).await?
        };

        let tax_rate =
            Decimal::from_f64_retain(self.config.default_tax_rate).unwrap_or(Decimal::ZERO);
        let (tax_total, total) = totals(subtotal, discount_total, delivery_fee, tax_rate);

        Ok(PricingResult {
            subtotal,
            discount_total,
            delivery_fee,
            tax_total,
            total,
            applied_discounts: resolution.applied,
            available_discounts: resolution.not_applied,
        })
    }

    async fn delivery_fee_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[CartLine],
    ) -> Result<Decimal, ServiceError> {
        let stores: BTreeSet<Uuid> = lines.iter().map(|l| l.store_id).collect();
        let flat_fee =
            Decimal::from_f64_retain(self.config.default_delivery_fee).unwrap_or(Decimal::ZERO);

        if stores.len() == 1 {
            let store_id = *stores.iter().next().expect("non-empty store set");
            match Store::find_by_id(store_id).one(conn).await? {
                Some(store) => Ok(store.delivery_fee),
                None => {
                    warn!(%store_id, "Cart references unknown store; using flat delivery fee");
                    Ok(flat_fee)
                }
            }
        } else {
            // Multi-store carts pay the flat fee once.
            Ok(flat_fee)
        }
    }
}

/// Rejects malformed line items before any arithmetic, so a bad line can
/// never silently produce a negative total.
fn validate_lines(lines: &[CartLine]) -> Result<(), ServiceError> {
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::InvalidCartState(format!(
                "Line for product {} has non-positive quantity {}",
                line.product_id, line.quantity
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidCartState(format!(
                "Line for product {} has negative unit price {}",
                line.product_id, line.unit_price
            )));
        }
    }
    Ok(())
}

/// The pure tail of the computation: tax on the discounted subtotal,
/// grand total clamped to zero.
fn totals(
    subtotal: Decimal,
    discount_total: Decimal,
    delivery_fee: Decimal,
    tax_rate: Decimal,
) -> (Decimal, Decimal) {
    let taxable = (subtotal - discount_total).max(Decimal::ZERO);
    let tax_total = (taxable * tax_rate).round_dp(2);
    let total = (subtotal - discount_total + delivery_fee + tax_total).max(Decimal::ZERO);
    (tax_total, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(store_id: Uuid, unit_price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            line_ref: Uuid::new_v4().to_string(),
            product_id: Uuid::new_v4(),
            product_name: "item".to_string(),
            store_id,
            category_id: Uuid::new_v4(),
            quantity,
            unit_price,
            line_total: unit_price * Decimal::from(quantity),
        }
    }

    #[test]
    fn two_store_cart_scenario() {
        // $10 x2 from store A, $5 x1 from store B, flat fee $4.99, 8% tax:
        // subtotal 25.00, tax 2.00, total 31.99
        let lines = vec![
            line(Uuid::new_v4(), dec!(10.00), 2),
            line(Uuid::new_v4(), dec!(5.00), 1),
        ];
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        assert_eq!(subtotal, dec!(25.00));

        let (tax, total) = totals(subtotal, Decimal::ZERO, dec!(4.99), dec!(0.08));
        assert_eq!(tax, dec!(2.00));
        assert_eq!(total, dec!(31.99));
    }

    #[test]
    fn tax_applies_to_discounted_subtotal() {
        let (tax, total) = totals(dec!(100.00), dec!(20.00), dec!(5.00), dec!(0.08));
        assert_eq!(tax, dec!(6.40));
        assert_eq!(total, dec!(91.40));
    }

    #[test]
    fn total_clamped_to_zero() {
        // Discount equal to subtotal, no fee: nothing left to pay.
        let (tax, total) = totals(dec!(10.00), dec!(10.00), Decimal::ZERO, dec!(0.08));
        assert_eq!(tax, Decimal::ZERO);
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn empty_cart_totals_are_zero() {
        let (tax, total) = totals(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, dec!(0.08));
        assert_eq!(tax, Decimal::ZERO);
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let lines = vec![line(Uuid::new_v4(), dec!(5.00), 0)];
        assert!(matches!(
            validate_lines(&lines),
            Err(ServiceError::InvalidCartState(_))
        ));
    }

    #[test]
    fn rejects_negative_unit_price() {
        let lines = vec![line(Uuid::new_v4(), dec!(-1.00), 2)];
        assert!(matches!(
            validate_lines(&lines),
            Err(ServiceError::InvalidCartState(_))
        ));
    }

    proptest! {
        /// total == subtotal - discount + fee + tax, and total >= 0, for
        /// any valid inputs.
        #[test]
        fn totals_identity_holds(
            subtotal_cents in 0i64..5_000_000,
            discount_cents in 0i64..5_000_000,
            fee_cents in 0i64..10_000,
            rate_bp in 0u32..2_500,
        ) {
            let subtotal = Decimal::new(subtotal_cents, 2);
            let discount = Decimal::new(discount_cents, 2).min(subtotal);
            let fee = Decimal::new(fee_cents, 2);
            let rate = Decimal::new(rate_bp as i64, 4);

            let (tax, total) = totals(subtotal, discount, fee, rate);

            prop_assert_eq!(total, (subtotal - discount + fee + tax).max(Decimal::ZERO));
            prop_assert!(total >= Decimal::ZERO);
            prop_assert!(tax >= Decimal::ZERO);
        }
    }
}
