use crate::{
    entities::{
        discount::{self, DiscountKind, DiscountStatus},
        discount_redemption, Discount, DiscountModel, DiscountRedemption,
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// One discount that applies to the current cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub discount_id: Uuid,
    pub code: String,
    pub name: String,
    pub amount: Decimal,
    pub free_delivery: bool,
}

/// Why a discount the shopper can see did not apply. Communicated as data,
/// never as an error; invalid-code feedback is the caller's UX concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountRejection {
    UnknownCode,
    Expired,
    NotStarted,
    Disabled,
    MinimumOrderNotMet,
    UsageLimitReached,
    PerUserLimitReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedDiscount {
    pub code: String,
    pub reason: DiscountRejection,
}

/// Result of evaluating discounts against a cart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscountResolution {
    pub applied: Vec<AppliedDiscount>,
    pub not_applied: Vec<RejectedDiscount>,
}

impl DiscountResolution {
    pub fn total(&self) -> Decimal {
        self.applied.iter().map(|d| d.amount).sum()
    }

    pub fn grants_free_delivery(&self) -> bool {
        self.applied.iter().any(|d| d.free_delivery)
    }
}

/// Evaluates discount codes and always-on promotions against a cart.
#[derive(Clone)]
pub struct DiscountService;

impl DiscountService {
    pub fn new() -> Self {
        Self
    }

    /// Resolves all discounts for a cart: auto-apply promotions plus an
    /// optionally supplied code. Returns an empty applied set (with
    /// reasons) rather than erroring when nothing applies.
    #[instrument(skip(self, conn))]
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        subtotal: Decimal,
        user_id: Option<Uuid>,
        code: Option<&str>,
    ) -> Result<DiscountResolution, ServiceError> {
        let mut resolution = DiscountResolution::default();

        let auto = Discount::find()
            .filter(discount::Column::AutoApply.eq(true))
            .filter(discount::Column::Status.eq(DiscountStatus::Active))
            .all(conn)
            .await?;

        for promo in auto {
            self.evaluate(conn, &promo, subtotal, user_id, &mut resolution)
                .await?;
        }

        if let Some(code) = code {
            let normalized = code.trim().to_uppercase();
            // The code may name an auto-applied promotion; don't double it.
            if !resolution
                .applied
                .iter()
                .any(|d| d.code.eq_ignore_ascii_case(&normalized))
            {
                match self.find_by_code(conn, &normalized).await? {
                    Some(promo) => {
                        self.evaluate(conn, &promo, subtotal, user_id, &mut resolution)
                            .await?;
                    }
                    None => {
                        debug!(code = %normalized, "Unknown discount code");
                        resolution.not_applied.push(RejectedDiscount {
                            code: normalized,
                            reason: DiscountRejection::UnknownCode,
                        });
                    }
                }
            }
        }

        Ok(resolution)
    }

    /// Looks a discount up by its normalized code regardless of window or
    /// status; eligibility is judged separately so rejections carry a
    /// precise reason.
    async fn find_by_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<Option<DiscountModel>, ServiceError> {
        Ok(Discount::find()
            .filter(discount::Column::Code.eq(code))
            .one(conn)
            .await?)
    }

    /// Applies one discount to the resolution, or records why it didn't
    /// apply.
    async fn evaluate<C: ConnectionTrait>(
        &self,
        conn: &C,
        promo: &DiscountModel,
        subtotal: Decimal,
        user_id: Option<Uuid>,
        resolution: &mut DiscountResolution,
    ) -> Result<(), ServiceError> {
        if let Some(reason) = self.eligibility(conn, promo, subtotal, user_id).await? {
            resolution.not_applied.push(RejectedDiscount {
                code: promo.code.clone(),
                reason,
            });
            return Ok(());
        }

        let amount = calculate_discount(promo, subtotal);
        resolution.applied.push(AppliedDiscount {
            discount_id: promo.id,
            code: promo.code.clone(),
            name: promo.name.clone(),
            amount,
            free_delivery: promo.kind == DiscountKind::FreeDelivery,
        });
        Ok(())
    }

    async fn eligibility<C: ConnectionTrait>(
        &self,
        conn: &C,
        promo: &DiscountModel,
        subtotal: Decimal,
        user_id: Option<Uuid>,
    ) -> Result<Option<DiscountRejection>, ServiceError> {
        let now = Utc::now();

        if promo.status != DiscountStatus::Active {
            return Ok(Some(DiscountRejection::Disabled));
        }
        if promo.starts_at > now {
            return Ok(Some(DiscountRejection::NotStarted));
        }
        if promo.ends_at < now {
            return Ok(Some(DiscountRejection::Expired));
        }
        if let Some(min) = promo.min_order_amount {
            if subtotal < min {
                return Ok(Some(DiscountRejection::MinimumOrderNotMet));
            }
        }
        if let Some(limit) = promo.usage_limit {
            if promo.usage_count >= limit {
                warn!(code = %promo.code, "Discount has reached its usage limit");
                return Ok(Some(DiscountRejection::UsageLimitReached));
            }
        }
        if let (Some(per_user), Some(user_id)) = (promo.per_user_limit, user_id) {
            let used = DiscountRedemption::find()
                .filter(discount_redemption::Column::DiscountId.eq(promo.id))
                .filter(discount_redemption::Column::UserId.eq(user_id))
                .count(conn)
                .await?;
            if used >= per_user as u64 {
                return Ok(Some(DiscountRejection::PerUserLimitReached));
            }
        }

        Ok(None)
    }

    /// Records redemptions for an order and bumps usage counters. Called
    /// inside the checkout transaction so a rollback also unwinds these.
    pub async fn record_redemptions<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        order_id: Uuid,
        applied: &[AppliedDiscount],
    ) -> Result<(), ServiceError> {
        for discount in applied {
            let promo = Discount::find_by_id(discount.discount_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Discount {} not found", discount.discount_id))
                })?;

            let usage_count = promo.usage_count;
            let mut promo: discount::ActiveModel = promo.into();
            promo.usage_count = Set(usage_count + 1);
            promo.updated_at = Set(Utc::now());
            promo.update(conn).await?;

            let redemption = discount_redemption::ActiveModel {
                id: Set(Uuid::new_v4()),
                discount_id: Set(discount.discount_id),
                user_id: Set(user_id),
                order_id: Set(order_id),
                created_at: Set(Utc::now()),
            };
            redemption.insert(conn).await?;
        }
        Ok(())
    }
}

impl Default for DiscountService {
    fn default() -> Self {
        Self::new()
    }
}

/// Discount amount for a subtotal: percentage of it, a fixed amount, or
/// zero for free-delivery promotions (the fee waiver is handled by the
/// pricing engine). Capped at `max_discount_amount` and at the subtotal.
pub fn calculate_discount(promo: &DiscountModel, subtotal: Decimal) -> Decimal {
    let raw = match promo.kind {
        DiscountKind::Percentage => subtotal * promo.value / Decimal::from(100),
        DiscountKind::FixedAmount => promo.value,
        DiscountKind::FreeDelivery => Decimal::ZERO,
    };

    let capped = match promo.max_discount_amount {
        Some(max) => raw.min(max),
        None => raw,
    };

    capped.min(subtotal).max(Decimal::ZERO).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn promo(kind: DiscountKind, value: Decimal) -> DiscountModel {
        DiscountModel {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            name: "Test discount".to_string(),
            kind,
            value,
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
            per_user_limit: None,
            auto_apply: false,
            starts_at: Utc::now() - Duration::days(1),
            ends_at: Utc::now() + Duration::days(30),
            status: DiscountStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount() {
        let p = promo(DiscountKind::Percentage, dec!(10));
        assert_eq!(calculate_discount(&p, dec!(100.00)), dec!(10.00));
    }

    #[test]
    fn fixed_discount() {
        let p = promo(DiscountKind::FixedAmount, dec!(20));
        assert_eq!(calculate_discount(&p, dec!(100.00)), dec!(20));
    }

    #[test]
    fn free_delivery_contributes_nothing_to_subtotal_discount() {
        let p = promo(DiscountKind::FreeDelivery, Decimal::ZERO);
        assert_eq!(calculate_discount(&p, dec!(100.00)), Decimal::ZERO);
    }

    #[test]
    fn discount_capped_at_max_amount() {
        let mut p = promo(DiscountKind::Percentage, dec!(50));
        p.max_discount_amount = Some(dec!(15.00));
        assert_eq!(calculate_discount(&p, dec!(100.00)), dec!(15.00));
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let p = promo(DiscountKind::FixedAmount, dec!(75));
        assert_eq!(calculate_discount(&p, dec!(50.00)), dec!(50.00));
    }

    #[test]
    fn percentage_rounds_to_cents() {
        let p = promo(DiscountKind::Percentage, dec!(15));
        // 15% of 9.99 = 1.4985 -> 1.50
        assert_eq!(calculate_discount(&p, dec!(9.99)), dec!(1.50));
    }

    #[test]
    fn resolution_totals_sum_applied_amounts() {
        let resolution = DiscountResolution {
            applied: vec![
                AppliedDiscount {
                    discount_id: Uuid::new_v4(),
                    code: "A".into(),
                    name: "A".into(),
                    amount: dec!(5.00),
                    free_delivery: false,
                },
                AppliedDiscount {
                    discount_id: Uuid::new_v4(),
                    code: "B".into(),
                    name: "B".into(),
                    amount: dec!(2.50),
                    free_delivery: true,
                },
            ],
            not_applied: vec![],
        };

        assert_eq!(resolution.total(), dec!(7.50));
        assert!(resolution.grants_free_delivery());
    }
}
