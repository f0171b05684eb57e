//! Postgres-backed catalog, promo code, loyalty and order journal collaborators

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Catalog, CollaboratorError, CollaboratorResult, LoyaltyProgram, OrderRepository, PromoCheck, PromoValidator};
use crate::domain::aggregates::{Order, PaymentIntent, Product};
use crate::domain::loyalty::{LoyaltyLevel, LoyaltyTiers};
use crate::domain::value_objects::{Money, OwnerId, Percent, ProductId};

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, price: Decimal, is_active: bool, stock: i32 }

#[derive(Clone)]
pub struct PgCatalog { db: PgPool }

impl PgCatalog {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn get_product(&self, id: ProductId) -> CollaboratorResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, price, is_active, stock FROM products WHERE id = $1")
            .bind(id.as_uuid()).fetch_optional(&self.db).await?;
        Ok(row.map(|r| Product {
            id: ProductId::from_uuid(r.id), name: r.name, price: Money::new(r.price),
            is_active: r.is_active, stock: u32::try_from(r.stock).unwrap_or(0),
        }))
    }

    async fn commit_sale(&self, id: ProductId, quantity: u32) -> CollaboratorResult<bool> {
        let quantity = i32::try_from(quantity).map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
        let res = sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2")
            .bind(id.as_uuid()).bind(quantity).execute(&self.db).await?;
        Ok(res.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgOrders { db: PgPool }

impl PgOrders {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> CollaboratorResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| CollaboratorError::Decode(e.to_string()))
}

#[async_trait]
impl OrderRepository for PgOrders {
    async fn save_order(&self, order: &Order) -> CollaboratorResult<()> {
        let order_number = i64::try_from(order.order_number()).map_err(|e| CollaboratorError::Rejected(e.to_string()))?;
        sqlx::query(
            "INSERT INTO orders (id, order_number, owner_id, cart_id, status, lines, delivery, pricing, grand_total, promo_code, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at \
             WHERE orders.updated_at <= EXCLUDED.updated_at",
        )
        .bind(order.id().as_uuid()).bind(order_number).bind(order.owner_id().as_uuid()).bind(order.cart_id().as_uuid())
        .bind(order.status().as_str()).bind(to_json(order.lines())?).bind(to_json(order.delivery())?).bind(to_json(order.pricing())?)
        .bind(order.pricing().grand_total.amount()).bind(order.promo_code()).bind(order.created_at()).bind(order.updated_at())
        .execute(&self.db).await?;
        Ok(())
    }

    async fn save_intent(&self, intent: &PaymentIntent) -> CollaboratorResult<()> {
        sqlx::query(
            "INSERT INTO payment_intents (id, order_id, provider_reference, amount, status, idempotency_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at \
             WHERE payment_intents.updated_at <= EXCLUDED.updated_at",
        )
        .bind(intent.id().as_uuid()).bind(intent.order_id().as_uuid()).bind(intent.provider_reference())
        .bind(intent.amount().amount()).bind(intent.status().as_str()).bind(intent.idempotency_key())
        .bind(intent.created_at()).bind(intent.updated_at())
        .execute(&self.db).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PromoRow { discount_percent: Decimal, expires_at: Option<DateTime<Utc>>, is_active: bool, uses_left: i32 }

#[derive(Clone)]
pub struct PgPromoCodes { db: PgPool }

impl PgPromoCodes {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

/// Checks applied to a stored promo code, in the order customers see them.
fn check_promo(row: Option<PromoRow>, now: DateTime<Utc>) -> PromoCheck {
    let Some(row) = row else { return PromoCheck::invalid("promo code not found") };
    if !row.is_active { return PromoCheck::invalid("promo code is inactive"); }
    if row.uses_left <= 0 { return PromoCheck::invalid("promo code has already been used"); }
    if row.expires_at.is_some_and(|at| at < now) { return PromoCheck::invalid("promo code has expired"); }
    match Percent::new(row.discount_percent) {
        Ok(p) => PromoCheck::valid(p),
        Err(e) => PromoCheck::invalid(e.to_string()),
    }
}

#[async_trait]
impl PromoValidator for PgPromoCodes {
    async fn validate(&self, code: &str) -> CollaboratorResult<PromoCheck> {
        let row = sqlx::query_as::<_, PromoRow>("SELECT discount_percent, expires_at, is_active, uses_left FROM promo_codes WHERE code = $1")
            .bind(code).fetch_optional(&self.db).await?;
        Ok(check_promo(row, Utc::now()))
    }

    async fn redeem(&self, code: &str) -> CollaboratorResult<()> {
        let res = sqlx::query("UPDATE promo_codes SET uses_left = uses_left - 1 WHERE code = $1 AND uses_left > 0")
            .bind(code).execute(&self.db).await?;
        if res.rows_affected() == 0 {
            tracing::warn!(code, "promo code had no uses left at redemption");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgLoyalty { db: PgPool, tiers: LoyaltyTiers }

impl PgLoyalty {
    pub fn new(db: PgPool, tiers: LoyaltyTiers) -> Self { Self { db, tiers } }

    async fn level(&self, owner_id: OwnerId) -> CollaboratorResult<LoyaltyLevel> {
        let level: Option<String> = sqlx::query_scalar("SELECT current_level FROM user_discounts WHERE user_id = $1")
            .bind(owner_id.as_uuid()).fetch_optional(&self.db).await?;
        Ok(level.as_deref().and_then(LoyaltyLevel::parse).unwrap_or_default())
    }

    async fn monthly_total(&self, owner_id: OwnerId) -> CollaboratorResult<Money> {
        let total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM loyalty_purchases WHERE user_id = $1 AND paid_at >= date_trunc('month', NOW())",
        )
        .bind(owner_id.as_uuid()).fetch_one(&self.db).await?;
        Ok(Money::new(total))
    }

    /// Steps every user without purchases in the previous month down one
    /// level. Runs at most once per month per user.
    pub async fn monthly_decay(&self, today: NaiveDate) -> CollaboratorResult<u64> {
        let month_start = today.with_day(1).unwrap_or(today);
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT d.user_id, d.current_level FROM user_discounts d \
             WHERE d.current_level <> 'none' AND (d.decayed_for IS NULL OR d.decayed_for < $1) \
             AND NOT EXISTS (SELECT 1 FROM loyalty_purchases p WHERE p.user_id = d.user_id \
                             AND p.paid_at >= ($1::date - INTERVAL '1 month') AND p.paid_at < $1::date)",
        )
        .bind(month_start).fetch_all(&self.db).await?;

        let mut decayed = 0;
        for (user_id, level) in rows {
            let current = LoyaltyLevel::parse(&level).unwrap_or_default();
            let next = self.tiers.decay(current);
            sqlx::query("UPDATE user_discounts SET current_level = $2, decayed_for = $3 WHERE user_id = $1")
                .bind(user_id).bind(next.as_str()).bind(month_start).execute(&self.db).await?;
            decayed += 1;
        }
        if decayed > 0 {
            tracing::info!(decayed, month = %month_start, "loyalty levels decayed");
        }
        Ok(decayed)
    }
}

#[async_trait]
impl LoyaltyProgram for PgLoyalty {
    async fn current_discount_percent(&self, owner_id: OwnerId) -> CollaboratorResult<Percent> {
        Ok(self.tiers.percent(self.level(owner_id).await?))
    }

    async fn record_purchase(&self, owner_id: OwnerId, amount: Money) -> CollaboratorResult<()> {
        sqlx::query("INSERT INTO loyalty_purchases (id, user_id, amount, paid_at) VALUES ($1, $2, $3, NOW())")
            .bind(Uuid::now_v7()).bind(owner_id.as_uuid()).bind(amount.amount()).execute(&self.db).await?;

        let current = self.level(owner_id).await?;
        let next = self.tiers.promote(current, self.monthly_total(owner_id).await?);
        sqlx::query(
            "INSERT INTO user_discounts (user_id, current_level, last_purchase_date) VALUES ($1, $2, CURRENT_DATE) \
             ON CONFLICT (user_id) DO UPDATE SET current_level = EXCLUDED.current_level, last_purchase_date = CURRENT_DATE",
        )
        .bind(owner_id.as_uuid()).bind(next.as_str()).execute(&self.db).await?;

        if next != current {
            tracing::info!(owner_id = %owner_id, from = current.as_str(), to = next.as_str(), "loyalty level raised");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(active: bool, uses_left: i32, expires_in: Option<i64>) -> PromoRow {
        PromoRow {
            discount_percent: Decimal::new(15, 0),
            expires_at: expires_in.map(|m| Utc::now() + Duration::minutes(m)),
            is_active: active,
            uses_left,
        }
    }

    #[test]
    fn test_check_promo_rules() {
        let now = Utc::now();
        assert_eq!(check_promo(None, now).reason.as_deref(), Some("promo code not found"));
        assert!(!check_promo(Some(row(false, 1, None)), now).valid);
        assert!(!check_promo(Some(row(true, 0, None)), now).valid);
        assert_eq!(check_promo(Some(row(true, 1, Some(-5))), now).reason.as_deref(), Some("promo code has expired"));
        let ok = check_promo(Some(row(true, 1, Some(60))), now);
        assert!(ok.valid);
        assert_eq!(ok.discount_percent, Percent::from_int(15).unwrap());
    }
}
