//! Pricing Engine
//!
//! Pure computation over a cart snapshot. Discounts are percentage-only and
//! applied in a fixed order: loyalty on the subtotal, then promo on the
//! loyalty-discounted amount, then delivery is added. Each stage is rounded
//! to two decimal places before the next one runs.

use serde::Serialize;
use crate::domain::aggregates::cart::CartLine;
use crate::domain::value_objects::{Money, Percent};

#[derive(Clone, Copy, Debug)]
pub struct PricingInput<'a> {
    pub lines: &'a [CartLine],
    pub loyalty: Percent,
    /// Already validated by the promo collaborator.
    pub promo: Option<Percent>,
    /// `None` while no delivery has been selected.
    pub delivery_cost: Option<Money>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub loyalty_percent: Percent,
    pub loyalty_discount: Money,
    pub after_loyalty: Money,
    pub promo_percent: Percent,
    pub promo_discount: Money,
    pub after_promo: Money,
    pub delivery_cost: Option<Money>,
    pub grand_total: Money,
}

pub fn price(input: &PricingInput<'_>) -> PriceBreakdown {
    let subtotal = input.lines.iter().map(CartLine::line_total).sum::<Money>().rounded();

    let after_loyalty = apply_discount(subtotal, input.loyalty);
    let promo_percent = input.promo.unwrap_or(Percent::ZERO);
    let after_promo = apply_discount(after_loyalty, promo_percent);

    let delivery = input.delivery_cost.unwrap_or(Money::ZERO).rounded();
    let grand_total = (after_promo + delivery).max(Money::ZERO);

    PriceBreakdown {
        subtotal,
        loyalty_percent: input.loyalty,
        loyalty_discount: subtotal - after_loyalty,
        after_loyalty,
        promo_percent,
        promo_discount: after_loyalty - after_promo,
        after_promo,
        delivery_cost: input.delivery_cost.map(|c| c.rounded()),
        grand_total,
    }
}

fn apply_discount(amount: Money, percent: Percent) -> Money {
    Money::new(amount.amount() * percent.remaining_factor()).rounded().max(Money::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ProductId;
    use rust_decimal::Decimal;

    fn line(qty: u32, price: i64) -> CartLine {
        CartLine { product_id: ProductId::new(), name: "item".into(), quantity: qty, unit_price: Money::from_major(price) }
    }

    fn pct(v: u32) -> Percent { Percent::from_int(v).unwrap() }

    #[test]
    fn test_reference_breakdown() {
        let lines = vec![line(2, 300), line(1, 400)];
        let b = price(&PricingInput { lines: &lines, loyalty: pct(10), promo: Some(pct(20)), delivery_cost: Some(Money::from_major(200)) });
        assert_eq!(b.subtotal, Money::from_major(1000));
        assert_eq!(b.after_loyalty, Money::from_major(900));
        assert_eq!(b.after_promo, Money::from_major(720));
        assert_eq!(b.grand_total, Money::from_major(920));
        assert_eq!(b.loyalty_discount + b.promo_discount, Money::from_major(280));
    }

    #[test]
    fn test_loyalty_is_applied_before_promo() {
        let lines = vec![line(1, 1000)];
        let b = price(&PricingInput { lines: &lines, loyalty: pct(10), promo: Some(pct(20)), delivery_cost: None });
        assert_eq!(b.loyalty_discount, Money::from_major(100));
        assert_eq!(b.promo_discount, Money::from_major(180));

        // Promo-first would attribute 200 to the promo and 80 to loyalty.
        let promo_first_promo = Money::from_major(1000).percentage(pct(20));
        let promo_first_loyalty = (Money::from_major(1000) - promo_first_promo).percentage(pct(10));
        assert_ne!(b.promo_discount, promo_first_promo.rounded());
        assert_ne!(b.loyalty_discount, promo_first_loyalty.rounded());
    }

    #[test]
    fn test_stage_rounding_is_order_sensitive() {
        let lines = vec![CartLine { product_id: ProductId::new(), name: "x".into(), quantity: 1, unit_price: Money::new(Decimal::new(999, 2)) }];
        let b = price(&PricingInput { lines: &lines, loyalty: pct(7), promo: Some(pct(15)), delivery_cost: None });
        // 9.99 * 0.93 = 9.2907 -> 9.29; 9.29 * 0.85 = 7.8965 -> 7.90
        assert_eq!(b.after_loyalty.amount(), Decimal::new(929, 2));
        assert_eq!(b.after_promo.amount(), Decimal::new(790, 2));
        // 9.99 * 0.85 = 8.4915 -> 8.49; 8.49 * 0.93 = 7.8957 -> 7.90, but the split differs
        assert_eq!(b.promo_discount.amount(), Decimal::new(139, 2));
    }

    #[test]
    fn test_unknown_delivery_and_floor() {
        let lines = vec![line(3, 50)];
        let b = price(&PricingInput { lines: &lines, loyalty: Percent::ZERO, promo: Some(pct(100)), delivery_cost: None });
        assert!(b.delivery_cost.is_none());
        assert_eq!(b.grand_total, Money::ZERO);
        assert!(!b.grand_total.is_negative());
    }

    #[test]
    fn test_empty_cart_prices_to_delivery_only() {
        let b = price(&PricingInput { lines: &[], loyalty: pct(5), promo: None, delivery_cost: Some(Money::from_major(300)) });
        assert_eq!(b.subtotal, Money::ZERO);
        assert_eq!(b.grand_total, Money::from_major(300));
    }
}
