//! Checkout Session
//!
//! State machine binding a cart to a delivery choice, a confirmed price and
//! finally an order. Transition guards live here; the orchestrator only
//! decides which transition to attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::pricing::PriceBreakdown;
use crate::domain::value_objects::{CartId, Money, OrderId, OwnerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod { Pickup, Courier }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] BankCard, Sbp }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::BankCard => "bank_card", Self::Sbp => "sbp" }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliverySelection {
    pub method: DeliveryMethod,
    /// Pickup-point code or saved address id.
    pub target: String,
    pub cost: Money,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    #[default]
    Idle,
    Started,
    DeliverySelected,
    PriceConfirmed,
    PaymentInitiated,
    Completed,
    Abandoned,
}

impl CheckoutState {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Abandoned) }
}

const SELECTABLE: &[CheckoutState] = &[CheckoutState::Started, CheckoutState::DeliverySelected, CheckoutState::PriceConfirmed];
const PRICEABLE: &[CheckoutState] = &[CheckoutState::DeliverySelected, CheckoutState::PriceConfirmed];

#[derive(Clone, Debug, Serialize)]
pub struct CheckoutSession {
    cart_id: CartId,
    owner_id: OwnerId,
    state: CheckoutState,
    /// Cart revision the session was last validated against.
    cart_revision: u64,
    delivery: Option<DeliverySelection>,
    promo_code: Option<String>,
    pricing: Option<PriceBreakdown>,
    payment_method: Option<PaymentMethod>,
    order_id: Option<OrderId>,
    abandon_reason: Option<String>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn start(owner_id: OwnerId, cart_id: CartId, cart_revision: u64, now: DateTime<Utc>) -> Self {
        Self {
            cart_id, owner_id, state: CheckoutState::Started, cart_revision,
            delivery: None, promo_code: None, pricing: None, payment_method: None,
            order_id: None, abandon_reason: None, started_at: now, updated_at: now,
        }
    }

    pub fn cart_id(&self) -> CartId { self.cart_id }
    pub fn owner_id(&self) -> OwnerId { self.owner_id }
    pub fn state(&self) -> CheckoutState { self.state }
    pub fn cart_revision(&self) -> u64 { self.cart_revision }
    pub fn delivery(&self) -> Option<&DeliverySelection> { self.delivery.as_ref() }
    pub fn promo_code(&self) -> Option<&str> { self.promo_code.as_deref() }
    pub fn pricing(&self) -> Option<&PriceBreakdown> { self.pricing.as_ref() }
    pub fn payment_method(&self) -> Option<PaymentMethod> { self.payment_method }
    pub fn order_id(&self) -> Option<OrderId> { self.order_id }
    pub fn abandon_reason(&self) -> Option<&str> { self.abandon_reason.as_deref() }
    pub fn is_open(&self) -> bool { !self.state.is_terminal() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Transition guards, checked before any external call is made.
    pub fn can_select_delivery(&self) -> Result<(), CheckoutError> { self.guard("select_delivery", SELECTABLE) }
    pub fn can_confirm_pricing(&self) -> Result<(), CheckoutError> { self.guard("confirm_pricing", PRICEABLE) }
    pub fn can_initiate_payment(&self) -> Result<(), CheckoutError> { self.guard("initiate_payment", &[CheckoutState::PriceConfirmed]) }

    /// Delivery may be (re)selected until the price is confirmed.
    pub fn select_delivery(&mut self, selection: DeliverySelection) -> Result<(), CheckoutError> {
        self.can_select_delivery()?;
        self.delivery = Some(selection);
        self.pricing = None;
        self.promo_code = None;
        self.move_to(CheckoutState::DeliverySelected);
        Ok(())
    }

    pub fn confirm_pricing(&mut self, pricing: PriceBreakdown, promo_code: Option<String>, cart_revision: u64) -> Result<(), CheckoutError> {
        self.can_confirm_pricing()?;
        self.pricing = Some(pricing);
        self.promo_code = promo_code;
        self.cart_revision = cart_revision;
        self.move_to(CheckoutState::PriceConfirmed);
        Ok(())
    }

    /// Drops everything derived from an outdated cart snapshot.
    pub fn restart(&mut self, cart_revision: u64) -> Result<(), CheckoutError> {
        self.guard("restart", SELECTABLE)?;
        self.delivery = None;
        self.pricing = None;
        self.promo_code = None;
        self.cart_revision = cart_revision;
        self.move_to(CheckoutState::Started);
        Ok(())
    }

    pub fn payment_initiated(&mut self, order_id: OrderId, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.can_initiate_payment()?;
        self.order_id = Some(order_id);
        self.payment_method = Some(method);
        self.move_to(CheckoutState::PaymentInitiated);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), CheckoutError> {
        self.guard("complete", &[CheckoutState::PaymentInitiated])?;
        self.move_to(CheckoutState::Completed);
        Ok(())
    }

    pub fn abandon(&mut self, reason: &str) -> Result<(), CheckoutError> {
        if self.state.is_terminal() {
            return Err(CheckoutError::InvalidState { state: self.state, action: "abandon" });
        }
        self.abandon_reason = Some(reason.to_string());
        self.move_to(CheckoutState::Abandoned);
        Ok(())
    }

    fn guard(&self, action: &'static str, allowed: &[CheckoutState]) -> Result<(), CheckoutError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CheckoutError::InvalidState { state: self.state, action })
        }
    }

    fn move_to(&mut self, next: CheckoutState) {
        self.state = next;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("cannot {action} while checkout is {state:?}")]
    InvalidState { state: CheckoutState, action: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::{price, PricingInput};
    use crate::domain::value_objects::Percent;

    fn session() -> CheckoutSession {
        CheckoutSession::start(OwnerId::new(), CartId::new(), 3, Utc::now())
    }

    fn pickup() -> DeliverySelection {
        DeliverySelection { method: DeliveryMethod::Pickup, target: "MSK-12".into(), cost: Money::from_major(250) }
    }

    fn breakdown() -> PriceBreakdown {
        price(&PricingInput { lines: &[], loyalty: Percent::ZERO, promo: None, delivery_cost: Some(Money::from_major(250)) })
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        s.select_delivery(pickup()).unwrap();
        s.confirm_pricing(breakdown(), Some("SPRING".into()), 3).unwrap();
        let order_id = OrderId::new();
        s.payment_initiated(order_id, PaymentMethod::Sbp).unwrap();
        s.complete().unwrap();
        assert_eq!(s.state(), CheckoutState::Completed);
        assert_eq!(s.order_id(), Some(order_id));
        assert!(s.abandon("late").is_err());
    }

    #[test]
    fn test_guards() {
        let mut s = session();
        assert!(matches!(s.confirm_pricing(breakdown(), None, 3), Err(CheckoutError::InvalidState { state: CheckoutState::Started, .. })));
        assert!(s.payment_initiated(OrderId::new(), PaymentMethod::BankCard).is_err());
        s.select_delivery(pickup()).unwrap();
        s.confirm_pricing(breakdown(), None, 3).unwrap();
        s.restart(4).unwrap();
        assert_eq!(s.state(), CheckoutState::Started);
        assert!(s.pricing().is_none() && s.delivery().is_none());
        assert_eq!(s.cart_revision(), 4);
    }

    #[test]
    fn test_reselecting_delivery_drops_confirmed_price() {
        let mut s = session();
        s.select_delivery(pickup()).unwrap();
        s.confirm_pricing(breakdown(), Some("SPRING".into()), 3).unwrap();
        s.select_delivery(DeliverySelection { method: DeliveryMethod::Courier, target: "addr-1".into(), cost: Money::from_major(400) }).unwrap();
        assert_eq!(s.state(), CheckoutState::DeliverySelected);
        assert!(s.pricing().is_none());
        assert!(s.promo_code().is_none());
    }

    #[test]
    fn test_abandon_from_payment_initiated() {
        let mut s = session();
        s.select_delivery(pickup()).unwrap();
        s.confirm_pricing(breakdown(), None, 3).unwrap();
        s.payment_initiated(OrderId::new(), PaymentMethod::BankCard).unwrap();
        s.abandon("cancelled by customer").unwrap();
        assert_eq!(s.state(), CheckoutState::Abandoned);
        assert_eq!(s.abandon_reason(), Some("cancelled by customer"));
    }
}
