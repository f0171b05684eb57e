//! Payment Intent Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{IntentId, Money, OrderId};

#[derive(Clone, Debug, Serialize)]
pub struct PaymentIntent {
    id: IntentId,
    /// One-directional link; the tracker keeps the reverse index.
    order_id: OrderId,
    provider_reference: String,
    confirmation_token: Option<String>,
    amount: Money,
    status: PaymentStatus,
    idempotency_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Created, Pending, Succeeded, Failed, Cancelled }

impl PaymentStatus {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled) }
    /// Awaiting an outcome from the provider.
    pub fn is_live(self) -> bool { matches!(self, Self::Created | Self::Pending) }
    /// A failed or cancelled intent may be superseded by a new one.
    pub fn is_superseded_by_retry(self) -> bool { matches!(self, Self::Failed | Self::Cancelled) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created", Self::Pending => "pending", Self::Succeeded => "succeeded",
            Self::Failed => "failed", Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusChange {
    Applied { from: PaymentStatus, to: PaymentStatus },
    /// Replay or stale report; nothing changed.
    Unchanged,
}

/// What the gateway returned for a new charge.
#[derive(Clone, Debug)]
pub struct ProviderCharge {
    pub provider_reference: String,
    pub confirmation_token: Option<String>,
    pub status: PaymentStatus,
}

impl PaymentIntent {
    pub fn create(order_id: OrderId, amount: Money, idempotency_key: &str, charge: ProviderCharge, now: DateTime<Utc>) -> Self {
        let status = if charge.status.is_terminal() { PaymentStatus::Created } else { charge.status };
        Self {
            id: IntentId::new(), order_id, provider_reference: charge.provider_reference,
            confirmation_token: charge.confirmation_token, amount, status,
            idempotency_key: idempotency_key.to_string(), created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> IntentId { self.id }
    pub fn order_id(&self) -> OrderId { self.order_id }
    pub fn provider_reference(&self) -> &str { &self.provider_reference }
    pub fn confirmation_token(&self) -> Option<&str> { self.confirmation_token.as_deref() }
    pub fn amount(&self) -> Money { self.amount }
    pub fn status(&self) -> PaymentStatus { self.status }
    pub fn idempotency_key(&self) -> &str { &self.idempotency_key }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Applies a provider-reported status. Replays of the current status and
    /// late `pending`/`created` reports are absorbed; moving a terminal intent
    /// to a different terminal status is rejected.
    pub fn apply(&mut self, next: PaymentStatus) -> Result<StatusChange, PaymentError> {
        let current = self.status;
        // The only live move is created -> pending.
        let stale = current == next || (next.is_live() && !(current == PaymentStatus::Created && next == PaymentStatus::Pending));
        if stale {
            return Ok(StatusChange::Unchanged);
        }
        if current.is_terminal() {
            return Err(PaymentError::InvalidTransition { from: current, to: next });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(StatusChange::Applied { from: current, to: next })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> PaymentIntent {
        let charge = ProviderCharge { provider_reference: "pay_1".into(), confirmation_token: Some("ct".into()), status: PaymentStatus::Pending };
        PaymentIntent::create(OrderId::new(), Money::from_major(920), "key-1", charge, Utc::now())
    }

    #[test]
    fn test_success_and_replay() {
        let mut i = intent();
        assert_eq!(i.status(), PaymentStatus::Pending);
        assert_eq!(i.apply(PaymentStatus::Succeeded), Ok(StatusChange::Applied { from: PaymentStatus::Pending, to: PaymentStatus::Succeeded }));
        assert_eq!(i.apply(PaymentStatus::Succeeded), Ok(StatusChange::Unchanged));
        assert_eq!(i.apply(PaymentStatus::Failed), Err(PaymentError::InvalidTransition { from: PaymentStatus::Succeeded, to: PaymentStatus::Failed }));
        assert_eq!(i.status(), PaymentStatus::Succeeded);
    }

    #[test]
    fn test_out_of_order_pending_is_absorbed() {
        let mut i = intent();
        assert_eq!(i.apply(PaymentStatus::Created), Ok(StatusChange::Unchanged));
        i.apply(PaymentStatus::Cancelled).unwrap();
        assert_eq!(i.apply(PaymentStatus::Pending), Ok(StatusChange::Unchanged));
        assert_eq!(i.apply(PaymentStatus::Created), Ok(StatusChange::Unchanged));
        assert_eq!(i.status(), PaymentStatus::Cancelled);
        assert_eq!(i.apply(PaymentStatus::Succeeded), Err(PaymentError::InvalidTransition { from: PaymentStatus::Cancelled, to: PaymentStatus::Succeeded }));
        assert!(i.status().is_superseded_by_retry());
    }
}
