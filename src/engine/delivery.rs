//! Delivery Cost Resolver
//!
//! Wraps the tariff collaborator with a time bound and a bounded quote cache
//! keyed by (method, target, lines). A quote younger than the freshness
//! window is served without a call; an older one stays cached until the
//! stale window ends and covers a failing or slow collaborator.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::time::Instant;

use crate::collaborators::{DeliveryQuote, DeliveryQuoter, QuoteRequest};
use crate::domain::aggregates::{CartLine, DeliveryMethod};
use crate::domain::value_objects::{Money, ProductId};
use crate::{EngineError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct QuoteKey {
    method: DeliveryMethod,
    target: String,
    lines: Vec<(ProductId, u32)>,
}

impl QuoteKey {
    fn new(method: DeliveryMethod, target: &str, lines: &[CartLine]) -> Self {
        let mut lines: Vec<_> = lines.iter().map(|l| (l.product_id, l.quantity)).collect();
        lines.sort();
        Self { method, target: target.to_string(), lines }
    }
}

#[derive(Clone, Debug)]
struct CachedQuote { quote: DeliveryQuote, fetched_at: Instant }

#[derive(Clone, Copy, Debug)]
pub struct QuoteCachePolicy {
    pub capacity: u64,
    /// Age up to which a quote is served without asking the collaborator.
    pub freshness: Duration,
    /// Age after which a quote is dropped, even as a fallback.
    pub stale_after: Duration,
}

pub struct DeliveryCostResolver {
    quoter: Arc<dyn DeliveryQuoter>,
    cache: Cache<QuoteKey, CachedQuote>,
    timeout: Duration,
    freshness: Duration,
}

impl DeliveryCostResolver {
    pub fn new(quoter: Arc<dyn DeliveryQuoter>, timeout: Duration, policy: QuoteCachePolicy) -> Self {
        let cache = Cache::builder()
            .max_capacity(policy.capacity)
            .time_to_live(policy.stale_after.max(policy.freshness))
            .build();
        Self { quoter, cache, timeout, freshness: policy.freshness }
    }

    pub async fn resolve(&self, method: DeliveryMethod, target: &str, lines: &[CartLine]) -> Result<Money> {
        let key = QuoteKey::new(method, target, lines);
        let cached = self.cache.get(&key).await;
        if let Some(hit) = cached.as_ref().filter(|c| c.fetched_at.elapsed() < self.freshness) {
            return Self::settle(hit.quote.clone());
        }

        let request = QuoteRequest { method, target, lines };
        let failure = match tokio::time::timeout(self.timeout, self.quoter.quote(request)).await {
            Ok(Ok(quote)) => {
                self.cache.insert(key, CachedQuote { quote: quote.clone(), fetched_at: Instant::now() }).await;
                return Self::settle(quote);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no answer within {}ms", self.timeout.as_millis()),
        };

        match cached.map(|c| c.quote) {
            Some(DeliveryQuote::Cost(cost)) => {
                tracing::warn!(destination = target, error = %failure, "delivery quote failed, serving cached cost");
                Ok(cost)
            }
            _ => {
                tracing::warn!(destination = target, error = %failure, "delivery quote failed");
                Err(EngineError::DeliveryUnavailable(failure))
            }
        }
    }

    fn settle(quote: DeliveryQuote) -> Result<Money> {
        match quote {
            DeliveryQuote::Cost(cost) => Ok(cost),
            DeliveryQuote::Unavailable(reason) => Err(EngineError::DeliveryUnavailable(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::testing::ScriptedQuoter;

    fn lines() -> Vec<CartLine> {
        vec![CartLine { product_id: ProductId::new(), name: "Widget".into(), quantity: 2, unit_price: Money::from_major(100) }]
    }

    fn resolver(quoter: &Arc<ScriptedQuoter>, timeout_ms: u64, freshness: Duration) -> DeliveryCostResolver {
        let policy = QuoteCachePolicy { capacity: 100, freshness, stale_after: Duration::from_secs(3600) };
        DeliveryCostResolver::new(quoter.clone(), Duration::from_millis(timeout_ms), policy)
    }

    #[tokio::test]
    async fn test_fresh_quote_is_served_from_cache() {
        let quoter = Arc::new(ScriptedQuoter::default());
        let resolver = resolver(&quoter, 500, Duration::from_secs(600));
        let lines = lines();

        assert_eq!(resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap(), Money::from_major(200));
        assert_eq!(resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap(), Money::from_major(200));
        assert_eq!(quoter.calls(), 1);
        resolver.resolve(DeliveryMethod::Courier, "MSK-1", &lines).await.unwrap();
        assert_eq!(quoter.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_without_cache_is_unavailable() {
        let quoter = Arc::new(ScriptedQuoter::default());
        quoter.stall(Duration::from_millis(300));
        let resolver = resolver(&quoter, 30, Duration::from_secs(600));

        let err = resolver.resolve(DeliveryMethod::Courier, "addr-9", &lines()).await.unwrap_err();
        assert!(matches!(err, EngineError::DeliveryUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_cost_covers_collaborator_failure() {
        let quoter = Arc::new(ScriptedQuoter::default());
        let resolver = resolver(&quoter, 500, Duration::ZERO);
        let lines = lines();

        quoter.push(Ok(DeliveryQuote::Cost(Money::from_major(350))));
        quoter.push(Err(CollaboratorError::Transport("connection reset".into())));
        assert_eq!(resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap(), Money::from_major(350));
        assert_eq!(resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap(), Money::from_major(350));
        assert_eq!(quoter.calls(), 2);
    }

    #[tokio::test]
    async fn test_quotes_past_stale_window_are_dropped() {
        let quoter = Arc::new(ScriptedQuoter::default());
        let policy = QuoteCachePolicy { capacity: 100, freshness: Duration::ZERO, stale_after: Duration::from_millis(50) };
        let resolver = DeliveryCostResolver::new(quoter.clone(), Duration::from_millis(500), policy);
        let lines = lines();

        quoter.push(Ok(DeliveryQuote::Cost(Money::from_major(350))));
        quoter.push(Err(CollaboratorError::Transport("connection reset".into())));
        resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let err = resolver.resolve(DeliveryMethod::Pickup, "MSK-1", &lines).await.unwrap_err();
        assert!(matches!(err, EngineError::DeliveryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let quoter = Arc::new(ScriptedQuoter::default());
        let policy = QuoteCachePolicy { capacity: 8, freshness: Duration::from_secs(600), stale_after: Duration::from_secs(3600) };
        let resolver = DeliveryCostResolver::new(quoter.clone(), Duration::from_millis(500), policy);
        let lines = lines();

        for n in 0..64 {
            resolver.resolve(DeliveryMethod::Courier, &format!("addr-{n}"), &lines).await.unwrap();
        }
        resolver.cache.run_pending_tasks().await;
        assert!(resolver.cache.entry_count() <= 8);
    }

    #[tokio::test]
    async fn test_unavailable_destination() {
        let quoter = Arc::new(ScriptedQuoter::default());
        quoter.push(Ok(DeliveryQuote::Unavailable("no pickup points".into())));
        let resolver = resolver(&quoter, 500, Duration::from_secs(600));

        let err = resolver.resolve(DeliveryMethod::Pickup, "nowhere", &lines()).await.unwrap_err();
        assert_eq!(err, EngineError::DeliveryUnavailable("no pickup points".into()));
    }
}
