//! Client-side throttling in front of a broker session.
//!
//! Two quotas apply to every call: a per-second burst limit and a
//! per-minute ceiling. A per-second quota of N also spaces calls at least
//! `1/N` seconds apart once the burst is spent.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::orders::{OrderRecord, OrderSpec};
use crate::traits::BrokerGateway;
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Wraps any [`BrokerGateway`] and waits for quota before each call.
pub struct RateLimitedBroker {
    inner: Arc<dyn BrokerGateway>,
    per_second: DirectLimiter,
    per_minute: DirectLimiter,
}

impl RateLimitedBroker {
    /// Zero quotas are clamped to one request per period.
    #[must_use]
    pub fn new(inner: Arc<dyn BrokerGateway>, config: &BrokerConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            per_second: RateLimiter::direct(Quota::per_second(per_second)),
            per_minute: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    async fn acquire(&self, operation: &'static str) {
        self.per_minute.until_ready().await;
        self.per_second.until_ready().await;
        trace!(operation, "Broker quota acquired");
    }
}

#[async_trait]
impl BrokerGateway for RateLimitedBroker {
    async fn place_order(&self, spec: &OrderSpec) -> Result<String, BrokerError> {
        self.acquire("place_order").await;
        self.inner.place_order(spec).await
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderRecord, BrokerError> {
        self.acquire("get_order_status").await;
        self.inner.get_order_status(broker_order_id).await
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        self.acquire("cancel_order").await;
        self.inner.cancel_order(broker_order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingBroker {
        cancels: AtomicU32,
    }

    #[async_trait]
    impl BrokerGateway for CountingBroker {
        async fn place_order(&self, _spec: &OrderSpec) -> Result<String, BrokerError> {
            Err(BrokerError::rejected("not used"))
        }

        async fn get_order_status(&self, id: &str) -> Result<OrderRecord, BrokerError> {
            Err(BrokerError::UnknownOrder(id.to_string()))
        }

        async fn cancel_order(&self, _id: &str) -> Result<bool, BrokerError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn calls_pass_through_within_quota() {
        let inner = Arc::new(CountingBroker::default());
        let config = BrokerConfig {
            requests_per_second: 5,
            requests_per_minute: 100,
            ..BrokerConfig::default()
        };
        let broker = RateLimitedBroker::new(inner.clone(), &config);

        for _ in 0..5 {
            assert_eq!(broker.cancel_order("B1").await, Ok(true));
        }
        assert_eq!(inner.cancels.load(Ordering::SeqCst), 5);
        assert!(matches!(
            broker.get_order_status("B9").await,
            Err(BrokerError::UnknownOrder(_))
        ));
    }

    #[tokio::test]
    async fn burst_beyond_quota_is_delayed() {
        let inner = Arc::new(CountingBroker::default());
        let config = BrokerConfig {
            requests_per_second: 10,
            requests_per_minute: 500,
            ..BrokerConfig::default()
        };
        let broker = RateLimitedBroker::new(inner, &config);

        let start = std::time::Instant::now();
        for _ in 0..12 {
            broker.cancel_order("B1").await.ok();
        }
        // two calls past the burst need at least one 100ms replenish each
        assert!(start.elapsed() >= std::time::Duration::from_millis(150));
    }
}
