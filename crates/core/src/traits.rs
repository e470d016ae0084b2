use crate::error::BrokerError;
use crate::events::{Bar, SwingStructure};
use crate::orders::{OptionContract, OrderRecord, OrderSpec};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Bars and option chains for one underlying.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Next completed bar, `None` at end of stream.
    async fn next_bar(&mut self, underlying: &str) -> Result<Option<Bar>>;

    async fn option_chain_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<OptionContract>>;

    /// Listed expiries for the underlying's options.
    async fn expiries(&self, underlying: &str) -> Result<Vec<NaiveDate>>;
}

/// Order routing. The session behind it is owned by the implementor and
/// passed around as an explicit handle.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submits an order and returns the broker order id. Placement is
    /// asynchronous; the real status is learned by polling.
    async fn place_order(&self, spec: &OrderSpec) -> Result<String, BrokerError>;

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderRecord, BrokerError>;

    /// `Ok(false)` when the broker refused the cancel (e.g. already filled).
    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError>;
}

/// Append-only record keeping. Fire-and-forget: implementations log their
/// own failures and must not block the caller.
pub trait PersistenceSink: Send + Sync {
    fn record_structure(&self, structure: &SwingStructure);
    fn record_order(&self, order: &OrderRecord);
}

/// Sink that only writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl PersistenceSink for TracingSink {
    fn record_structure(&self, structure: &SwingStructure) {
        tracing::debug!(structure = %structure, "Structure recorded");
    }

    fn record_order(&self, order: &OrderRecord) {
        tracing::debug!(
            order_id = %order.broker_order_id,
            correlation_id = %order.correlation_id,
            status = %order.status,
            filled = order.filled_quantity,
            "Order recorded"
        );
    }
}
