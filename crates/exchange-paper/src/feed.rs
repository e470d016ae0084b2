//! Bar replay with a fixed option chain.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use swing_trade_core::events::Bar;
use swing_trade_core::orders::OptionContract;
use swing_trade_core::traits::MarketDataFeed;
use tracing::debug;

use crate::broker::PaperBroker;

/// Option chain captured at one underlying price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Underlying price the contract prices were taken at.
    pub spot: Decimal,
    #[serde(default)]
    pub expiries: Vec<NaiveDate>,
    pub contracts: Vec<OptionContract>,
}

impl ChainSnapshot {
    /// # Errors
    /// Returns an error if the JSON does not describe a chain.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut chain: Self = serde_json::from_str(json).context("Invalid option chain JSON")?;
        if chain.expiries.is_empty() {
            chain.expiries = chain.contracts.iter().map(|c| c.expiry).collect();
            chain.expiries.sort_unstable();
            chain.expiries.dedup();
        }
        Ok(chain)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read option chain {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Contracts repriced for the underlying at `spot` using first-order
    /// delta, on the `tick` grid and never below one tick.
    #[must_use]
    pub fn marked(&self, spot: Decimal, tick: Decimal) -> Vec<OptionContract> {
        let moved = spot - self.spot;
        self.contracts
            .iter()
            .map(|c| {
                let mut contract = c.clone();
                let delta = Decimal::from_f64(c.delta).unwrap_or(Decimal::ZERO);
                let price = round_to_tick(c.last_price + delta * moved, tick).max(tick);
                let shift = price - c.last_price;
                contract.last_price = price;
                contract.bid = (c.bid + shift).max(Decimal::ZERO);
                contract.ask = (c.ask + shift).max(Decimal::ZERO);
                contract
            })
            .collect()
    }
}

fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * tick
}

/// Replays bars for one underlying and serves the chain repriced to the
/// latest close. Optionally pushes those prices to a [`PaperBroker`] so
/// resting orders fill as the replay moves.
pub struct ReplayFeed {
    underlying: String,
    bars: VecDeque<Bar>,
    chain: ChainSnapshot,
    tick_size: Decimal,
    last_close: Option<Decimal>,
    broker: Option<Arc<PaperBroker>>,
}

impl ReplayFeed {
    #[must_use]
    pub fn new(underlying: impl Into<String>, bars: Vec<Bar>, chain: ChainSnapshot) -> Self {
        Self {
            underlying: underlying.into(),
            bars: bars.into(),
            chain,
            tick_size: Decimal::new(5, 2),
            last_close: None,
            broker: None,
        }
    }

    #[must_use]
    pub fn with_broker(mut self, broker: Arc<PaperBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub const fn with_tick_size(mut self, tick_size: Decimal) -> Self {
        self.tick_size = tick_size;
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bars.len()
    }

    fn current_chain(&self) -> Vec<OptionContract> {
        let spot = self.last_close.unwrap_or(self.chain.spot);
        self.chain.marked(spot, self.tick_size)
    }

    fn check_underlying(&self, underlying: &str) -> Result<()> {
        if underlying != self.underlying {
            bail!(
                "Replay feed serves {}, asked for {underlying}",
                self.underlying
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataFeed for ReplayFeed {
    async fn next_bar(&mut self, underlying: &str) -> Result<Option<Bar>> {
        self.check_underlying(underlying)?;
        let Some(bar) = self.bars.pop_front() else {
            return Ok(None);
        };
        self.last_close = Some(bar.close);

        if let Some(broker) = &self.broker {
            let mut fills = 0;
            for contract in self.current_chain() {
                fills += broker.set_price(&contract.symbol, contract.last_price);
            }
            if fills > 0 {
                debug!(fills, close = %bar.close, "Replay marks filled paper orders");
            }
        }
        Ok(Some(bar))
    }

    async fn option_chain_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<OptionContract>> {
        self.check_underlying(underlying)?;
        Ok(self
            .current_chain()
            .into_iter()
            .filter(|c| c.expiry == expiry)
            .collect())
    }

    async fn expiries(&self, underlying: &str) -> Result<Vec<NaiveDate>> {
        self.check_underlying(underlying)?;
        Ok(self.chain.expiries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use swing_trade_core::orders::{OrderKind, OrderSide, OrderSpec, OrderStatus};
    use swing_trade_core::traits::BrokerGateway;

    const CHAIN: &str = r#"{
        "spot": "23600",
        "contracts": [
            {
                "symbol": "NIFTY2510923600CE", "strike": "23600", "expiry": "2025-01-09",
                "option_type": "CE", "last_price": "120", "delta": 0.5, "gamma": 0.002,
                "theta": -12.0, "vega": 8.0, "implied_volatility": 15.0,
                "open_interest": 250000, "bid": "119.5", "ask": "120.5"
            },
            {
                "symbol": "NIFTY2511623600CE", "strike": "23600", "expiry": "2025-01-16",
                "option_type": "CE", "last_price": "180", "delta": 0.52, "gamma": 0.0015,
                "theta": -8.0, "vega": 12.0, "implied_volatility": 14.0,
                "open_interest": 90000, "bid": "179", "ask": "181"
            }
        ]
    }"#;

    fn bar(minute: u32, close: Decimal) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 4, minute, 0).unwrap(),
            close,
            close + dec!(5),
            close - dec!(5),
            close,
            dec!(1000),
        )
    }

    #[test]
    fn expiries_default_to_contract_expiries() {
        let chain = ChainSnapshot::from_json(CHAIN).unwrap();
        assert_eq!(
            chain.expiries,
            vec![
                NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 16).unwrap()
            ]
        );
    }

    #[test]
    fn marking_follows_delta() {
        let chain = ChainSnapshot::from_json(CHAIN).unwrap();
        let marked = chain.marked(dec!(23640), dec!(0.05));
        // +40 points * 0.5 delta
        assert_eq!(marked[0].last_price, dec!(140));
        assert_eq!(marked[0].bid, dec!(139.5));

        let crashed = chain.marked(dec!(23000), dec!(0.05));
        assert_eq!(crashed[0].last_price, dec!(0.05));
    }

    #[tokio::test]
    async fn replay_serves_bars_then_ends() {
        let chain = ChainSnapshot::from_json(CHAIN).unwrap();
        let mut feed = ReplayFeed::new("NIFTY", vec![bar(0, dec!(23600)), bar(5, dec!(23620))], chain);

        assert!(feed.next_bar("BANKNIFTY").await.is_err());
        assert_eq!(feed.next_bar("NIFTY").await.unwrap().unwrap().close, dec!(23600));
        assert_eq!(feed.next_bar("NIFTY").await.unwrap().unwrap().close, dec!(23620));
        assert!(feed.next_bar("NIFTY").await.unwrap().is_none());

        let weekly = feed
            .option_chain_snapshot("NIFTY", NaiveDate::from_ymd_opt(2025, 1, 9).unwrap())
            .await
            .unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].last_price, dec!(130));
    }

    #[tokio::test]
    async fn replay_marks_drive_paper_fills() {
        let broker = Arc::new(PaperBroker::new());
        let chain = ChainSnapshot::from_json(CHAIN).unwrap();
        let mut feed = ReplayFeed::new("NIFTY", vec![bar(0, dec!(23600)), bar(5, dec!(23560))], chain)
            .with_broker(broker.clone());

        feed.next_bar("NIFTY").await.unwrap();
        let stop = broker
            .place_order(&OrderSpec {
                correlation_id: "NIFTY-1-17-SL".to_string(),
                symbol: "NIFTY2510923600CE".to_string(),
                side: OrderSide::Sell,
                quantity: 75,
                kind: OrderKind::StopLoss { trigger: dec!(105) },
            })
            .await
            .unwrap();
        assert!(broker.order(&stop).unwrap().is_open());

        // -40 points: 120 -> 100, through the 105 stop
        feed.next_bar("NIFTY").await.unwrap();
        let record = broker.order(&stop).unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.filled_price, Some(dec!(100)));
    }
}
