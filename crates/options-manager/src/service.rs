//! Bar loop: buffer → detector → selection → risk → sizing → entry.
//!
//! Bars are handled strictly in order on the caller's task. Order
//! management lives on the position monitor task; this loop only reads the
//! activity gate and sends trade plans.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use swing_trade_core::config::{AppConfig, EntryOrderType};
use swing_trade_core::events::{Bar, BreakoutSignal};
use swing_trade_core::orders::OrderKind;
use swing_trade_core::traits::{MarketDataFeed, PersistenceSink};
use swing_trade_strategy::{DetectorEvent, PriceSeriesBuffer, SwingStructureDetector};
use tracing::{error, info, warn};

use crate::error::{SelectionError, SignalError};
use crate::monitor::PositionHandle;
use crate::risk::RiskCalculator;
use crate::selector::{nearest_expiry, ChainCache, OptionSelector};
use crate::sizing::LotSizer;
use crate::types::{SubmitOutcome, TradePlan};

/// Counters for one run of the bar loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub bars: u64,
    pub bars_rejected: u64,
    pub pivots_confirmed: u64,
    pub structures_armed: u64,
    pub invalidations: u64,
    pub breakouts: u64,
    pub signals_abandoned: u64,
    pub entries_submitted: u64,
}

/// Signals acted on for one trading date.
#[derive(Debug, Clone, Copy)]
struct SignalBudget {
    date: NaiveDate,
    used: u32,
}

pub struct SwingTrader<F> {
    feed: F,
    underlying: String,
    entry_order_type: EntryOrderType,
    max_signals_per_day: u32,
    buffer: PriceSeriesBuffer,
    detector: SwingStructureDetector,
    selector: OptionSelector,
    risk: RiskCalculator,
    sizer: LotSizer,
    chains: ChainCache,
    handle: PositionHandle,
    sink: Arc<dyn PersistenceSink>,
    budget: Option<SignalBudget>,
    poll_on_bar: bool,
    summary: RunSummary,
}

impl<F: MarketDataFeed> SwingTrader<F> {
    #[must_use]
    pub fn new(
        feed: F,
        config: &AppConfig,
        handle: PositionHandle,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        let underlying = &config.underlying;
        Self {
            feed,
            underlying: underlying.symbol.clone(),
            entry_order_type: config.lifecycle.entry_order_type,
            max_signals_per_day: config.sizing.max_signals_per_day,
            buffer: PriceSeriesBuffer::new(config.buffer.capacity),
            detector: SwingStructureDetector::new(&underlying.symbol, config.detector.clone()),
            selector: OptionSelector::new(config.selector.clone(), underlying.strike_step),
            risk: RiskCalculator::new(config.risk.clone(), underlying.tick_size),
            sizer: LotSizer::new(config.sizing.clone(), underlying.lot_size),
            chains: ChainCache::new(Duration::from_secs(config.selector.greeks_refresh_secs)),
            handle,
            sink,
            budget: None,
            poll_on_bar: false,
            summary: RunSummary::default(),
        }
    }

    /// Polls order status after every bar. Replays use this so fills are
    /// observed in bar time rather than wall-clock time.
    #[must_use]
    pub const fn with_poll_on_bar(mut self, enabled: bool) -> Self {
        self.poll_on_bar = enabled;
        self
    }

    #[must_use]
    pub const fn summary(&self) -> &RunSummary {
        &self.summary
    }

    #[must_use]
    pub const fn detector(&self) -> &SwingStructureDetector {
        &self.detector
    }

    #[must_use]
    pub const fn handle(&self) -> &PositionHandle {
        &self.handle
    }

    /// Consumes bars until the feed ends.
    ///
    /// # Errors
    /// Returns an error only if the feed itself fails.
    pub async fn run(&mut self) -> Result<RunSummary> {
        info!(underlying = %self.underlying, "Swing trader started");
        while let Some(bar) = self
            .feed
            .next_bar(&self.underlying)
            .await
            .with_context(|| format!("Market data feed failed for {}", self.underlying))?
        {
            self.on_bar(bar).await;
        }
        info!(
            bars = self.summary.bars,
            breakouts = self.summary.breakouts,
            entries = self.summary.entries_submitted,
            "Swing trader finished"
        );
        Ok(self.summary.clone())
    }

    /// Handles one completed bar.
    pub async fn on_bar(&mut self, bar: Bar) -> Option<DetectorEvent> {
        let event = match self.buffer.append(bar) {
            Ok(_) => self.detector.on_bar(&self.buffer),
            Err(e) => {
                warn!(error = %e, "Bar dropped");
                self.summary.bars_rejected += 1;
                None
            }
        };
        self.summary.bars = self.buffer.appended();

        match &event {
            Some(DetectorEvent::PivotConfirmed(_)) => self.summary.pivots_confirmed += 1,
            Some(DetectorEvent::Armed(_)) => self.summary.structures_armed += 1,
            Some(DetectorEvent::Invalidated(_)) => self.summary.invalidations += 1,
            Some(DetectorEvent::Breakout(signal)) => {
                self.summary.breakouts += 1;
                self.sink.record_structure(&signal.structure);
                match self.on_breakout(signal).await {
                    Ok(()) => self.summary.entries_submitted += 1,
                    Err(e) => {
                        self.summary.signals_abandoned += 1;
                        warn!(
                            correlation_id = %signal.correlation_id(),
                            reason = %e,
                            "Signal abandoned"
                        );
                    }
                }
            }
            None => {}
        }

        if self.poll_on_bar {
            if let Err(e) = self.handle.poll_now().await {
                error!(error = %e, "Status poll failed");
            }
        }
        event
    }

    async fn on_breakout(&mut self, signal: &BreakoutSignal) -> Result<(), SignalError> {
        if self.handle.is_position_active() {
            return Err(SignalError::PositionActive);
        }
        let today = signal.timestamp.date_naive();
        let used = match self.budget {
            Some(b) if b.date == today => b.used,
            _ => 0,
        };
        if used >= self.max_signals_per_day {
            return Err(SignalError::BudgetExhausted {
                limit: self.max_signals_per_day,
            });
        }

        let expiries = self
            .feed
            .expiries(&self.underlying)
            .await
            .map_err(|e| SelectionError::ChainUnavailable(format!("{e:#}")))?;
        let expiry = nearest_expiry(&expiries, today)?;
        let chain = self
            .chains
            .get(&self.feed, &self.underlying, expiry)
            .await?;

        let spot = self
            .buffer
            .latest()
            .map_or(signal.trigger_price, |(_, bar)| bar.close);
        let selection = self.selector.select(signal, spot, &chain)?;
        let levels = self.risk.compute(signal, &selection.contract)?;
        let size = self.sizer.size(levels.risk_per_unit())?;

        let entry = match self.entry_order_type {
            EntryOrderType::Market => OrderKind::Market,
            EntryOrderType::Limit => OrderKind::Limit {
                price: levels.entry_price,
            },
        };
        let plan = TradePlan {
            correlation_id: signal.correlation_id(),
            contract: selection.contract,
            quantity: size.quantity,
            entry,
            levels,
        };
        info!(
            correlation_id = %plan.correlation_id,
            contract = %plan.contract.symbol,
            lots = size.lots,
            quantity = plan.quantity,
            entry = %levels.entry_price,
            stop = %levels.stop_loss,
            target = %levels.target,
            total_risk = %size.total_risk,
            "Submitting entry"
        );

        match self.handle.submit(plan).await? {
            SubmitOutcome::Submitted { .. } | SubmitOutcome::Unconfirmed { .. } => {
                self.budget = Some(SignalBudget {
                    date: today,
                    used: used + 1,
                });
                Ok(())
            }
            SubmitOutcome::Duplicate { broker_order_id } => {
                info!(broker_order_id, "Entry already submitted for this signal");
                Ok(())
            }
        }
    }
}
