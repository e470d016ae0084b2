//! Errors for the selection → risk → execution pipeline.
//!
//! None of these stop the process. Selection, risk and sizing errors abandon
//! one signal; lifecycle errors end at most one trade cycle.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use swing_trade_core::error::BrokerError;
use thiserror::Error;

use crate::types::PositionState;

/// Per-filter rejection tally for one selection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub not_call: usize,
    pub outside_band: usize,
    pub low_open_interest: usize,
    pub wide_spread: usize,
    pub bad_greeks: usize,
}

impl RejectionCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.not_call + self.outside_band + self.low_open_interest + self.wide_spread + self.bad_greeks
    }
}

impl fmt::Display for RejectionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "not_call={} outside_band={} low_oi={} wide_spread={} bad_greeks={}",
            self.not_call,
            self.outside_band,
            self.low_open_interest,
            self.wide_spread,
            self.bad_greeks
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// Every contract failed a filter. Abandon the signal; do not retry the
    /// same snapshot.
    #[error("no eligible contract ({rejected})")]
    NoEligibleContract { rejected: RejectionCounts },

    #[error("empty option chain for {underlying}")]
    EmptyChain { underlying: String },

    #[error("no listed expiry after {date}")]
    NoExpiry { date: NaiveDate },

    /// Chain fetch failed and no earlier snapshot is cached.
    #[error("option chain unavailable: {0}")]
    ChainUnavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RiskError {
    /// Breakout entry is not above the stop reference.
    #[error("entry {entry} is not above stop reference {stop_reference}")]
    InvalidStructure {
        entry: Decimal,
        stop_reference: Decimal,
    },

    #[error("option stop {stop} is not positive")]
    NonPositiveStop { stop: Decimal },

    #[error("levels out of order: stop {stop}, entry {entry}, target {target}")]
    OrderingViolated {
        stop: Decimal,
        entry: Decimal,
        target: Decimal,
    },

    #[error("unusable greek {name}={value}")]
    InvalidGreek { name: &'static str, value: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SizingError {
    /// A single lot already risks more than the configured maximum.
    #[error("one lot risks {lot_risk}, above maximum {max_risk}")]
    RiskTooLarge { lot_risk: Decimal, max_risk: Decimal },

    #[error("per-unit risk {0} is not positive")]
    NonPositiveRisk(Decimal),

    #[error("lot size must be positive")]
    InvalidLotSize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// A position is already open; the new entry was not sent.
    #[error("position {correlation_id} is still active")]
    PositionActive { correlation_id: String },

    #[error("{operation} not allowed in state {state}")]
    InvalidTransition {
        state: PositionState,
        operation: &'static str,
    },

    #[error("no position")]
    NoPosition,

    /// Status poll gave up. Position state is unchanged.
    #[error("status of order {order_id} unknown: {source}")]
    StatusUnknown {
        order_id: String,
        source: BrokerError,
    },

    /// Broker rejected the request outright; the trade cycle ended.
    #[error("broker refused: {0}")]
    BrokerFatal(BrokerError),

    #[error("broker error: {0}")]
    Broker(BrokerError),

    #[error("position monitor is not running")]
    MonitorClosed,
}

impl LifecycleError {
    /// Wraps a broker error, separating fatal refusals from the rest.
    #[must_use]
    pub fn from_broker(err: BrokerError) -> Self {
        if err.is_fatal() {
            Self::BrokerFatal(err)
        } else {
            Self::Broker(err)
        }
    }
}

/// Why a breakout signal was not traded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("a position is already active")]
    PositionActive,

    #[error("daily signal budget of {limit} already used")]
    BudgetExhausted { limit: u32 },

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
