//! Option side of the swing strategy.
//!
//! Turns a breakout signal into one protected call position:
//! - picks a call near the money by Greeks ranking (`selector`)
//! - translates the structural stop into premium stop and target (`risk`)
//! - sizes the order in whole lots against a rupee risk band (`sizing`)
//! - places, polls and exits the orders (`lifecycle`), owned by a single
//!   background task (`monitor`)
//!
//! `service` wires these behind the bar loop.

pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod risk;
pub mod selector;
pub mod service;
pub mod sizing;
pub mod types;

pub use error::{
    LifecycleError, RejectionCounts, RiskError, SelectionError, SignalError, SizingError,
};
pub use lifecycle::OrderLifecycleManager;
pub use monitor::{spawn as spawn_monitor, MonitorCommand, PositionHandle, PositionMonitor};
pub use risk::RiskCalculator;
pub use selector::{nearest_expiry, ChainCache, OptionSelector, Selection};
pub use service::{RunSummary, SwingTrader};
pub use sizing::LotSizer;
pub use types::{
    CancelSummary, LifecycleEvent, LotSize, PollOutcome, Position, PositionState, RiskLevels,
    SubmitOutcome, TradePlan,
};
