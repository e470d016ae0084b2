//! Types for option position management.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use swing_trade_core::orders::{OptionContract, OrderKind, OrderRecord, OrderSpec};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    Created,
    EntrySubmitted,
    EntryFilled,
    ProtectiveOrdersPlaced,
    Monitoring,
    ExitedByStop,
    ExitedByTarget,
    ExitedManually,
    EntryRejected,
    Closed,
}

impl PositionState {
    /// Whether the position still blocks new entries.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::EntrySubmitted
                | Self::EntryFilled
                | Self::ProtectiveOrdersPlaced
                | Self::Monitoring
        )
    }

    #[must_use]
    pub const fn is_exit(self) -> bool {
        matches!(
            self,
            Self::ExitedByStop | Self::ExitedByTarget | Self::ExitedManually | Self::EntryRejected
        )
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use PositionState::{
            Closed, Created, EntryFilled, EntryRejected, EntrySubmitted, ExitedByStop,
            ExitedByTarget, ExitedManually, Monitoring, ProtectiveOrdersPlaced,
        };
        match (self, next) {
            (Created, EntrySubmitted | EntryRejected | ExitedManually)
            | (EntrySubmitted, EntryFilled | EntryRejected | ExitedManually)
            | (EntryFilled, ProtectiveOrdersPlaced | ExitedManually)
            | (ProtectiveOrdersPlaced, Monitoring | ExitedManually)
            | (Monitoring, ExitedByStop | ExitedByTarget | ExitedManually)
            | (ExitedByStop | ExitedByTarget | ExitedManually | EntryRejected, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::EntrySubmitted => "entry_submitted",
            Self::EntryFilled => "entry_filled",
            Self::ProtectiveOrdersPlaced => "protective_orders_placed",
            Self::Monitoring => "monitoring",
            Self::ExitedByStop => "exited_by_stop",
            Self::ExitedByTarget => "exited_by_target",
            Self::ExitedManually => "exited_manually",
            Self::EntryRejected => "entry_rejected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Option-premium levels derived from the structure and the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLevels {
    /// Underlying price the trade is assumed to enter at (the breakout trigger).
    pub underlying_entry: Decimal,
    pub underlying_stop_distance: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub target: Decimal,
}

impl RiskLevels {
    /// Premium at risk per unit between entry and stop.
    #[must_use]
    pub fn risk_per_unit(&self) -> Decimal {
        self.entry_price - self.stop_loss
    }
}

/// Quantity chosen by the lot sizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSize {
    pub lots: u32,
    pub quantity: u32,
    /// Premium risk of the whole order.
    pub total_risk: Decimal,
}

/// Everything needed to open and protect one position.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub correlation_id: String,
    pub contract: OptionContract,
    pub quantity: u32,
    pub entry: OrderKind,
    pub levels: RiskLevels,
}

/// One trade from entry to exit. Mutated only by its lifecycle manager.
#[derive(Debug, Clone)]
pub struct Position {
    pub correlation_id: String,
    pub contract: OptionContract,
    /// Requested quantity until the entry fills, then the filled quantity.
    pub quantity: u32,
    pub state: PositionState,
    pub entry_order: Option<OrderRecord>,
    pub stop_order: Option<OrderRecord>,
    pub target_order: Option<OrderRecord>,
    pub stop_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub(crate) entry_deadline: Instant,
    /// Set once the surviving protective leg is confirmed cancelled or done.
    pub(crate) sibling_cancelled: bool,
    /// Entry whose placement reply never arrived; resent on the next poll.
    pub(crate) pending_entry: Option<OrderSpec>,
}

impl Position {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Orders the broker may still act on.
    pub fn open_orders(&self) -> impl Iterator<Item = &OrderRecord> {
        [&self.entry_order, &self.stop_order, &self.target_order]
            .into_iter()
            .flatten()
            .filter(|o| o.is_open())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { broker_order_id: String },
    /// Same correlation id seen before; nothing was sent.
    Duplicate { broker_order_id: String },
    /// Placement failed transiently and may still have reached the broker.
    /// The position stays open and the entry is reconciled by the next poll.
    Unconfirmed { correlation_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to poll.
    Idle,
    Unchanged,
    Transitioned(PositionState),
    /// A cancel arrived while the poll was in flight; results were dropped.
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelSummary {
    pub attempted: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// Broadcast to anyone watching the position.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    StateChanged {
        correlation_id: String,
        from: PositionState,
        to: PositionState,
    },
    OrderUpdated(OrderRecord),
    StatusUnknown {
        correlation_id: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            PositionState::Created,
            PositionState::EntrySubmitted,
            PositionState::EntryFilled,
            PositionState::ProtectiveOrdersPlaced,
            PositionState::Monitoring,
            PositionState::ExitedByTarget,
            PositionState::Closed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn closed_is_final() {
        for next in [
            PositionState::Created,
            PositionState::EntrySubmitted,
            PositionState::Monitoring,
            PositionState::ExitedManually,
        ] {
            assert!(!PositionState::Closed.can_transition_to(next));
        }
    }

    #[test]
    fn protective_orders_need_a_fill() {
        assert!(!PositionState::EntrySubmitted.can_transition_to(PositionState::ProtectiveOrdersPlaced));
        assert!(!PositionState::Created.can_transition_to(PositionState::Monitoring));
    }

    #[test]
    fn only_live_states_block_entries() {
        assert!(PositionState::Monitoring.is_active());
        assert!(!PositionState::ExitedByStop.is_active());
        assert!(!PositionState::Closed.is_active());
        assert!(PositionState::EntryRejected.is_exit());
    }
}
