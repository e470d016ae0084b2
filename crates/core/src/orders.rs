//! Option contracts and broker order model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option right. The strategy only buys calls (CE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Option chain row with Greeks. A snapshot, refreshed per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub last_price: Decimal,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub implied_volatility: f64,
    pub open_interest: u64,
    pub bid: Decimal,
    pub ask: Decimal,
}

impl OptionContract {
    /// Mid of the quoted spread, `None` when either side is missing.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        if self.bid <= Decimal::ZERO || self.ask <= Decimal::ZERO || self.ask < self.bid {
            return None;
        }
        Some((self.bid + self.ask) / Decimal::TWO)
    }

    /// Bid-ask spread as a percentage of mid.
    #[must_use]
    pub fn spread_pct(&self) -> Option<Decimal> {
        let mid = self.mid()?;
        Some((self.ask - self.bid) / mid * Decimal::ONE_HUNDRED)
    }

    /// Human-readable description (e.g. "NIFTY25JAN22500CE 22500CE 2025-01-30").
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{} {}{} {}",
            self.symbol, self.strike, self.option_type, self.expiry
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order types the engine ever sends: buy-to-open market/limit and the two
/// protective exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit { price: Decimal },
    /// Stop-loss market: becomes a market order once price trades at or
    /// through `trigger`.
    StopLoss { trigger: Decimal },
}

impl OrderKind {
    /// Reference price carried on the order record.
    #[must_use]
    pub const fn reference_price(&self) -> Option<Decimal> {
        match self {
            Self::Market => None,
            Self::Limit { price } => Some(*price),
            Self::StopLoss { trigger } => Some(*trigger),
        }
    }
}

/// What to send to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Client-assigned id. Brokers must treat a repeated id as the same order.
    pub correlation_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub kind: OrderKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Placed,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    Expired,
}

impl OrderStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Cancelled | Self::Expired
        )
    }

    /// Progress rank used to discard stale status reports: a report may only
    /// move an order forward.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Placed => 1,
            Self::PartiallyFilled => 2,
            Self::Filled | Self::Rejected | Self::Cancelled | Self::Expired => 3,
        }
    }

    /// Whether moving from `self` to `next` is forward progress.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Placed => "placed",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Broker-side view of one order, as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub broker_order_id: String,
    pub correlation_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub requested_quantity: u32,
    pub requested_price: Option<Decimal>,
    pub filled_price: Option<Decimal>,
    pub filled_quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Broker message for rejections.
    pub message: Option<String>,
}

impl OrderRecord {
    /// Local record for an order the broker has just acknowledged.
    #[must_use]
    pub fn acknowledged(spec: &OrderSpec, broker_order_id: String, at: DateTime<Utc>) -> Self {
        Self {
            broker_order_id,
            correlation_id: spec.correlation_id.clone(),
            symbol: spec.symbol.clone(),
            side: spec.side,
            status: OrderStatus::Placed,
            requested_quantity: spec.quantity,
            requested_price: spec.kind.reference_price(),
            filled_price: None,
            filled_quantity: 0,
            created_at: at,
            updated_at: at,
            message: None,
        }
    }

    /// Applies a polled report. Returns `false` and leaves the record alone
    /// when the report would move the order backwards.
    pub fn apply(&mut self, report: &Self) -> bool {
        let same_status_progress = report.status == self.status
            && report.status == OrderStatus::PartiallyFilled
            && report.filled_quantity > self.filled_quantity;
        if !self.status.can_advance_to(report.status) && !same_status_progress {
            return false;
        }
        self.status = report.status;
        self.filled_quantity = report.filled_quantity;
        self.filled_price = report.filled_price.or(self.filled_price);
        self.updated_at = report.updated_at;
        if report.message.is_some() {
            self.message.clone_from(&report.message);
        }
        true
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn contract(bid: Decimal, ask: Decimal) -> OptionContract {
        OptionContract {
            symbol: "NIFTY25JAN22500CE".to_string(),
            strike: dec!(22500),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
            option_type: OptionType::Call,
            last_price: dec!(120),
            delta: 0.5,
            gamma: 0.001,
            theta: -12.0,
            vega: 9.0,
            implied_volatility: 14.0,
            open_interest: 50_000,
            bid,
            ask,
        }
    }

    fn record(status: OrderStatus, filled: u32) -> OrderRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, 6, 9, 30, 0).unwrap();
        OrderRecord {
            broker_order_id: "B1".to_string(),
            correlation_id: "C1".to_string(),
            symbol: "NIFTY25JAN22500CE".to_string(),
            side: OrderSide::Buy,
            status,
            requested_quantity: 75,
            requested_price: None,
            filled_price: None,
            filled_quantity: filled,
            created_at: at,
            updated_at: at,
            message: None,
        }
    }

    #[test]
    fn spread_pct_uses_mid() {
        let c = contract(dec!(99), dec!(101));
        assert_eq!(c.mid(), Some(dec!(100)));
        assert_eq!(c.spread_pct(), Some(dec!(2)));
    }

    #[test]
    fn missing_quote_has_no_mid() {
        assert_eq!(contract(dec!(0), dec!(101)).mid(), None);
        assert_eq!(contract(dec!(102), dec!(101)).spread_pct(), None);
    }

    #[test]
    fn terminal_status_never_reopens() {
        let mut local = record(OrderStatus::Cancelled, 0);
        assert!(!local.apply(&record(OrderStatus::Placed, 0)));
        assert_eq!(local.status, OrderStatus::Cancelled);
    }

    #[test]
    fn partial_fill_progress_is_accepted() {
        let mut local = record(OrderStatus::PartiallyFilled, 25);
        assert!(local.apply(&record(OrderStatus::PartiallyFilled, 50)));
        assert_eq!(local.filled_quantity, 50);
        assert!(!local.apply(&record(OrderStatus::PartiallyFilled, 50)));
        assert!(local.apply(&record(OrderStatus::Filled, 75)));
        assert!(!local.is_open());
    }

    #[test]
    fn option_type_serializes_as_exchange_code() {
        let json = serde_json::to_string(&OptionType::Call).unwrap();
        assert_eq!(json, "\"CE\"");
    }
}
