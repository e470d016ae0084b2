use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLC bar of the underlying. Immutable once appended to a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Position of a pivot inside the swing structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotRole {
    L1,
    H1,
    A,
    B,
    C,
    D,
}

impl PivotRole {
    /// Roles in the order the detector confirms them.
    pub const SEQUENCE: [Self; 6] = [Self::L1, Self::H1, Self::A, Self::B, Self::C, Self::D];

    /// Swing lows are L1, A and C; the rest are swing highs.
    #[must_use]
    pub const fn is_low(self) -> bool {
        matches!(self, Self::L1 | Self::A | Self::C)
    }

    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::L1 => Some(Self::H1),
            Self::H1 => Some(Self::A),
            Self::A => Some(Self::B),
            Self::B => Some(Self::C),
            Self::C => Some(Self::D),
            Self::D => None,
        }
    }
}

impl fmt::Display for PivotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::L1 => "L1",
            Self::H1 => "H1",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(name)
    }
}

/// A swing point. `bar_index` is the absolute position of the bar in the
/// session's bar stream, so it survives window eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pivot {
    pub role: PivotRole,
    pub bar_index: u64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A completed L1→H1→A→B→C→D sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwingStructure {
    pub underlying: String,
    pub pivots: Vec<Pivot>,
    pub trigger_price: Decimal,
}

impl SwingStructure {
    #[must_use]
    pub fn pivot(&self, role: PivotRole) -> Option<&Pivot> {
        self.pivots.iter().find(|p| p.role == role)
    }

    /// Point C, the structural stop reference.
    #[must_use]
    pub fn stop_reference(&self) -> Option<Decimal> {
        self.pivot(PivotRole::C).map(|p| p.price)
    }

    /// Underlying points between the trigger and point C.
    #[must_use]
    pub fn risk_points(&self) -> Option<Decimal> {
        self.stop_reference().map(|c| self.trigger_price - c)
    }

    /// Higher lows (L1 < A < C) and a higher high (H1 < B).
    #[must_use]
    pub fn is_ascending(&self) -> bool {
        let price = |r| self.pivot(r).map(|p| p.price);
        match (
            price(PivotRole::L1),
            price(PivotRole::H1),
            price(PivotRole::A),
            price(PivotRole::B),
            price(PivotRole::C),
        ) {
            (Some(l1), Some(h1), Some(a), Some(b), Some(c)) => {
                l1 < a && a < b && a < c && c < b && h1 < b
            }
            _ => false,
        }
    }
}

impl fmt::Display for SwingStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.underlying)?;
        for pivot in &self.pivots {
            write!(f, " {}={}@{}", pivot.role, pivot.price, pivot.bar_index)?;
        }
        write!(f, " trigger={}", self.trigger_price)?;
        if let Some(risk) = self.risk_points() {
            write!(f, " stop_ref={} risk={} rr=1:2", self.trigger_price - risk, risk)?;
        }
        Ok(())
    }
}

/// Raised once when price clears D plus the breakout buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub structure: SwingStructure,
    pub trigger_price: Decimal,
    /// Underlying price of point C.
    pub stop_reference: Decimal,
    /// Index of the bar that crossed the trigger.
    pub bar_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl BreakoutSignal {
    /// Client correlation id for the entry order this signal produces.
    ///
    /// Derived from the structure itself so a replay of the same bars yields
    /// the same id and the broker never sees a duplicate entry.
    #[must_use]
    pub fn correlation_id(&self) -> String {
        let l1 = self
            .structure
            .pivot(PivotRole::L1)
            .map_or(0, |p| p.bar_index);
        format!("{}-{}-{}", self.structure.underlying, l1, self.bar_index)
    }
}
