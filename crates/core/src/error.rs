//! Error types shared by the engine and its collaborators.
//!
//! Market-data problems are dropped bar-by-bar; broker problems split into
//! transient (retry with backoff) and fatal (end the trade cycle).

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Out-of-order or missing market data. The offending bar is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    /// Bar timestamp is not after the last accepted bar.
    #[error("stale bar at {received}, last accepted {last}")]
    StaleData {
        received: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// Bar fields are inconsistent (high below low, close outside range).
    #[error("malformed bar at {timestamp}: {reason}")]
    MalformedBar {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

/// Errors raised by a `BrokerGateway`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Request throttled by the broker.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Network or session failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Order rejected by the broker or exchange.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Contract unknown or not tradable.
    #[error("invalid contract: {0}")]
    InvalidContract(String),

    /// Not enough margin for the order.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// Broker has no order with this id.
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    /// Transient failures persisted past the retry budget.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: String,
    },
}

impl BrokerError {
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Network and rate-limit failures are worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_))
    }

    /// Rejections, bad contracts and margin shortfalls end the trade cycle.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_) | Self::InvalidContract(_) | Self::InsufficientMargin(_)
        )
    }

    /// Broker-suggested wait before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }
}
