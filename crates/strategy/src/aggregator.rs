use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use swing_trade_core::error::DataError;
use swing_trade_core::events::Bar;

/// Builds fixed-timeframe bars from last-traded-price ticks.
///
/// Buckets are aligned to the epoch (a 5 minute bar covers 09:15..09:20).
/// The bar for a bucket is emitted when the first tick of a later bucket
/// arrives, or on [`BarAggregator::flush`].
#[derive(Debug, Clone)]
pub struct BarAggregator {
    period_secs: i64,
    current: Option<Bar>,
}

impl BarAggregator {
    /// A zero timeframe is raised to one minute.
    #[must_use]
    pub fn new(minutes: u32) -> Self {
        Self {
            period_secs: i64::from(minutes.max(1)) * 60,
            current: None,
        }
    }

    fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        DateTime::from_timestamp(secs - secs.rem_euclid(self.period_secs), 0).unwrap_or(ts)
    }

    /// Feeds one tick. Returns the completed previous bar when the tick opens
    /// a new bucket.
    ///
    /// # Errors
    ///
    /// `StaleData` if the tick belongs to a bucket before the one being built.
    pub fn push_tick(
        &mut self,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
    ) -> Result<Option<Bar>, DataError> {
        let bucket = self.bucket_start(timestamp);
        if let Some(bar) = self.current.as_mut() {
            if bucket == bar.timestamp {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += volume;
                return Ok(None);
            }
            if bucket < bar.timestamp {
                return Err(DataError::StaleData {
                    received: timestamp,
                    last: bar.timestamp,
                });
            }
        }
        Ok(self
            .current
            .replace(Bar::new(bucket, price, price, price, price, volume)))
    }

    /// Emits the partially built bar, if any.
    pub fn flush(&mut self) -> Option<Bar> {
        self.current.take()
    }
}
