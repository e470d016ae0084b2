use std::collections::VecDeque;

use swing_trade_core::error::DataError;
use swing_trade_core::events::Bar;

/// Fixed-capacity sliding window of bars for one underlying.
///
/// Bars are addressed by their absolute position in the stream (the count
/// of bars appended before them), so indices stay valid after eviction.
#[derive(Debug, Clone)]
pub struct PriceSeriesBuffer {
    capacity: usize,
    bars: VecDeque<Bar>,
    appended: u64,
}

impl PriceSeriesBuffer {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
            appended: 0,
        }
    }

    /// Appends a bar and returns its absolute index.
    ///
    /// # Errors
    ///
    /// `StaleData` if the timestamp is not strictly after the last bar,
    /// `MalformedBar` if the OHLC values are inconsistent.
    pub fn append(&mut self, bar: Bar) -> Result<u64, DataError> {
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return Err(DataError::StaleData {
                    received: bar.timestamp,
                    last: last.timestamp,
                });
            }
        }
        if bar.high < bar.low {
            return Err(DataError::MalformedBar {
                timestamp: bar.timestamp,
                reason: format!("high {} below low {}", bar.high, bar.low),
            });
        }
        if bar.close > bar.high || bar.close < bar.low {
            return Err(DataError::MalformedBar {
                timestamp: bar.timestamp,
                reason: format!("close {} outside {}..{}", bar.close, bar.low, bar.high),
            });
        }

        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        let index = self.appended;
        self.appended += 1;
        Ok(index)
    }

    /// Current window, oldest first.
    #[must_use]
    pub const fn window(&self) -> &VecDeque<Bar> {
        &self.bars
    }

    #[must_use]
    pub fn latest(&self) -> Option<(u64, &Bar)> {
        self.bars.back().map(|bar| (self.appended - 1, bar))
    }

    /// Absolute index of the oldest retained bar.
    #[must_use]
    pub fn first_index(&self) -> u64 {
        self.appended - self.bars.len() as u64
    }

    #[must_use]
    pub fn get(&self, index: u64) -> Option<&Bar> {
        let offset = index.checked_sub(self.first_index())?;
        self.bars.get(usize::try_from(offset).ok()?)
    }

    /// Retained bars with absolute index in `from..=to`.
    pub fn range(&self, from: u64, to: u64) -> impl Iterator<Item = (u64, &Bar)> + '_ {
        let first = self.first_index();
        self.bars
            .iter()
            .enumerate()
            .map(move |(offset, bar)| (first + offset as u64, bar))
            .filter(move |(index, _)| *index >= from && *index <= to)
    }

    /// Total bars ever appended.
    #[must_use]
    pub const fn appended(&self) -> u64 {
        self.appended
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(minute: i64, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2025, 1, 6, 9, 15, 0).unwrap() + Duration::minutes(minute);
        Bar::new(ts, close, close + dec!(1), close - dec!(1), close, dec!(1000))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buffer = PriceSeriesBuffer::new(3);
        for i in 0..5 {
            assert_eq!(buffer.append(bar(i, Decimal::from(100 + i))).unwrap(), i as u64);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.first_index(), 2);
        assert_eq!(buffer.window()[0].close, dec!(102));
        assert_eq!(buffer.latest().map(|(i, b)| (i, b.close)), Some((4, dec!(104))));
        assert!(buffer.get(1).is_none());
        assert_eq!(buffer.get(3).map(|b| b.close), Some(dec!(103)));
    }

    #[test]
    fn rejects_out_of_order_and_duplicate_bars() {
        let mut buffer = PriceSeriesBuffer::new(10);
        buffer.append(bar(5, dec!(100))).unwrap();

        let err = buffer.append(bar(5, dec!(101))).unwrap_err();
        assert!(matches!(err, DataError::StaleData { .. }));
        let err = buffer.append(bar(3, dec!(101))).unwrap_err();
        assert!(matches!(err, DataError::StaleData { .. }));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.appended(), 1);
    }

    #[test]
    fn rejects_inconsistent_bar() {
        let mut buffer = PriceSeriesBuffer::new(10);
        let mut b = bar(0, dec!(100));
        b.close = dec!(105);
        assert!(matches!(
            buffer.append(b),
            Err(DataError::MalformedBar { .. })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn range_uses_absolute_indices() {
        let mut buffer = PriceSeriesBuffer::new(4);
        for i in 0..6 {
            buffer.append(bar(i, Decimal::from(100 + i))).unwrap();
        }
        let closes: Vec<_> = buffer.range(0, 3).map(|(i, b)| (i, b.close)).collect();
        assert_eq!(closes, vec![(2, dec!(102)), (3, dec!(103))]);
    }
}
