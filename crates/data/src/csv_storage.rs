use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{Reader, Writer};
use rust_decimal::Decimal;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use swing_trade_core::events::Bar;

pub struct CsvStorage;

impl CsvStorage {
    /// Reads bars from a CSV file written by [`Self::write_bars`].
    ///
    /// Format: timestamp,symbol,open,high,low,close,volume with RFC 3339
    /// timestamps. Rows for other symbols are skipped when `symbol` is given.
    /// Bars come back sorted by timestamp.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or a row fails to parse.
    pub fn read_bars(path: impl AsRef<Path>, symbol: Option<&str>) -> Result<Vec<Bar>> {
        let path = path.as_ref();
        let mut reader = Reader::from_path(path)
            .with_context(|| format!("Failed to open bar file: {}", path.display()))?;
        let mut bars = Vec::new();

        for (line, result) in reader.records().enumerate() {
            let record = result.with_context(|| format!("Bad CSV row {} in {}", line + 2, path.display()))?;
            if record.len() < 7 {
                anyhow::bail!("Row {} in {} has {} fields, expected 7", line + 2, path.display(), record.len());
            }
            if symbol.is_some_and(|s| s != &record[1]) {
                continue;
            }
            let field = |i: usize| {
                Decimal::from_str(record[i].trim())
                    .with_context(|| format!("Row {}: invalid number {:?}", line + 2, &record[i]))
            };
            let timestamp: DateTime<Utc> = record[0]
                .trim()
                .parse()
                .with_context(|| format!("Row {}: invalid timestamp {:?}", line + 2, &record[0]))?;
            bars.push(Bar::new(
                timestamp,
                field(2)?,
                field(3)?,
                field(4)?,
                field(5)?,
                field(6)?,
            ));
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// Writes bars in the format [`Self::read_bars`] expects.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or writing fails.
    pub fn write_bars(path: impl AsRef<Path>, symbol: &str, bars: &[Bar]) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        let mut writer = Writer::from_writer(file);

        writer.write_record(["timestamp", "symbol", "open", "high", "low", "close", "volume"])?;

        let mut sorted = bars.to_vec();
        sorted.sort_by_key(|b| b.timestamp);

        for bar in sorted {
            writer.write_record(&[
                bar.timestamp.to_rfc3339(),
                symbol.to_string(),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn bar(minute: u32, close: Decimal) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 3, 45 + minute, 0).unwrap(),
            close,
            close + dec!(10),
            close - dec!(10),
            close,
            dec!(0),
        )
    }

    #[test]
    fn bars_survive_a_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nifty.csv");
        // written out of order on purpose
        let bars = vec![bar(5, dec!(23610.5)), bar(0, dec!(23600))];

        CsvStorage::write_bars(&path, "NIFTY", &bars).unwrap();
        let loaded = CsvStorage::read_bars(&path, Some("NIFTY")).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].close, dec!(23600));
        assert_eq!(loaded[1].high, dec!(23620.5));
    }

    #[test]
    fn other_symbols_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.csv");
        std::fs::write(
            &path,
            "timestamp,symbol,open,high,low,close,volume\n\
             2025-01-06T03:45:00Z,NIFTY,100,101,99,100.5,0\n\
             2025-01-06T03:45:00Z,BANKNIFTY,500,501,499,500.5,0\n",
        )
        .unwrap();

        assert_eq!(CsvStorage::read_bars(&path, Some("NIFTY")).unwrap().len(), 1);
        assert_eq!(CsvStorage::read_bars(&path, None).unwrap().len(), 2);
    }

    #[test]
    fn bad_numbers_name_the_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "timestamp,symbol,open,high,low,close,volume\n\
             2025-01-06T03:45:00Z,NIFTY,100,abc,99,100.5,0\n",
        )
        .unwrap();

        let err = CsvStorage::read_bars(&path, None).unwrap_err();
        assert!(format!("{err:#}").contains("Row 2"));
    }
}
