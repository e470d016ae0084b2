//! Append-only CSV persistence.
//!
//! Records are handed to a blocking writer task over a bounded channel so the
//! trading path never waits on disk. One file per record kind per day:
//! `structures-YYYY-MM-DD.csv` and `orders-YYYY-MM-DD.csv`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use csv::{Writer, WriterBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use swing_trade_core::events::{PivotRole, SwingStructure};
use swing_trade_core::orders::{OrderRecord, OrderSide, OrderStatus};
use swing_trade_core::traits::PersistenceSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Serialize)]
struct StructureRow {
    recorded_at: DateTime<Utc>,
    underlying: String,
    l1: Option<Decimal>,
    h1: Option<Decimal>,
    a: Option<Decimal>,
    b: Option<Decimal>,
    c: Option<Decimal>,
    d: Option<Decimal>,
    l1_bar: Option<u64>,
    d_bar: Option<u64>,
    trigger_price: Decimal,
    stop_reference: Option<Decimal>,
    risk_points: Option<Decimal>,
}

impl StructureRow {
    fn new(structure: &SwingStructure) -> Self {
        let price = |role| structure.pivot(role).map(|p| p.price);
        let bar = |role| structure.pivot(role).map(|p| p.bar_index);
        Self {
            recorded_at: structure
                .pivots
                .last()
                .map_or_else(Utc::now, |p| p.timestamp),
            underlying: structure.underlying.clone(),
            l1: price(PivotRole::L1),
            h1: price(PivotRole::H1),
            a: price(PivotRole::A),
            b: price(PivotRole::B),
            c: price(PivotRole::C),
            d: price(PivotRole::D),
            l1_bar: bar(PivotRole::L1),
            d_bar: bar(PivotRole::D),
            trigger_price: structure.trigger_price,
            stop_reference: structure.stop_reference(),
            risk_points: structure.risk_points(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderRow {
    updated_at: DateTime<Utc>,
    broker_order_id: String,
    correlation_id: String,
    symbol: String,
    side: OrderSide,
    status: OrderStatus,
    requested_quantity: u32,
    requested_price: Option<Decimal>,
    filled_quantity: u32,
    filled_price: Option<Decimal>,
    message: Option<String>,
}

impl From<&OrderRecord> for OrderRow {
    fn from(order: &OrderRecord) -> Self {
        Self {
            updated_at: order.updated_at,
            broker_order_id: order.broker_order_id.clone(),
            correlation_id: order.correlation_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: order.status,
            requested_quantity: order.requested_quantity,
            requested_price: order.requested_price,
            filled_quantity: order.filled_quantity,
            filled_price: order.filled_price,
            message: order.message.clone(),
        }
    }
}

#[derive(Debug)]
enum SinkRecord {
    Structure(StructureRow),
    Order(OrderRow),
}

impl SinkRecord {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Structure(_) => "structures",
            Self::Order(_) => "orders",
        }
    }

    fn date(&self) -> NaiveDate {
        match self {
            Self::Structure(row) => row.recorded_at.date_naive(),
            Self::Order(row) => row.updated_at.date_naive(),
        }
    }
}

/// [`PersistenceSink`] writing daily CSV files.
///
/// Cheap to call from the trading path: each record is queued without
/// waiting. A full queue drops the record with a warning. The writer task
/// ends once every clone of the sink is dropped.
#[derive(Clone)]
pub struct CsvSink {
    tx: mpsc::Sender<SinkRecord>,
}

impl CsvSink {
    /// Creates `dir` if needed and starts the writer task.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn spawn(dir: impl Into<PathBuf>) -> Result<(Self, JoinHandle<()>)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        info!(dir = %dir.display(), "CSV sink started");
        let task = tokio::task::spawn_blocking(move || DailyWriter::new(dir).run(rx));
        Ok((Self { tx }, task))
    }

    fn enqueue(&self, record: SinkRecord) {
        let kind = record.kind();
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind, "CSV sink queue full, record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(kind, "CSV writer stopped, record dropped");
            }
        }
    }
}

impl PersistenceSink for CsvSink {
    fn record_structure(&self, structure: &SwingStructure) {
        self.enqueue(SinkRecord::Structure(StructureRow::new(structure)));
    }

    fn record_order(&self, order: &OrderRecord) {
        self.enqueue(SinkRecord::Order(OrderRow::from(order)));
    }
}

/// Owns the open files. Runs on a blocking thread.
struct DailyWriter {
    dir: PathBuf,
    files: HashMap<(&'static str, NaiveDate), Writer<File>>,
}

impl DailyWriter {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: HashMap::new(),
        }
    }

    fn run(mut self, mut rx: mpsc::Receiver<SinkRecord>) {
        let mut written = 0u64;
        while let Some(record) = rx.blocking_recv() {
            match self.write(&record) {
                Ok(()) => written += 1,
                Err(e) => error!(kind = record.kind(), error = %format!("{e:#}"), "CSV write failed"),
            }
        }
        for writer in self.files.values_mut() {
            if let Err(e) = writer.flush() {
                error!(error = %e, "CSV flush failed");
            }
        }
        info!(records = written, "CSV sink stopped");
    }

    fn write(&mut self, record: &SinkRecord) -> Result<()> {
        let writer = self.writer(record.kind(), record.date())?;
        match record {
            SinkRecord::Structure(row) => writer.serialize(row)?,
            SinkRecord::Order(row) => writer.serialize(row)?,
        }
        writer.flush()?;
        Ok(())
    }

    fn writer(&mut self, kind: &'static str, date: NaiveDate) -> Result<&mut Writer<File>> {
        let key = (kind, date);
        if !self.files.contains_key(&key) {
            let path = file_path(&self.dir, kind, date);
            let is_new = std::fs::metadata(&path).map_or(true, |m| m.len() == 0);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            debug!(path = %path.display(), is_new, "CSV file opened");
            let writer = WriterBuilder::new().has_headers(is_new).from_writer(file);
            self.files.insert(key, writer);
        }
        self.files
            .get_mut(&key)
            .context("CSV writer missing after open")
    }
}

fn file_path(dir: &Path, kind: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{kind}-{}.csv", date.format("%Y-%m-%d")))
}
