//! File storage for the swing engine.
//!
//! - `csv_storage`: read and write OHLCV bar files for replay
//! - `csv_sink`: append-only daily CSV records of structures and orders,
//!   written off the trading path by a background task

pub mod csv_sink;
pub mod csv_storage;

pub use csv_sink::CsvSink;
pub use csv_storage::CsvStorage;
