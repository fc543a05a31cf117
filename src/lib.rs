//! Datalogger - Embedded Time-Series Logger
//!
//! This crate persists timestamped, typed values from many named channels into
//! an embedded DuckDB store, answers per-channel range queries, and purges
//! records older than a retention window. It can be embedded as a library or
//! inspected with the `datalogger` maintenance binary.
//!
//! # Architecture
//!
//! - **Storage**: five typed regions (LONG, INT, BOOL, STRING, DOUBLE) plus the
//!   channel table, behind a single connection guarded by a mutex
//! - **Directory**: the set of channels the host currently declares for logging
//! - **Router**: splits a batch by region, one transactional insert per region
//! - **Retention**: a background reaper deleting records older than the window
//!
//! # Example
//!
//! ```rust,no_run
//! use datalogger::{AppConfig, DataLogger};
//! use datalogger::storage::{Channel, LogRecord, Value, ValueType};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = DataLogger::start(&AppConfig::default())?;
//!     logger.set_channels_to_log(vec![Channel::new("temp1", ValueType::Double)])?;
//!
//!     let report = logger.log(vec![LogRecord::new("temp1", Value::Double(21.5), 1000)], 1000)?;
//!     assert!(report.is_success());
//!
//!     let records = logger.get_records("temp1", 0, 2000)?;
//!     assert_eq!(records.len(), 1);
//!
//!     logger.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod retention;
pub mod router;
pub mod storage;

mod logger;

pub use config::{AppConfig, ConfigError};
pub use directory::ChannelDirectory;
pub use logger::DataLogger;
pub use retention::{Clock, ManualClock, RetentionPolicy, RetentionReaper, SystemClock};
pub use router::{RouteReport, WriteRouter};
pub use storage::{StorageEngine, StorageError};
