//! Storage Layer
//!
//! Embedded DuckDB storage with one table per value-type family:
//! - **Codec**: maps declared value types to regions and values to columns
//! - **Engine**: owns the single handle and serializes every operation on it
//!
//! # Components
//!
//! - [`StorageEngine`]: connect/disconnect, channel upsert, batched insert,
//!   range read and delete-before
//! - [`RegionKind`] / [`region_for`]: region dispatch
//! - [`StorageLocation`](db::StorageLocation): backend and path selection

mod codec;
pub mod db;
mod engine;
mod error;
mod region;
mod schema;
mod types;

pub use codec::{Encoded, RegionKind, encode, region_for};
pub use engine::{PurgeSummary, StorageEngine, WriteOutcome};
pub use error::StorageError;
pub use schema::{CHANNELS_TABLE_DDL, init_schema, region_table_ddl};
pub use types::{
    Channel, Flag, LogRecord, Record, RegisteredChannel, Timestamp, Value, ValueType,
};
