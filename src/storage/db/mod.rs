//! Database backend selection.
//!
//! Only the embedded DuckDB backend is compiled in. A storage location is
//! either a plain filesystem path, `:memory:`, or a `<scheme>://<path>` URL;
//! schemes other than `duckdb` name drivers this build does not carry.
//!
//! # Example
//!
//! ```
//! use datalogger::storage::db::StorageLocation;
//!
//! let location = StorageLocation::parse("duckdb://data/logger.db").unwrap();
//! assert_eq!(location, StorageLocation::File("data/logger.db".into()));
//! ```

mod location;

pub use location::StorageLocation;
