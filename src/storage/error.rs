//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure. Connection-level
//! variants are terminal for an engine instance; write and delete failures are
//! scoped to a single region.

use thiserror::Error;

use crate::storage::codec::RegionKind;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store at `location` could not be opened or initialized.
    #[error("cannot open store at '{location}': {source}")]
    Connection {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The location names a storage backend that is not available.
    #[error("storage driver '{0}' is not available")]
    DriverMissing(String),

    /// A batched insert into a region failed; nothing from the batch was kept.
    #[error("batch insert into {region} region failed: {source}")]
    Write {
        region: RegionKind,
        #[source]
        source: duckdb::Error,
    },

    /// A range query failed.
    #[error("reading records of channel '{channel}' failed: {source}")]
    Read {
        channel: String,
        #[source]
        source: duckdb::Error,
    },

    /// Operation attempted before a successful connect or after disconnect.
    #[error("storage engine is not connected")]
    NotConnected,

    /// Database operation failed (schema, maintenance).
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Invalid data in database (e.g., unknown value type name).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Retention cannot be scheduled with the given policy.
    #[error("invalid retention policy: {0}")]
    InvalidRetention(String),

    /// Internal error (e.g., poisoned lock, thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
