//! Storage location parsing and opening.

use std::path::{Path, PathBuf};

use duckdb::Connection;

use crate::storage::StorageError;

/// URL scheme of the compiled-in backend.
const DUCKDB_SCHEME: &str = "duckdb";

/// Marker for an in-memory store.
const MEMORY_LOCATION: &str = ":memory:";

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Database file on disk.
    File(PathBuf),
    /// Private in-memory database, discarded on disconnect.
    Memory,
}

impl StorageLocation {
    /// Parse a location string.
    ///
    /// # Errors
    /// Returns `StorageError::DriverMissing` for a URL whose scheme is not
    /// `duckdb`, and `StorageError::Connection` for an empty location.
    pub fn parse(location: &str) -> Result<Self, StorageError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(StorageError::Connection {
                location: location.to_string(),
                source: "storage location is empty".into(),
            });
        }

        let path = match location.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(DUCKDB_SCHEME) => rest,
            Some((scheme, _)) => return Err(StorageError::DriverMissing(scheme.to_string())),
            None => location,
        };

        if path == MEMORY_LOCATION {
            Ok(Self::Memory)
        } else if path.is_empty() {
            Err(StorageError::Connection {
                location: location.to_string(),
                source: "storage location has no path".into(),
            })
        } else {
            Ok(Self::File(PathBuf::from(path)))
        }
    }

    /// Open (or create) the database behind this location.
    ///
    /// Parent directories of a file location are created when missing.
    pub fn open(&self) -> Result<Connection, StorageError> {
        match self {
            Self::Memory => Connection::open_in_memory().map_err(|e| self.connection_error(e)),
            Self::File(path) => {
                ensure_parent_dir(path).map_err(|e| self.connection_error(e))?;
                Connection::open(path).map_err(|e| self.connection_error(e))
            }
        }
    }

    fn connection_error(
        &self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> StorageError {
        StorageError::Connection {
            location: self.to_string(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(MEMORY_LOCATION),
        }
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}
