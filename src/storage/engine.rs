//! Storage engine: the single shared database handle.
//!
//! Every operation locks the handle for its whole duration, so connect,
//! disconnect, channel upserts, batch writes, range reads and retention
//! deletes never run concurrently with each other.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use duckdb::{Connection, params};

use crate::storage::StorageError;
use crate::storage::codec::{self, RegionKind};
use crate::storage::db::StorageLocation;
use crate::storage::region::{self, RegionRow};
use crate::storage::schema::init_schema;
use crate::storage::types::{
    Channel, LogRecord, Record, RegisteredChannel, Timestamp, ValueType,
};

// =============================================================================
// Results
// =============================================================================

/// Outcome of one batched insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows committed.
    pub inserted: usize,
    /// Entries filtered out before the insert (missing id, timestamp or value,
    /// or a value the region cannot represent).
    pub dropped: usize,
}

/// Outcome of a delete-before run across all regions.
#[derive(Debug, Default)]
pub struct PurgeSummary {
    /// Rows removed, summed over every region that succeeded.
    pub deleted: usize,
    /// Regions whose delete failed, with the failure.
    pub failures: Vec<(RegionKind, StorageError)>,
}

impl PurgeSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Owner of the persistent handle.
///
/// Created disconnected; [`StorageEngine::connect`] must succeed before any
/// other operation. Share it across threads with `Arc<StorageEngine>`.
#[derive(Default)]
pub struct StorageEngine {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Create an engine with no open handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine and connect it to `location`.
    pub fn open(location: &str) -> Result<Self, StorageError> {
        let engine = Self::new();
        engine.connect(location)?;
        Ok(engine)
    }

    /// Open or create the store at `location` and create missing tables.
    ///
    /// Any previously held handle is released first. On failure the engine
    /// stays disconnected and every later call fails with `NotConnected`.
    ///
    /// # Errors
    /// `DriverMissing` if the location names an unavailable backend,
    /// `Connection` if the store cannot be opened or initialized.
    pub fn connect(&self, location: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.take();

        let location = StorageLocation::parse(location)?;
        let conn = location.open()?;
        init_schema(&conn).map_err(|e| match e {
            StorageError::Database(source) => StorageError::Connection {
                location: location.to_string(),
                source: Box::new(source),
            },
            other => other,
        })?;

        *guard = Some(conn);
        tracing::info!(%location, "Storage engine connected");
        Ok(())
    }

    /// Release the handle. A no-op when not connected.
    pub fn disconnect(&self) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Error while closing database connection");
            }
            tracing::info!("Storage engine disconnected");
        }
        Ok(())
    }

    /// True while a handle is held.
    pub fn is_connected(&self) -> bool {
        self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// Insert or replace the channel row keyed by `channel.id`, stamping the
    /// current time as last registration.
    pub fn upsert_channel(&self, channel: &Channel) -> Result<(), StorageError> {
        if channel.id.is_empty() {
            return Err(StorageError::InvalidData(
                "channel id must not be empty".to_string(),
            ));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO channels (id, description, unit, last_registration, value_type)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                     description = EXCLUDED.description,
                     unit = EXCLUDED.unit,
                     last_registration = EXCLUDED.last_registration,
                     value_type = EXCLUDED.value_type",
            )?;
            stmt.execute(params![
                &channel.id,
                &channel.description,
                &channel.unit,
                Utc::now().timestamp_millis(),
                channel.value_type.as_ref(),
            ])?;
            tracing::debug!(channel = %channel.id, value_type = %channel.value_type, "Channel registered");
            Ok(())
        })
    }

    /// Read one persisted channel.
    pub fn channel(&self, id: &str) -> Result<Option<RegisteredChannel>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, description, unit, last_registration, value_type
                 FROM channels WHERE id = ?",
            )?;
            match stmt.query_row([id], read_channel_row) {
                Ok(row) => into_registered(row).map(Some),
                Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(StorageError::from(e)),
            }
        })
    }

    /// Read all persisted channels, ordered by id.
    pub fn channels(&self) -> Result<Vec<RegisteredChannel>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, description, unit, last_registration, value_type
                 FROM channels ORDER BY id",
            )?;
            let rows = stmt.query_map([], read_channel_row)?;
            rows.map(|row| into_registered(row?)).collect()
        })
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Insert `records` into `region` under `batch_timestamp` as one atomic batch.
    ///
    /// Invalid entries are dropped and counted; the remaining rows are all
    /// committed or, on any failure (including a duplicate
    /// `(channel_id, timestamp)`), none are.
    ///
    /// # Errors
    /// `NotConnected`, or `Write` if the batch was rejected.
    pub fn write_batch(
        &self,
        region: RegionKind,
        records: &[LogRecord],
        batch_timestamp: Timestamp,
    ) -> Result<WriteOutcome, StorageError> {
        let mut outcome = WriteOutcome::default();
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            let encoded = match &record.value {
                Some(value) if record.is_valid() => codec::encode(region, value),
                _ => None,
            };
            match encoded {
                Some(value) => rows.push(RegionRow {
                    channel_id: &record.channel_id,
                    value,
                    flag: record.flag.unwrap_or_default(),
                }),
                None => {
                    tracing::debug!(channel = %record.channel_id, %region, "Dropping invalid record");
                    outcome.dropped += 1;
                }
            }
        }

        self.with_conn(|conn| {
            if rows.is_empty() {
                return Ok(());
            }
            outcome.inserted = region::insert_batch(conn, region, &rows, batch_timestamp)
                .map_err(|source| StorageError::Write { region, source })?;
            Ok(())
        })?;

        tracing::debug!(
            %region,
            inserted = outcome.inserted,
            dropped = outcome.dropped,
            batch_timestamp,
            "Batch inserted"
        );
        Ok(outcome)
    }

    /// All records of `channel_id` with `start <= timestamp <= end`, ascending.
    ///
    /// The region and value interpretation come from the persisted channel
    /// row as it is now. An unknown channel yields an empty result.
    ///
    /// # Errors
    /// `NotConnected`, `Read` if a query fails, `InvalidData` if the stored
    /// value type name is not recognized.
    pub fn get_records(
        &self,
        channel_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Record>, StorageError> {
        let read_err = |source: duckdb::Error| StorageError::Read {
            channel: channel_id.to_string(),
            source,
        };

        self.with_conn(|conn| {
            let Some(type_name) = channel_value_type(conn, channel_id).map_err(read_err)? else {
                return Ok(Vec::new());
            };
            let value_type = ValueType::from_str(&type_name).map_err(|_| {
                StorageError::InvalidData(format!(
                    "channel '{channel_id}' has unknown value type '{type_name}'"
                ))
            })?;

            region::select_range(
                conn,
                codec::region_for(value_type),
                value_type,
                channel_id,
                start,
                end,
            )
            .map_err(read_err)
        })
    }

    /// Delete all records with timestamp `< cutoff` from every region.
    ///
    /// Regions are processed independently: a failing region is logged and
    /// reported in the summary while the others are still attempted.
    ///
    /// # Errors
    /// Only `NotConnected` (or a poisoned lock) fails the call as a whole.
    pub fn delete_records_before(&self, cutoff: Timestamp) -> Result<PurgeSummary, StorageError> {
        self.with_conn(|conn| {
            let mut summary = PurgeSummary::default();
            for region in RegionKind::ALL {
                match region::delete_before(conn, region, cutoff) {
                    Ok(deleted) => summary.deleted += deleted,
                    Err(e) => {
                        tracing::error!(%region, error = %e, cutoff, "Region delete failed");
                        summary.failures.push((region, StorageError::Database(e)));
                    }
                }
            }
            Ok(summary)
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Internal("storage lock poisoned".to_string()))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(StorageError::NotConnected)?;
        f(conn)
    }

    /// Run raw SQL against the held handle.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }
}

type ChannelRow = (String, Option<String>, Option<String>, i64, String);

fn read_channel_row(row: &duckdb::Row<'_>) -> duckdb::Result<ChannelRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_registered(
    (id, description, unit, last_registration, value_type): ChannelRow,
) -> Result<RegisteredChannel, StorageError> {
    let value_type = ValueType::from_str(&value_type).map_err(|_| {
        StorageError::InvalidData(format!(
            "channel '{id}' has unknown value type '{value_type}'"
        ))
    })?;
    Ok(RegisteredChannel {
        channel: Channel {
            id,
            description: description.unwrap_or_default(),
            unit: unit.unwrap_or_default(),
            value_type,
        },
        last_registration: DateTime::from_timestamp_millis(last_registration)
            .unwrap_or(DateTime::UNIX_EPOCH),
    })
}

fn channel_value_type(conn: &Connection, channel_id: &str) -> duckdb::Result<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT value_type FROM channels WHERE id = ?")?;
    match stmt.query_row([channel_id], |row: &duckdb::Row<'_>| row.get(0)) {
        Ok(value_type) => Ok(Some(value_type)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Flag, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempdir().unwrap();
        let location = dir.path().join("logger.db");
        let engine = StorageEngine::open(location.to_str().unwrap()).unwrap();
        (dir, engine)
    }

    fn register(engine: &StorageEngine, id: &str, value_type: ValueType) {
        engine.upsert_channel(&Channel::new(id, value_type)).unwrap();
    }

    #[test]
    fn test_operations_require_connect() {
        let engine = StorageEngine::new();
        assert!(!engine.is_connected());
        assert!(matches!(
            engine.get_records("a", 0, 1),
            Err(StorageError::NotConnected)
        ));
        assert!(matches!(
            engine.write_batch(RegionKind::Long, &[], 0),
            Err(StorageError::NotConnected)
        ));
        assert!(matches!(
            engine.delete_records_before(0),
            Err(StorageError::NotConnected)
        ));
        // Disconnect without connect is a no-op.
        engine.disconnect().unwrap();
    }

    #[test]
    fn test_disconnect_refuses_further_calls() {
        let (_dir, engine) = engine();
        assert!(engine.is_connected());
        engine.disconnect().unwrap();
        assert!(matches!(
            engine.upsert_channel(&Channel::new("a", ValueType::Long)),
            Err(StorageError::NotConnected)
        ));
        engine.disconnect().unwrap();
    }

    #[test]
    fn test_failed_connect_leaves_engine_unusable() {
        let (_dir, engine) = engine();
        let err = engine.connect("h2://legacy/database").unwrap_err();
        assert!(matches!(err, StorageError::DriverMissing(_)));
        assert!(!engine.is_connected());
        assert!(matches!(
            engine.get_records("a", 0, 1),
            Err(StorageError::NotConnected)
        ));
    }

    #[test]
    fn test_upsert_channel_replaces_row() {
        let (_dir, engine) = engine();
        engine
            .upsert_channel(&Channel::new("temp1", ValueType::Double).with_unit("°C"))
            .unwrap();
        engine
            .upsert_channel(
                &Channel::new("temp1", ValueType::Float)
                    .with_description("Boiler")
                    .with_unit("K"),
            )
            .unwrap();

        let channels = engine.channels().unwrap();
        assert_eq!(channels.len(), 1);
        let stored = &channels[0].channel;
        assert_eq!(stored.value_type, ValueType::Float);
        assert_eq!(stored.description, "Boiler");
        assert_eq!(stored.unit, "K");

        assert!(engine.channel("temp1").unwrap().is_some());
        assert!(engine.channel("other").unwrap().is_none());
    }

    #[test]
    fn test_upsert_rejects_empty_id() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.upsert_channel(&Channel::new("", ValueType::Long)),
            Err(StorageError::InvalidData(_))
        ));
    }

    #[test]
    fn test_write_and_read_double() {
        let (_dir, engine) = engine();
        register(&engine, "temp1", ValueType::Double);

        let outcome = engine
            .write_batch(
                RegionKind::Double,
                &[LogRecord::new("temp1", Value::Double(21.5), 1000).with_flag(Flag::Valid)],
                1000,
            )
            .unwrap();
        assert_eq!(outcome, WriteOutcome { inserted: 1, dropped: 0 });

        let records = engine.get_records("temp1", 1000, 1000).unwrap();
        assert_eq!(
            records,
            vec![Record {
                value: Value::Double(21.5),
                timestamp: 1000,
                flag: Flag::Valid,
            }]
        );
    }

    #[test]
    fn test_batch_timestamp_overrides_record_timestamp() {
        let (_dir, engine) = engine();
        register(&engine, "counter", ValueType::Long);

        engine
            .write_batch(
                RegionKind::Long,
                &[LogRecord::new("counter", Value::Long(5), 1)],
                9000,
            )
            .unwrap();

        assert!(engine.get_records("counter", 0, 10).unwrap().is_empty());
        assert_eq!(engine.get_records("counter", 9000, 9000).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_records_are_counted() {
        let (_dir, engine) = engine();
        register(&engine, "level", ValueType::Integer);

        let mut no_value = LogRecord::new("level", Value::Integer(1), 10);
        no_value.value = None;
        let mut no_ts = LogRecord::new("level", Value::Integer(1), 10);
        no_ts.timestamp = None;
        let batch = vec![
            LogRecord::new("level", Value::Integer(3), 10),
            no_value,
            no_ts,
            LogRecord::new("", Value::Integer(1), 10),
            LogRecord::new("other", Value::ByteArray(vec![1]), 10),
        ];

        let outcome = engine.write_batch(RegionKind::Int, &batch, 100).unwrap();
        assert_eq!(outcome, WriteOutcome { inserted: 1, dropped: 4 });
    }

    #[test]
    fn test_unknown_channel_reads_empty() {
        let (_dir, engine) = engine();
        assert!(engine.get_records("ghost", 0, i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_key_fails_batch_and_keeps_first() {
        let (_dir, engine) = engine();
        register(&engine, "p", ValueType::Long);

        engine
            .write_batch(RegionKind::Long, &[LogRecord::new("p", Value::Long(1), 0)], 50)
            .unwrap();
        let err = engine
            .write_batch(RegionKind::Long, &[LogRecord::new("p", Value::Long(2), 0)], 50)
            .unwrap_err();
        assert!(matches!(err, StorageError::Write { region: RegionKind::Long, .. }));

        let records = engine.get_records("p", 50, 50).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Value::Long(1));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (_dir, engine) = engine();
        register(&engine, "a", ValueType::Double);
        register(&engine, "b", ValueType::Double);

        let batch = vec![
            LogRecord::new("a", Value::Double(1.0), 0),
            LogRecord::new("b", Value::Double(2.0), 0),
            LogRecord::new("a", Value::Double(3.0), 0),
        ];
        assert!(engine.write_batch(RegionKind::Double, &batch, 10).is_err());

        assert!(engine.get_records("a", 0, 100).unwrap().is_empty());
        assert!(engine.get_records("b", 0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_reads_are_sorted_ascending() {
        let (_dir, engine) = engine();
        register(&engine, "s", ValueType::String);

        for ts in [300, 100, 200] {
            engine
                .write_batch(
                    RegionKind::String,
                    &[LogRecord::new("s", Value::String(format!("v{ts}")), ts)],
                    ts,
                )
                .unwrap();
        }

        let records = engine.get_records("s", 0, 1000).unwrap();
        let ts: Vec<_> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![100, 200, 300]);
        assert_eq!(records[0].value, Value::String("v100".to_string()));
    }

    #[test]
    fn test_byte_array_round_trip() {
        let (_dir, engine) = engine();
        register(&engine, "raw", ValueType::ByteArray);

        engine
            .write_batch(
                RegionKind::String,
                &[LogRecord::new("raw", Value::ByteArray(vec![0, 159, 255]), 1)],
                1,
            )
            .unwrap();

        let records = engine.get_records("raw", 1, 1).unwrap();
        assert_eq!(records[0].value, Value::ByteArray(vec![0, 159, 255]));
    }

    #[test]
    fn test_reads_use_current_registration() {
        let (_dir, engine) = engine();
        register(&engine, "n", ValueType::Integer);
        engine
            .write_batch(RegionKind::Int, &[LogRecord::new("n", Value::Integer(70_000), 1)], 1)
            .unwrap();

        register(&engine, "n", ValueType::Short);
        let records = engine.get_records("n", 1, 1).unwrap();
        assert_eq!(records[0].value, Value::Short(70_000_i32 as i16));
    }

    #[test]
    fn test_delete_records_before_all_regions() {
        let (_dir, engine) = engine();
        register(&engine, "l", ValueType::Long);
        register(&engine, "b", ValueType::Boolean);

        for ts in [100, 200, 300] {
            engine
                .write_batch(RegionKind::Long, &[LogRecord::new("l", Value::Long(ts), ts)], ts)
                .unwrap();
            engine
                .write_batch(RegionKind::Bool, &[LogRecord::new("b", Value::Boolean(true), ts)], ts)
                .unwrap();
        }

        let summary = engine.delete_records_before(200).unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.deleted, 2);

        let remaining: Vec<_> = engine
            .get_records("l", 0, 1000)
            .unwrap()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(remaining, vec![200, 300]);
        assert_eq!(engine.get_records("b", 0, 1000).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_records_before_isolates_failing_region() {
        let (_dir, engine) = engine();
        register(&engine, "l", ValueType::Long);
        register(&engine, "d", ValueType::Double);

        for ts in [100, 300] {
            engine
                .write_batch(RegionKind::Long, &[LogRecord::new("l", Value::Long(ts), ts)], ts)
                .unwrap();
            engine
                .write_batch(RegionKind::Double, &[LogRecord::new("d", Value::Double(1.0), ts)], ts)
                .unwrap();
        }
        engine.execute_batch("DROP TABLE int_values").unwrap();

        let summary = engine.delete_records_before(200).unwrap();
        assert!(!summary.is_complete());
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, RegionKind::Int);
        assert!(matches!(summary.failures[0].1, StorageError::Database(_)));

        // Regions after the failing one were still purged.
        assert_eq!(engine.get_records("l", 0, 1000).unwrap()[0].timestamp, 300);
        assert_eq!(engine.get_records("d", 0, 1000).unwrap().len(), 1);
    }

    #[test]
    fn test_data_survives_reconnect() {
        let dir = tempdir().unwrap();
        let location = dir.path().join("persist.db");
        let location = location.to_str().unwrap();

        let engine = StorageEngine::open(location).unwrap();
        register(&engine, "mode", ValueType::Boolean);
        engine
            .write_batch(RegionKind::Bool, &[LogRecord::new("mode", Value::Boolean(true), 1)], 5000)
            .unwrap();
        engine.disconnect().unwrap();

        engine.connect(location).unwrap();
        let records = engine.get_records("mode", 5000, 5000).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Value::Boolean(true));
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let (_dir, engine) = engine();
        let engine = Arc::new(engine);
        for i in 0..4 {
            register(&engine, &format!("ch{i}"), ValueType::Long);
        }

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let id = format!("ch{i}");
                    for ts in 0..25 {
                        engine
                            .write_batch(
                                RegionKind::Long,
                                &[LogRecord::new(id.as_str(), Value::Long(ts), ts)],
                                ts,
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..4 {
            assert_eq!(engine.get_records(&format!("ch{i}"), 0, 100).unwrap().len(), 25);
        }
    }
}
