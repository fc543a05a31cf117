//! Database schema definitions.

use duckdb::Connection;

use crate::storage::StorageError;
use crate::storage::codec::RegionKind;

/// SQL statement for creating the channels table (dimension table).
///
/// Keyed by channel id; re-registration replaces the row via ON CONFLICT.
pub const CHANNELS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id                VARCHAR PRIMARY KEY,
    description       VARCHAR,
    unit              VARCHAR,
    last_registration BIGINT NOT NULL,
    value_type        VARCHAR NOT NULL
);
"#;

/// DDL for one value region. All regions share the same layout and differ
/// only in the type of the `value` column.
pub fn region_table_ddl(region: RegionKind) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            channel_id VARCHAR NOT NULL,
            ts         BIGINT NOT NULL,
            value      {column} NOT NULL,
            flag       INTEGER NOT NULL,
            PRIMARY KEY (channel_id, ts)
        );",
        table = region.table(),
        column = region.column_type(),
    )
}

/// Initialize the database schema.
///
/// Creates the channel table and all five region tables if they don't exist.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CHANNELS_TABLE_DDL)?;
    for region in RegionKind::ALL {
        conn.execute_batch(&region_table_ddl(region))?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
