//! Region handlers: batched insert, range select and delete-before.
//!
//! The five regions share one table layout, so a single set of functions
//! parameterized by [`RegionKind`] serves all of them. Callers hold the
//! engine lock for the duration of each call.

use duckdb::{Connection, params};

use crate::storage::codec::{self, Encoded, RegionKind};
use crate::storage::types::{Flag, Record, Timestamp, ValueType};

/// A validated row ready for insertion into one region.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RegionRow<'a> {
    pub channel_id: &'a str,
    pub value: Encoded,
    pub flag: Flag,
}

/// Insert all rows under `ts` in one transaction.
///
/// Any failing row (notably a duplicate `(channel_id, ts)`) rolls back the
/// whole batch.
pub(crate) fn insert_batch(
    conn: &mut Connection,
    region: RegionKind,
    rows: &[RegionRow<'_>],
    ts: Timestamp,
) -> duckdb::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {} (channel_id, ts, value, flag) VALUES (?, ?, ?, ?)",
            region.table()
        ))?;
        for row in rows {
            stmt.execute(params![row.channel_id, ts, row.value, row.flag.code()])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Select the rows of one channel with `start <= ts <= end`, ascending by ts.
pub(crate) fn select_range(
    conn: &Connection,
    region: RegionKind,
    value_type: ValueType,
    channel_id: &str,
    start: Timestamp,
    end: Timestamp,
) -> duckdb::Result<Vec<Record>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT ts, value, flag FROM {}
         WHERE channel_id = ? AND ts BETWEEN ? AND ?
         ORDER BY ts ASC",
        region.table()
    ))?;

    let rows = stmt.query_map(params![channel_id, start, end], |row| {
        Ok(Record {
            timestamp: row.get(0)?,
            value: codec::decode(value_type, row, 1)?,
            flag: Flag::from_code(row.get(2)?),
        })
    })?;

    rows.collect()
}

/// Delete every row with `ts < cutoff`, returning the number removed.
pub(crate) fn delete_before(
    conn: &Connection,
    region: RegionKind,
    cutoff: Timestamp,
) -> duckdb::Result<usize> {
    conn.execute(
        &format!("DELETE FROM {} WHERE ts < ?", region.table()),
        [cutoff],
    )
}
