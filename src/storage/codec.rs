//! Value codec: region dispatch and per-region value representation.
//!
//! Every declared [`ValueType`] maps to exactly one [`RegionKind`]. Values are
//! converted to the region's column type on write and rebuilt from the
//! channel's currently registered type on read.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use duckdb::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::types::{Value, ValueType};

/// Physical storage region, one table per value-type family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum RegionKind {
    Long,
    Int,
    Bool,
    String,
    Double,
}

impl RegionKind {
    /// All regions, in the order writes and deletes visit them.
    pub const ALL: [RegionKind; 5] = [
        RegionKind::Long,
        RegionKind::Int,
        RegionKind::Bool,
        RegionKind::String,
        RegionKind::Double,
    ];

    /// Name of the backing table.
    pub fn table(self) -> &'static str {
        match self {
            Self::Long => "long_values",
            Self::Int => "int_values",
            Self::Bool => "bool_values",
            Self::String => "string_values",
            Self::Double => "double_values",
        }
    }

    /// SQL column type of the `value` column.
    pub(crate) fn column_type(self) -> &'static str {
        match self {
            Self::Long => "BIGINT",
            Self::Int => "INTEGER",
            Self::Bool => "BOOLEAN",
            Self::String => "VARCHAR",
            Self::Double => "DOUBLE",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Long => 0,
            Self::Int => 1,
            Self::Bool => 2,
            Self::String => 3,
            Self::Double => 4,
        }
    }
}

/// Region that stores values of the given declared type.
///
/// Floating-point types and anything without an explicit arm land in the
/// DOUBLE region.
pub fn region_for(value_type: ValueType) -> RegionKind {
    match value_type {
        ValueType::Long => RegionKind::Long,
        ValueType::Integer | ValueType::Short | ValueType::Byte => RegionKind::Int,
        ValueType::Boolean => RegionKind::Bool,
        ValueType::String | ValueType::ByteArray => RegionKind::String,
        _ => RegionKind::Double,
    }
}

/// A value in the column representation of one region.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Long(i64),
    Int(i32),
    Bool(bool),
    Text(String),
    Double(f64),
}

impl ToSql for Encoded {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        match self {
            Self::Long(v) => v.to_sql(),
            Self::Int(v) => v.to_sql(),
            Self::Bool(v) => v.to_sql(),
            Self::Text(v) => v.to_sql(),
            Self::Double(v) => v.to_sql(),
        }
    }
}

/// Converts `value` to the column type of `region`.
///
/// Returns `None` when the value has no representation there (a byte array in
/// a numeric region, a non-numeric string, an `i64` too wide for INT).
pub fn encode(region: RegionKind, value: &Value) -> Option<Encoded> {
    match region {
        RegionKind::Long => value.as_i64().map(Encoded::Long),
        RegionKind::Int => value.as_i32().map(Encoded::Int),
        RegionKind::Bool => value.as_bool().map(Encoded::Bool),
        RegionKind::Double => value.as_f64().map(Encoded::Double),
        RegionKind::String => Some(Encoded::Text(match value {
            Value::ByteArray(bytes) => STANDARD.encode(bytes),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
    }
}

/// Reads the value in column `idx` of `row`, interpreting it as `value_type`.
///
/// Short and Byte channels narrow the stored INT with a truncating cast.
pub(crate) fn decode(
    value_type: ValueType,
    row: &duckdb::Row<'_>,
    idx: usize,
) -> duckdb::Result<Value> {
    let value = match value_type {
        ValueType::Long => Value::Long(row.get(idx)?),
        ValueType::Integer => Value::Integer(row.get(idx)?),
        ValueType::Short => Value::Short(row.get::<_, i32>(idx)? as i16),
        ValueType::Byte => Value::Byte(row.get::<_, i32>(idx)? as i8),
        ValueType::Boolean => Value::Boolean(row.get(idx)?),
        ValueType::String => Value::String(row.get(idx)?),
        ValueType::ByteArray => {
            let text: String = row.get(idx)?;
            Value::ByteArray(STANDARD.decode(&text).unwrap_or_else(|_| text.into_bytes()))
        }
        ValueType::Float => Value::Float(row.get::<_, f64>(idx)? as f32),
        ValueType::Double => Value::Double(row.get(idx)?),
    };
    Ok(value)
}
