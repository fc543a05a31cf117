//! Core data types for the storage layer.
//!
//! - [`Channel`]: a named, typed source of samples announced by the host
//! - [`Value`]: a typed sample value
//! - [`Flag`]: quality code attached to every record
//! - [`LogRecord`]: an incoming, not yet validated sample
//! - [`Record`]: a stored sample as returned by range reads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Declared value type of a channel.
///
/// Persisted in the channel table by its upper-snake name (`BYTE_ARRAY`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ValueType {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    ByteArray,
    String,
}

/// A typed sample value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
}

impl Value {
    /// The value type this value naturally belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Boolean(_) => ValueType::Boolean,
            Self::Byte(_) => ValueType::Byte,
            Self::Short(_) => ValueType::Short,
            Self::Integer(_) => ValueType::Integer,
            Self::Long(_) => ValueType::Long,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::ByteArray(_) => ValueType::ByteArray,
            Self::String(_) => ValueType::String,
        }
    }

    /// Converts to `i64`. Floating-point values are truncated toward zero;
    /// non-finite floats, byte arrays and non-numeric strings yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Boolean(b) => Some(i64::from(*b)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Integer(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            Self::Float(v) => finite_trunc(f64::from(*v)),
            Self::Double(v) => finite_trunc(*v),
            Self::String(s) => s.trim().parse().ok(),
            Self::ByteArray(_) => None,
        }
    }

    /// Converts to `i32`. Values outside the `i32` range yield `None`.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Converts to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Short(v) => Some(f64::from(*v)),
            Self::Integer(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            Self::ByteArray(_) => None,
        }
    }

    /// Converts to `bool`. Numbers are `true` when non-zero; strings must read
    /// `true` or `false` (case-insensitive).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Self::ByteArray(_) => None,
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    /// Converts to the representation of a channel declared as `value_type`.
    ///
    /// Returns `None` when the value does not fit the declared type, e.g. an
    /// integer outside the `i16` range for a Short channel or a finite double
    /// beyond the `f32` range for a Float channel. String and byte-array
    /// channels accept any value unchanged.
    pub fn coerce(self, value_type: ValueType) -> Option<Value> {
        match value_type {
            ValueType::Boolean => self.as_bool().map(Value::Boolean),
            ValueType::Byte => self.as_i64().and_then(|v| i8::try_from(v).ok()).map(Value::Byte),
            ValueType::Short => self
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .map(Value::Short),
            ValueType::Integer => self.as_i32().map(Value::Integer),
            ValueType::Long => self.as_i64().map(Value::Long),
            ValueType::Float => self.as_f64().and_then(|v| {
                let narrowed = v as f32;
                (v.is_finite() == narrowed.is_finite()).then_some(Value::Float(narrowed))
            }),
            ValueType::Double => self.as_f64().map(Value::Double),
            ValueType::String | ValueType::ByteArray => Some(self),
        }
    }
}

fn finite_trunc(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::ByteArray(bytes) => write!(f, "{} bytes", bytes.len()),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Quality code attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Flag {
    #[default]
    Valid,
    Timeout,
    UnknownError,
    DeviceOrInterfaceBusy,
    AccessMethodNotSupported,
    NoValueReceivedYet,
    Connecting,
    WaitingForConnectionRetry,
    Disconnecting,
    DriverUnavailable,
    SamplingAndListeningDisabled,
    Disabled,
    ChannelDeleted,
    /// Any code without a named variant.
    Other(i32),
}

impl Flag {
    /// Numeric code as persisted in the value tables.
    pub fn code(self) -> i32 {
        match self {
            Self::Valid => 1,
            Self::Timeout => 2,
            Self::UnknownError => 3,
            Self::DeviceOrInterfaceBusy => 4,
            Self::AccessMethodNotSupported => 5,
            Self::NoValueReceivedYet => 6,
            Self::Connecting => 7,
            Self::WaitingForConnectionRetry => 8,
            Self::Disconnecting => 9,
            Self::DriverUnavailable => 10,
            Self::SamplingAndListeningDisabled => 11,
            Self::Disabled => 12,
            Self::ChannelDeleted => 13,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Valid,
            2 => Self::Timeout,
            3 => Self::UnknownError,
            4 => Self::DeviceOrInterfaceBusy,
            5 => Self::AccessMethodNotSupported,
            6 => Self::NoValueReceivedYet,
            7 => Self::Connecting,
            8 => Self::WaitingForConnectionRetry,
            9 => Self::Disconnecting,
            10 => Self::DriverUnavailable,
            11 => Self::SamplingAndListeningDisabled,
            12 => Self::Disabled,
            13 => Self::ChannelDeleted,
            other => Self::Other(other),
        }
    }
}

impl From<i32> for Flag {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<Flag> for i32 {
    fn from(flag: Flag) -> Self {
        flag.code()
    }
}

/// A channel as announced by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique channel identifier.
    pub id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Measurement unit (e.g. "°C").
    #[serde(default)]
    pub unit: String,
    /// Declared value type; fixes the storage region of the channel.
    pub value_type: ValueType,
}

impl Channel {
    pub fn new(id: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            unit: String::new(),
            value_type,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// A channel row read back from the channel table.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredChannel {
    pub channel: Channel,
    /// Time of the most recent upsert.
    pub last_registration: DateTime<Utc>,
}

/// An incoming sample, as delivered by the host in a batch.
///
/// Every field the host may leave out is optional; entries missing a channel id,
/// timestamp or value are dropped from the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub channel_id: String,
    pub value: Option<Value>,
    /// The sample's own timestamp. Stored rows use the batch timestamp instead.
    pub timestamp: Option<Timestamp>,
    /// Quality code; `None` is stored as [`Flag::Valid`].
    pub flag: Option<Flag>,
}

impl LogRecord {
    pub fn new(channel_id: impl Into<String>, value: Value, timestamp: Timestamp) -> Self {
        Self {
            channel_id: channel_id.into(),
            value: Some(value),
            timestamp: Some(timestamp),
            flag: None,
        }
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flag = Some(flag);
        self
    }

    /// True if the record carries everything needed to be stored.
    pub fn is_valid(&self) -> bool {
        !self.channel_id.is_empty() && self.timestamp.is_some() && self.value.is_some()
    }
}

/// A stored sample returned by range reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: Value,
    pub timestamp: Timestamp,
    pub flag: Flag,
}
