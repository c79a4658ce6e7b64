//! Host-side value model.
//!
//! Decoded result cells are [`Value`]s; query arguments are [`Param`]s.
//! The two are separate on purpose: results carry exactly what the wire
//! says, while parameters carry encoding intent (which PostgreSQL type to
//! bind as).

use std::net::IpAddr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::range::{MultiRange, Range};

/// A decoded result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(u32),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeTz {
        time: NaiveTime,
        /// UTC offset in seconds, east positive
        offset_secs: i32,
    },
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Interval {
        months: i32,
        days: i32,
        usecs: i64,
    },
    Inet {
        addr: IpAddr,
        prefix: u8,
    },
    Cidr {
        addr: IpAddr,
        prefix: u8,
    },
    Tid {
        block: u32,
        offset: u16,
    },
    Json(serde_json::Value),
    Array(Vec<Value>),
    Range(Box<Range>),
    MultiRange(MultiRange),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widen any integer variant to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            Value::Oid(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(*v as f64),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }
}

/// A query parameter awaiting encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Sent with OID 0 in text format so the server infers the type.
    Text(String),
    /// Text-format value with an explicit type OID (wrapper types).
    TypedText { oid: Oid, value: String },
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval { months: i32, days: i32, usecs: i64 },
    Numeric(Decimal),
    Json(serde_json::Value),
}

/// A parameter encoded for the Bind message.
#[derive(Debug, Clone)]
pub struct EncodedParam {
    pub oid: Oid,
    /// `None` is SQL NULL (wire length -1)
    pub data: Option<Vec<u8>>,
    pub format: FormatCode,
}

/// Explicitly typed `text` parameter.
///
/// Plain strings bind with OID 0 so the server can infer a type from
/// context; wrap in `PgText` to force the text type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgText(pub String);

/// `regconfig` parameter (text search configuration name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgRegConfig(pub String);

/// `jsonb` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct PgJson(pub serde_json::Value);

/// `inet` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgInet {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl PgInet {
    pub fn new(addr: IpAddr) -> Self {
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self { addr, prefix }
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i16> for Param {
    fn from(v: i16) -> Self {
        Param::Int(v as i64)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v as i64)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Self {
        Param::Float(v as f64)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(v)
    }
}

impl From<Uuid> for Param {
    fn from(v: Uuid) -> Self {
        Param::Uuid(v)
    }
}

impl From<NaiveDate> for Param {
    fn from(v: NaiveDate) -> Self {
        Param::Date(v)
    }
}

impl From<NaiveTime> for Param {
    fn from(v: NaiveTime) -> Self {
        Param::Time(v)
    }
}

impl From<NaiveDateTime> for Param {
    fn from(v: NaiveDateTime) -> Self {
        Param::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Param {
    fn from(v: DateTime<Utc>) -> Self {
        Param::TimestampTz(v)
    }
}

impl From<Decimal> for Param {
    fn from(v: Decimal) -> Self {
        Param::Numeric(v)
    }
}

impl From<serde_json::Value> for Param {
    fn from(v: serde_json::Value) -> Self {
        Param::Json(v)
    }
}

impl From<PgText> for Param {
    fn from(v: PgText) -> Self {
        Param::TypedText {
            oid: oid::TEXT,
            value: v.0,
        }
    }
}

impl From<PgRegConfig> for Param {
    fn from(v: PgRegConfig) -> Self {
        Param::TypedText {
            oid: oid::REGCONFIG,
            value: v.0,
        }
    }
}

impl From<PgJson> for Param {
    fn from(v: PgJson) -> Self {
        Param::TypedText {
            oid: oid::JSONB,
            value: v.0.to_string(),
        }
    }
}

impl From<PgInet> for Param {
    fn from(v: PgInet) -> Self {
        Param::TypedText {
            oid: oid::INET,
            value: format!("{}/{}", v.addr, v.prefix),
        }
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}
