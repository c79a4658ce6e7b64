//! Result decoding and parameter encoding for PostgreSQL types.
//!
//! Decoding is a dispatch on `(type oid, format code)`; every decoder has
//! the uniform shape `fn(&SessionContext, &[u8]) -> Result<Value>`. Unknown
//! oids fall back to raw text / raw bytes, so a result is never lost to an
//! unsupported type.

pub mod array;
pub mod dt;
pub mod network;
pub mod numeric;
pub mod range;
pub mod text;

use crate::error::Result;
use crate::protocol::codec::as_utf8;
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::{EncodedParam, Param, Value};

/// Session parameters a decoder may need.
///
/// Passed by reference into every decoder call; decoders hold no connection
/// state of their own.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// DateStyle starts with "ISO,"
    pub iso_dates: bool,
    /// integer_datetimes reported on
    pub integer_datetimes: bool,
    /// IntervalStyle is "postgres"
    pub postgres_intervals: bool,
    /// TimeZone value as reported by the server
    pub timezone: Option<String>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            iso_dates: true,
            integer_datetimes: true,
            postgres_intervals: true,
            timezone: None,
        }
    }
}

/// Decode one wire value.
pub fn decode_value(
    ctx: &SessionContext,
    type_oid: Oid,
    format: FormatCode,
    raw: &[u8],
) -> Result<Value> {
    match format {
        FormatCode::Text => decode_text(ctx, type_oid, raw),
        FormatCode::Binary => decode_binary(ctx, type_oid, raw),
    }
}

fn decode_text(ctx: &SessionContext, type_oid: Oid, raw: &[u8]) -> Result<Value> {
    match type_oid {
        oid::BOOL => numeric::txt_bool(raw),
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => numeric::txt_int(type_oid, raw),
        oid::FLOAT4 => numeric::txt_float4(raw),
        oid::FLOAT8 => numeric::txt_float8(raw),
        oid::NUMERIC => numeric::txt_numeric(raw),
        oid::TID => numeric::txt_tid(raw),
        oid::BYTEA => text::txt_bytea(raw),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::XML => {
            text::txt_str(raw)
        }
        oid::UUID => text::txt_uuid(raw),
        oid::JSON | oid::JSONB => text::txt_json(raw),
        oid::DATE => dt::txt_date(ctx, raw),
        oid::TIME => dt::txt_time(raw),
        oid::TIMETZ => dt::txt_timetz(raw),
        oid::TIMESTAMP => dt::txt_timestamp(ctx, raw),
        oid::TIMESTAMPTZ => dt::txt_timestamptz(ctx, raw),
        oid::INTERVAL => dt::txt_interval(ctx, raw),
        oid::INET => network::txt_inet(raw),
        oid::CIDR => network::txt_cidr(raw),
        _ => {
            if let Some(elem) = array::element_of(type_oid) {
                return array::decode_text_array(ctx, elem, raw);
            }
            if let Some(spec) = range::range_of(type_oid) {
                return range::decode_text_range(ctx, spec, raw);
            }
            if let Some(spec) = range::multirange_of(type_oid) {
                return range::decode_text_multirange(ctx, spec, raw);
            }
            Ok(Value::Text(as_utf8(raw)?.to_string()))
        }
    }
}

fn decode_binary(ctx: &SessionContext, type_oid: Oid, raw: &[u8]) -> Result<Value> {
    match type_oid {
        oid::BOOL => numeric::bin_bool(raw),
        oid::INT2 => numeric::bin_int2(raw),
        oid::INT4 => numeric::bin_int4(raw),
        oid::INT8 => numeric::bin_int8(raw),
        oid::OID => numeric::bin_oid(raw),
        oid::FLOAT4 => numeric::bin_float4(raw),
        oid::FLOAT8 => numeric::bin_float8(raw),
        oid::NUMERIC => numeric::bin_numeric(raw),
        oid::TID => numeric::bin_tid(raw),
        oid::BYTEA => Ok(Value::Bytes(raw.to_vec())),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::XML => {
            text::txt_str(raw)
        }
        oid::UUID => text::bin_uuid(raw),
        oid::JSON => text::txt_json(raw),
        oid::JSONB => text::bin_jsonb(raw),
        oid::DATE => dt::bin_date(raw),
        oid::TIME => dt::bin_time(raw),
        oid::TIMETZ => dt::bin_timetz(raw),
        oid::TIMESTAMP => dt::bin_timestamp(raw),
        oid::TIMESTAMPTZ => dt::bin_timestamptz(raw),
        oid::INTERVAL => dt::bin_interval(raw),
        oid::INET => network::bin_inet(raw),
        oid::CIDR => network::bin_cidr(raw),
        _ => {
            if let Some(elem) = array::element_of(type_oid) {
                return array::decode_binary_array(ctx, elem, raw);
            }
            if let Some(spec) = range::range_of(type_oid) {
                return range::decode_binary_range(ctx, spec, raw);
            }
            if let Some(spec) = range::multirange_of(type_oid) {
                return range::decode_binary_multirange(ctx, spec, raw);
            }
            Ok(Value::Bytes(raw.to_vec()))
        }
    }
}

/// Encode one parameter for Bind.
///
/// The host type picks the wire type: integers take the narrowest of
/// INT4/INT8 that fits, plain strings go out with OID 0 in text format so
/// the server infers a type, wrapper types carry their explicit oid.
pub fn encode_param(param: &Param) -> Result<EncodedParam> {
    let encoded = match param {
        Param::Null => EncodedParam {
            oid: 0,
            data: None,
            format: FormatCode::Text,
        },
        Param::Bool(v) => EncodedParam {
            oid: oid::BOOL,
            data: Some(vec![*v as u8]),
            format: FormatCode::Binary,
        },
        Param::Int(v) => {
            if i32::try_from(*v).is_ok() {
                EncodedParam {
                    oid: oid::INT4,
                    data: Some((*v as i32).to_be_bytes().to_vec()),
                    format: FormatCode::Binary,
                }
            } else {
                EncodedParam {
                    oid: oid::INT8,
                    data: Some(v.to_be_bytes().to_vec()),
                    format: FormatCode::Binary,
                }
            }
        }
        Param::Float(v) => EncodedParam {
            oid: oid::FLOAT8,
            data: Some(v.to_be_bytes().to_vec()),
            format: FormatCode::Binary,
        },
        Param::Text(s) => EncodedParam {
            // oid 0: the server infers the type from context
            oid: 0,
            data: Some(s.as_bytes().to_vec()),
            format: FormatCode::Text,
        },
        Param::TypedText { oid, value } => EncodedParam {
            oid: *oid,
            data: Some(value.as_bytes().to_vec()),
            format: FormatCode::Text,
        },
        Param::Bytes(b) => EncodedParam {
            oid: oid::BYTEA,
            data: Some(b.clone()),
            format: FormatCode::Binary,
        },
        Param::Uuid(u) => EncodedParam {
            oid: oid::UUID,
            data: Some(u.as_bytes().to_vec()),
            format: FormatCode::Binary,
        },
        Param::Date(d) => EncodedParam {
            oid: oid::DATE,
            data: Some(dt::encode_date(d)?.to_vec()),
            format: FormatCode::Binary,
        },
        Param::Time(t) => EncodedParam {
            oid: oid::TIME,
            data: Some(dt::encode_time(t).to_vec()),
            format: FormatCode::Binary,
        },
        Param::Timestamp(ts) => EncodedParam {
            oid: oid::TIMESTAMP,
            data: Some(dt::encode_timestamp(ts)?.to_vec()),
            format: FormatCode::Binary,
        },
        Param::TimestampTz(ts) => EncodedParam {
            oid: oid::TIMESTAMPTZ,
            data: Some(dt::encode_timestamp(&ts.naive_utc())?.to_vec()),
            format: FormatCode::Binary,
        },
        Param::Interval {
            months,
            days,
            usecs,
        } => {
            let mut data = Vec::with_capacity(16);
            data.extend_from_slice(&usecs.to_be_bytes());
            data.extend_from_slice(&days.to_be_bytes());
            data.extend_from_slice(&months.to_be_bytes());
            EncodedParam {
                oid: oid::INTERVAL,
                data: Some(data),
                format: FormatCode::Binary,
            }
        }
        Param::Numeric(d) => numeric::encode_numeric(d),
        Param::Json(v) => EncodedParam {
            oid: oid::JSONB,
            data: Some(v.to_string().into_bytes()),
            format: FormatCode::Text,
        },
    };
    Ok(encoded)
}
