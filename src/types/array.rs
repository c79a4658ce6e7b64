//! Array codecs, generic over the element decoder.
//!
//! The text grammar helpers (`parse_quoted`, `parse_unquoted`) are shared
//! with the range codecs.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::types::{SessionContext, decode_value};
use crate::value::Value;

/// Element type and text delimiter of an array type.
#[derive(Debug, Clone, Copy)]
pub struct ElemSpec {
    pub oid: Oid,
    pub delimiter: u8,
}

/// Look up the element type of an array oid.
pub fn element_of(array_oid: Oid) -> Option<ElemSpec> {
    let elem = match array_oid {
        oid::BOOL_ARRAY => oid::BOOL,
        oid::BYTEA_ARRAY => oid::BYTEA,
        oid::NAME_ARRAY => oid::NAME,
        oid::INT2_ARRAY => oid::INT2,
        oid::INT4_ARRAY => oid::INT4,
        oid::INT8_ARRAY => oid::INT8,
        oid::TEXT_ARRAY => oid::TEXT,
        oid::BPCHAR_ARRAY => oid::BPCHAR,
        oid::VARCHAR_ARRAY => oid::VARCHAR,
        oid::FLOAT4_ARRAY => oid::FLOAT4,
        oid::FLOAT8_ARRAY => oid::FLOAT8,
        oid::INET_ARRAY => oid::INET,
        oid::CIDR_ARRAY => oid::CIDR,
        oid::DATE_ARRAY => oid::DATE,
        oid::TIME_ARRAY => oid::TIME,
        oid::TIMESTAMP_ARRAY => oid::TIMESTAMP,
        oid::TIMESTAMPTZ_ARRAY => oid::TIMESTAMPTZ,
        oid::INTERVAL_ARRAY => oid::INTERVAL,
        oid::NUMERIC_ARRAY => oid::NUMERIC,
        oid::UUID_ARRAY => oid::UUID,
        oid::JSON_ARRAY => oid::JSON,
        oid::JSONB_ARRAY => oid::JSONB,
        _ => return None,
    };
    // all supported element types delimit with ','
    Some(ElemSpec {
        oid: elem,
        delimiter: b',',
    })
}

fn invalid_array() -> Error {
    Error::Decode("invalid array value".into())
}

/// Parse a double-quoted value starting at `buf[0] == '"'`.
///
/// Backslash escapes the next byte; a doubled quote also escapes (hstore
/// convention). Returns the unescaped bytes and the consumed length
/// including both quotes.
pub(crate) fn parse_quoted(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut escaped = false;
    let mut pos = 1;
    while pos < buf.len() {
        let byte = buf[pos];
        if escaped {
            out.push(byte);
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            if buf.get(pos + 1) == Some(&b'"') {
                escaped = true;
            } else {
                return Ok((out, pos + 1));
            }
        } else {
            out.push(byte);
        }
        pos += 1;
    }
    Err(invalid_array())
}

/// Parse an unquoted run up to (not including) one of `delims`.
///
/// Returns the value bytes and the consumed length. Reaching the buffer end
/// without a delimiter is an error.
pub(crate) fn parse_unquoted<'a>(buf: &'a [u8], delims: &[u8]) -> Result<(&'a [u8], usize)> {
    match buf.iter().position(|b| delims.contains(b)) {
        Some(pos) => Ok((&buf[..pos], pos)),
        None => Err(invalid_array()),
    }
}

/// Decode a text-format array.
///
/// An optional dimension prefix (`[1:3]=`) is skipped; nested braces
/// recurse; `NULL` is the null literal outside quotes.
pub fn decode_text_array(ctx: &SessionContext, elem: ElemSpec, raw: &[u8]) -> Result<Value> {
    let start = raw
        .iter()
        .position(|&b| b == b'{')
        .ok_or_else(invalid_array)?;
    let (values, consumed) = parse_text_array(ctx, elem, &raw[start..])?;
    if start + consumed != raw.len() {
        return Err(invalid_array());
    }
    Ok(values)
}

fn parse_text_array(ctx: &SessionContext, elem: ElemSpec, buf: &[u8]) -> Result<(Value, usize)> {
    let delims = [elem.delimiter, b'}'];
    let mut values = Vec::new();
    let mut pos = 1;

    loop {
        let byte = *buf.get(pos).ok_or_else(invalid_array)?;
        if byte == b'{' {
            let (nested, consumed) = parse_text_array(ctx, elem, &buf[pos..])?;
            values.push(nested);
            pos += consumed;
        } else if byte == b'"' {
            let (bytes, consumed) = parse_quoted(&buf[pos..])?;
            values.push(decode_value(ctx, elem.oid, FormatCode::Text, &bytes)?);
            pos += consumed;
        } else if byte != b'}' {
            let (bytes, consumed) = parse_unquoted(&buf[pos..], &delims)?;
            if bytes == b"NULL" {
                values.push(Value::Null);
            } else {
                values.push(decode_value(ctx, elem.oid, FormatCode::Text, bytes)?);
            }
            pos += consumed;
        }

        let byte = *buf.get(pos).ok_or_else(invalid_array)?;
        pos += 1;
        if byte == b'}' {
            return Ok((Value::Array(values), pos));
        }
        if byte != elem.delimiter {
            return Err(invalid_array());
        }
    }
}

/// Decode a binary-format array:
/// `(ndim:u32, flags:i32, elem_oid:u32, (len:i32, lower:i32){ndim}, values)`.
pub fn decode_binary_array(ctx: &SessionContext, elem: ElemSpec, raw: &[u8]) -> Result<Value> {
    if raw.len() < 12 {
        return Err(invalid_array());
    }
    let ndim = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let flags = i32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
    let elem_oid = u32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);

    if elem_oid != elem.oid {
        return Err(Error::Protocol(format!(
            "unexpected array element type: {elem_oid}"
        )));
    }
    if ndim > 6 {
        return Err(Error::Protocol(format!(
            "number of array dimensions exceeded: {ndim}"
        )));
    }
    if flags & !1 != 0 {
        return Err(Error::Protocol(format!("invalid array flags: {flags}")));
    }
    if ndim == 0 {
        if raw.len() != 12 {
            return Err(invalid_array());
        }
        return Ok(Value::Array(Vec::new()));
    }

    let mut pos = 12;
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        // (dimension length, lower bound); the lower bound is irrelevant here
        let bytes = raw.get(pos..pos + 8).ok_or_else(invalid_array)?;
        let dim = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if dim < 0 {
            return Err(invalid_array());
        }
        dims.push(dim as usize);
        pos += 8;
    }

    let (values, consumed) = parse_binary_values(ctx, elem, &raw[pos..], &dims)?;
    if pos + consumed != raw.len() {
        return Err(invalid_array());
    }
    Ok(values)
}

fn parse_binary_values(
    ctx: &SessionContext,
    elem: ElemSpec,
    buf: &[u8],
    dims: &[usize],
) -> Result<(Value, usize)> {
    if let Some((&dim, rest_dims)) = dims.split_first() {
        let mut values = Vec::with_capacity(dim);
        let mut pos = 0;
        for _ in 0..dim {
            let (value, consumed) = parse_binary_values(ctx, elem, &buf[pos..], rest_dims)?;
            values.push(value);
            pos += consumed;
        }
        return Ok((Value::Array(values), pos));
    }

    // a single value: length-prefixed, -1 for NULL
    let len_bytes = buf.get(..4).ok_or_else(invalid_array)?;
    let len = i32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    if len == -1 {
        return Ok((Value::Null, 4));
    }
    if len < 0 {
        return Err(invalid_array());
    }
    let bytes = buf.get(4..4 + len as usize).ok_or_else(invalid_array)?;
    Ok((
        decode_value(ctx, elem.oid, FormatCode::Binary, bytes)?,
        4 + len as usize,
    ))
}

/// Render one element for an array literal, quoting when required.
pub fn quote_element(value: &str, delimiter: u8) -> String {
    let needs_quotes = value.is_empty()
        || value == "NULL"
        || value.bytes().any(|b| {
            b == delimiter
                || matches!(b, b'{' | b'}' | b'"' | b'\'' | b'\\')
                || b.is_ascii_whitespace()
        });
    if needs_quotes {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::default()
    }

    fn int4_array() -> ElemSpec {
        element_of(oid::INT4_ARRAY).unwrap()
    }

    fn text_array() -> ElemSpec {
        element_of(oid::TEXT_ARRAY).unwrap()
    }

    #[test]
    fn test_text_array_simple() {
        let v = decode_text_array(&ctx(), int4_array(), b"{1,2,NULL,4}").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Int4(1),
                Value::Int4(2),
                Value::Null,
                Value::Int4(4)
            ])
        );
    }

    #[test]
    fn test_text_array_empty_and_nested() {
        assert_eq!(
            decode_text_array(&ctx(), int4_array(), b"{}").unwrap(),
            Value::Array(vec![])
        );
        let v = decode_text_array(&ctx(), int4_array(), b"{{1,2},{3,4}}").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Array(vec![Value::Int4(1), Value::Int4(2)]),
                Value::Array(vec![Value::Int4(3), Value::Int4(4)]),
            ])
        );
    }

    #[test]
    fn test_text_array_dimension_prefix_skipped() {
        let v = decode_text_array(&ctx(), int4_array(), b"[1:2]={5,6}").unwrap();
        assert_eq!(v, Value::Array(vec![Value::Int4(5), Value::Int4(6)]));
    }

    #[test]
    fn test_text_array_quoted_values() {
        let v = decode_text_array(&ctx(), text_array(), br#"{"a,b","c\"d","e\\f",NULL,"NULL"}"#)
            .unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Text("a,b".into()),
                Value::Text("c\"d".into()),
                Value::Text("e\\f".into()),
                Value::Null,
                Value::Text("NULL".into()),
            ])
        );
    }

    #[test]
    fn test_text_array_malformed() {
        assert!(decode_text_array(&ctx(), int4_array(), b"{1,2").is_err());
        assert!(decode_text_array(&ctx(), int4_array(), b"{1,2}x").is_err());
        assert!(decode_text_array(&ctx(), int4_array(), b"1,2").is_err());
    }

    fn binary_int4_array(values: &[Option<i32>]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1_u32.to_be_bytes()); // ndim
        raw.extend_from_slice(&0_i32.to_be_bytes()); // flags
        raw.extend_from_slice(&oid::INT4.to_be_bytes());
        raw.extend_from_slice(&(values.len() as i32).to_be_bytes());
        raw.extend_from_slice(&1_i32.to_be_bytes()); // lower bound
        for value in values {
            match value {
                Some(v) => {
                    raw.extend_from_slice(&4_i32.to_be_bytes());
                    raw.extend_from_slice(&v.to_be_bytes());
                }
                None => raw.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        raw
    }

    #[test]
    fn test_binary_array() {
        let raw = binary_int4_array(&[Some(1), None, Some(3)]);
        let v = decode_binary_array(&ctx(), int4_array(), &raw).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::Int4(1), Value::Null, Value::Int4(3)])
        );
    }

    #[test]
    fn test_binary_array_rejects_bad_headers() {
        let mut raw = binary_int4_array(&[Some(1)]);
        raw[3] = 7; // ndim = 7
        assert!(decode_binary_array(&ctx(), int4_array(), &raw).is_err());

        let mut raw = binary_int4_array(&[Some(1)]);
        raw[7] = 2; // flags = 2
        assert!(decode_binary_array(&ctx(), int4_array(), &raw).is_err());

        let mut raw = binary_int4_array(&[Some(1)]);
        raw[11] = 20; // element oid mismatch
        assert!(decode_binary_array(&ctx(), int4_array(), &raw).is_err());
    }

    #[test]
    fn test_quote_element_roundtrip() {
        for original in ["plain", "a,b", "with \"quotes\"", "back\\slash", "{brace}", ""] {
            let quoted = quote_element(original, b',');
            if quoted.starts_with('"') {
                let (bytes, consumed) = parse_quoted(quoted.as_bytes()).unwrap();
                assert_eq!(consumed, quoted.len());
                assert_eq!(bytes, original.as_bytes());
            } else {
                assert_eq!(quoted, original);
            }
        }
    }
}
