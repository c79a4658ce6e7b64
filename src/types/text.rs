//! Text, bytea, uuid and json codecs.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::codec::as_utf8;
use crate::value::Value;

pub fn txt_str(raw: &[u8]) -> Result<Value> {
    Ok(Value::Text(as_utf8(raw)?.to_string()))
}

// === bytea ===

/// Decode the textual bytea form: `\x<hex>` or the legacy escape encoding
/// (backslash-escaped octal triplets).
pub fn txt_bytea(raw: &[u8]) -> Result<Value> {
    if let Some(hex) = raw.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return Err(Error::Decode("invalid bytea hex length".into()));
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for pair in hex.chunks_exact(2) {
            let hi = hex_nibble(pair[0])?;
            let lo = hex_nibble(pair[1])?;
            out.push(hi << 4 | lo);
        }
        return Ok(Value::Bytes(out));
    }

    // escape encoding
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied();
    while let Some(byte) = iter.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let next = iter
            .next()
            .ok_or_else(|| Error::Decode("invalid bytea escape".into()))?;
        if next == b'\\' {
            out.push(b'\\');
            continue;
        }
        let d2 = iter
            .next()
            .ok_or_else(|| Error::Decode("invalid bytea escape".into()))?;
        let d3 = iter
            .next()
            .ok_or_else(|| Error::Decode("invalid bytea escape".into()))?;
        let octal = [next, d2, d3];
        if octal.iter().any(|d| !(b'0'..=b'7').contains(d)) {
            return Err(Error::Decode("invalid bytea octal escape".into()));
        }
        out.push((next - b'0') * 64 + (d2 - b'0') * 8 + (d3 - b'0'));
    }
    Ok(Value::Bytes(out))
}

fn hex_nibble(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid bytea hex digit: {b}"))),
    }
}

// === uuid ===

pub fn txt_uuid(raw: &[u8]) -> Result<Value> {
    Uuid::parse_str(as_utf8(raw)?)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
}

pub fn bin_uuid(raw: &[u8]) -> Result<Value> {
    Uuid::from_slice(raw)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {e}")))
}

// === json / jsonb ===

pub fn txt_json(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw)
        .map(Value::Json)
        .map_err(|e| Error::Decode(format!("invalid json: {e}")))
}

/// Binary jsonb carries a version byte before the JSON text.
pub fn bin_jsonb(raw: &[u8]) -> Result<Value> {
    match raw.split_first() {
        Some((1, rest)) => txt_json(rest),
        Some((version, _)) => Err(Error::Decode(format!("invalid jsonb version: {version}"))),
        None => Err(Error::Decode("empty jsonb value".into())),
    }
}
