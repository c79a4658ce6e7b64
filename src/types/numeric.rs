//! Boolean, integer, float, numeric and tid codecs.

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::codec::as_utf8;
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::{EncodedParam, Value};

// === bool ===

pub fn txt_bool(raw: &[u8]) -> Result<Value> {
    match raw {
        b"t" => Ok(Value::Bool(true)),
        b"f" => Ok(Value::Bool(false)),
        _ => Err(Error::Decode(format!(
            "invalid boolean: {:?}",
            String::from_utf8_lossy(raw)
        ))),
    }
}

pub fn bin_bool(raw: &[u8]) -> Result<Value> {
    match raw {
        [1] => Ok(Value::Bool(true)),
        [0] => Ok(Value::Bool(false)),
        _ => Err(Error::Decode("invalid boolean".into())),
    }
}

// === integers ===

pub fn txt_int(type_oid: Oid, raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    let parse_err = |e| Error::Decode(format!("invalid integer: {e}"));
    match type_oid {
        oid::INT2 => Ok(Value::Int2(s.parse().map_err(parse_err)?)),
        oid::INT4 => Ok(Value::Int4(s.parse().map_err(parse_err)?)),
        oid::INT8 => Ok(Value::Int8(s.parse().map_err(parse_err)?)),
        oid::OID => Ok(Value::Oid(s.parse().map_err(parse_err)?)),
        _ => Err(Error::Decode(format!("oid {type_oid} is not an integer"))),
    }
}

fn fixed<const N: usize>(raw: &[u8], what: &str) -> Result<[u8; N]> {
    raw.try_into()
        .map_err(|_| Error::Decode(format!("invalid {what} length: {}", raw.len())))
}

pub fn bin_int2(raw: &[u8]) -> Result<Value> {
    Ok(Value::Int2(i16::from_be_bytes(fixed(raw, "int2")?)))
}

pub fn bin_int4(raw: &[u8]) -> Result<Value> {
    Ok(Value::Int4(i32::from_be_bytes(fixed(raw, "int4")?)))
}

pub fn bin_int8(raw: &[u8]) -> Result<Value> {
    Ok(Value::Int8(i64::from_be_bytes(fixed(raw, "int8")?)))
}

pub fn bin_oid(raw: &[u8]) -> Result<Value> {
    Ok(Value::Oid(u32::from_be_bytes(fixed(raw, "oid")?)))
}

// === floats ===

pub fn txt_float4(raw: &[u8]) -> Result<Value> {
    let v: f32 = as_utf8(raw)?
        .parse()
        .map_err(|e| Error::Decode(format!("invalid float4: {e}")))?;
    Ok(Value::Float4(v))
}

pub fn txt_float8(raw: &[u8]) -> Result<Value> {
    let v: f64 = as_utf8(raw)?
        .parse()
        .map_err(|e| Error::Decode(format!("invalid float8: {e}")))?;
    Ok(Value::Float8(v))
}

pub fn bin_float4(raw: &[u8]) -> Result<Value> {
    Ok(Value::Float4(f32::from_be_bytes(fixed(raw, "float4")?)))
}

pub fn bin_float8(raw: &[u8]) -> Result<Value> {
    Ok(Value::Float8(f64::from_be_bytes(fixed(raw, "float8")?)))
}

// === numeric ===

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

pub fn txt_numeric(raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    match s {
        "NaN" | "Infinity" | "-Infinity" => Ok(Value::Text(s.to_string())),
        _ => Decimal::from_str_exact(s)
            .map(Value::Numeric)
            .map_err(|e| Error::Decode(format!("invalid numeric: {e}"))),
    }
}

/// Decode the binary NUMERIC format:
/// `(ndigits:u16, weight:i16, sign:u16, dscale:u16, digits:u16[ndigits])`,
/// each digit a base-10000 group of 4 decimal digits.
pub fn bin_numeric(raw: &[u8]) -> Result<Value> {
    if raw.len() < 8 {
        return Err(Error::Decode(format!("invalid numeric length: {}", raw.len())));
    }
    let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i64;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = u16::from_be_bytes([raw[6], raw[7]]);

    match sign {
        NUMERIC_NAN => return Ok(Value::Text("NaN".into())),
        NUMERIC_PINF => return Ok(Value::Text("Infinity".into())),
        NUMERIC_NINF => return Ok(Value::Text("-Infinity".into())),
        NUMERIC_POS | NUMERIC_NEG => {}
        _ => return Err(Error::Decode(format!("invalid numeric sign: {sign:#06x}"))),
    }

    if raw.len() != 8 + ndigits * 2 {
        return Err(Error::Decode(format!("invalid numeric length: {}", raw.len())));
    }

    let mut mantissa: i128 = 0;
    for i in 0..ndigits {
        let digit = u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]);
        if digit > 9999 {
            return Err(Error::Decode(format!("invalid numeric digit: {digit}")));
        }
        mantissa = mantissa
            .checked_mul(10_000)
            .and_then(|m| m.checked_add(digit as i128))
            .ok_or_else(|| Error::Decode("numeric exceeds host precision".into()))?;
    }
    if sign == NUMERIC_NEG {
        mantissa = -mantissa;
    }

    // the decimal point falls after pg-digit index `weight`
    let exponent = (weight + 1 - ndigits as i64) * 4;
    let mut value = if exponent >= 0 {
        let factor = 10_i128
            .checked_pow(u32::try_from(exponent).map_err(dec_overflow)?)
            .ok_or_else(|| Error::Decode("numeric exceeds host precision".into()))?;
        let scaled = mantissa
            .checked_mul(factor)
            .ok_or_else(|| Error::Decode("numeric exceeds host precision".into()))?;
        Decimal::try_from_i128_with_scale(scaled, 0).map_err(dec_overflow)?
    } else {
        Decimal::try_from_i128_with_scale(mantissa, u32::try_from(-exponent).map_err(dec_overflow)?)
            .map_err(dec_overflow)?
    };

    // dscale carries the display scale; pad or trim trailing zeros to match
    if u32::from(dscale) <= 28 && value.scale() != u32::from(dscale) {
        value.rescale(u32::from(dscale));
    }

    Ok(Value::Numeric(value))
}

fn dec_overflow<E: std::fmt::Display>(e: E) -> Error {
    Error::Decode(format!("numeric exceeds host precision: {e}"))
}

/// Encode a decimal in the binary NUMERIC format, grouping the decimal
/// digits into base-10000 groups aligned on the decimal point.
///
/// Values whose exponent or weight leaves the wire range bind as text
/// instead (the server parses the literal).
pub fn encode_numeric(value: &Decimal) -> EncodedParam {
    let scale = value.scale() as i64;
    let exponent = -scale;
    if exponent < -0x3FFF {
        return numeric_text_fallback(value);
    }

    let mantissa = value.mantissa().unsigned_abs();
    let pg_sign = if value.is_sign_negative() && mantissa != 0 {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    let digits: Vec<u8> = if mantissa == 0 {
        Vec::new()
    } else {
        mantissa
            .to_string()
            .bytes()
            .map(|b| b - b'0')
            .collect()
    };

    let mut pg_digits: Vec<u16> = Vec::new();
    let mut pg_weight = 0_i64;
    if !digits.is_empty() {
        // 10000-based exponent of the first pg digit, minus one
        let first_exp = digits.len() as i64 + exponent;
        let q = first_exp.div_euclid(4);
        let r = first_exp.rem_euclid(4);
        pg_weight = q + (r != 0) as i64 - 1;
        if pg_weight > 0x7FFF {
            return numeric_text_fallback(value);
        }

        // leading pad when the first digit is not on a 4-digit boundary
        let mut i = if r != 0 { 4 - r } else { 0 };
        let mut pg_digit = 0_u16;
        for &digit in &digits {
            pg_digit = pg_digit * 10 + digit as u16;
            i += 1;
            if i == 4 {
                pg_digits.push(pg_digit);
                pg_digit = 0;
                i = 0;
            }
        }
        if i != 0 {
            // trailing pad for the last group
            pg_digits.push(pg_digit * 10_u16.pow(4 - i as u32));
        }
    }

    let pg_scale = scale.max(0) as u16;
    let mut data = Vec::with_capacity(8 + pg_digits.len() * 2);
    data.extend_from_slice(&(pg_digits.len() as u16).to_be_bytes());
    data.extend_from_slice(&(pg_weight as i16).to_be_bytes());
    data.extend_from_slice(&pg_sign.to_be_bytes());
    data.extend_from_slice(&pg_scale.to_be_bytes());
    for digit in &pg_digits {
        data.extend_from_slice(&digit.to_be_bytes());
    }

    EncodedParam {
        oid: oid::NUMERIC,
        data: Some(data),
        format: FormatCode::Binary,
    }
}

fn numeric_text_fallback(value: &Decimal) -> EncodedParam {
    EncodedParam {
        oid: oid::NUMERIC,
        data: Some(value.to_string().into_bytes()),
        format: FormatCode::Text,
    }
}

// === tid ===

pub fn txt_tid(raw: &[u8]) -> Result<Value> {
    let s = as_utf8(raw)?;
    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::Decode("invalid tid value".into()))?;
    let (block, offset) = inner
        .split_once(',')
        .ok_or_else(|| Error::Decode("invalid tid value".into()))?;
    Ok(Value::Tid {
        block: block
            .parse()
            .map_err(|e| Error::Decode(format!("invalid tid block: {e}")))?,
        offset: offset
            .parse()
            .map_err(|e| Error::Decode(format!("invalid tid offset: {e}")))?,
    })
}

pub fn bin_tid(raw: &[u8]) -> Result<Value> {
    let arr: [u8; 6] = fixed(raw, "tid")?;
    Ok(Value::Tid {
        block: u32::from_be_bytes([arr[0], arr[1], arr[2], arr[3]]),
        offset: u16::from_be_bytes([arr[4], arr[5]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn roundtrip(s: &str) {
        let d = Decimal::from_str(s).unwrap();
        let encoded = encode_numeric(&d);
        assert_eq!(encoded.format, FormatCode::Binary, "fallback for {s}");
        let decoded = bin_numeric(encoded.data.as_deref().unwrap()).unwrap();
        assert_eq!(decoded, Value::Numeric(d), "roundtrip of {s}");
    }

    #[test]
    fn test_numeric_roundtrip() {
        for s in [
            "0",
            "1",
            "-1",
            "12345.67",
            "-12345.67",
            "0.0001",
            "-0.0001",
            "9999",
            "10000",
            "123456789012345.678901",
            "0.00000000000000000001",
            "79228162514264337593543950335", // Decimal::MAX
        ] {
            roundtrip(s);
        }
    }

    #[test]
    fn test_numeric_digit_alignment() {
        // 12345.67 must encode as groups 0001 2345 6700 with weight 1
        let d = Decimal::from_str("12345.67").unwrap();
        let data = encode_numeric(&d).data.unwrap();
        let ndigits = u16::from_be_bytes([data[0], data[1]]);
        let weight = i16::from_be_bytes([data[2], data[3]]);
        assert_eq!(ndigits, 3);
        assert_eq!(weight, 1);
        let groups: Vec<u16> = (0..3)
            .map(|i| u16::from_be_bytes([data[8 + i * 2], data[9 + i * 2]]))
            .collect();
        assert_eq!(groups, vec![1, 2345, 6700]);
    }

    #[test]
    fn test_numeric_special_values_decode() {
        let mut nan = Vec::new();
        nan.extend_from_slice(&0_u16.to_be_bytes());
        nan.extend_from_slice(&0_i16.to_be_bytes());
        nan.extend_from_slice(&NUMERIC_NAN.to_be_bytes());
        nan.extend_from_slice(&0_u16.to_be_bytes());
        assert_eq!(bin_numeric(&nan).unwrap(), Value::Text("NaN".into()));

        let mut inf = nan.clone();
        inf[4..6].copy_from_slice(&NUMERIC_PINF.to_be_bytes());
        assert_eq!(bin_numeric(&inf).unwrap(), Value::Text("Infinity".into()));
    }

    #[test]
    fn test_numeric_dscale_trailing_zeros() {
        // 1.10 with dscale 2: one group [1100], weight 0, dscale 2
        let d = Decimal::from_str("1.10").unwrap();
        let encoded = encode_numeric(&d);
        let decoded = bin_numeric(encoded.data.as_deref().unwrap()).unwrap();
        match decoded {
            Value::Numeric(v) => assert_eq!(v.scale(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_text_and_binary_agree() {
        let d = Decimal::from_str("98765.4321").unwrap();
        let from_text = txt_numeric(b"98765.4321").unwrap();
        let encoded = encode_numeric(&d);
        let from_binary = bin_numeric(encoded.data.as_deref().unwrap()).unwrap();
        assert_eq!(from_text, from_binary);
    }

    #[test]
    fn test_tid() {
        assert_eq!(
            txt_tid(b"(12,34)").unwrap(),
            Value::Tid {
                block: 12,
                offset: 34
            }
        );
        let mut raw = 12_u32.to_be_bytes().to_vec();
        raw.extend_from_slice(&34_u16.to_be_bytes());
        assert_eq!(bin_tid(&raw).unwrap(), txt_tid(b"(12,34)").unwrap());
    }

    #[test]
    fn test_bool() {
        assert_eq!(txt_bool(b"t").unwrap(), Value::Bool(true));
        assert_eq!(bin_bool(&[0]).unwrap(), Value::Bool(false));
        assert!(txt_bool(b"true").is_err());
        assert!(bin_bool(&[2]).is_err());
    }

    #[test]
    fn test_float4_text_matches_binary() {
        // float4 text decode must equal the binary value when widened
        let text = txt_float4(b"1.25").unwrap();
        let binary = bin_float4(&1.25_f32.to_be_bytes()).unwrap();
        assert_eq!(text, binary);
    }
}
