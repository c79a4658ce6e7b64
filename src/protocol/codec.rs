//! Low-level wire encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use crate::error::{Error, Result};

fn short_buffer(what: &str, need: usize, got: usize) -> Error {
    Error::Protocol(format!("{what}: buffer too short: {got} < {need}"))
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((b, rest)) => Ok((*b, rest)),
        None => Err(short_buffer("read_u8", 1, 0)),
    }
}

/// Read 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (head, rest) = data
        .split_at_checked(2)
        .ok_or_else(|| short_buffer("read_i16", 2, data.len()))?;
    Ok((i16::from_be_bytes([head[0], head[1]]), rest))
}

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (head, rest) = data
        .split_at_checked(2)
        .ok_or_else(|| short_buffer("read_u16", 2, data.len()))?;
    Ok((u16::from_be_bytes([head[0], head[1]]), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (head, rest) = data
        .split_at_checked(4)
        .ok_or_else(|| short_buffer("read_i32", 4, data.len()))?;
    Ok((i32::from_be_bytes([head[0], head[1], head[2], head[3]]), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (head, rest) = data
        .split_at_checked(4)
        .ok_or_else(|| short_buffer("read_u32", 4, data.len()))?;
    Ok((u32::from_be_bytes([head[0], head[1], head[2], head[3]]), rest))
}

/// Read 8-byte big-endian signed integer.
#[inline]
pub fn read_i64(data: &[u8]) -> Result<(i64, &[u8])> {
    let (head, rest) = data
        .split_at_checked(8)
        .ok_or_else(|| short_buffer("read_i64", 8, data.len()))?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(head);
    Ok((i64::from_be_bytes(arr), rest))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len)
        .ok_or_else(|| short_buffer("read_bytes", len, data.len()))
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Validate an entire payload as UTF-8.
#[inline]
pub fn as_utf8(data: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(data)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Start building a startup-family message (no type byte).
    pub fn new_untyped(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Get mutable access to the underlying buffer.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF];
        let (v, rest) = read_i16(&data).unwrap();
        assert_eq!(v, 1);
        let (v, rest) = read_i32(rest).unwrap();
        assert_eq!(v, -1);
        assert!(rest.is_empty());
        assert!(read_i16(rest).is_err());
    }

    #[test]
    fn test_read_cstr() {
        let data = b"hello\0world";
        let (s, rest) = read_cstr(data).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(rest, b"world");
        assert!(read_cstr(b"no terminator").is_err());
    }

    #[test]
    fn test_message_builder_length() {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new(&mut buf, b'Q');
        msg.write_cstr("SELECT 1");
        msg.finish();

        assert_eq!(buf[0], b'Q');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        // framed length invariant: 4 + payload == length field
        assert_eq!(len as usize, buf.len() - 1);
    }
}
