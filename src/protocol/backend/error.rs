//! Error and notice response messages.

use std::collections::HashMap;

use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Decode the `(code, value\0)*\0` field list shared by ErrorResponse and
/// NoticeResponse.
fn parse_fields(payload: &[u8]) -> Result<HashMap<u8, String>> {
    let mut fields = HashMap::new();
    let mut data = payload;

    while let Some((&field_type, rest)) = data.split_first() {
        if field_type == 0 {
            if !rest.is_empty() {
                return Err(Error::Protocol("error response: trailing data".into()));
            }
            return Ok(fields);
        }
        let (value, rest) = read_cstr(rest)?;
        fields.insert(field_type, value.to_string());
        data = rest;
    }

    Err(Error::Protocol("error response: missing terminator".into()))
}

/// Parse an ErrorResponse payload into a [`ServerError`].
///
/// Enforces the mandatory `S`, `V`, `C` and `M` fields.
pub fn parse_server_error(payload: &[u8]) -> Result<ServerError> {
    ServerError::new(parse_fields(payload)?)
}

/// Parse a NoticeResponse payload.
///
/// Notices share the error wire format; they are surfaced as warnings and
/// never abort the running exchange.
pub fn parse_notice(payload: &[u8]) -> Result<ServerError> {
    ServerError::new(parse_fields(payload)?)
}
