//! COPY sub-protocol messages (server → client).

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u8};
use crate::protocol::types::FormatCode;

/// Shared header of CopyInResponse / CopyOutResponse.
#[derive(Debug)]
pub struct CopyResponse {
    /// Overall format: 0 = textual, 1 = binary
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (num_columns, mut rest) = read_i16(rest)?;
        let mut column_formats = Vec::with_capacity(num_columns.max(0) as usize);
        for _ in 0..num_columns {
            let (code, r) = read_i16(rest)?;
            column_formats.push(FormatCode::from_u16(code as u16));
            rest = r;
        }
        if !rest.is_empty() {
            return Err(Error::Protocol("CopyResponse: trailing data".into()));
        }
        Ok(Self {
            format: FormatCode::from_u16(format as u16),
            column_formats,
        })
    }
}

/// CopyInResponse - the server is ready to receive CopyData.
#[derive(Debug)]
pub struct CopyInResponse(pub CopyResponse);

impl CopyInResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        CopyResponse::parse(payload).map(Self)
    }
}

/// CopyOutResponse - the server will send CopyData frames.
#[derive(Debug)]
pub struct CopyOutResponse(pub CopyResponse);

impl CopyOutResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        CopyResponse::parse(payload).map(Self)
    }
}
