//! Query result messages.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::read_cstr;
use crate::protocol::types::{FormatCode, Oid};

/// Fixed-size tail of a field description (18 bytes after the name).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name
    pub name: &'a str,
    tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns of a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (head, mut data) = payload
            .split_at_checked(2)
            .ok_or_else(|| Error::Protocol("RowDescription: truncated header".into()))?;
        let num_fields = u16::from_be_bytes([head[0], head[1]]) as usize;

        let mut fields = Vec::with_capacity(num_fields);
        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail_bytes, rest) = rest
                .split_at_checked(TAIL_SIZE)
                .ok_or_else(|| Error::Protocol("RowDescription: truncated field".into()))?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail_bytes)?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }
        if !data.is_empty() {
            return Err(Error::Protocol(
                "RowDescription: data after last field".into(),
            ));
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow message - one row of data.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (head, rest) = payload
            .split_at_checked(2)
            .ok_or_else(|| Error::Protocol("DataRow: truncated header".into()))?;
        Ok(Self {
            num_columns: u16::from_be_bytes([head[0], head[1]]),
            columns_data: rest,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` represents SQL NULL.
    ///
    /// The iterator validates the per-column length prefixes and the
    /// payload end as it goes.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
            columns_left: self.num_columns,
        }
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
    columns_left: u16,
}

impl<'a> DataRowIter<'a> {
    /// Bytes left after the declared columns; non-empty means a malformed row.
    pub fn trailing(&self) -> &'a [u8] {
        self.remaining
    }
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.columns_left == 0 {
            return None;
        }
        self.columns_left -= 1;

        let (len_bytes, rest) = match self.remaining.split_at_checked(4) {
            Some(parts) => parts,
            None => {
                return Some(Err(Error::Protocol("DataRow: truncated value length".into())));
            }
        };
        let len = i32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        self.remaining = rest;

        if len == -1 {
            return Some(Ok(None));
        }
        if len < 0 {
            return Some(Err(Error::Protocol(format!(
                "DataRow: negative value length {len}"
            ))));
        }
        match self.remaining.split_at_checked(len as usize) {
            Some((value, rest)) => {
                self.remaining = rest;
                Some(Ok(Some(value)))
            }
            None => Some(Err(Error::Protocol("DataRow: truncated value".into()))),
        }
    }
}

/// CommandComplete message - a statement finished successfully.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "SET")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, rest) = read_cstr(payload)?;
        if !rest.is_empty() {
            return Err(Error::Protocol("CommandComplete: trailing data".into()));
        }
        Ok(Self { tag })
    }

    /// Number of affected records: the trailing integer of the tag, when the
    /// tag ends in one ("SELECT 5" → 5, "INSERT 0 1" → 1, "SET" → None).
    pub fn records_affected(&self) -> Option<u64> {
        let (_, last) = self.tag.rsplit_once(' ')?;
        if last.bytes().all(|b| b.is_ascii_digit()) {
            last.parse().ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload() -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&16384_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&1_i16.to_be_bytes()); // column
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        payload.extend_from_slice(&1_u16.to_be_bytes()); // binary
        payload
    }

    #[test]
    fn test_row_description() {
        let payload = row_description_payload();
        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 1);
        let field = desc.fields()[0];
        assert_eq!(field.name, "id");
        assert_eq!(field.type_oid(), 23);
        assert_eq!(field.type_size(), 4);
        assert_eq!(field.format(), FormatCode::Binary);
    }

    #[test]
    fn test_row_description_rejects_trailing_bytes() {
        let mut payload = row_description_payload();
        payload.push(0);
        assert!(RowDescription::parse(&payload).is_err());
    }

    #[test]
    fn test_data_row_iter() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        let values: Vec<_> = row.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![Some(&b"42"[..]), None, Some(&b""[..])]);
    }

    #[test]
    fn test_data_row_truncated() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"short");
        let row = DataRow::parse(&payload).unwrap();
        assert!(row.iter().next().unwrap().is_err());
    }

    #[test]
    fn test_records_affected() {
        assert_eq!(
            CommandComplete { tag: "SELECT 5" }.records_affected(),
            Some(5)
        );
        assert_eq!(
            CommandComplete { tag: "INSERT 0 3" }.records_affected(),
            Some(3)
        );
        assert_eq!(CommandComplete { tag: "SET" }.records_affected(), None);
        assert_eq!(
            CommandComplete { tag: "CREATE TABLE" }.records_affected(),
            None
        );
    }
}
