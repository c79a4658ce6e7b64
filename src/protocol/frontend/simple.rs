//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message (simple query protocol).
///
/// The SQL may contain multiple statements separated by semicolons; the
/// server runs them in order and reports one CommandComplete per statement.
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}
