//! COPY sub-protocol messages (client → server).

use crate::protocol::codec::MessageBuilder;

/// Write a CopyData message carrying one chunk of the COPY stream.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a CopyDone message, ending a COPY-IN transfer cleanly.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::COPY_DONE);
    msg.finish();
}

/// Write a CopyFail message, aborting a COPY-IN transfer.
///
/// The server responds with an ErrorResponse and then ReadyForQuery.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_data() {
        let mut buf = Vec::new();
        write_copy_data(&mut buf, b"1,foo\n");

        assert_eq!(buf[0], b'd');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, 4 + 6);
        assert_eq!(&buf[5..], b"1,foo\n");
    }

    #[test]
    fn test_copy_done() {
        let mut buf = Vec::new();
        write_copy_done(&mut buf);
        assert_eq!(buf, [b'c', 0, 0, 0, 4]);
    }

    #[test]
    fn test_copy_fail() {
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, "read error");
        assert_eq!(buf[0], b'f');
        assert!(buf.ends_with(&[0]));
    }
}
