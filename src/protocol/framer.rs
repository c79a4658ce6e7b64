//! Incremental message framing.
//!
//! Splits an incoming byte stream into `(identifier, payload)` frames. Reads
//! land in a fixed 16 KiB buffer; a payload larger than that gets a one-shot
//! buffer of exactly the payload size, dropped again after the frame is
//! handed out. Message headers always sit in the standard buffer because a
//! one-shot buffer never holds more than its single payload.

use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Size of the standard read buffer.
pub const STANDARD_BUF_SIZE: usize = 0x4000;

/// Length of a message header: 1 type byte + 4 length bytes.
const HEADER_LEN: usize = 5;

/// One complete backend message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Message type byte
    pub identifier: u8,
    /// Message payload (after the length field)
    pub payload: Vec<u8>,
}

/// Incremental frame scanner over a byte stream.
pub struct Framer {
    standard: Vec<u8>,
    oversize: Option<Vec<u8>>,
    /// Unconsumed bytes at the start of the current buffer
    bytes_read: usize,
    /// Bytes needed before the next scan step can run
    msg_len: usize,
    /// Type byte of the message being assembled, if the header was scanned
    identifier: Option<u8>,
    frames: VecDeque<Frame>,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            standard: vec![0; STANDARD_BUF_SIZE],
            oversize: None,
            bytes_read: 0,
            msg_len: HEADER_LEN,
            identifier: None,
            frames: VecDeque::new(),
        }
    }

    /// The buffer slice the next read should fill.
    pub fn writable(&mut self) -> &mut [u8] {
        let bytes_read = self.bytes_read;
        match &mut self.oversize {
            Some(buf) => &mut buf[bytes_read..],
            None => &mut self.standard[bytes_read..],
        }
    }

    /// Account for `n` freshly read bytes and scan out complete frames.
    ///
    /// Completed frames are queued for [`next_frame`](Self::next_frame).
    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.bytes_read += n;
        let mut msg_start = 0;

        while self.bytes_read >= self.msg_len {
            let new_msg_len;
            match self.identifier {
                None => {
                    let header = &self.standard[msg_start..msg_start + HEADER_LEN];
                    self.identifier = Some(header[0]);
                    let length =
                        i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                    if length < 4 {
                        return Err(Error::Protocol(format!(
                            "negative message length: {length}"
                        )));
                    }
                    new_msg_len = (length - 4) as usize;
                    if new_msg_len > STANDARD_BUF_SIZE {
                        // one-shot buffer of exactly the payload size
                        self.oversize = Some(vec![0; new_msg_len]);
                    }
                }
                Some(identifier) => {
                    let buf = self.oversize.as_deref().unwrap_or(&self.standard);
                    self.frames.push_back(Frame {
                        identifier,
                        payload: buf[msg_start..msg_start + self.msg_len].to_vec(),
                    });
                    self.oversize = None;
                    self.identifier = None;
                    new_msg_len = HEADER_LEN;
                }
            }

            self.bytes_read -= self.msg_len;
            msg_start += self.msg_len;
            self.msg_len = new_msg_len;
        }

        if self.bytes_read > 0 && msg_start > 0 {
            // move the incomplete trailing part to the start of the current
            // buffer; it always originates in the standard buffer because a
            // one-shot buffer cannot hold more than its own payload
            match &mut self.oversize {
                Some(buf) => {
                    buf[..self.bytes_read]
                        .copy_from_slice(&self.standard[msg_start..msg_start + self.bytes_read]);
                }
                None => {
                    self.standard
                        .copy_within(msg_start..msg_start + self.bytes_read, 0);
                }
            }
        }

        Ok(())
    }

    /// Copy externally-read bytes through the scan loop.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let writable = self.writable();
            let n = writable.len().min(data.len());
            writable[..n].copy_from_slice(&data[..n]);
            self.advance(n)?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Pop the next completed frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// True when at least one complete frame is queued.
    pub fn has_frame(&self) -> bool {
        !self.frames.is_empty()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
