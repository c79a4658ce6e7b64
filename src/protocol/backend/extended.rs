//! Extended-protocol completion messages.

use crate::error::{Error, Result};

/// Validate a message whose payload must be empty (ParseComplete,
/// BindComplete, CloseComplete, NoData, CopyDone).
pub fn check_empty_payload(payload: &[u8], what: &str) -> Result<()> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{what}: expected empty payload, got {} bytes",
            payload.len()
        )))
    }
}
