//! PostgreSQL wire protocol implementation.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `codec`: Low-level encoding/decoding primitives
//! - `framer`: Incremental frame scanning over the byte stream
//! - `types`: Common protocol types (FormatCode, Oid, TransactionStatus)

pub mod backend;
pub mod codec;
pub mod framer;
pub mod frontend;
pub mod types;

pub use framer::{Frame, Framer};
pub use types::{FormatCode, Oid, ResultFormat, TransactionStatus};
