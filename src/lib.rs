//! A PostgreSQL client driver core.
//!
//! # Features
//!
//! - **Sans-I/O protocol engine**: framing, state transitions, codecs and
//!   the statement cache are independent of the transport
//! - **Sync and async APIs**: a blocking connection with a background
//!   reader thread, and a tokio-based connection
//! - **Full type coverage**: scalar, array, range and multirange values in
//!   both text and binary wire formats
//! - **Transparent statement promotion**: frequently-run queries become
//!   server-side prepared statements, with automatic recovery when a
//!   cached statement goes stale
//!
//! # Example
//!
//! ```no_run
//! use strand_postgres::sync::Conn;
//! use strand_postgres::{Opts, Param};
//!
//! fn main() -> strand_postgres::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!     let result = conn.execute("SELECT $1 + 1", &[Param::Int(41)])?;
//!     for row in &result {
//!         println!("row: {row:?}");
//!     }
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

// private
mod cache;
mod error;
mod notifications;
mod opts;
mod result;
mod value;

// pub
pub mod protocol;
pub mod state;
pub mod types;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use error::{Error, ErrorKind, Result, ServerError, Severity};
pub use notifications::{Notification, NotificationQueue};
pub use opts::{ConnectTarget, Opts, SslMode};
pub use protocol::types::{FormatCode, Oid, ResultFormat, TransactionStatus};
pub use result::{FieldInfo, QueryResult, ResultSet, Row};
pub use types::range::{Bound, MultiRange, Range};
pub use value::{EncodedParam, Param, PgInet, PgJson, PgRegConfig, PgText, Value};
