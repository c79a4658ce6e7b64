//! Error types for strand-postgres.

use std::collections::HashMap;
use thiserror::Error;

/// Result type for strand-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error field type codes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_V: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Severity of a server error or notice (the non-localized `V` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
    Panic,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl Severity {
    /// Parse the non-localized severity text.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "ERROR" => Some(Severity::Error),
            "FATAL" => Some(Severity::Fatal),
            "PANIC" => Some(Severity::Panic),
            "WARNING" => Some(Severity::Warning),
            "NOTICE" => Some(Severity::Notice),
            "DEBUG" => Some(Severity::Debug),
            "INFO" => Some(Severity::Info),
            "LOG" => Some(Severity::Log),
            _ => None,
        }
    }

    /// FATAL and PANIC mean the connection is gone.
    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Fatal | Severity::Panic)
    }
}

/// Classification of a server error, derived from the SQLSTATE prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Data,
    Integrity,
    Operational,
    NotSupported,
    Programming,
    Internal,
    /// A promoted cached statement no longer matches the server state.
    /// Recoverable by re-preparing when no transaction is open.
    CachedQueryExpired,
    /// The server no longer knows a statement name we hold. Same recovery
    /// path as [`ErrorKind::CachedQueryExpired`].
    StatementDoesNotExist,
}

impl ErrorKind {
    /// Map a SQLSTATE code to an error kind by its two-character prefix.
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2).unwrap_or("") {
            "22" | "2F" => ErrorKind::Data,
            "23" | "44" => ErrorKind::Integrity,
            "08" | "28" | "40" | "53" | "54" | "55" | "57" | "58" | "HV" => ErrorKind::Operational,
            "0A" => ErrorKind::NotSupported,
            "20" | "21" | "34" | "3D" | "3F" | "42" => ErrorKind::Programming,
            _ => ErrorKind::Internal,
        }
    }

    /// True for the kinds that drive the one-shot re-prepare retry.
    pub fn is_recoverable_statement(self) -> bool {
        matches!(
            self,
            ErrorKind::CachedQueryExpired | ErrorKind::StatementDoesNotExist
        )
    }
}

/// PostgreSQL server error/notice message.
#[derive(Debug, Clone)]
pub struct ServerError {
    fields: HashMap<u8, String>,
    severity: Severity,
    kind: ErrorKind,
}

impl ServerError {
    /// Build from decoded error fields.
    ///
    /// The protocol requires `S`, `V`, `C` and `M`; any of them missing, or
    /// an unknown `V` value, is a protocol violation.
    pub fn new(fields: HashMap<u8, String>) -> Result<Self> {
        if !fields.contains_key(&field_type::SEVERITY) {
            return Err(Error::Protocol(
                "missing severity 'S' in error response".into(),
            ));
        }
        let severity_v = fields
            .get(&field_type::SEVERITY_V)
            .ok_or_else(|| Error::Protocol("missing severity 'V' in error response".into()))?;
        let severity = Severity::from_str(severity_v).ok_or_else(|| {
            Error::Protocol(format!("unknown severity '{severity_v}' in error response"))
        })?;
        let code = fields
            .get(&field_type::CODE)
            .ok_or_else(|| Error::Protocol("missing code 'C' in error response".into()))?;
        if !fields.contains_key(&field_type::MESSAGE) {
            return Err(Error::Protocol(
                "missing message 'M' in error response".into(),
            ));
        }
        let kind = ErrorKind::from_sqlstate(code);
        Ok(Self {
            fields,
            severity,
            kind,
        })
    }

    /// Severity parsed from the non-localized `V` field.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: ErrorKind) {
        self.kind = kind;
    }

    /// SQLSTATE error code (5 characters).
    pub fn code(&self) -> &str {
        self.get(field_type::CODE).unwrap_or_default()
    }

    /// Primary error message.
    pub fn message(&self) -> &str {
        self.get(field_type::MESSAGE).unwrap_or_default()
    }

    /// Detailed error explanation.
    pub fn detail(&self) -> Option<&str> {
        self.get(field_type::DETAIL)
    }

    /// Suggestion for fixing the error.
    pub fn hint(&self) -> Option<&str> {
        self.get(field_type::HINT)
    }

    /// Cursor position in the query string (1-based).
    pub fn position(&self) -> Option<u32> {
        self.get(field_type::POSITION).and_then(|s| s.parse().ok())
    }

    /// Context/stack trace.
    pub fn where_(&self) -> Option<&str> {
        self.get(field_type::WHERE)
    }

    /// Schema name.
    pub fn schema(&self) -> Option<&str> {
        self.get(field_type::SCHEMA)
    }

    /// Table name.
    pub fn table(&self) -> Option<&str> {
        self.get(field_type::TABLE)
    }

    /// Column name.
    pub fn column(&self) -> Option<&str> {
        self.get(field_type::COLUMN)
    }

    /// Constraint name.
    pub fn constraint(&self) -> Option<&str> {
        self.get(field_type::CONSTRAINT)
    }

    /// Source routine name.
    pub fn routine(&self) -> Option<&str> {
        self.get(field_type::ROUTINE)
    }

    /// Get a field by its type code.
    pub fn get(&self, field_type: u8) -> Option<&str> {
        self.fields.get(&field_type).map(|s| s.as_str())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: {} (SQLSTATE {})",
            self.severity,
            self.message(),
            self.code()
        )?;
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Error type for strand-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection is closed and cannot be used
    #[error("Connection is closed")]
    ConnectionClosed,

    /// API misuse (e.g., concurrent execute on one connection)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Value decode error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value encode error
    #[error("Encode error: {0}")]
    Encode(String),

    /// A timed notification take expired with the queue still empty
    #[error("Notification queue is empty")]
    QueueEmpty,
}

impl Error {
    /// Returns true if the error indicates the connection is broken and
    /// cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Protocol(_) => true,
            Error::Server(err) => err.severity().is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => Some(err.code()),
            _ => None,
        }
    }

    /// Server error classification, if this is a server error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Server(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// True when a one-shot re-prepare retry may recover this error.
    pub fn is_recoverable_statement(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_recoverable_statement)
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}
