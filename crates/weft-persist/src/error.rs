//! Typed persistence errors.
//!
//! Every failure mode the persistence layer can produce is one of these
//! variants, and each carries a stable `kind()` string that survives the
//! trip through an error envelope. Retry policy upstream keys off
//! [`PersistError::is_transient`]: only transient adapter failures are ever
//! retried; permission, allowlist and validation failures are terminal.

use std::fmt;

// ---------------------------------------------------------------------------
// PersistError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// A write-shaped call reached a read-only surface.
    Permission { op: &'static str },
    /// The table is not in the relevant allowlist.
    TableNotAllowed { table: String, op: &'static str },
    /// Malformed input (empty table name, conflicting arguments, bad shape).
    Validation(String),
    /// The adapter cannot express the requested operator.
    Unsupported { what: String },
    /// Wrapped backend failure. `transient` marks network/5xx-class causes
    /// that are worth retrying.
    Adapter { message: String, transient: bool },
}

impl PersistError {
    /// Stable kind name, used in error envelopes and monitor events.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistError::Permission { .. } => "PersistencePermissionError",
            PersistError::TableNotAllowed { .. } => "TableNotAllowedError",
            PersistError::Validation(_) => "ValidationError",
            PersistError::Unsupported { .. } => "UnsupportedOperationError",
            PersistError::Adapter { .. } => "AdapterError",
        }
    }

    /// Only transient adapter failures qualify for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistError::Adapter { transient: true, .. })
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Permission { op } => {
                write!(f, "{}: {op} is not permitted on a read-only surface", self.kind())
            }
            PersistError::TableNotAllowed { table, op } => {
                write!(f, "{}: table '{table}' is not allowlisted for {op}", self.kind())
            }
            PersistError::Validation(msg) => write!(f, "{}: {msg}", self.kind()),
            PersistError::Unsupported { what } => {
                write!(f, "{}: adapter does not support {what}", self.kind())
            }
            PersistError::Adapter { message, transient } => {
                write!(
                    f,
                    "{}: {message} ({})",
                    self.kind(),
                    if *transient { "transient" } else { "permanent" }
                )
            }
        }
    }
}

impl std::error::Error for PersistError {}
