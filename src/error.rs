//! # Error Handling for sqlbridge
//!
//! This module defines the single error type used throughout the crate. Every
//! public operation either returns a fully-typed result or exactly one
//! [`Error`] variant; there are no partial-success return values.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Contention | `Busy` | Back off and retry |
//! | Caller logic | `NoData`, `NullValue`, `InvalidColumn`, `Binding`, `Finalized`, `TransactionState`, `TypeMismatch` | Fix the calling code |
//! | Bad input | `InvalidArgument`, `StatementCreation` | Fix the table/column names |
//! | Internal | `Sqlite`, `Json` | Log and investigate |
//!
//! ## Busy Classification
//!
//! `From<rusqlite::Error>` is written by hand instead of derived: engine
//! failures carrying `SQLITE_BUSY` or `SQLITE_LOCKED` become [`Error::Busy`],
//! so `?` never hides lock contention inside a generic engine error.

use rusqlite::ErrorCode;
use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in sqlbridge operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Contention (caller may retry)
    // =========================================================================

    /// The engine could not acquire a lock held by another connection.
    ///
    /// Neither the statement nor the transaction layer retries on its own.
    /// Blocking retry is controlled by the connection's busy timeout.
    #[error("database is busy: {0}")]
    Busy(String),

    // =========================================================================
    // Caller / Logic Errors
    // =========================================================================

    /// A row was required but the statement has no current row.
    #[error("no row available")]
    NoData,

    /// A non-optional typed getter hit a NULL cell.
    #[error("column {column} is NULL")]
    NullValue {
        /// Zero-based column index of the NULL cell
        column: usize,
    },

    /// Column index or name does not exist in the result set.
    #[error("invalid column: {0}")]
    InvalidColumn(String),

    /// Placeholder position is outside `1..=count` for the compiled query.
    #[error("bind position {position} out of range (statement has {count} parameters)")]
    Binding {
        /// The 1-based position that was requested
        position: usize,
        /// Number of placeholders in the compiled query
        count: usize,
    },

    /// The statement's compiled query was already released.
    #[error("statement has been finalized")]
    Finalized,

    /// Operation on a transaction that is terminated or not innermost.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// The stored value cannot be converted into the requested type.
    #[error("type mismatch in column {column}: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Zero-based column index
        column: usize,
        /// Requested type
        expected: &'static str,
        /// Storage class actually found
        actual: &'static str,
    },

    // =========================================================================
    // Bad Input
    // =========================================================================

    /// Empty table name, empty clause where one is required, malformed
    /// identifier, and similar problems detected before calling the engine.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine refused to compile the SQL text.
    ///
    /// Most often caused by an unknown column name passed into a clause.
    /// Always raised at prepare time, never at bind or step time.
    #[error("failed to prepare statement `{sql}`: {source}")]
    StatementCreation {
        /// The SQL text that failed to compile
        sql: String,
        /// The engine's error
        #[source]
        source: rusqlite::Error,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// A structured value failed to serialize or deserialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other engine failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl Error {
    /// Returns true for lock contention errors.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

/// Returns true when the engine error reports lock contention.
pub(crate) fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy_error(&err) {
            Error::Busy(err.to_string())
        } else {
            Error::Sqlite(err)
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::NoData.to_string(), "no row available");
        assert_eq!(
            Error::NullValue { column: 2 }.to_string(),
            "column 2 is NULL"
        );
        assert_eq!(
            Error::Binding {
                position: 4,
                count: 3
            }
            .to_string(),
            "bind position 4 out of range (statement has 3 parameters)"
        );
        assert_eq!(
            Error::InvalidArgument("empty table name".into()).to_string(),
            "invalid argument: empty table name"
        );
    }

    /// Busy and locked engine codes must map to `Error::Busy`.
    #[test]
    fn test_busy_classification() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err: Error = busy.into();
        assert!(err.is_busy());

        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(Error::from(locked).is_busy());
    }

    #[test]
    fn test_other_sqlite_errors_pass_through() {
        let err: Error = rusqlite::Error::InvalidParameterName("x".to_string()).into();
        assert!(matches!(err, Error::Sqlite(_)));
        assert!(err.to_string().contains("sqlite error"));
    }
}
