//! # Connection Configuration
//!
//! Settings applied when a [`Database`](crate::Database) is opened. The busy
//! timeout is the only retry policy in the crate: when another connection
//! holds a conflicting lock the engine blocks the calling thread for up to
//! this long, then the operation fails with [`Error::Busy`](crate::Error::Busy).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::DtorAction;

/// Default busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Pragmas
// =============================================================================

/// Journal mode pragma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Wal,
    Memory,
}

impl JournalMode {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Synchronous pragma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    Normal,
    Full,
}

impl Synchronous {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// Configuration for a single connection.
///
/// # Example
///
/// ```rust
/// use sqlbridge::{ConnectionConfig, JournalMode};
///
/// let config = ConnectionConfig {
///     busy_timeout_ms: 0,
///     journal_mode: JournalMode::Delete,
///     ..ConnectionConfig::default()
/// };
/// assert!(config.foreign_keys);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long the engine waits on a conflicting lock before reporting Busy.
    pub busy_timeout_ms: u64,

    /// Journal mode for file databases. Ignored for in-memory databases.
    pub journal_mode: JournalMode,

    /// Sync level for commits.
    pub synchronous: Synchronous,

    /// Enforce foreign key constraints.
    pub foreign_keys: bool,

    /// Action applied by transactions that end without commit or rollback.
    pub default_dtor_action: DtorAction,
}

impl ConnectionConfig {
    /// The busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            foreign_keys: true,
            default_dtor_action: DtorAction::Rollback,
        }
    }
}
