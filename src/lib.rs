//! # sqlbridge - Typed Access to Embedded SQLite
//!
//! sqlbridge sits between application code and a single SQLite connection.
//! It provides:
//!
//! - **Statements**: prepared queries with typed binding and NULL-aware getters
//! - **Clause builders**: column/value pairs turned into parameterized SQL
//! - **Nested transactions**: savepoints with commit/rollback on scope exit
//! - **Table adapters**: CRUD SQL generated once from a static column list
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Application Code                            │
//! └───────────────┬───────────────────────────────┬─────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────────┐   ┌─────────────────────────────┐
//! │  Adapter<R> ──► Filter        │   │  Transaction (savepoints)   │
//! │        │                      │   └──────────────┬──────────────┘
//! │        ▼                      │                  │
//! │  ValueClause / WhereClause    │                  │
//! └───────────────┬───────────────┘                  │
//!                 │  SQL text + ordered values       │
//!                 ▼                                  │
//! ┌───────────────────────────────┐                  │
//! │  Statement (bind/step/get)    │                  │
//! │  Value bridge (ToValue/From)  │                  │
//! └───────────────┬───────────────┘                  │
//!                 ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Database (one rusqlite::Connection)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Bind order**: placeholder `?n` receives the n-th non-NULL value added
//!    to a clause; NULL / NOT-NULL entries never consume a placeholder
//! 2. **Sole ownership**: exactly one `Statement` owns a compiled query
//! 3. **Scope exit**: an active transaction applies its dtor action exactly once
//! 4. **No silent retry**: busy conditions always reach the caller
//!
//! ## Example
//!
//! ```rust
//! use sqlbridge::{Database, Order, ValueClause, WhereClause, Op};
//!
//! let db = Database::open_in_memory()?;
//! db.execute_batch("CREATE TABLE items (i INTEGER, s TEXT)")?;
//!
//! for (i, s) in [(10, "Hi"), (60, "Ho"), (70, "Ho")] {
//!     ValueClause::new().add("i", i).add("s", s).insert(&db, "items")?;
//! }
//!
//! let mut filter = WhereClause::new();
//! filter.add_op("i", Op::Gt, 50).add("s", "Ho").order_by("i", Order::Asc);
//!
//! let rows = filter.select(&db, "items")?;
//! assert_eq!(rows.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![2, 3]);
//! assert_eq!(filter.count(&db, "items")?, 2);
//! # Ok::<(), sqlbridge::Error>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for all operations.
pub mod error;

/// Connection configuration (busy timeout, pragmas, default dtor action).
pub mod config;

/// Mapping between application types and storage values.
pub mod value;

/// The connection wrapper and its table SQL cache.
pub mod connection;

/// Prepared statements: bind, step, typed getters, reset, finalize.
pub mod statement;

/// Value and where clause builders.
pub mod clause;

/// Nested transactions over savepoints.
pub mod transaction;

/// Static column descriptors and table DDL.
pub mod schema;

/// Typed table and view adapters.
pub mod adapter;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::{Adapter, Column, Filter, Record, TableRecord, TableSql};
pub use clause::{Op, Order, RowRef, ValueClause, WhereClause};
pub use config::{ConnectionConfig, JournalMode, Synchronous};
pub use connection::Database;
pub use error::{Error, Result};
pub use schema::{ColumnDef, ConflictPolicy, FkAction, ForeignKey};
pub use statement::{ColumnIndex, Row, Statement, StatementState, Step};
pub use transaction::{DtorAction, Transaction, TransactionMode, TransactionState};
pub use value::{FromValue, Json, SqlType, ToValue, Value, ValuePool, ValueSlot};
