//! # Database Connection
//!
//! [`Database`] owns exactly one engine connection. Everything else in the
//! crate borrows it: statements and transactions hold `&Database`, so the
//! borrow checker keeps them from outliving the connection, and `close`
//! cannot run while either is alive.
//!
//! ## What the Connection Tracks
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Database                                                 │
//! │                                                          │
//! │  conn ─────────── rusqlite::Connection (one per thread)  │
//! │  transactions ─── stack of active transaction ids        │
//! │  tables ───────── record type → generated SQL bundle     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `Database` is neither `Send` nor `Sync`. A connection and its statements
//! stay on the thread that opened them; use one `Database` per thread.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::adapter::{Record, TableSql};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::statement::Statement;
use crate::transaction::{DtorAction, Transaction, TransactionMode};
use crate::value::Value;

// =============================================================================
// Database
// =============================================================================

/// A single connection to an embedded database.
pub struct Database {
    conn: Connection,
    config: ConnectionConfig,

    /// Ids of active transactions, outermost first. Index = nesting depth.
    transactions: RefCell<Vec<u64>>,
    next_transaction_id: Cell<u64>,

    /// Generated SQL per record type, built on first use. Two record types
    /// over one table select different columns, so each gets its own entry.
    tables: RefCell<HashMap<TypeId, Rc<TableSql>>>,
}

impl Database {
    /// Opens (or creates) a database file with the default configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sqlbridge::Database;
    ///
    /// let db = Database::open("app.db")?;
    /// # Ok::<(), sqlbridge::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, ConnectionConfig::default())
    }

    /// Opens (or creates) a database file with an explicit configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened database");
        Self::from_connection(conn, config, false)
    }

    /// Creates an in-memory database.
    ///
    /// ```rust
    /// use sqlbridge::Database;
    ///
    /// let db = Database::open_in_memory()?;
    /// assert_eq!(db.transaction_depth(), 0);
    /// # Ok::<(), sqlbridge::Error>(())
    /// ```
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(ConnectionConfig::default())
    }

    /// Creates an in-memory database with an explicit configuration.
    pub fn open_in_memory_with_config(config: ConnectionConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config, true)
    }

    fn from_connection(conn: Connection, config: ConnectionConfig, in_memory: bool) -> Result<Self> {
        let db = Self {
            conn,
            config,
            transactions: RefCell::new(Vec::new()),
            next_transaction_id: Cell::new(1),
            tables: RefCell::new(HashMap::new()),
        };
        db.apply_config(in_memory)?;
        Ok(db)
    }

    /// Applies connection pragmas from the configuration.
    fn apply_config(&self, in_memory: bool) -> Result<()> {
        self.conn.busy_timeout(self.config.busy_timeout())?;

        // In-memory databases only support the MEMORY journal
        if !in_memory {
            self.conn.execute_batch(&format!(
                "PRAGMA journal_mode = {}",
                self.config.journal_mode.as_sql()
            ))?;
        }
        self.conn.execute_batch(&format!(
            "PRAGMA synchronous = {}",
            self.config.synchronous.as_sql()
        ))?;
        self.conn.execute_batch(&format!(
            "PRAGMA foreign_keys = {}",
            if self.config.foreign_keys { "ON" } else { "OFF" }
        ))?;
        Ok(())
    }

    /// The configuration this connection was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Raw access to the engine connection.
    ///
    /// Statements run through this handle bypass transaction tracking.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection.
    ///
    /// Fails with [`Error::TransactionState`] while a transaction is still
    /// registered. Clears the table SQL cache.
    pub fn close(self) -> Result<()> {
        let depth = self.transaction_depth();
        if depth > 0 {
            return Err(Error::TransactionState(format!(
                "cannot close connection with {depth} active transaction(s)"
            )));
        }
        self.tables.borrow_mut().clear();
        self.conn.close().map_err(|(_, e)| Error::from(e))?;
        debug!("closed database");
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Compiles `sql` into a [`Statement`].
    ///
    /// # Errors
    ///
    /// - `Error::StatementCreation` if the engine rejects the SQL text
    /// - `Error::Busy` if the schema is locked by another connection
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Statement::prepare(self, sql)
    }

    /// Prepares, binds and runs a statement that returns no rows.
    ///
    /// Returns the number of rows changed.
    pub fn execute(&self, sql: &str, values: &[Value]) -> Result<usize> {
        debug!(sql, "execute");
        Ok(self.conn.execute(sql, params_from_iter(values.iter()))?)
    }

    /// Runs one or more `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "execute batch");
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Rowid assigned by the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// True when the engine is not inside an explicit transaction.
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begins a deferred transaction with the configured dtor action.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin_with(
            self,
            TransactionMode::Deferred,
            self.config.default_dtor_action,
        )
    }

    /// Begins a transaction with an explicit mode and dtor action.
    pub fn transaction_with(
        &self,
        mode: TransactionMode,
        dtor_action: DtorAction,
    ) -> Result<Transaction<'_>> {
        Transaction::begin_with(self, mode, dtor_action)
    }

    /// Number of active transactions opened through this connection.
    pub fn transaction_depth(&self) -> usize {
        self.transactions.borrow().len()
    }

    /// Allocates an id for a transaction about to begin at the current depth.
    pub(crate) fn reserve_transaction(&self) -> (u64, usize) {
        let id = self.next_transaction_id.get();
        self.next_transaction_id.set(id + 1);
        (id, self.transaction_depth())
    }

    /// Registers a transaction once its BEGIN or SAVEPOINT succeeded.
    pub(crate) fn push_transaction(&self, id: u64) {
        self.transactions.borrow_mut().push(id);
    }

    /// True while transaction `id` is still registered at `depth`.
    pub(crate) fn is_transaction_live(&self, id: u64, depth: usize) -> bool {
        self.transactions.borrow().get(depth) == Some(&id)
    }

    /// Id of the transaction registered at `depth`, if any.
    pub(crate) fn transaction_id_at(&self, depth: usize) -> Option<u64> {
        self.transactions.borrow().get(depth).copied()
    }

    /// True when no transaction is nested inside the one at `depth`.
    pub(crate) fn is_innermost(&self, depth: usize) -> bool {
        self.transaction_depth() == depth + 1
    }

    /// Drops the transaction at `depth` and everything nested inside it.
    pub(crate) fn end_transactions_from(&self, depth: usize) {
        self.transactions.borrow_mut().truncate(depth);
    }

    // =========================================================================
    // Table SQL Cache
    // =========================================================================

    /// Returns the generated SQL for `R`, building it on first use.
    pub fn table_sql<R: Record>(&self) -> Result<Rc<TableSql>> {
        let key = TypeId::of::<R>();
        if let Some(sql) = self.tables.borrow().get(&key) {
            return Ok(Rc::clone(sql));
        }
        let sql = Rc::new(TableSql::build(R::NAME, R::columns())?);
        debug!(table = R::NAME, record = std::any::type_name::<R>(), "generated table sql");
        self.tables.borrow_mut().insert(key, Rc::clone(&sql));
        Ok(sql)
    }

    /// Forgets all generated table SQL, e.g. after a schema change.
    pub fn invalidate_table_cache(&self) {
        self.tables.borrow_mut().clear();
    }

    /// Number of record types with cached SQL.
    pub fn cached_tables(&self) -> usize {
        self.tables.borrow().len()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .field("transaction_depth", &self.transaction_depth())
            .field("cached_tables", &self.cached_tables())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
