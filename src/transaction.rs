//! # Nested Transactions
//!
//! A [`Transaction`] at depth 0 is a real engine transaction; every
//! transaction begun while another is active becomes a named SAVEPOINT
//! inside it:
//!
//! ```text
//! depth 0   BEGIN IMMEDIATE ──────────────────────────────── COMMIT
//! depth 1        SAVEPOINT sqlbridge_sp_2 ──── RELEASE
//! depth 2             SAVEPOINT sqlbridge_sp_3 ─ ROLLBACK TO + RELEASE
//! ```
//!
//! - Committing an inner transaction releases its savepoint. Its changes
//!   become part of the enclosing transaction and are durable only when
//!   the outermost transaction commits.
//! - Rolling back an outer transaction also undoes inner transactions that
//!   already committed.
//! - Only the innermost active transaction may commit or roll back.
//! - If the engine rolls the real transaction back on its own (for example
//!   an `ON CONFLICT ROLLBACK` constraint), every registered transaction
//!   is aborted and further `begin` calls fail until the stale
//!   transactions have been ended.
//!
//! ## Scope Exit
//!
//! Dropping an active transaction applies its [`DtorAction`] (rollback by
//! default) exactly once, on every exit path including `?` propagation and
//! panics. A commit on scope exit first rolls back any nested transaction
//! that is still active, so only work that was explicitly committed into
//! this transaction persists. If that rollback itself fails the connection is in an unknown
//! state, so the drop escalates to a panic (unless already unwinding). Use
//! [`Transaction::finish`] to apply the action and receive the error instead.
//!
//! ## Busy
//!
//! A BEGIN or COMMIT refused because another connection holds a conflicting
//! lock fails with [`Error::Busy`] after the connection's busy timeout. The
//! transaction is not retried; after a busy COMMIT it stays active so the
//! caller can retry or roll back.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::connection::Database;
use crate::error::{Error, Result};

// =============================================================================
// Modes and Actions
// =============================================================================

/// How eagerly the real transaction takes its write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Locks are acquired on first read / first write.
    #[default]
    Deferred,
    /// The write lock is acquired at BEGIN.
    Immediate,
    /// An exclusive lock is acquired at BEGIN.
    Exclusive,
}

impl TransactionMode {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// What happens when an active transaction goes out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtorAction {
    Commit,
    #[default]
    Rollback,
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    /// Ended without an explicit decision: the engine rolled it back or an
    /// enclosing transaction ended first.
    Aborted,
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction or savepoint on one [`Database`].
///
/// # Example
///
/// ```rust
/// use sqlbridge::Database;
///
/// let db = Database::open_in_memory()?;
/// db.execute_batch("CREATE TABLE t (v INTEGER)")?;
///
/// let mut outer = db.transaction()?;
/// db.execute("INSERT INTO t VALUES (1)", &[])?;
/// {
///     let mut inner = db.transaction()?;
///     assert!(inner.is_savepoint());
///     db.execute("INSERT INTO t VALUES (2)", &[])?;
///     inner.commit()?;
/// }
/// outer.commit()?;
/// # Ok::<(), sqlbridge::Error>(())
/// ```
#[derive(Debug)]
pub struct Transaction<'db> {
    db: &'db Database,
    id: u64,
    depth: usize,
    savepoint: Option<String>,
    state: TransactionState,
    dtor_action: DtorAction,
}

impl<'db> Transaction<'db> {
    /// Begins a transaction with the connection's default dtor action.
    pub fn begin(db: &'db Database, mode: TransactionMode) -> Result<Self> {
        Self::begin_with(db, mode, db.config().default_dtor_action)
    }

    /// Begins a transaction, or a savepoint when one is already active.
    ///
    /// `mode` only applies to a real transaction; savepoints inherit the
    /// enclosing transaction's locks.
    pub fn begin_with(
        db: &'db Database,
        mode: TransactionMode,
        dtor_action: DtorAction,
    ) -> Result<Self> {
        let (id, depth) = db.reserve_transaction();

        if depth > 0 && db.is_autocommit() {
            // The engine ended the real transaction under the registered ones;
            // a SAVEPOINT here would silently start a new real transaction.
            db.end_transactions_from(0);
            return Err(Error::TransactionState(
                "enclosing transaction was rolled back by the engine".into(),
            ));
        }

        // Also nest when the caller opened a transaction by hand
        let savepoint = if depth > 0 || !db.is_autocommit() {
            let name = savepoint_name(id);
            db.connection().execute_batch(&format!("SAVEPOINT {name}"))?;
            debug!(savepoint = %name, depth, "began savepoint");
            Some(name)
        } else {
            db.connection().execute_batch(mode.begin_sql())?;
            debug!(?mode, "began transaction");
            None
        };

        db.push_transaction(id);
        Ok(Self {
            db,
            id,
            depth,
            savepoint,
            state: TransactionState::Active,
            dtor_action,
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Nesting depth; 0 for the real transaction.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True while neither committed nor rolled back, and not ended by an
    /// enclosing transaction.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active && self.db.is_transaction_live(self.id, self.depth)
    }

    pub fn is_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    pub fn dtor_action(&self) -> DtorAction {
        self.dtor_action
    }

    pub fn set_dtor_action(&mut self, action: DtorAction) {
        self.dtor_action = action;
    }

    // =========================================================================
    // Commit / Rollback
    // =========================================================================

    /// Commits the transaction, or releases the savepoint.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_operable()?;
        self.apply_commit()
    }

    /// Rolls the transaction (or savepoint) back.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_operable()?;
        self.apply_rollback()
    }

    /// Applies the dtor action now and reports its outcome.
    ///
    /// If a commit fails, a rollback is attempted and the commit error is
    /// returned.
    pub fn finish(mut self) -> Result<()> {
        if !self.is_active() {
            self.mark_ended_elsewhere();
            return Ok(());
        }
        let result = self.apply_dtor_action();
        if self.state == TransactionState::Active {
            // Rollback failed too; give up on this transaction
            self.state = TransactionState::Aborted;
            self.db.end_transactions_from(self.depth);
        }
        result
    }

    fn ensure_operable(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Active => {}
            TransactionState::Committed => {
                return Err(Error::TransactionState("transaction already committed".into()));
            }
            TransactionState::RolledBack => {
                return Err(Error::TransactionState(
                    "transaction already rolled back".into(),
                ));
            }
            TransactionState::Aborted => {
                return Err(Error::TransactionState("transaction was aborted".into()));
            }
        }
        if !self.db.is_transaction_live(self.id, self.depth) {
            self.state = TransactionState::Aborted;
            return Err(Error::TransactionState(
                "transaction was ended by the engine or an enclosing transaction".into(),
            ));
        }
        if !self.db.is_innermost(self.depth) {
            return Err(Error::TransactionState(
                "a nested transaction is still active".into(),
            ));
        }
        Ok(())
    }

    fn apply_commit(&mut self) -> Result<()> {
        if self.db.is_autocommit() {
            // The engine already rolled the real transaction back
            self.end(TransactionState::Aborted);
            return Err(Error::TransactionState(
                "transaction was rolled back by the engine".into(),
            ));
        }
        match &self.savepoint {
            Some(name) => {
                self.db.connection().execute_batch(&format!("RELEASE {name}"))?;
                debug!(savepoint = %name, "released savepoint");
            }
            None => {
                self.db.connection().execute_batch("COMMIT")?;
                debug!("committed transaction");
            }
        }
        self.end(TransactionState::Committed);
        Ok(())
    }

    fn apply_rollback(&mut self) -> Result<()> {
        if self.db.is_autocommit() {
            self.end(TransactionState::RolledBack);
            return Ok(());
        }
        match &self.savepoint {
            Some(name) => {
                let conn = self.db.connection();
                conn.execute_batch(&format!("ROLLBACK TO {name}"))?;
                conn.execute_batch(&format!("RELEASE {name}"))?;
                debug!(savepoint = %name, "rolled back savepoint");
            }
            None => {
                self.db.connection().execute_batch("ROLLBACK")?;
                debug!("rolled back transaction");
            }
        }
        self.end(TransactionState::RolledBack);
        Ok(())
    }

    fn apply_dtor_action(&mut self) -> Result<()> {
        match self.dtor_action {
            DtorAction::Rollback => self.apply_rollback(),
            DtorAction::Commit => match self
                .discard_nested()
                .and_then(|()| self.apply_commit())
            {
                Ok(()) => Ok(()),
                Err(commit_err) if self.state == TransactionState::Active => {
                    error!(error = %commit_err, "commit on scope exit failed; rolling back");
                    self.apply_rollback()?;
                    Err(commit_err)
                }
                Err(commit_err) => Err(commit_err),
            },
        }
    }

    /// Rolls back and releases every savepoint nested inside this one.
    fn discard_nested(&mut self) -> Result<()> {
        let Some(nested) = self.db.transaction_id_at(self.depth + 1) else {
            return Ok(());
        };
        if !self.db.is_autocommit() {
            let name = savepoint_name(nested);
            let conn = self.db.connection();
            conn.execute_batch(&format!("ROLLBACK TO {name}"))?;
            conn.execute_batch(&format!("RELEASE {name}"))?;
            debug!(savepoint = %name, "discarded nested savepoints before commit");
        }
        self.db.end_transactions_from(self.depth + 1);
        Ok(())
    }

    fn end(&mut self, state: TransactionState) {
        self.state = state;
        self.db.end_transactions_from(self.depth);
    }

    fn mark_ended_elsewhere(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Aborted;
        }
    }
}

fn savepoint_name(id: u64) -> String {
    format!("sqlbridge_sp_{id}")
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.is_active() {
            self.mark_ended_elsewhere();
            return;
        }
        if let Err(e) = self.apply_dtor_action() {
            if self.state != TransactionState::Active {
                // Commit failed but the fallback rollback went through
                return;
            }
            error!(error = %e, depth = self.depth, "rollback on scope exit failed");
            self.state = TransactionState::Aborted;
            self.db.end_transactions_from(self.depth);
            if !std::thread::panicking() {
                panic!("transaction rollback on scope exit failed: {e}");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        db
    }

    fn count(db: &Database) -> i64 {
        db.connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit() {
        let db = test_db();
        let mut tx = db.transaction().unwrap();
        assert!(tx.is_active());
        assert!(!db.is_autocommit());
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!tx.is_active());
        assert!(db.is_autocommit());
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_drop_rolls_back_by_default() {
        let db = test_db();
        {
            let _tx = db.transaction().unwrap();
            db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        }
        assert!(db.is_autocommit());
        assert_eq!(db.transaction_depth(), 0);
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_drop_commits_when_configured() {
        let db = test_db();
        {
            let _tx = db
                .transaction_with(TransactionMode::Immediate, DtorAction::Commit)
                .unwrap();
            db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        }
        assert_eq!(count(&db), 1);
    }

    /// `?` propagation out of a scope still rolls back.
    #[test]
    fn test_early_return_rolls_back() {
        fn work(db: &Database) -> Result<()> {
            let mut tx = db.transaction()?;
            db.execute("INSERT INTO t VALUES (1)", &[])?;
            db.execute("INSERT INTO missing VALUES (1)", &[])?;
            tx.commit()
        }

        let db = test_db();
        assert!(work(&db).is_err());
        assert!(db.is_autocommit());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_nested_depths() {
        let db = test_db();
        let mut outer = db.transaction().unwrap();
        let mut inner = db.transaction().unwrap();
        assert_eq!(outer.depth(), 0);
        assert_eq!(inner.depth(), 1);
        assert!(!outer.is_savepoint());
        assert!(inner.is_savepoint());
        assert_eq!(db.transaction_depth(), 2);

        // Outer cannot finish while inner is active
        assert!(matches!(outer.commit(), Err(Error::TransactionState(_))));

        inner.commit().unwrap();
        assert_eq!(db.transaction_depth(), 1);
        outer.commit().unwrap();
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_inner_rollback_keeps_outer_changes() {
        let db = test_db();
        let mut outer = db.transaction().unwrap();
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        {
            let mut inner = db.transaction().unwrap();
            db.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
            inner.rollback().unwrap();
        }
        outer.commit().unwrap();
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_terminated_transaction_rejects_operations() {
        let db = test_db();
        let mut outer = db.transaction().unwrap();
        let mut inner = db.transaction().unwrap();
        inner.commit().unwrap();
        outer.rollback().unwrap();

        assert!(matches!(inner.commit(), Err(Error::TransactionState(_))));
        assert!(matches!(inner.rollback(), Err(Error::TransactionState(_))));
        assert!(matches!(outer.rollback(), Err(Error::TransactionState(_))));
    }

    /// Dropping an outer transaction ends the inner one too.
    #[test]
    fn test_outer_drop_aborts_inner() {
        let db = test_db();
        let outer = db.transaction().unwrap();
        let mut inner = db.transaction().unwrap();
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();

        drop(outer);
        assert!(!inner.is_active());
        assert!(matches!(inner.commit(), Err(Error::TransactionState(_))));
        assert_eq!(inner.state(), TransactionState::Aborted);
        drop(inner);

        assert!(db.is_autocommit());
        assert_eq!(count(&db), 0);
    }

    /// A transaction opened by hand turns the first `begin` into a savepoint.
    #[test]
    fn test_nests_inside_manual_transaction() {
        let db = test_db();
        db.execute_batch("BEGIN").unwrap();
        let mut tx = db.transaction().unwrap();
        assert!(tx.is_savepoint());
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        tx.commit().unwrap();
        assert!(!db.is_autocommit());
        db.execute_batch("COMMIT").unwrap();
        assert_eq!(count(&db), 1);
    }

    /// A commit on scope exit does not carry along undecided nested work.
    #[test]
    fn test_finish_commit_discards_active_nested() {
        let db = test_db();
        let outer = db
            .transaction_with(TransactionMode::Deferred, DtorAction::Commit)
            .unwrap();
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        let mut inner = db.transaction().unwrap();
        db.execute("INSERT INTO t VALUES (2)", &[]).unwrap();

        outer.finish().unwrap();
        assert!(matches!(inner.commit(), Err(Error::TransactionState(_))));
        assert_eq!(inner.state(), TransactionState::Aborted);
        assert!(db.is_autocommit());
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_finish_applies_action() {
        let db = test_db();
        let tx = db
            .transaction_with(TransactionMode::Deferred, DtorAction::Commit)
            .unwrap();
        db.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        tx.finish().unwrap();
        assert_eq!(count(&db), 1);
        assert_eq!(db.transaction_depth(), 0);
    }
}
