//! Nested Transaction Tests
//!
//! Tests for:
//! - Durability of nested commits, checked from a second connection
//! - Outer rollback discarding committed inner work
//! - Scope-exit actions, including early return through `?`
//! - Isolation of uncommitted work from other connections
//! - Out-of-order drops of nested transactions
//! - Rollbacks the engine performs on its own

mod common;

use sqlbridge::schema::{create_table_sql, ColumnDef, ConflictPolicy};
use sqlbridge::{
    ConnectionConfig, Database, DtorAction, Error, SqlType, TransactionMode, TransactionState,
    Value,
};

fn insert_item(db: &Database, i: i64) {
    db.execute(
        "INSERT INTO items (i, s) VALUES (?1, ?2)",
        &[Value::Integer(i), Value::Text("tx".into())],
    )
    .unwrap();
}

fn file_db(name: &str) -> (tempfile::TempDir, std::path::PathBuf, Database) {
    let (dir, path) = common::create_temp_db_file(name);
    let db = common::open(&path);
    common::create_items_table(&db);
    (dir, path, db)
}

/// Inner commit followed by outer commit is durable.
#[test]
fn outer_commit_after_inner_commit_is_durable() {
    common::init_tracing();
    let (_dir, path, db) = file_db("nested_commit.db");

    let mut outer = db.transaction().unwrap();
    insert_item(&db, 1);
    {
        let mut inner = db.transaction().unwrap();
        assert!(inner.is_savepoint());
        assert_eq!(inner.depth(), 1);
        insert_item(&db, 2);
        inner.commit().unwrap();
        assert_eq!(inner.state(), TransactionState::Committed);
    }
    outer.commit().unwrap();
    assert_eq!(db.transaction_depth(), 0);
    drop(outer);
    drop(db);

    let other = common::open(&path);
    assert_eq!(common::count_items(&other), 2);
}

/// Rolling back the outer transaction discards committed inner work too.
#[test]
fn outer_rollback_undoes_inner_commit() {
    let (_dir, path, db) = file_db("nested_rollback.db");

    let mut outer = db.transaction().unwrap();
    insert_item(&db, 1);
    let mut inner = db.transaction().unwrap();
    insert_item(&db, 2);
    inner.commit().unwrap();
    outer.rollback().unwrap();

    assert_eq!(common::count_items(&db), 0);
    assert_eq!(common::count_items(&common::open(&path)), 0);
}

/// Rolling back an inner transaction keeps the outer transaction's work.
#[test]
fn inner_rollback_keeps_outer_work() {
    let (_dir, path, db) = file_db("inner_rollback.db");

    let mut outer = db.transaction().unwrap();
    insert_item(&db, 1);
    {
        let mut inner = db.transaction().unwrap();
        insert_item(&db, 2);
        insert_item(&db, 3);
        inner.rollback().unwrap();
    }
    {
        // Dropped without commit: default action rolls back
        let _inner = db.transaction().unwrap();
        insert_item(&db, 4);
    }
    insert_item(&db, 5);
    outer.commit().unwrap();

    let other = common::open(&path);
    assert_eq!(common::count_items(&other), 2);
}

/// Work inside an open transaction is invisible to other connections.
#[test]
fn uncommitted_work_is_isolated() {
    let (_dir, path, db) = file_db("isolation.db");
    let reader = common::open(&path);

    let mut tx = db
        .transaction_with(TransactionMode::Immediate, DtorAction::Rollback)
        .unwrap();
    insert_item(&db, 1);
    assert_eq!(common::count_items(&db), 1);
    assert_eq!(common::count_items(&reader), 0);

    tx.commit().unwrap();
    assert_eq!(common::count_items(&reader), 1);
}

fn insert_then_fail(db: &Database) -> sqlbridge::Result<()> {
    let mut tx = db.transaction()?;
    insert_item(db, 1);
    db.prepare("SELECT * FROM no_such_table")?;
    tx.commit()
}

/// Returning early through `?` rolls the transaction back.
#[test]
fn early_return_rolls_back() {
    let (_dir, _path, db) = file_db("early_return.db");

    let result = insert_then_fail(&db);
    assert!(matches!(result, Err(Error::StatementCreation { .. })));
    assert_eq!(db.transaction_depth(), 0);
    assert!(db.is_autocommit());
    assert_eq!(common::count_items(&db), 0);
}

/// A transaction configured to commit on scope exit persists its work.
#[test]
fn dtor_commit_persists() {
    let (_dir, path) = common::create_temp_db_file("dtor_commit.db");
    let config = ConnectionConfig {
        default_dtor_action: DtorAction::Commit,
        ..ConnectionConfig::default()
    };
    let db = Database::open_with_config(&path, config).unwrap();
    common::create_items_table(&db);

    {
        let outer = db.transaction().unwrap();
        assert_eq!(outer.dtor_action(), DtorAction::Commit);
        {
            let mut inner = db.transaction().unwrap();
            insert_item(&db, 1);
            inner.set_dtor_action(DtorAction::Rollback);
            insert_item(&db, 2);
        }
        insert_item(&db, 3);
    }

    let other = common::open(&path);
    assert_eq!(common::count_items(&other), 1);
}

/// Only the innermost transaction may commit; ending the outer one aborts
/// the inner one.
#[test]
fn only_innermost_may_finish() {
    let (_dir, _path, db) = file_db("innermost.db");

    let mut outer = db.transaction().unwrap();
    let mut inner = db.transaction().unwrap();
    insert_item(&db, 1);

    assert!(matches!(outer.commit(), Err(Error::TransactionState(_))));
    assert!(outer.is_active());

    inner.commit().unwrap();
    assert!(matches!(inner.commit(), Err(Error::TransactionState(_))));
    assert!(matches!(inner.rollback(), Err(Error::TransactionState(_))));

    let mut second = db.transaction().unwrap();
    outer.set_dtor_action(DtorAction::Rollback);
    outer.finish().unwrap();
    assert!(!second.is_active());
    assert!(matches!(second.commit(), Err(Error::TransactionState(_))));
    assert_eq!(second.state(), TransactionState::Aborted);
    assert_eq!(db.transaction_depth(), 0);
    assert_eq!(common::count_items(&db), 0);
}

/// Transactions nest under a transaction begun with raw SQL.
#[test]
fn nests_under_manual_begin() {
    let (_dir, _path, db) = file_db("manual_begin.db");
    db.execute_batch("BEGIN").unwrap();

    {
        let mut tx = db.transaction().unwrap();
        assert!(tx.is_savepoint());
        assert_eq!(tx.depth(), 0);
        insert_item(&db, 1);
        tx.commit().unwrap();
    }
    assert!(!db.is_autocommit());

    db.execute_batch("ROLLBACK").unwrap();
    assert_eq!(common::count_items(&db), 0);
}

/// Dropping a commit-on-exit outer transaction while inner ones are still
/// active keeps committed inner work and discards undecided inner work.
#[test]
fn outer_commit_drop_discards_active_inner() {
    let (_dir, path, db) = file_db("out_of_order_drop.db");

    let outer = db
        .transaction_with(TransactionMode::Deferred, DtorAction::Commit)
        .unwrap();
    insert_item(&db, 1);
    {
        let mut decided = db.transaction().unwrap();
        insert_item(&db, 2);
        decided.commit().unwrap();
    }
    let pending = db
        .transaction_with(TransactionMode::Deferred, DtorAction::Commit)
        .unwrap();
    insert_item(&db, 3);
    let nested = db.transaction().unwrap();
    insert_item(&db, 4);

    drop(outer);
    assert!(!pending.is_active());
    assert!(!nested.is_active());
    drop(nested);
    drop(pending);

    assert_eq!(db.transaction_depth(), 0);
    assert!(db.is_autocommit());
    assert_eq!(common::count_items(&common::open(&path)), 2);
}

// =============================================================================
// Engine-Initiated Rollback
// =============================================================================

/// Adds a table whose NOT NULL violation rolls back the whole transaction.
fn add_guarded_table(db: &Database) {
    let columns = [ColumnDef::new("v", SqlType::Integer).not_null(ConflictPolicy::Rollback)];
    db.execute_batch(&create_table_sql("guarded", &columns).unwrap())
        .unwrap();
}

fn violate_guard(db: &Database) {
    assert!(db
        .execute("INSERT INTO guarded (v) VALUES (NULL)", &[])
        .is_err());
    assert!(db.is_autocommit());
}

/// Commits after the engine rolled back report the abort at every depth.
#[test]
fn engine_rollback_aborts_pending_commits() {
    let (_dir, path, db) = file_db("engine_rollback_commit.db");
    add_guarded_table(&db);

    let mut outer = db.transaction().unwrap();
    insert_item(&db, 1);
    let mut inner = db.transaction().unwrap();
    insert_item(&db, 2);
    violate_guard(&db);

    assert!(matches!(inner.commit(), Err(Error::TransactionState(_))));
    assert_eq!(inner.state(), TransactionState::Aborted);
    assert!(matches!(outer.commit(), Err(Error::TransactionState(_))));
    assert_eq!(outer.state(), TransactionState::Aborted);
    assert_eq!(db.transaction_depth(), 0);

    assert_eq!(common::count_items(&common::open(&path)), 0);
}

/// A begin after the engine's rollback must not start a fresh real
/// transaction whose commit would outlive the outer rollback.
#[test]
fn begin_after_engine_rollback_is_refused() {
    let (_dir, path, db) = file_db("engine_rollback_begin.db");
    add_guarded_table(&db);

    let mut outer = db.transaction().unwrap();
    insert_item(&db, 1);
    violate_guard(&db);

    let err = db.transaction().unwrap_err();
    assert!(matches!(err, Error::TransactionState(_)));
    assert!(db.is_autocommit());
    assert_eq!(db.transaction_depth(), 0);

    assert!(matches!(outer.rollback(), Err(Error::TransactionState(_))));
    assert_eq!(outer.state(), TransactionState::Aborted);
    drop(outer);
    assert_eq!(common::count_items(&common::open(&path)), 0);

    // The connection accepts new transactions again
    let mut tx = db.transaction().unwrap();
    assert!(!tx.is_savepoint());
    insert_item(&db, 3);
    tx.commit().unwrap();
    assert_eq!(common::count_items(&common::open(&path)), 1);
}
