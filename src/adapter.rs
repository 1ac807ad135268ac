//! # Table and View Adapter
//!
//! Typed CRUD over a record type described by a static column list.
//!
//! ```text
//!  impl Record for Item          TableSql (built once, cached per connection)
//!  ─────────────────────         ───────────────────────────────────────────
//!  NAME    = "items"        ──►  SELECT id, i, s FROM items
//!  columns = [id, i, s]          SELECT COUNT(*) FROM items
//!                                INSERT INTO items (i, s, id) VALUES (?1, ?2, ?3)
//!                                UPDATE items SET i = ?1, s = ?2 WHERE id = ?3
//!                                DELETE FROM items WHERE id = ?1
//! ```
//!
//! ## Compile-Time Filters
//!
//! Filters are built from typed [`Column<T>`] handles, so comparing a text
//! column against an integer does not compile, and a filter can only be
//! assembled one complete `(column, operator, value)` group at a time:
//!
//! ```rust,ignore
//! let filter = Filter::new().gt(Item::I, 50).eq(Item::S, "Ho");
//! // SELECT id, i, s FROM items WHERE i > ?1 AND s = ?2
//! ```
//!
//! ## Views and Tables
//!
//! [`Record`] is enough for read operations. Writes additionally need
//! [`TableRecord`], which a view type simply does not implement.
//!
//! ## Identity Assignment
//!
//! Inserts list the identity column last and bind it to NULL, so the engine
//! assigns the next rowid. The new id is read back from the connection right
//! after the insert runs, which is the only race-free way to learn it.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::debug;

use crate::clause::{Op, Order, WhereClause};
use crate::connection::Database;
use crate::error::{Error, Result};
use crate::schema::{create_table_sql, identity_column, validate_columns, ColumnDef};
use crate::statement::{Row, Statement};
use crate::value::{ToValue, Value};

// =============================================================================
// Typed Column Handle
// =============================================================================

/// A column name tagged with the Rust type of its values.
pub struct Column<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Column<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Column<T> {}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Column({})", self.name)
    }
}

// =============================================================================
// Record Traits
// =============================================================================

/// A row type backed by a table or view.
///
/// Several record types may map the same table, e.g. a narrow projection
/// next to the full row; each keeps its own generated SQL.
pub trait Record: Sized + 'static {
    /// Table or view name.
    const NAME: &'static str;

    /// Column descriptors, in the order `from_row` reads them.
    fn columns() -> &'static [ColumnDef];

    /// Builds a record from a row of `SELECT <all columns>`.
    fn from_row(row: &Row<'_>) -> Result<Self>;
}

/// A writable record with an identity column.
pub trait TableRecord: Record {
    /// The identity column.
    const ID: Column<i64>;

    /// Identity of this record, `None` before insertion.
    fn id(&self) -> Option<i64>;

    /// Values of every non-identity column, in descriptor order.
    fn values(&self) -> Vec<Value>;
}

// =============================================================================
// Generated SQL
// =============================================================================

/// SQL text for one table, generated once from its descriptors.
#[derive(Debug, Clone)]
pub struct TableSql {
    pub name: &'static str,
    pub identity: Option<&'static str>,
    /// Non-identity columns in descriptor order.
    pub data_columns: Vec<&'static str>,
    pub create_table: String,
    pub select_all: String,
    pub count_all: String,
    pub insert: String,
    pub select_by_id: Option<String>,
    pub update_by_id: Option<String>,
    pub delete_by_id: Option<String>,
    update_column: HashMap<&'static str, String>,
}

impl TableSql {
    /// Generates all statements for `name` from `columns`.
    pub fn build(name: &'static str, columns: &[ColumnDef]) -> Result<Self> {
        validate_columns(name, columns)?;
        let identity = identity_column(columns)?.map(|c| c.name);
        let data_columns: Vec<&'static str> = columns
            .iter()
            .filter(|c| !c.identity)
            .map(|c| c.name)
            .collect();

        let all = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let select_all = format!("SELECT {all} FROM {name}");
        let count_all = format!("SELECT COUNT(*) FROM {name}");

        // Identity goes last so the data columns keep placeholders ?1..?n
        let mut insert_columns = data_columns.clone();
        insert_columns.extend(identity);
        let placeholders = (1..=insert_columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {name} ({}) VALUES ({placeholders})",
            insert_columns.join(", ")
        );

        let set_list = data_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");

        let select_by_id = identity.map(|id| format!("{select_all} WHERE {id} = ?1"));
        let update_by_id = match identity {
            Some(id) if !data_columns.is_empty() => Some(format!(
                "UPDATE {name} SET {set_list} WHERE {id} = ?{}",
                data_columns.len() + 1
            )),
            _ => None,
        };
        let delete_by_id = identity.map(|id| format!("DELETE FROM {name} WHERE {id} = ?1"));

        let update_column = match identity {
            Some(id) => data_columns
                .iter()
                .map(|c| (*c, format!("UPDATE {name} SET {c} = ?1 WHERE {id} = ?2")))
                .collect(),
            None => HashMap::new(),
        };

        Ok(Self {
            name,
            identity,
            data_columns,
            create_table: create_table_sql(name, columns)?,
            select_all,
            count_all,
            insert,
            select_by_id,
            update_by_id,
            delete_by_id,
            update_column,
        })
    }

    /// `UPDATE … SET <column> = ?1 WHERE <id> = ?2`.
    pub fn update_column_sql(&self, column: &str) -> Option<&str> {
        self.update_column.get(column).map(String::as_str)
    }

    fn require_identity<'a>(&self, sql: &'a Option<String>) -> Result<&'a str> {
        sql.as_deref().ok_or_else(|| {
            Error::InvalidArgument(format!("table '{}' has no identity column", self.name))
        })
    }
}

// =============================================================================
// Filter Builder
// =============================================================================

/// Conjunctive filter over typed columns.
///
/// Placeholders are numbered left to right; `is_null` / `is_not_null`
/// groups consume none.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clause: WhereClause,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T: ToValue>(mut self, column: Column<T>, op: Op, value: T) -> Self {
        self.clause.add_op(column.name, op, value);
        self
    }

    pub fn eq<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Eq, value.into())
    }

    pub fn ne<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Ne, value.into())
    }

    pub fn lt<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Lt, value.into())
    }

    pub fn le<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Le, value.into())
    }

    pub fn gt<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Gt, value.into())
    }

    pub fn ge<T: ToValue>(self, column: Column<T>, value: impl Into<T>) -> Self {
        self.with(column, Op::Ge, value.into())
    }

    /// `LIKE` pattern match on a text column.
    pub fn like(self, column: Column<String>, pattern: impl Into<String>) -> Self {
        self.with(column, Op::Like, pattern.into())
    }

    pub fn is_null<T>(mut self, column: Column<T>) -> Self {
        self.clause.is_null(column.name);
        self
    }

    pub fn is_not_null<T>(mut self, column: Column<T>) -> Self {
        self.clause.is_not_null(column.name);
        self
    }

    pub fn order_by<T>(mut self, column: Column<T>, order: Order) -> Self {
        self.clause.order_by(column.name, order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.clause.limit(limit);
        self
    }

    /// The underlying where clause.
    pub fn clause(&self) -> &WhereClause {
        &self.clause
    }

    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Typed CRUD operations for record type `R` on one connection.
pub struct Adapter<'db, R> {
    db: &'db Database,
    sql: Rc<TableSql>,
    _record: PhantomData<fn() -> R>,
}

impl<'db, R: Record> Adapter<'db, R> {
    /// Creates an adapter, generating the table SQL on first use.
    pub fn new(db: &'db Database) -> Result<Self> {
        Ok(Self {
            db,
            sql: db.table_sql::<R>()?,
            _record: PhantomData,
        })
    }

    /// The generated SQL for this table.
    pub fn sql(&self) -> &TableSql {
        &self.sql
    }

    fn prepare(&self, sql: &str) -> Result<Statement<'db>> {
        self.db.prepare(sql)
    }

    fn collect(stmt: &mut Statement<'_>) -> Result<Vec<R>> {
        let mut records = Vec::new();
        while stmt.next_row()? {
            records.push(R::from_row(&stmt.row()?)?);
        }
        Ok(records)
    }

    fn scalar(stmt: &mut Statement<'_>) -> Result<i64> {
        if !stmt.next_row()? {
            return Err(Error::NoData);
        }
        stmt.get(0)
    }

    fn filtered(&self, prefix: &str, filter: &Filter, modifiers: bool) -> Result<Statement<'db>> {
        let clause = filter.clause();
        let mut sql = format!("{prefix} WHERE {}", clause.to_condition_sql()?);
        if modifiers {
            sql.push_str(&clause.to_modifier_sql()?);
        }
        let mut stmt = self.prepare(&sql)?;
        clause.bind(&mut stmt)?;
        Ok(stmt)
    }

    /// Every row.
    pub fn all(&self) -> Result<Vec<R>> {
        let mut stmt = self.prepare(&self.sql.select_all)?;
        Self::collect(&mut stmt)
    }

    /// Number of rows.
    pub fn count(&self) -> Result<i64> {
        let mut stmt = self.prepare(&self.sql.count_all)?;
        Self::scalar(&mut stmt)
    }

    /// Number of rows matching `filter`; an empty filter counts every row.
    pub fn count_where(&self, filter: &Filter) -> Result<i64> {
        if filter.is_empty() {
            return self.count();
        }
        let mut stmt = self.filtered(&self.sql.count_all, filter, false)?;
        Self::scalar(&mut stmt)
    }

    /// Rows matching `filter`, honouring its ordering and limit.
    ///
    /// Fails with `Error::InvalidArgument` for an empty filter.
    pub fn select_where(&self, filter: &Filter) -> Result<Vec<R>> {
        let mut stmt = self.filtered(&self.sql.select_all, filter, true)?;
        Self::collect(&mut stmt)
    }

    /// First row matching `filter`, if any.
    ///
    /// Only one row is fetched: the filter's limit is capped at 1.
    pub fn first_where(&self, filter: &Filter) -> Result<Option<R>> {
        let mut stmt = self.filtered(&self.sql.select_all, &first_only(filter), true)?;
        if !stmt.next_row()? {
            return Ok(None);
        }
        Ok(Some(R::from_row(&stmt.row()?)?))
    }

    /// The row with identity `id`, if present.
    pub fn single_by_id(&self, id: i64) -> Result<Option<R>> {
        let sql = self.sql.require_identity(&self.sql.select_by_id)?;
        let mut stmt = self.prepare(sql)?;
        stmt.bind(1, &id)?;
        if !stmt.next_row()? {
            return Ok(None);
        }
        Ok(Some(R::from_row(&stmt.row()?)?))
    }
}

/// `filter` with its limit capped at one row.
fn first_only(filter: &Filter) -> Filter {
    let limit = filter.clause().row_limit().map_or(1, |n| n.min(1));
    filter.clone().limit(limit)
}

impl<'db, R: TableRecord> Adapter<'db, R> {
    /// The record's `ID` column must be the descriptor list's identity.
    fn check_identity(&self) -> Result<()> {
        if self.sql.identity != Some(R::ID.name()) {
            return Err(Error::InvalidArgument(format!(
                "'{}' declares id column '{}' but its identity column is {:?}",
                self.sql.name,
                R::ID.name(),
                self.sql.identity
            )));
        }
        Ok(())
    }

    /// Creates the table if it does not exist.
    pub fn create_table(&self) -> Result<()> {
        self.db.execute_batch(&self.sql.create_table)
    }

    /// Inserts `record` and returns the identity the engine assigned.
    pub fn insert(&self, record: &R) -> Result<i64> {
        self.check_identity()?;
        let values = record.values();
        if values.len() != self.sql.data_columns.len() {
            return Err(Error::InvalidArgument(format!(
                "record for '{}' produced {} values for {} columns",
                self.sql.name,
                values.len(),
                self.sql.data_columns.len()
            )));
        }

        let mut stmt = self.prepare(&self.sql.insert)?;
        for (i, value) in values.iter().enumerate() {
            stmt.bind(i + 1, value)?;
        }
        stmt.bind(values.len() + 1, &Value::Null)?;
        stmt.execute()?;

        let id = self.db.last_insert_rowid();
        debug!(table = self.sql.name, id, "inserted record");
        Ok(id)
    }

    /// Overwrites every column of the stored row with `record`'s values.
    ///
    /// Returns the number of rows changed (0 when the id no longer exists).
    pub fn update(&self, record: &R) -> Result<usize> {
        self.check_identity()?;
        let id = record.id().ok_or_else(|| {
            Error::InvalidArgument(format!("cannot update '{}' record without id", self.sql.name))
        })?;
        let sql = self.sql.require_identity(&self.sql.update_by_id)?;
        let values = record.values();

        let mut stmt = self.prepare(sql)?;
        for (i, value) in values.iter().enumerate() {
            stmt.bind(i + 1, value)?;
        }
        stmt.bind(values.len() + 1, &id)?;
        stmt.execute()
    }

    /// Sets one column of the row with identity `id`.
    pub fn update_column<T: ToValue>(
        &self,
        id: i64,
        column: Column<T>,
        value: impl Into<T>,
    ) -> Result<usize> {
        self.check_identity()?;
        let sql = self.sql.update_column_sql(column.name()).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "'{}' is not an updatable column of '{}'",
                column.name(),
                self.sql.name
            ))
        })?;
        let value: T = value.into();
        let mut stmt = self.prepare(sql)?;
        stmt.bind(1, &value)?;
        stmt.bind(2, &id)?;
        stmt.execute()
    }

    /// Deletes the row with identity `id`. Returns the number deleted.
    pub fn delete_by_id(&self, id: i64) -> Result<usize> {
        self.check_identity()?;
        let sql = self.sql.require_identity(&self.sql.delete_by_id)?;
        let mut stmt = self.prepare(sql)?;
        stmt.bind(1, &id)?;
        stmt.execute()
    }

    /// Deletes rows matching `filter`. Rejects an empty filter.
    pub fn delete_where(&self, filter: &Filter) -> Result<usize> {
        let prefix = format!("DELETE FROM {}", self.sql.name);
        let mut stmt = self.filtered(&prefix, filter, false)?;
        stmt.execute()
    }
}

// =============================================================================
// Tests
// =============================================================================
