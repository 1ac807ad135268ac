//! # Statement Lifecycle
//!
//! A [`Statement`] owns one compiled query for its whole life and walks it
//! through a small state machine:
//!
//! ```text
//!             bind*                step
//!  Created ──────────► Bound ──────────────► RowAvailable ◄──┐
//!     │                  ▲                     │      │ step │
//!     │                  │ reset               │      └──────┘
//!     │                  │                     ▼ step
//!     │                  └────────────────  Exhausted ──┐
//!     │                                        ▲  step  │
//!     │                                        └────────┘
//!     └── any state ──(force_finalize / drop)──► Finalized
//! ```
//!
//! ## Ownership
//!
//! The compiled-query handle lives in exactly one `Statement`. Moving the
//! statement (returning it from a function, storing it in a struct) moves
//! the handle; overwriting a `Statement` drops, and therefore finalizes, the
//! handle it held. There is no way to clone one.
//!
//! ## Result Fetching
//!
//! The first `step()` of an execution runs the query to completion and keeps
//! the produced rows; later steps hand them out one at a time. A busy signal
//! during that first step discards any partial rows and returns
//! [`Step::Busy`], leaving the statement ready to be stepped again.
//!
//! Memory for an execution is proportional to its whole result set. Bound
//! large queries with a `LIMIT` (or page through them) rather than relying
//! on stopping early.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::connection::Database;
use crate::error::{is_busy_error, Error, Result};
use crate::value::{ConversionError, FromValue, ToValue, Value};

// =============================================================================
// Step Outcome and State
// =============================================================================

/// Outcome of [`Statement::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A row is available through the getters.
    Row,
    /// The statement produced all its rows (or finished executing).
    Done,
    /// A conflicting lock is held by another connection.
    Busy,
}

/// Lifecycle state of a [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Created,
    Bound,
    RowAvailable,
    Exhausted,
    Finalized,
}

// =============================================================================
// Column Addressing
// =============================================================================

/// Something that names a result column: a zero-based index or a name.
pub trait ColumnIndex {
    fn resolve(&self, columns: &[String]) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, columns: &[String]) -> Result<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::InvalidColumn(format!(
                "index {} (result has {} columns)",
                self,
                columns.len()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, columns: &[String]) -> Result<usize> {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(self))
            .ok_or_else(|| Error::InvalidColumn(format!("name '{}'", self)))
    }
}

// =============================================================================
// Row View
// =============================================================================

/// Borrowed view of the current row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Typed value of a column.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidColumn` for an unknown index or name
    /// - `Error::NullValue` if the cell is NULL (use `get_optional`)
    /// - `Error::TypeMismatch` if the storage class doesn't convert to `T`
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        let column = index.resolve(self.columns)?;
        T::from_value(&self.values[column]).map_err(|e| match e {
            ConversionError::Null => Error::NullValue { column },
            ConversionError::Mismatch { expected, actual } => Error::TypeMismatch {
                column,
                expected,
                actual,
            },
            ConversionError::Json(err) => Error::Json(err),
        })
    }

    /// Like [`get`](Row::get), but NULL reads back as `None`.
    pub fn get_optional<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<Option<T>> {
        self.get::<Option<T>, I>(index)
    }

    /// The raw storage value of a column.
    pub fn get_value<I: ColumnIndex>(&self, index: I) -> Result<&'a Value> {
        let column = index.resolve(self.columns)?;
        Ok(&self.values[column])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &'a [String] {
        self.columns
    }
}

// =============================================================================
// Statement
// =============================================================================

/// A compiled query with typed binding and typed, NULL-aware extraction.
///
/// # Example
///
/// ```rust
/// use sqlbridge::{Database, Step};
///
/// let db = Database::open_in_memory()?;
/// let mut stmt = db.prepare("SELECT ?1 + 1, ?2")?;
/// stmt.bind(1, &41i64)?;
/// stmt.bind(2, &None::<String>)?;
///
/// assert_eq!(stmt.step()?, Step::Row);
/// assert_eq!(stmt.get::<i64, _>(0)?, 42);
/// assert_eq!(stmt.get_optional::<String, _>(1)?, None);
/// assert_eq!(stmt.step()?, Step::Done);
/// # Ok::<(), sqlbridge::Error>(())
/// ```
pub struct Statement<'db> {
    inner: Option<rusqlite::Statement<'db>>,
    sql: String,
    columns: Vec<String>,
    parameter_count: usize,
    state: StatementState,
    has_bindings: bool,

    /// Rows fetched by the current execution and not yet handed out.
    pending: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
}

impl<'db> Statement<'db> {
    /// Compiles `sql` against `db`.
    pub(crate) fn prepare(db: &'db Database, sql: &str) -> Result<Self> {
        let inner = db.connection().prepare(sql).map_err(|source| {
            if is_busy_error(&source) {
                Error::from(source)
            } else {
                Error::StatementCreation {
                    sql: sql.to_string(),
                    source,
                }
            }
        })?;
        debug!(sql, "prepared statement");

        let columns = inner
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let parameter_count = inner.parameter_count();

        Ok(Self {
            inner: Some(inner),
            sql: sql.to_string(),
            columns,
            parameter_count,
            state: StatementState::Created,
            has_bindings: false,
            pending: VecDeque::new(),
            current: None,
        })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == StatementState::Finalized
    }

    /// Number of placeholders in the compiled query.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, index: usize) -> Result<&str> {
        let i = index.resolve(&self.columns)?;
        Ok(&self.columns[i])
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Binds one value to a 1-based placeholder.
    ///
    /// Valid in `Created` and `Bound`; after stepping, call
    /// [`reset`](Statement::reset) first.
    ///
    /// # Errors
    ///
    /// - `Error::Finalized` after `force_finalize`
    /// - `Error::Binding` if `position` is not in `1..=parameter_count()`
    /// - `Error::InvalidArgument` while a result set is being iterated
    pub fn bind<V: ToValue + ?Sized>(&mut self, position: usize, value: &V) -> Result<()> {
        match self.state {
            StatementState::Finalized => return Err(Error::Finalized),
            StatementState::RowAvailable | StatementState::Exhausted => {
                return Err(Error::InvalidArgument(
                    "cannot bind while a result set is active; call reset() first".into(),
                ));
            }
            StatementState::Created | StatementState::Bound => {}
        }
        if position == 0 || position > self.parameter_count {
            return Err(Error::Binding {
                position,
                count: self.parameter_count,
            });
        }

        let inner = self.inner.as_mut().ok_or(Error::Finalized)?;
        inner.raw_bind_parameter(position, value.to_value())?;
        self.state = StatementState::Bound;
        self.has_bindings = true;
        Ok(())
    }

    /// Binds `values` to placeholders `1..=values.len()`.
    ///
    /// The number of values must match the number of placeholders.
    pub fn bind_all(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.parameter_count {
            return Err(Error::InvalidArgument(format!(
                "statement expects {} values, got {}",
                self.parameter_count,
                values.len()
            )));
        }
        for (i, value) in values.iter().enumerate() {
            self.bind(i + 1, value)?;
        }
        Ok(())
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Advances to the next row.
    ///
    /// Repeated calls after [`Step::Done`] keep returning `Done` until the
    /// statement is reset.
    ///
    /// The first step of an execution buffers every result row, so its cost
    /// grows with the size of the result set.
    pub fn step(&mut self) -> Result<Step> {
        match self.state {
            StatementState::Finalized => Err(Error::Finalized),
            StatementState::Exhausted => Ok(Step::Done),
            StatementState::RowAvailable => Ok(self.advance()),
            StatementState::Created | StatementState::Bound => {
                if !self.run()? {
                    return Ok(Step::Busy);
                }
                Ok(self.advance())
            }
        }
    }

    /// Steps once, turning [`Step::Busy`] into [`Error::Busy`].
    ///
    /// Returns `true` when a row is available.
    pub fn next_row(&mut self) -> Result<bool> {
        match self.step()? {
            Step::Row => Ok(true),
            Step::Done => Ok(false),
            Step::Busy => Err(Error::Busy(format!("while stepping `{}`", self.sql))),
        }
    }

    /// Runs a statement that produces no rows and returns the change count.
    pub fn execute(&mut self) -> Result<usize> {
        match self.state {
            StatementState::Finalized => return Err(Error::Finalized),
            StatementState::RowAvailable | StatementState::Exhausted => {
                return Err(Error::InvalidArgument(
                    "statement already executed; call reset() first".into(),
                ));
            }
            StatementState::Created | StatementState::Bound => {}
        }
        let inner = self.inner.as_mut().ok_or(Error::Finalized)?;
        let changed = inner.raw_execute()?;
        self.state = StatementState::Exhausted;
        Ok(changed)
    }

    /// Executes the query and buffers its rows. Returns false on busy.
    fn run(&mut self) -> Result<bool> {
        let width = self.columns.len();
        let inner = self.inner.as_mut().ok_or(Error::Finalized)?;

        let mut fetched = VecDeque::new();
        let mut rows = inner.raw_query();
        loop {
            match rows.next() {
                Ok(Some(row)) => {
                    let mut values = Vec::with_capacity(width);
                    for i in 0..width {
                        values.push(Value::from_cell(i, row.get_ref(i)?)?);
                    }
                    fetched.push_back(values);
                }
                Ok(None) => break,
                Err(e) if is_busy_error(&e) => {
                    warn!(sql = %self.sql, "statement busy");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.pending = fetched;
        Ok(true)
    }

    fn advance(&mut self) -> Step {
        match self.pending.pop_front() {
            Some(row) => {
                self.current = Some(row);
                self.state = StatementState::RowAvailable;
                Step::Row
            }
            None => {
                self.current = None;
                self.state = StatementState::Exhausted;
                Step::Done
            }
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// The current row.
    ///
    /// Fails with `Error::NoData` when no row is available.
    pub fn row(&self) -> Result<Row<'_>> {
        if self.state == StatementState::Finalized {
            return Err(Error::Finalized);
        }
        let values = self.current.as_deref().ok_or(Error::NoData)?;
        Ok(Row {
            columns: &self.columns,
            values,
        })
    }

    /// Typed value of a column in the current row. See [`Row::get`].
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        self.row()?.get(index)
    }

    /// Typed value or `None` for NULL. See [`Row::get_optional`].
    pub fn get_optional<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<Option<T>> {
        self.row()?.get_optional(index)
    }

    // =========================================================================
    // Reset and Finalize
    // =========================================================================

    /// Returns the statement to `Created`/`Bound` for another execution.
    ///
    /// With `clear_bindings`, every placeholder is reset to NULL.
    pub fn reset(&mut self, clear_bindings: bool) -> Result<()> {
        if self.state == StatementState::Finalized {
            return Err(Error::Finalized);
        }
        self.pending.clear();
        self.current = None;

        if clear_bindings {
            let inner = self.inner.as_mut().ok_or(Error::Finalized)?;
            for position in 1..=self.parameter_count {
                inner.raw_bind_parameter(position, Value::Null)?;
            }
            self.has_bindings = false;
        }

        self.state = if self.has_bindings {
            StatementState::Bound
        } else {
            StatementState::Created
        };
        Ok(())
    }

    /// Releases the compiled query now.
    ///
    /// Drops any lock the statement holds. Safe to call more than once.
    pub fn force_finalize(&mut self) -> Result<()> {
        self.pending.clear();
        self.current = None;
        self.state = StatementState::Finalized;
        if let Some(inner) = self.inner.take() {
            debug!(sql = %self.sql, "finalizing statement");
            inner.finalize()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("pending_rows", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
