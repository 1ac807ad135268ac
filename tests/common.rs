#![allow(dead_code)]

use std::path::{Path, PathBuf};

use sqlbridge::schema::ColumnDef;
use sqlbridge::{
    Column, ConnectionConfig, Database, JournalMode, Record, Result, Row, SqlType, TableRecord,
    ToValue, ValueClause, Value,
};

/// Routes the crate's log output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open(path: &Path) -> Database {
    Database::open(path).expect("open database")
}

/// A connection that reports Busy immediately instead of waiting.
pub fn open_no_wait(path: &Path) -> Database {
    open_with(path, 0, JournalMode::Wal)
}

pub fn open_with(path: &Path, busy_timeout_ms: u64, journal_mode: JournalMode) -> Database {
    let config = ConnectionConfig {
        busy_timeout_ms,
        journal_mode,
        ..ConnectionConfig::default()
    };
    Database::open_with_config(path, config).expect("open database with config")
}

// =============================================================================
// Item Fixture
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: Option<i64>,
    pub i: i64,
    pub s: String,
}

pub static ITEM_COLUMNS: [ColumnDef; 3] = [
    ColumnDef::identity("id"),
    ColumnDef::new("i", SqlType::Integer),
    ColumnDef::new("s", SqlType::Text),
];

impl Item {
    pub const I: Column<i64> = Column::new("i");
    pub const S: Column<String> = Column::new("s");

    pub fn new(i: i64, s: &str) -> Self {
        Self {
            id: None,
            i,
            s: s.to_string(),
        }
    }
}

impl Record for Item {
    const NAME: &'static str = "items";

    fn columns() -> &'static [ColumnDef] {
        &ITEM_COLUMNS
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            i: row.get(1)?,
            s: row.get(2)?,
        })
    }
}

impl TableRecord for Item {
    const ID: Column<i64> = Column::new("id");

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![self.i.to_value(), self.s.to_value()]
    }
}

/// Rows 4 and 5 are the only ones with `i > 50 AND s = 'Ho'`.
pub const FIVE_ITEMS: [(i64, &str); 5] = [(10, "Hi"), (20, "Ho"), (60, "Hi"), (70, "Ho"), (84, "Ho")];

pub fn create_items_table(db: &Database) {
    db.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, i INTEGER, s TEXT)")
        .expect("create items table");
}

/// Creates `items` and fills it with [`FIVE_ITEMS`], returning their rowids.
pub fn seed_five_items(db: &Database) -> Vec<i64> {
    create_items_table(db);
    insert_five_items(db)
}

/// Inserts [`FIVE_ITEMS`] into an existing `items` table.
pub fn insert_five_items(db: &Database) -> Vec<i64> {
    FIVE_ITEMS
        .iter()
        .map(|(i, s)| {
            ValueClause::new()
                .add("i", *i)
                .add("s", *s)
                .insert(db, "items")
                .expect("insert item")
                .rowid
        })
        .collect()
}

pub fn count_items(db: &Database) -> i64 {
    let mut stmt = db.prepare("SELECT COUNT(*) FROM items").expect("prepare count");
    assert!(stmt.next_row().expect("step count"));
    stmt.get(0).expect("read count")
}
