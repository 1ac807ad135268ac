//! Placeholder Numbering Properties
//!
//! For any mix of valued and NULL entries, a clause must emit exactly one
//! numbered placeholder per valued entry, in insertion order, and bind the
//! values in that same order.

use proptest::prelude::*;
use sqlbridge::{Database, Value, ValueClause, WhereClause};

fn entries() -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::of(-1_000i64..1_000), 1..12)
}

fn expected_values(entries: &[Option<i64>]) -> Vec<Value> {
    entries.iter().flatten().map(|v| Value::Integer(*v)).collect()
}

fn question_marks(sql: &str) -> usize {
    sql.matches('?').count()
}

proptest! {
    #[test]
    fn where_clause_numbers_only_valued_entries(entries in entries()) {
        let mut clause = WhereClause::new();
        for (i, value) in entries.iter().enumerate() {
            clause.add(&format!("c{i}"), *value);
        }

        let valued = entries.iter().filter(|v| v.is_some()).count();
        let sql = clause.to_condition_sql().unwrap();

        prop_assert_eq!(clause.len(), entries.len());
        prop_assert_eq!(clause.placeholder_count(), valued);
        prop_assert_eq!(question_marks(&sql), valued);
        prop_assert_eq!(clause.values(), expected_values(&entries));
        for n in 1..=valued {
            let placeholder = format!("?{n}");
            prop_assert!(sql.contains(&placeholder));
        }
        let next = format!("?{}", valued + 1);
        prop_assert!(!sql.contains(&next));
    }

    #[test]
    fn value_clause_numbers_only_valued_entries(entries in entries()) {
        let mut clause = ValueClause::new();
        for (i, value) in entries.iter().enumerate() {
            match value {
                Some(v) => clause.add(&format!("c{i}"), *v),
                None => clause.add_null(&format!("c{i}")),
            };
        }

        let valued = entries.iter().filter(|v| v.is_some()).count();
        let insert = clause.to_insert_sql("t").unwrap();
        let update = clause.to_update_sql("t", 1).unwrap();

        prop_assert_eq!(clause.placeholder_count(), valued);
        prop_assert_eq!(question_marks(&insert), valued);
        prop_assert_eq!(question_marks(&update), valued);
        prop_assert_eq!(clause.values(), expected_values(&entries));
    }

    #[test]
    fn engine_agrees_on_parameter_count(entries in entries()) {
        let db = Database::open_in_memory().unwrap();
        let columns = (0..entries.len())
            .map(|i| format!("c{i} INTEGER"))
            .collect::<Vec<_>>()
            .join(", ");
        db.execute_batch(&format!("CREATE TABLE t ({columns})")).unwrap();

        let mut row = ValueClause::new();
        let mut filter = WhereClause::new();
        for (i, value) in entries.iter().enumerate() {
            row.add(&format!("c{i}"), *value);
            filter.add(&format!("c{i}"), *value);
        }

        let stmt = db.prepare(&row.to_insert_sql("t").unwrap()).unwrap();
        prop_assert_eq!(stmt.parameter_count(), row.placeholder_count());
        drop(stmt);

        row.insert(&db, "t").unwrap();
        prop_assert_eq!(filter.count(&db, "t").unwrap(), 1);
        prop_assert_eq!(filter.select(&db, "t").unwrap().len(), 1);
    }
}
