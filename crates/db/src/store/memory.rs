//! In-process [`DataStore`] used by tests and by `DATABASE_URL=memory`.
//!
//! Mirrors the Postgres store's observable behaviour closely enough for the
//! HTTP and service layers: unknown tables and columns are errors, `id` and
//! `created_at` are assigned on insert, missing rows on update/delete are
//! [`StoreError::NotFound`] and non-unique keys are [`StoreError::Ambiguous`].
//! Tables are keyed by their full `schema.table` name.

use std::{cmp::Ordering, collections::HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DataStore, Row, StoreError, TableName, ambiguous, not_found};
use crate::models::query_descriptor::{Condition, DescriptorError, FilterOperator, QueryDescriptor};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a table with the given rows.
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.write().await.insert(table.to_string(), rows);
    }

    /// Create each table empty if it does not already exist.
    pub async fn create_tables(&self, tables: &[&str]) {
        let mut guard = self.tables.write().await;
        for table in tables {
            guard.entry(table.to_string()).or_default();
        }
    }
}

fn missing_table(table: &TableName) -> StoreError {
    StoreError::Backend(format!("relation \"{}\" does not exist", table))
}

fn missing_column(table: &TableName, column: &str) -> StoreError {
    StoreError::Backend(format!(
        "column \"{}\" does not exist in relation \"{}\"",
        column, table
    ))
}

/// Columns known for a table: the union of keys over its rows. An empty table
/// accepts any column.
fn check_columns<'a>(
    table: &TableName,
    rows: &[Row],
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    for column in columns {
        if !rows.iter().any(|row| row.contains_key(column)) {
            return Err(missing_column(table, column));
        }
    }
    Ok(())
}

/// Compare a stored value with a query value the way the database would after
/// coercing the query value to the column type: numbers numerically, strings
/// lexically, a numeric string against a number as a number.
fn compare(stored: &Value, wanted: &Value) -> Option<Ordering> {
    match (stored, wanted) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::String(b)) => b.parse::<bool>().ok().map(|b| a.cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL LIKE with `%` and `_` wildcards.
///
/// Two-pointer match that only ever backtracks to the latest `%`, so the cost
/// is bounded by `text.len() * pattern.len()` whatever the pattern.
fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let chars = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let text = chars(text);
    let mut pattern = chars(pattern);
    pattern.dedup_by(|a, b| *a == '%' && *b == '%');

    let (mut t, mut p) = (0, 0);
    // (pattern index after the latest `%`, text index it is currently matched up to)
    let mut resume: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p).copied() {
            Some('%') => {
                p += 1;
                resume = Some((p, t));
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match resume {
                Some((after_percent, absorbed)) => {
                    p = after_percent;
                    t = absorbed + 1;
                    resume = Some((after_percent, t));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

fn matches_condition(row: &Row, condition: &Condition) -> bool {
    let stored = row.get(&condition.column).unwrap_or(&Value::Null);

    match (condition.operator, &condition.value) {
        (FilterOperator::Eq | FilterOperator::Is, Value::Null) => stored.is_null(),
        (FilterOperator::Neq, Value::Null) => !stored.is_null(),
        (FilterOperator::Is, Value::Bool(b)) => stored.as_bool() == Some(*b),
        (FilterOperator::Like | FilterOperator::Ilike, Value::String(pattern)) => {
            let text = match stored {
                Value::Null => return false,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            like(&text, pattern, condition.operator == FilterOperator::Ilike)
        }
        (op, wanted) => match compare(stored, wanted) {
            Some(ordering) => match op {
                FilterOperator::Eq => ordering == Ordering::Equal,
                FilterOperator::Neq => ordering != Ordering::Equal,
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::Gte => ordering != Ordering::Less,
                FilterOperator::Lt => ordering == Ordering::Less,
                FilterOperator::Lte => ordering != Ordering::Greater,
                _ => false,
            },
            None => false,
        },
    }
}

/// Postgres sorts NULLs last ascending and first descending.
fn order_rows(rows: &mut [Row], query: &QueryDescriptor) {
    rows.sort_by(|a, b| {
        for clause in &query.order {
            let left = a.get(&clause.column).unwrap_or(&Value::Null);
            let right = b.get(&clause.column).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = if clause.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn key_matches(row: &Row, id_column: &str, id_value: &Value) -> bool {
    row.get(id_column)
        .and_then(|stored| compare(stored, id_value))
        .is_some_and(|ordering| ordering == Ordering::Equal)
}

/// Index of the one row whose key equals `id_value`.
fn single_match(
    table: &TableName,
    rows: &[Row],
    id_column: &str,
    id_value: &Value,
) -> Result<usize, StoreError> {
    let mut matching = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| key_matches(row, id_column, id_value))
        .map(|(index, _)| index);

    match (matching.next(), matching.next()) {
        (Some(index), None) => Ok(index),
        (None, _) => Err(not_found(table, id_column, id_value)),
        (Some(_), Some(_)) => Err(ambiguous(table, id_column, id_value)),
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch_rows(
        &self,
        table: &TableName,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, StoreError> {
        query.validate()?;
        let tables = self.tables.read().await;
        let rows = tables.get(&table.to_string()).ok_or_else(|| missing_table(table))?;

        check_columns(
            table,
            rows,
            query
                .filter
                .iter()
                .map(|c| c.column.as_str())
                .chain(query.order.iter().map(|o| o.column.as_str())),
        )?;

        let mut selected: Vec<Row> = rows
            .iter()
            .filter(|row| query.filter.iter().all(|c| matches_condition(row, c)))
            .cloned()
            .collect();
        order_rows(&mut selected, query);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_row(&self, table: &TableName, mut row: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(&table.to_string())
            .ok_or_else(|| missing_table(table))?;
        check_columns(table, rows, row.keys().map(String::as_str))?;

        if !row.contains_key("id") {
            row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        if !row.contains_key("created_at") {
            row.insert(
                "created_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        rows.push(row.clone());
        Ok(row)
    }

    async fn update_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
        patch: Row,
    ) -> Result<Row, StoreError> {
        if patch.is_empty() {
            return Err(DescriptorError::EmptyPatch.into());
        }
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(&table.to_string())
            .ok_or_else(|| missing_table(table))?;
        check_columns(
            table,
            rows,
            patch.keys().map(String::as_str).chain([id_column]),
        )?;

        let index = single_match(table, rows, id_column, id_value)?;
        let row = &mut rows[index];
        row.extend(patch);
        Ok(row.clone())
    }

    async fn delete_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(&table.to_string())
            .ok_or_else(|| missing_table(table))?;
        check_columns(table, rows, [id_column])?;

        let index = single_match(table, rows, id_column, id_value)?;
        rows.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::query_descriptor::OrderClause;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn table(name: &str) -> TableName {
        TableName::parse(name).unwrap()
    }

    async fn seeded_projects() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed(
                "projects",
                vec![
                    row(json!({ "id": "p3", "number": 3, "status": "Active", "name": "Bridge" })),
                    row(json!({ "id": "p1", "number": 1, "status": "Active", "name": "Annex" })),
                    row(json!({ "id": "p2", "number": 2, "status": "Closed", "name": "Canopy" })),
                ],
            )
            .await;
        store
    }

    fn numbers(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r["number"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_filter_and_order_active_projects() {
        let store = seeded_projects().await;
        let query = QueryDescriptor::new()
            .filter(Condition::eq("status", "Active"))
            .order(OrderClause::asc("number"));

        let rows = store.fetch_rows(&table("projects"), &query).await.unwrap();
        assert_eq!(numbers(&rows), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_filters_are_conjunctive() {
        let store = seeded_projects().await;
        let query = QueryDescriptor::new()
            .filter(Condition::eq("status", "Active"))
            .filter(Condition::new("number", FilterOperator::Gt, "1"));

        let rows = store.fetch_rows(&table("projects"), &query).await.unwrap();
        assert_eq!(numbers(&rows), vec![3]);
    }

    #[tokio::test]
    async fn test_secondary_order_breaks_ties() {
        let store = seeded_projects().await;
        let query = QueryDescriptor::new()
            .order(OrderClause::asc("status"))
            .order(OrderClause::desc("number"));

        let rows = store.fetch_rows(&table("projects"), &query).await.unwrap();
        assert_eq!(numbers(&rows), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_limit_offset_and_like() {
        let store = seeded_projects().await;
        let query = QueryDescriptor::new()
            .order(OrderClause::asc("number"))
            .offset(1)
            .limit(1);
        let rows = store.fetch_rows(&table("projects"), &query).await.unwrap();
        assert_eq!(numbers(&rows), vec![2]);

        let query = QueryDescriptor::new().filter(Condition::new("name", FilterOperator::Ilike, "%an%"));
        let rows = store.fetch_rows(&table("projects"), &query).await.unwrap();
        assert_eq!(numbers(&rows), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_table_and_column() {
        let store = seeded_projects().await;
        let err = store
            .fetch_rows(&table("nope"), &QueryDescriptor::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), r#"relation "nope" does not exist"#);

        let query = QueryDescriptor::new().filter(Condition::eq("colour", "red"));
        assert!(store.fetch_rows(&table("projects"), &query).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_assigns_server_fields_and_round_trips() {
        let store = seeded_projects().await;
        let inserted = store
            .insert_row(&table("projects"), row(json!({ "number": 4, "status": "Active", "name": "Depot" })))
            .await
            .unwrap();
        let id = inserted["id"].clone();
        assert!(inserted.contains_key("created_at"));

        let rows = store
            .fetch_rows(&table("projects"), &QueryDescriptor::new().filter(Condition::eq("id", id)))
            .await
            .unwrap();
        assert_eq!(rows, vec![inserted]);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows_are_not_found() {
        let store = seeded_projects().await;

        let updated = store
            .update_row(&table("projects"), "id", &json!("p2"), row(json!({ "status": "Active" })))
            .await
            .unwrap();
        assert_eq!(updated["status"], json!("Active"));

        let err = store
            .update_row(&table("projects"), "id", &json!("missing"), row(json!({ "status": "Active" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.delete_row(&table("projects"), "number", &json!("2")).await.unwrap();
        let err = store
            .delete_row(&table("projects"), "number", &json!(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_non_unique_key_changes_nothing() {
        let store = seeded_projects().await;

        let err = store
            .update_row(&table("projects"), "status", &json!("Active"), row(json!({ "name": "Renamed" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Ambiguous { .. }));

        let err = store
            .delete_row(&table("projects"), "status", &json!("Active"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Ambiguous { .. }));

        let rows = store
            .fetch_rows(&table("projects"), &QueryDescriptor::new().order(OrderClause::asc("number")))
            .await
            .unwrap();
        assert_eq!(numbers(&rows), vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r["name"] != json!("Renamed")));

        // A key that is unique among the rows still works
        store.delete_row(&table("projects"), "status", &json!("Closed")).await.unwrap();
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like("Annex", "%nn%", false));
        assert!(like("Annex", "A_nex", false));
        assert!(like("Annex", "%", false));
        assert!(like("", "%%", false));
        assert!(!like("Annex", "annex", false));
        assert!(like("Annex", "annex", true));
        assert!(!like("Annex", "A_ex", false));
        assert!(like("abcabd", "%ab_", false));
        assert!(!like("abc", "%b", false));
    }

    #[test]
    fn test_like_with_many_percent_signs_is_fast() {
        let text = "a".repeat(5_000);
        let pattern = format!("{}b", "%_".repeat(40));
        let start = std::time::Instant::now();

        assert!(!like(&text, &format!("{}b", "%".repeat(14)), false));
        assert!(!like(&text, &pattern, false));
        assert!(like(&format!("{}b", text), &pattern, false));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tables_are_keyed_by_schema() {
        let store = MemoryStore::new();
        store.create_tables(&["invoices", "billing.invoices"]).await;

        store
            .insert_row(&table("billing.invoices"), row(json!({ "number": 7 })))
            .await
            .unwrap();

        let billing = store
            .fetch_rows(&table("billing.invoices"), &QueryDescriptor::new())
            .await
            .unwrap();
        let public = store
            .fetch_rows(&table("invoices"), &QueryDescriptor::new())
            .await
            .unwrap();
        assert_eq!(billing.len(), 1);
        assert!(public.is_empty());

        let err = store
            .fetch_rows(&table("archive.invoices"), &QueryDescriptor::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), r#"relation "archive.invoices" does not exist"#);
    }
}
