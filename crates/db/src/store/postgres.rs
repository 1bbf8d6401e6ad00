//! Postgres translation of [`QueryDescriptor`]s.
//!
//! Values are never spliced into SQL text. Each one is bound as a one-key
//! jsonb object and read back through
//! `jsonb_populate_record(NULL::<table>, $n)`, which coerces it to the
//! column's declared type (uuid, date, enum, numeric, ...). A column that does
//! not exist therefore fails inside Postgres rather than here.
//!
//! Updates and deletes address their row by `ctid` through a scalar subquery
//! on the key, so a key matching several rows fails with a cardinality
//! violation instead of touching all of them.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use tracing::debug;

use super::{DataStore, Row, StoreError, TableName, ambiguous, not_found, quote_ident};
use crate::models::query_descriptor::{
    Condition, DescriptorError, FilterOperator, QueryDescriptor, validate_column,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `more than one row returned by a subquery used as an expression`
const CARDINALITY_VIOLATION: &str = "21000";

/// Raised when a bound value does not fit the column type (bad uuid or date
/// text, numeric overflow).
const COERCION_FAILURES: [&str; 4] = ["22P02", "22007", "22008", "22003"];

fn is_coercion_failure(code: &str) -> bool {
    COERCION_FAILURES.contains(&code)
}

/// Translate the SQLSTATEs the query layer gives meaning to; `key` is the
/// row key of an update or delete.
fn store_error(err: sqlx::Error, key: Option<(&TableName, &str, &Value)>) -> StoreError {
    let Some(db_err) = err.as_database_error() else {
        return StoreError::Database(err);
    };
    let code = db_err.code().map(|code| code.into_owned());

    match (code.as_deref(), key) {
        (Some(CARDINALITY_VIOLATION), Some((table, column, value))) => {
            ambiguous(table, column, value)
        }
        (Some(code), _) if is_coercion_failure(code) => {
            StoreError::InvalidValue(db_err.message().to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn fetch_rows(
        &self,
        table: &TableName,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, StoreError> {
        query.validate()?;
        let mut builder = build_select(table, query);
        debug!(sql = builder.sql(), "fetch_rows");

        let rows = builder
            .build_query_scalar::<Json<Row>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn insert_row(&self, table: &TableName, row: Row) -> Result<Row, StoreError> {
        let mut builder = build_insert(table, row)?;
        debug!(sql = builder.sql(), "insert_row");

        let Json(inserted) = builder
            .build_query_scalar::<Json<Row>>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(inserted)
    }

    async fn update_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
        patch: Row,
    ) -> Result<Row, StoreError> {
        let mut builder = build_update(table, id_column, id_value, patch)?;
        debug!(sql = builder.sql(), "update_row");

        builder
            .build_query_scalar::<Json<Row>>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, Some((table, id_column, id_value))))?
            .map(|Json(row)| row)
            .ok_or_else(|| not_found(table, id_column, id_value))
    }

    async fn delete_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
    ) -> Result<(), StoreError> {
        let mut builder = build_delete(table, id_column, id_value)?;
        debug!(sql = builder.sql(), "delete_row");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(e, Some((table, id_column, id_value))))?;
        if result.rows_affected() == 0 {
            return Err(not_found(table, id_column, id_value));
        }
        Ok(())
    }
}

/// `(jsonb_populate_record(NULL::<table>, $n))."<column>"`
fn push_typed_value(
    builder: &mut QueryBuilder<'static, Postgres>,
    table: &TableName,
    column: &str,
    value: &Value,
) {
    let mut single = Map::new();
    single.insert(column.to_string(), value.clone());

    builder
        .push("(jsonb_populate_record(NULL::")
        .push(table.quoted())
        .push(", ")
        .push_bind(Json(Value::Object(single)))
        .push(")).")
        .push(quote_ident(column));
}

fn push_condition(
    builder: &mut QueryBuilder<'static, Postgres>,
    table: &TableName,
    condition: &Condition,
) {
    let column = format!("t.{}", quote_ident(&condition.column));

    match (condition.operator, &condition.value) {
        (FilterOperator::Eq | FilterOperator::Is, Value::Null) => {
            builder.push(column).push(" IS NULL");
        }
        (FilterOperator::Neq, Value::Null) => {
            builder.push(column).push(" IS NOT NULL");
        }
        (FilterOperator::Is, Value::Bool(true)) => {
            builder.push(column).push(" IS TRUE");
        }
        (FilterOperator::Is, Value::Bool(false)) => {
            builder.push(column).push(" IS FALSE");
        }
        (op @ (FilterOperator::Like | FilterOperator::Ilike), value) => {
            let pattern = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            builder
                .push(column)
                .push("::text ")
                .push(op.sql_symbol())
                .push(" ")
                .push_bind(pattern);
        }
        (op, value) => {
            builder.push(column).push(" ").push(op.sql_symbol()).push(" ");
            push_typed_value(builder, table, &condition.column, value);
        }
    }
}

pub(crate) fn build_select(
    table: &TableName,
    query: &QueryDescriptor,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT to_jsonb(t) FROM ");
    builder.push(table.quoted()).push(" AS t");

    for (i, condition) in query.filter.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        push_condition(&mut builder, table, condition);
    }

    for (i, clause) in query.order.iter().enumerate() {
        builder
            .push(if i == 0 { " ORDER BY t." } else { ", t." })
            .push(quote_ident(&clause.column))
            .push(if clause.ascending { " ASC" } else { " DESC" });
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(i64::from(limit));
    }
    if let Some(offset) = query.offset {
        builder.push(" OFFSET ").push_bind(i64::from(offset));
    }

    builder
}

pub(crate) fn build_insert(
    table: &TableName,
    row: Row,
) -> Result<QueryBuilder<'static, Postgres>, DescriptorError> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(table.quoted()).push(" AS t");

    if row.is_empty() {
        builder.push(" DEFAULT VALUES RETURNING to_jsonb(t)");
        return Ok(builder);
    }

    let mut columns = Vec::with_capacity(row.len());
    for column in row.keys() {
        validate_column(column)?;
        columns.push(quote_ident(column));
    }

    builder
        .push(" (")
        .push(columns.join(", "))
        .push(") SELECT ")
        .push(
            columns
                .iter()
                .map(|c| format!("r.{}", c))
                .collect::<Vec<_>>()
                .join(", "),
        )
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table.quoted())
        .push(", ")
        .push_bind(Json(Value::Object(row)))
        .push(") AS r RETURNING to_jsonb(t)");

    Ok(builder)
}

/// ` WHERE t.ctid = (SELECT s.ctid FROM <table> AS s, <key> AS k WHERE s.<id> = k.<id>)`
fn push_single_row_target(
    builder: &mut QueryBuilder<'static, Postgres>,
    table: &TableName,
    id_column: &str,
    id_value: &Value,
) {
    let mut key = Map::new();
    key.insert(id_column.to_string(), id_value.clone());
    let id = quote_ident(id_column);

    builder
        .push(" WHERE t.ctid = (SELECT s.ctid FROM ")
        .push(table.quoted())
        .push(" AS s, jsonb_populate_record(NULL::")
        .push(table.quoted())
        .push(", ")
        .push_bind(Json(Value::Object(key)))
        .push(") AS k WHERE s.")
        .push(&id)
        .push(" = k.")
        .push(&id)
        .push(")");
}

pub(crate) fn build_update(
    table: &TableName,
    id_column: &str,
    id_value: &Value,
    patch: Row,
) -> Result<QueryBuilder<'static, Postgres>, DescriptorError> {
    validate_column(id_column)?;
    if patch.is_empty() {
        return Err(DescriptorError::EmptyPatch);
    }

    let mut assignments = Vec::with_capacity(patch.len());
    for column in patch.keys() {
        validate_column(column)?;
        let quoted = quote_ident(column);
        assignments.push(format!("{} = r.{}", quoted, quoted));
    }

    let mut builder = QueryBuilder::new("UPDATE ");
    builder
        .push(table.quoted())
        .push(" AS t SET ")
        .push(assignments.join(", "))
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table.quoted())
        .push(", ")
        .push_bind(Json(Value::Object(patch)))
        .push(") AS r");
    push_single_row_target(&mut builder, table, id_column, id_value);
    builder.push(" RETURNING to_jsonb(t)");

    Ok(builder)
}

pub(crate) fn build_delete(
    table: &TableName,
    id_column: &str,
    id_value: &Value,
) -> Result<QueryBuilder<'static, Postgres>, DescriptorError> {
    validate_column(id_column)?;

    let mut builder = QueryBuilder::new("DELETE FROM ");
    builder.push(table.quoted()).push(" AS t");
    push_single_row_target(&mut builder, table, id_column, id_value);

    Ok(builder)
}
