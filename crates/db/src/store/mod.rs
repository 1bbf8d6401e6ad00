//! Table-agnostic access to the backing store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::query_descriptor::{DescriptorError, QueryDescriptor};

/// A single row as returned by the store: column name to JSON value
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Failure reported by a non-sqlx backend, carrying its message verbatim
    #[error("{0}")]
    Backend(String),
    #[error("no row in {table} where {column} = {value}")]
    NotFound {
        table: String,
        column: String,
        value: String,
    },
    #[error("more than one row in {table} where {column} = {value}")]
    Ambiguous {
        table: String,
        column: String,
        value: String,
    },
    /// A bound value the store could not coerce to its column's type
    #[error("{0}")]
    InvalidValue(String),
    #[error(transparent)]
    Invalid(#[from] DescriptorError),
}

/// Name of a table, optionally schema-qualified (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        let invalid = || DescriptorError::InvalidTable(raw.escape_default().to_string());
        if raw.contains('\0') {
            return Err(invalid());
        }
        match raw.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self {
                    schema: Some(schema.to_string()),
                    name: name.to_string(),
                })
            }
            None if !raw.is_empty() => Ok(Self {
                schema: None,
                name: raw.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// Double-quoted SQL form, each part escaped separately
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// CRUD surface every backing store provides.
///
/// Each call is a single round trip; nothing is batched or wrapped in a
/// transaction. Column names are passed through unchecked and rejected by the
/// store itself when they do not exist.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn fetch_rows(
        &self,
        table: &TableName,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, StoreError>;

    async fn insert_row(&self, table: &TableName, row: Row) -> Result<Row, StoreError>;

    /// Update the single row where `id_column = id_value`. A missing row is
    /// [`StoreError::NotFound`]; a key matching several rows is
    /// [`StoreError::Ambiguous`] and changes nothing.
    async fn update_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
        patch: Row,
    ) -> Result<Row, StoreError>;

    /// Delete the single row where `id_column = id_value`, with the same
    /// not-found and ambiguity rules as [`DataStore::update_row`].
    async fn delete_row(
        &self,
        table: &TableName,
        id_column: &str,
        id_value: &Value,
    ) -> Result<(), StoreError>;
}

fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn not_found(table: &TableName, column: &str, value: &Value) -> StoreError {
    StoreError::NotFound {
        table: table.to_string(),
        column: column.to_string(),
        value: key_text(value),
    }
}

pub(crate) fn ambiguous(table: &TableName, column: &str, value: &Value) -> StoreError {
    StoreError::Ambiguous {
        table: table.to_string(),
        column: column.to_string(),
        value: key_text(value),
    }
}
