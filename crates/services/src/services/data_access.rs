//! Table-agnostic CRUD over the injected backing store.
//!
//! Every operation performs one store call and reports its outcome as a
//! [`ResultEnvelope`]; failures are never returned as `Err` or panics.

use std::sync::Arc;

use db::{
    models::query_descriptor::QueryDescriptor,
    store::{DataStore, Row, StoreError, TableName},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;
use ts_rs::TS;
use tracing::{debug, warn};

/// Why an operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The targeted row does not exist
    NotFound,
    /// The backing store rejected or failed the call
    Store,
    /// The request was malformed, names more than one row, or carries a value
    /// the column cannot hold
    Invalid,
}

/// Uniform outcome of a data operation. Callers must branch on the status
/// before using the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultEnvelope<T> {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<T>,
    },
    Error {
        message: String,
        kind: FailureKind,
    },
}

impl<T> ResultEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self::Success { data: Some(data) }
    }

    pub fn empty() -> Self {
        Self::Success { data: None }
    }

    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Payload of a successful envelope, if any
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => data.as_ref(),
            Self::Error { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, (FailureKind, String)> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Error { message, kind } => Err((kind, message)),
        }
    }
}

impl<T> From<StoreError> for ResultEnvelope<T> {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound { .. } => FailureKind::NotFound,
            StoreError::Invalid(_) | StoreError::InvalidValue(_) | StoreError::Ambiguous { .. } => {
                FailureKind::Invalid
            }
            StoreError::Database(_) | StoreError::Backend(_) => FailureKind::Store,
        };
        // Surface the database's own wording rather than sqlx's wrapper text
        let message = match &err {
            StoreError::Database(inner) => inner
                .as_database_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| inner.to_string()),
            other => other.to_string(),
        };
        Self::error(kind, message)
    }
}

#[derive(Clone)]
pub struct DataAccess {
    store: Arc<dyn DataStore>,
}

impl DataAccess {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    fn table<T>(table: &str) -> Result<TableName, ResultEnvelope<T>> {
        TableName::parse(table).map_err(|e| ResultEnvelope::error(FailureKind::Invalid, e.to_string()))
    }

    pub async fn fetch_data(&self, table: &str, query: &QueryDescriptor) -> ResultEnvelope<Vec<Row>> {
        let table = match Self::table(table) {
            Ok(table) => table,
            Err(envelope) => return envelope,
        };

        match self.store.fetch_rows(&table, query).await {
            Ok(rows) => {
                debug!(table = %table, rows = rows.len(), "fetch_data");
                ResultEnvelope::success(rows)
            }
            Err(e) => {
                warn!(table = %table, error = %e, "fetch_data failed");
                e.into()
            }
        }
    }

    pub async fn insert_data(&self, table: &str, row: Row) -> ResultEnvelope<Row> {
        let table = match Self::table(table) {
            Ok(table) => table,
            Err(envelope) => return envelope,
        };

        match self.store.insert_row(&table, row).await {
            Ok(inserted) => {
                debug!(table = %table, "insert_data");
                ResultEnvelope::success(inserted)
            }
            Err(e) => {
                warn!(table = %table, error = %e, "insert_data failed");
                e.into()
            }
        }
    }

    /// Update the row where `id_column = id_value`. A missing row is an
    /// error of kind [`FailureKind::NotFound`], not a silent no-op.
    pub async fn update_data(
        &self,
        table: &str,
        id_column: &str,
        id_value: impl Into<Value>,
        patch: Row,
    ) -> ResultEnvelope<Row> {
        let table = match Self::table(table) {
            Ok(table) => table,
            Err(envelope) => return envelope,
        };
        let id_value = id_value.into();

        match self.store.update_row(&table, id_column, &id_value, patch).await {
            Ok(updated) => {
                debug!(table = %table, id_column, id = %id_value, "update_data");
                ResultEnvelope::success(updated)
            }
            Err(e) => {
                warn!(table = %table, id_column, id = %id_value, error = %e, "update_data failed");
                e.into()
            }
        }
    }

    /// Delete the row where `id_column = id_value`. Success carries no data;
    /// a missing row is [`FailureKind::NotFound`].
    pub async fn delete_data(
        &self,
        table: &str,
        id_column: &str,
        id_value: impl Into<Value>,
    ) -> ResultEnvelope<()> {
        let table = match Self::table(table) {
            Ok(table) => table,
            Err(envelope) => return envelope,
        };
        let id_value = id_value.into();

        match self.store.delete_row(&table, id_column, &id_value).await {
            Ok(()) => {
                debug!(table = %table, id_column, id = %id_value, "delete_data");
                ResultEnvelope::empty()
            }
            Err(e) => {
                warn!(table = %table, id_column, id = %id_value, error = %e, "delete_data failed");
                e.into()
            }
        }
    }
}
