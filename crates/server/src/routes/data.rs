//! Generic table routes backed by the query-translation layer.

use axum::{
    Json, Router,
    extract::{Path, Query, RawQuery, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, patch, post},
};
use db::{models::query_descriptor::QueryDescriptor, store::Row};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct IdColumnQuery {
    id_column: Option<String>,
}

impl IdColumnQuery {
    fn column(&self) -> &str {
        self.id_column.as_deref().unwrap_or("id")
    }
}

fn ensure_exposed(state: &AppState, table: &str) -> Result<(), ApiError> {
    if state.config.is_exposed(table) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("table {} is not available", table)))
    }
}

fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Row, ApiError> {
    let Json(value) = body?;
    match value {
        Value::Object(row) => Ok(row),
        _ => Err(ApiError::BadRequest(
            "request body must be a JSON object".to_string(),
        )),
    }
}

async fn fetch(
    state: &AppState,
    table: &str,
    descriptor: &QueryDescriptor,
) -> Result<Json<Vec<Row>>, ApiError> {
    let rows = state
        .data
        .fetch_data(table, descriptor)
        .await
        .into_result()
        .map_err(ApiError::from_failure)?
        .unwrap_or_default();
    Ok(Json(rows))
}

/// GET /api/data/{table}?filter.<column>.<op>=<value>&order.<column>=asc|desc&limit=&offset=
pub async fn list_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Row>>, ApiError> {
    ensure_exposed(&state, &table)?;
    let descriptor = QueryDescriptor::from_query_string(query.as_deref().unwrap_or_default())?;
    fetch(&state, &table, &descriptor).await
}

/// POST /api/data/{table}/query with a JSON descriptor body
pub async fn query_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    body: Result<Json<QueryDescriptor>, JsonRejection>,
) -> Result<Json<Vec<Row>>, ApiError> {
    ensure_exposed(&state, &table)?;
    let Json(descriptor) = body?;
    descriptor.validate()?;
    fetch(&state, &table, &descriptor).await
}

/// POST /api/data/{table}
pub async fn insert_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Row>), ApiError> {
    ensure_exposed(&state, &table)?;
    let row = object_body(body)?;

    let inserted = state
        .data
        .insert_data(&table, row)
        .await
        .into_result()
        .map_err(ApiError::from_failure)?
        .unwrap_or_default();
    Ok((StatusCode::CREATED, Json(inserted)))
}

/// PATCH /api/data/{table}/{id}?id_column=<column>
pub async fn update_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Query(key): Query<IdColumnQuery>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Row>, ApiError> {
    ensure_exposed(&state, &table)?;
    let patch = object_body(body)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "request body must set at least one column".to_string(),
        ));
    }

    let updated = state
        .data
        .update_data(&table, key.column(), id, patch)
        .await
        .into_result()
        .map_err(ApiError::from_failure)?
        .unwrap_or_default();
    Ok(Json(updated))
}

/// DELETE /api/data/{table}/{id}?id_column=<column>
pub async fn delete_row(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Query(key): Query<IdColumnQuery>,
) -> Result<StatusCode, ApiError> {
    ensure_exposed(&state, &table)?;

    state
        .data
        .delete_data(&table, key.column(), id)
        .await
        .into_result()
        .map_err(ApiError::from_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/data/{table}", get(list_rows).post(insert_row))
        .route("/data/{table}/query", post(query_rows))
        .route("/data/{table}/{id}", patch(update_row).delete(delete_row))
}
