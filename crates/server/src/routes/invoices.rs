use axum::{
    Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use db::{
    models::query_descriptor::{Condition, QueryDescriptor},
    store::Row,
};
use serde_json::Value;
use services::services::data_access::FailureKind;
use tracing::info;

use crate::{AppState, error::ApiError};

const INVOICES_TABLE: &str = "invoices";

/// Columns tried, in order, for the attachment file name
const NUMBER_COLUMNS: [&str; 2] = ["invoice_number", "number"];

/// `invoice-<number>.pdf`, falling back to the id; unsafe characters become `_`.
fn attachment_name(invoice: &Row, id: &str) -> String {
    let label = NUMBER_COLUMNS
        .iter()
        .find_map(|column| match invoice.get(*column)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| id.to_string());

    let safe: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("invoice-{}.pdf", safe)
}

/// GET /api/invoices/{id}/pdf
pub async fn invoice_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let descriptor = QueryDescriptor::new()
        .filter(Condition::eq("id", id.clone()))
        .limit(1);

    let not_found = || ApiError::NotFound(format!("invoice {} not found", id));

    // An id the key column cannot hold (e.g. not a uuid) names no invoice
    let invoice = match state
        .data
        .fetch_data(INVOICES_TABLE, &descriptor)
        .await
        .into_result()
    {
        Ok(rows) => rows.unwrap_or_default().into_iter().next(),
        Err((FailureKind::Invalid, _)) => None,
        Err(failure) => return Err(ApiError::from_failure(failure)),
    }
    .ok_or_else(not_found)?;

    let url = state
        .config
        .invoice_print_url(&id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let pdf = state
        .renderer
        .render_pdf(url.as_str())
        .await
        .map_err(|failure| ApiError::render(failure, !state.config.app_env.is_production()))?;

    let filename = attachment_name(&invoice, &id);
    info!(invoice_id = %id, bytes = pdf.len(), filename = %filename, "invoice pdf generated");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        pdf,
    )
        .into_response())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/invoices/{id}/pdf", get(invoice_pdf))
}
