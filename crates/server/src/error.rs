use std::error::Error as _;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use db::models::query_descriptor::DescriptorError;
use serde_json::json;
use services::services::{data_access::FailureKind, document_render::RenderFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Store(String),
    #[error("pdf generation failed: {failure}")]
    Render {
        failure: RenderFailure,
        /// Include the error source chain in the body
        expose_stack: bool,
    },
}

impl ApiError {
    /// Map a failed data envelope onto an HTTP error.
    pub fn from_failure((kind, message): (FailureKind, String)) -> Self {
        match kind {
            FailureKind::NotFound => ApiError::NotFound(message),
            FailureKind::Invalid => ApiError::BadRequest(message),
            FailureKind::Store => ApiError::Store(message),
        }
    }

    pub fn render(failure: RenderFailure, expose_stack: bool) -> Self {
        ApiError::Render {
            failure,
            expose_stack,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Descriptor(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Render { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::Render {
                failure,
                expose_stack,
            } => {
                tracing::error!(stage = %failure.stage, error = %failure.source, "PDF generation failed");

                let mut body = json!({
                    "error": "Failed to generate PDF",
                    "message": failure.source.to_string(),
                    "kind": failure.source.kind(),
                    "stage": failure.stage,
                    "timestamp": Utc::now().to_rfc3339(),
                });
                if *expose_stack {
                    let mut chain = vec![failure.to_string()];
                    let mut source = failure.source();
                    while let Some(cause) = source {
                        chain.push(cause.to_string());
                        source = cause.source();
                    }
                    body["stack"] = json!(chain);
                }
                body
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(error = %other, "request failed");
                }
                json!({ "error": other.to_string() })
            }
        };

        (status, Json(body)).into_response()
    }
}
