use axum::{Router, body::Body, http::{HeaderName, Request}};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::AppState;

pub mod data;
pub mod health;
pub mod invoices;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router())
        .merge(data::router())
        .merge(invoices::router());

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    // Layers wrap outward: the id is set before the trace span reads it
    Router::new()
        .nest("/api", api)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{
        body::to_bytes,
        http::{Method, StatusCode, header},
        response::Response,
    };
    use db::{
        DBService,
        models::query_descriptor::QueryDescriptor,
        store::{DataStore, Row, StoreError, TableName},
    };
    use serde_json::{Value, json};
    use services::services::document_render::{
        BrowserDriver, BrowserSession, DocumentRenderer, RenderError, RenderOptions,
    };
    use tower::ServiceExt;
    use url::Url;

    use super::*;
    use crate::config::{AppEnv, Config};

    #[derive(Default)]
    struct FakeBrowser {
        fail_render: bool,
        closes: AtomicUsize,
        prints: AtomicUsize,
    }

    struct FakeDriver(Arc<FakeBrowser>);
    struct FakeSession(Arc<FakeBrowser>);

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&self, _url: &str) -> Result<(), RenderError> {
            Ok(())
        }

        async fn print_pdf(&self) -> Result<Vec<u8>, RenderError> {
            self.0.prints.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_render {
                return Err(RenderError::Print("Target closed".into()));
            }
            Ok(b"%PDF-1.7\n%fake".to_vec())
        }

        async fn close(&self) -> Result<(), RenderError> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(exposed_tables: Vec<String>) -> Config {
        Config {
            database_url: "memory".into(),
            database_max_connections: 1,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            app_base_url: Url::parse("http://localhost:3000").unwrap(),
            app_env: AppEnv::Development,
            exposed_tables,
            render: RenderOptions::default(),
            chrome_executable: None,
            sentry_dsn: None,
        }
    }

    async fn state(browser: Arc<FakeBrowser>, exposed_tables: Vec<String>) -> AppState {
        let db = DBService::in_memory(&["projects", "invoices"]).await;
        let renderer = DocumentRenderer::new(Arc::new(FakeDriver(browser)), RenderOptions::default());
        let state = AppState::new(config(exposed_tables), db, renderer);

        for (number, status) in [(3, "Active"), (1, "Active"), (2, "Closed")] {
            let row = json!({ "number": number, "status": status });
            assert!(state
                .data
                .insert_data("projects", row.as_object().cloned().unwrap())
                .await
                .is_success());
        }
        let invoice = json!({ "id": "inv-1", "invoice_number": "2024-017", "total": 1200 });
        assert!(state
            .data
            .insert_data("invoices", invoice.as_object().cloned().unwrap())
            .await
            .is_success());

        state
    }

    async fn send(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        router(state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn numbers(rows: &Value) -> Vec<i64> {
        rows.as_array()
            .unwrap()
            .iter()
            .map(|r| r["number"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_from_query_string() {
        let state = state(Arc::default(), vec![]).await;
        let response = send(
            &state,
            Method::GET,
            "/api/data/projects?filter.status.eq=Active&order.number=asc",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(numbers(&json_body(response).await), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_query_with_json_descriptor() {
        let state = state(Arc::default(), vec![]).await;
        let response = send(
            &state,
            Method::POST,
            "/api/data/projects/query",
            Some(json!({
                "filter": [{ "column": "number", "operator": "gte", "value": 2 }],
                "order": [{ "column": "number", "ascending": false }]
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(numbers(&json_body(response).await), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_insert_then_fetch_by_id() {
        let state = state(Arc::default(), vec![]).await;
        let response = send(
            &state,
            Method::POST,
            "/api/data/projects",
            Some(json!({ "number": 4, "status": "Active" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let inserted = json_body(response).await;
        let id = inserted["id"].as_str().unwrap().to_string();

        let response = send(
            &state,
            Method::GET,
            &format!("/api/data/projects?filter.id={}", id),
            None,
        )
        .await;
        let rows = json_body(response).await;
        assert_eq!(rows, json!([inserted]));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_rows_are_404() {
        let state = state(Arc::default(), vec![]).await;

        let response = send(
            &state,
            Method::PATCH,
            "/api/data/projects/nope",
            Some(json!({ "status": "Closed" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&state, Method::DELETE, "/api/data/projects/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(json_body(response).await["error"].is_string());

        let response = send(
            &state,
            Method::DELETE,
            "/api/data/projects/2?id_column=number",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_bad_requests_are_400() {
        let state = state(Arc::default(), vec![]).await;

        let response = send(&state, Method::GET, "/api/data/projects?limit=ten", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, Method::POST, "/api/data/projects", Some(json!([1, 2]))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, Method::PATCH, "/api/data/projects/x", Some(json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_table_is_store_error_and_unexposed_table_is_404() {
        let state_all = state(Arc::default(), vec![]).await;
        let response = send(&state_all, Method::GET, "/api/data/timesheets", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "relation \"timesheets\" does not exist" })
        );

        let state_limited = state(Arc::default(), vec!["projects".into()]).await;
        let response = send(&state_limited, Method::GET, "/api/data/invoices", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoice_pdf_download() {
        let browser = Arc::new(FakeBrowser::default());
        let state = state(browser.clone(), vec![]).await;

        let response = send(&state, Method::GET, "/api/invoices/inv-1/pdf", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"invoice-2024-017.pdf\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoice_pdf_failure_is_json_500_and_closes_browser() {
        let browser = Arc::new(FakeBrowser {
            fail_render: true,
            ..Default::default()
        });
        let state = state(browser.clone(), vec![]).await;

        let response = send(&state, Method::GET, "/api/invoices/inv-1/pdf", None).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to generate PDF");
        assert_eq!(body["kind"], "render_failed");
        assert_eq!(body["stage"], "render");
        assert!(body["timestamp"].is_string());
        assert!(body["stack"].is_array());
        assert_eq!(browser.prints.load(Ordering::SeqCst), 4);
        assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoice_pdf_for_missing_invoice_is_404() {
        let browser = Arc::new(FakeBrowser::default());
        let state = state(browser.clone(), vec![]).await;

        let response = send(&state, Method::GET, "/api/invoices/inv-404/pdf", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(browser.prints.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoice_pdf_failure_in_production_hides_stack() {
        let browser = Arc::new(FakeBrowser {
            fail_render: true,
            ..Default::default()
        });
        let mut state = state(browser.clone(), vec![]).await;
        let mut config = (*state.config).clone();
        config.app_env = AppEnv::Production;
        state.config = Arc::new(config);

        let response = send(&state, Method::GET, "/api/invoices/inv-1/pdf", None).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body.get("stack").is_none());
        assert_eq!(body["error"], "Failed to generate PDF");
        assert!(body["message"].as_str().is_some_and(|m| m.contains("Target closed")));
        assert_eq!(body["kind"], "render_failed");
        assert_eq!(body["stage"], "render");
        assert!(body["timestamp"].is_string());
        assert_eq!(browser.closes.load(Ordering::SeqCst), 1);
    }

    /// Store whose key column rejects every value, like a uuid column given free text
    struct UncoercibleKeys;

    #[async_trait]
    impl DataStore for UncoercibleKeys {
        async fn fetch_rows(
            &self,
            _table: &TableName,
            query: &QueryDescriptor,
        ) -> Result<Vec<Row>, StoreError> {
            let value = query.filter.first().map(|c| c.value.to_string()).unwrap_or_default();
            Err(StoreError::InvalidValue(format!(
                "invalid input syntax for type uuid: {}",
                value
            )))
        }

        async fn insert_row(&self, _table: &TableName, _row: Row) -> Result<Row, StoreError> {
            Err(StoreError::Backend("read only".into()))
        }

        async fn update_row(
            &self,
            _table: &TableName,
            _id_column: &str,
            _id_value: &Value,
            _patch: Row,
        ) -> Result<Row, StoreError> {
            Err(StoreError::Backend("read only".into()))
        }

        async fn delete_row(
            &self,
            _table: &TableName,
            _id_column: &str,
            _id_value: &Value,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("read only".into()))
        }
    }

    #[tokio::test]
    async fn test_malformed_invoice_id_is_404_and_malformed_filter_is_400() {
        let browser = Arc::new(FakeBrowser::default());
        let db = DBService {
            store: Arc::new(UncoercibleKeys),
            pool: None,
        };
        let renderer = DocumentRenderer::new(
            Arc::new(FakeDriver(browser.clone())),
            RenderOptions::default(),
        );
        let state = AppState::new(config(vec![]), db, renderer);

        let response = send(&state, Method::GET, "/api/invoices/inv-404/pdf", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(browser.prints.load(Ordering::SeqCst), 0);

        let response = send(&state, Method::GET, "/api/data/invoices?filter.id=inv-404", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "invalid input syntax for type uuid: \"inv-404\"" })
        );
    }

    #[tokio::test]
    async fn test_non_unique_key_is_400_and_keeps_rows() {
        let state = state(Arc::default(), vec![]).await;

        let response = send(
            &state,
            Method::DELETE,
            "/api/data/projects/Active?id_column=status",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&state, Method::GET, "/api/data/projects", None).await;
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 3);
    }
}
