//! PDF rendering of server-rendered pages through a headless browser.
//!
//! A render walks `Launching -> Navigating -> Rendering`. Each stage is
//! retried on its own budget and bounded by a per-attempt timeout. The browser
//! session is closed on every exit path.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::retry::{RetryPolicy, retry};

/// Stage of a render, as reported in logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RenderStage {
    Launch,
    Navigate,
    Render,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("failed to load {url}: {message}")]
    Navigation { url: String, message: String },
    #[error("failed to print pdf: {0}")]
    Print(String),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: RenderStage, after: Duration },
    #[error("browser produced an empty pdf")]
    EmptyDocument,
    #[error("failed to close browser: {0}")]
    Close(String),
}

impl RenderError {
    /// Stable identifier for API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Launch(_) => "launch_failed",
            RenderError::Navigation { .. } => "navigation_failed",
            RenderError::Print(_) => "render_failed",
            RenderError::Timeout { .. } => "timeout",
            RenderError::EmptyDocument => "empty_document",
            RenderError::Close(_) => "close_failed",
        }
    }
}

/// A render that exhausted the retries of one of its stages
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct RenderFailure {
    pub stage: RenderStage,
    #[source]
    pub source: RenderError,
}

/// Starts browser processes.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError>;
}

/// One running browser with a single page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and wait for it to finish loading.
    async fn navigate(&self, url: &str) -> Result<(), RenderError>;

    async fn print_pdf(&self) -> Result<Vec<u8>, RenderError>;

    /// Terminate the browser process.
    async fn close(&self) -> Result<(), RenderError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub retry: RetryPolicy,
    /// Bound on a single attempt of any stage
    pub stage_timeout: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct DocumentRenderer {
    driver: Arc<dyn BrowserDriver>,
    options: RenderOptions,
}

impl DocumentRenderer {
    pub fn new(driver: Arc<dyn BrowserDriver>, options: RenderOptions) -> Self {
        Self { driver, options }
    }

    /// Render `url` to PDF bytes.
    pub async fn render_pdf(&self, url: &str) -> Result<Vec<u8>, RenderFailure> {
        debug!(url, stage = %RenderStage::Launch, "render started");
        let session = self
            .stage(RenderStage::Launch, || self.driver.launch())
            .await?;

        let result = self.navigate_and_print(session.as_ref(), url).await;

        if let Err(e) = session.close().await {
            warn!(url, error = %e, "failed to close browser session");
        }

        match &result {
            Ok(pdf) => info!(url, bytes = pdf.len(), "render completed"),
            Err(failure) => warn!(url, stage = %failure.stage, error = %failure.source, "render failed"),
        }
        result
    }

    async fn navigate_and_print(
        &self,
        session: &dyn BrowserSession,
        url: &str,
    ) -> Result<Vec<u8>, RenderFailure> {
        self.stage(RenderStage::Navigate, || session.navigate(url))
            .await?;

        let pdf = self
            .stage(RenderStage::Render, || session.print_pdf())
            .await?;
        if pdf.is_empty() {
            return Err(RenderFailure {
                stage: RenderStage::Render,
                source: RenderError::EmptyDocument,
            });
        }
        Ok(pdf)
    }

    /// One stage with its own fresh retry budget; each attempt is timed out.
    async fn stage<T, F, Fut>(&self, stage: RenderStage, mut operation: F) -> Result<T, RenderFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RenderError>>,
    {
        let stage_timeout = self.options.stage_timeout;
        let label = stage.to_string();

        retry(&label, self.options.retry, || {
            let attempt = operation();
            async move {
                match timeout(stage_timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(RenderError::Timeout {
                        stage,
                        after: stage_timeout,
                    }),
                }
            }
        })
        .await
        .map_err(|source| RenderFailure { stage, source })
    }
}
