//! Headless Chromium driver for [`DocumentRenderer`](super::document_render::DocumentRenderer).

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::browser_protocol::{
        fetch::{
            ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
            RequestPattern, RequestStage,
        },
        network::{ErrorReason, ResourceType},
        page::PrintToPdfParams,
    },
};
use futures::StreamExt;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use super::document_render::{BrowserDriver, BrowserSession, RenderError};

/// Resource types a print page needs; everything else is aborted.
const ALLOWED_RESOURCES: [ResourceType; 4] = [
    ResourceType::Document,
    ResourceType::Stylesheet,
    ResourceType::Script,
    ResourceType::Font,
];

fn is_allowed(resource: &ResourceType) -> bool {
    ALLOWED_RESOURCES.contains(resource)
}

#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver {
    executable: Option<PathBuf>,
    request_timeout: Option<Duration>,
}

impl ChromiumDriver {
    pub fn new(executable: Option<PathBuf>, request_timeout: Option<Duration>) -> Self {
        Self {
            executable,
            request_timeout,
        }
    }

    fn config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--font-render-hinting=none");
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(request_timeout) = self.request_timeout {
            builder = builder.request_timeout(request_timeout);
        }
        builder.build().map_err(RenderError::Launch)
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
        let (mut browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });

        match open_filtered_page(&browser).await {
            Ok((page, interceptor)) => Ok(Box::new(ChromiumSession {
                browser: Mutex::new(browser),
                page,
                handler_task,
                interceptor,
            })),
            Err(e) => {
                if let Err(kill_err) = browser.kill().await.transpose() {
                    warn!(error = %kill_err, "failed to kill browser after launch error");
                }
                handler_task.abort();
                Err(e)
            }
        }
    }
}

/// Open a blank page whose requests are paused and filtered by resource type.
async fn open_filtered_page(browser: &Browser) -> Result<(Page, JoinHandle<()>), RenderError> {
    let launch_err = |e: chromiumoxide::error::CdpError| RenderError::Launch(e.to_string());

    let page = browser.new_page("about:blank").await.map_err(launch_err)?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(launch_err)?;

    let intercepting = page.clone();
    let interceptor = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let outcome = if is_allowed(&event.resource_type) {
                intercepting
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            } else {
                debug!(url = %event.request.url, resource = ?event.resource_type, "blocked request");
                intercepting
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                debug!(error = %e, "failed to resolve paused request");
            }
        }
    });

    let enable = EnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
        handle_auth_requests: None,
    };
    if let Err(e) = page.execute(enable).await {
        interceptor.abort();
        return Err(launch_err(e));
    }

    Ok((page, interceptor))
}

pub struct ChromiumSession {
    browser: Mutex<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
    interceptor: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        let navigation_err = |e: chromiumoxide::error::CdpError| RenderError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        };

        self.page.goto(url).await.map_err(navigation_err)?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(navigation_err)?;
        Ok(())
    }

    async fn print_pdf(&self) -> Result<Vec<u8>, RenderError> {
        let params = PrintToPdfParams {
            print_background: Some(true),
            prefer_css_page_size: Some(true),
            ..Default::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|e| RenderError::Print(e.to_string()))
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.interceptor.abort();

        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "graceful browser close failed, killing process");
            if let Some(Err(kill_err)) = browser.kill().await {
                warn!(error = %kill_err, "failed to kill browser process");
            }
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "failed to reap browser process");
        }

        self.handler_task.abort();
        closed
            .map(|_| ())
            .map_err(|e| RenderError::Close(e.to_string()))
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // chromiumoxide kills the child process when the Browser drops
        self.interceptor.abort();
        self.handler_task.abort();
    }
}
