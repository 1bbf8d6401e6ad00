//! Process configuration read from the environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use services::services::{document_render::RenderOptions, retry::RetryPolicy};
use thiserror::Error;
use url::Url;
use utils::env::{self, EnvError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("invalid APP_BASE_URL: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("invalid listen address {0}")]
    ListenAddr(String),
}

/// Deployment environment; only `production` changes behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            _ => AppEnv::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == AppEnv::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub listen_addr: SocketAddr,
    /// Origin of the web app serving the print pages
    pub app_base_url: Url,
    pub app_env: AppEnv,
    /// Tables reachable through `/api/data`; empty means all
    pub exposed_tables: Vec<String>,
    pub render: RenderOptions,
    pub chrome_executable: Option<PathBuf>,
    pub sentry_dsn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::optional("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = env::parse_or("PORT", 3001)?;
        let listen_addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::ListenAddr(format!("{}:{}", host, port)))?;

        let app_base_url = Url::parse(
            &env::optional("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
        )?;

        let render = RenderOptions {
            retry: RetryPolicy::new(
                env::parse_or("RENDER_RETRIES", 3usize)?,
                Duration::from_millis(env::parse_or("RENDER_BACKOFF_MS", 1000u64)?),
            ),
            stage_timeout: Duration::from_secs(env::parse_or("RENDER_STAGE_TIMEOUT_SECS", 60u64)?),
        };

        Ok(Self {
            database_url: env::required("DATABASE_URL")?,
            database_max_connections: env::parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            listen_addr,
            app_base_url,
            app_env: AppEnv::parse(&env::optional("APP_ENV").unwrap_or_default()),
            exposed_tables: env::list("EXPOSED_TABLES"),
            render,
            chrome_executable: env::optional("CHROME_EXECUTABLE").map(PathBuf::from),
            sentry_dsn: env::optional("SENTRY_DSN"),
        })
    }

    /// Whether `/api/data/{table}` may touch `table`
    pub fn is_exposed(&self, table: &str) -> bool {
        self.exposed_tables.is_empty() || self.exposed_tables.iter().any(|t| t == table)
    }

    /// URL of the server-rendered print view for an invoice
    pub fn invoice_print_url(&self, invoice_id: &str) -> Result<Url, url::ParseError> {
        let mut url = self.app_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["invoices", invoice_id, "print"]);
        Ok(url)
    }
}
