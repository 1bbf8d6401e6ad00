use std::sync::Arc;

use anyhow::Context;
use db::{DBService, MEMORY_DATABASE_URL};
use server::{AppState, config::Config, routes};
use services::services::{chromium::ChromiumDriver, document_render::DocumentRenderer};
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("failed to load configuration")?;
    let _logging = init_tracing(config.sentry_dsn.as_deref(), config.app_env.as_str());

    let db = if config.database_url == MEMORY_DATABASE_URL {
        let mut tables: Vec<&str> = config.exposed_tables.iter().map(String::as_str).collect();
        tables.push("invoices");
        DBService::in_memory(&tables).await
    } else {
        DBService::new(&config.database_url, config.database_max_connections)
            .await
            .context("failed to connect to database")?
    };

    let driver = ChromiumDriver::new(
        config.chrome_executable.clone(),
        Some(config.render.stage_timeout),
    );
    let renderer = DocumentRenderer::new(Arc::new(driver), config.render);

    let listen_addr = config.listen_addr;
    let app_env = config.app_env;
    let app = routes::router(AppState::new(config, db, renderer));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    info!(
        env = app_env.as_str(),
        "Server listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
