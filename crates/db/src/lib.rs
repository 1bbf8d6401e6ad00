use std::{sync::Arc, time::Duration};

use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

pub mod models;
pub mod store;

use store::{DataStore, memory::MemoryStore, postgres::PgStore};

/// Sentinel `DATABASE_URL` selecting the in-process store
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Owns the connection to the backing store. Built once at start-up and
/// handed to the services that need it.
#[derive(Clone)]
pub struct DBService {
    pub store: Arc<dyn DataStore>,
    pub pool: Option<PgPool>,
}

impl DBService {
    /// Connect to Postgres.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to Postgres");

        Ok(Self {
            store: Arc::new(PgStore::new(pool.clone())),
            pool: Some(pool),
        })
    }

    /// Back the service with an in-process store holding the given empty tables.
    pub async fn in_memory(tables: &[&str]) -> Self {
        let store = MemoryStore::new();
        store.create_tables(tables).await;
        info!(tables = tables.len(), "Using in-process memory store");
        Self {
            store: Arc::new(store),
            pool: None,
        }
    }

    /// Round trip to the database, if there is one.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }
}
