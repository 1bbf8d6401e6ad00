use std::sync::Arc;

use db::DBService;
use services::services::{data_access::DataAccess, document_render::DocumentRenderer};

use crate::config::Config;

/// Shared request state. Everything in it is built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DBService,
    pub data: DataAccess,
    pub renderer: DocumentRenderer,
}

impl AppState {
    pub fn new(config: Config, db: DBService, renderer: DocumentRenderer) -> Self {
        let data = DataAccess::new(db.store.clone());
        Self {
            config: Arc::new(config),
            db,
            data,
            renderer,
        }
    }
}
