//! Shared application state for all routes.

use crate::auth::IdentityDecoder;
use crate::config::ConfigStore;
use crate::registry::TableRegistry;
use crate::service::backup::BackupService;
use crate::service::functions::FunctionService;
use crate::service::rows::RowService;
use crate::service::schema::SchemaService;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub registry: Arc<TableRegistry>,
    pub config: Arc<ConfigStore>,
    pub identity: Arc<dyn IdentityDecoder>,
    pub backup: Arc<BackupService>,
}

impl AppState {
    pub fn rows(&self) -> RowService {
        RowService::new(self.pool.clone(), self.registry.clone())
    }

    pub fn schema(&self) -> SchemaService {
        SchemaService::new(self.pool.clone(), self.registry.clone())
    }

    pub fn functions(&self) -> FunctionService {
        FunctionService::new(self.pool.clone(), self.registry.clone())
    }
}
