//! Shared test harness: a real SQLite database in a temp directory with
//! the engine wired the way the server binary wires it.

use plinth::service::schema::{CreateTableRequest, FieldDef};
use plinth::{
    ensure_system_tables, Caller, FunctionService, MetadataCache, Role, RowService, SchemaService,
    TableRegistry, TtlCache,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct TestEngine {
    pub pool: SqlitePool,
    pub registry: Arc<TableRegistry>,
    pub data_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestEngine {
    pub fn schema(&self) -> SchemaService {
        SchemaService::new(self.pool.clone(), self.registry.clone())
    }

    pub fn rows(&self) -> RowService {
        RowService::new(self.pool.clone(), self.registry.clone())
    }

    pub fn functions(&self) -> FunctionService {
        FunctionService::new(self.pool.clone(), self.registry.clone())
    }
}

pub async fn engine() -> TestEngine {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path().to_path_buf();
    let options = SqliteConnectOptions::new()
        .filename(data_dir.join("database.sqlite"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("open pool");
    ensure_system_tables(&pool).await.expect("system tables");

    let cache: Arc<dyn MetadataCache> = Arc::new(TtlCache::new(Duration::from_secs(300)));
    let registry = Arc::new(TableRegistry::new(pool.clone(), cache));
    TestEngine {
        pool,
        registry,
        data_dir,
        _dir: dir,
    }
}

pub fn admin() -> Caller {
    Caller {
        id: 1,
        role: Role::Admin,
    }
}

pub fn user(id: i64) -> Caller {
    Caller {
        id,
        role: Role::User,
    }
}

pub fn field(name: &str, field_type: &str) -> FieldDef {
    FieldDef {
        field_type: field_type.to_string(),
        name: name.to_string(),
        nullable: true,
        reference: None,
        unique: false,
    }
}

/// `products(name text, qty number)` used across scenarios.
pub fn products_def() -> CreateTableRequest {
    CreateTableRequest {
        name: "products".to_string(),
        fields: vec![field("name", "text"), field("qty", "number")],
        indexes: vec![plinth::registry::IndexDef {
            name: "idx_products_qty".to_string(),
            columns: vec!["qty".to_string()],
        }],
        table_type: String::new(),
    }
}
