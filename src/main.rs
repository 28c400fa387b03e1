//! Server bootstrap: data directory, staged restore, config, pool with
//! bounded connections, system tables, backup scheduler, routes.

use axum::Router;
use plinth::service::backup::{apply_staged_restore, BackupScheduler, DATABASE_FILE};
use plinth::{
    api_routes, common_routes, ensure_system_tables, AppState, BackupService, ConfigStore,
    IdentityDecoder, MetadataCache, StaticTokens, TableRegistry, TtlCache,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Metadata cache TTL.
const CACHE_TTL_MINS: u64 = 120;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("plinth=info".parse()?))
        .init();

    let data_dir = PathBuf::from(
        std::env::var("PLINTH_DATA_DIR").unwrap_or_else(|_| "plinth_data".into()),
    );
    std::fs::create_dir_all(&data_dir)?;

    apply_staged_restore(&data_dir)?;

    let config_store = Arc::new(ConfigStore::load(data_dir.join("config.json"))?);
    let config = config_store.get();

    let options = SqliteConnectOptions::new()
        .filename(data_dir.join(DATABASE_FILE))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_open_connections)
        .min_connections(
            config
                .db_max_idle_connections
                .min(config.db_max_open_connections),
        )
        .max_lifetime(Duration::from_secs(config.db_max_lifetime_mins * 60))
        .connect_with(options)
        .await?;

    ensure_system_tables(&pool).await?;

    let cache: Arc<dyn MetadataCache> =
        Arc::new(TtlCache::new(Duration::from_secs(CACHE_TTL_MINS * 60)));
    let registry = Arc::new(TableRegistry::new(pool.clone(), cache));
    let identity: Arc<dyn IdentityDecoder> =
        Arc::new(StaticTokens::from_file(data_dir.join("tokens.json"))?);
    let backup = Arc::new(BackupService::new(pool.clone(), data_dir.clone()));

    let scheduler = BackupScheduler::spawn(backup.clone(), config.clone());
    config_store.subscribe(Box::new(scheduler));

    let state = AppState {
        pool,
        registry,
        config: config_store,
        identity,
        backup,
    };

    let app = Router::new()
        .merge(common_routes())
        .nest("/api", api_routes(state));

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
