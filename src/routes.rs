//! Router assembly. API routes sit behind the api-key gate and the
//! caller-decoding middleware; health/version are unauthenticated.

use crate::auth;
use crate::handlers::{backup, functions, query, rows, settings, tables};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies are capped; uploads are not this service's job.
const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Unauthenticated routes: GET /health, GET /version.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// Everything under /api.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/main/tables", get(tables::list_tables))
        .route(
            "/main/table",
            post(tables::create_table).put(tables::update_table),
        )
        .route("/main/table/:table_name", delete(tables::delete_table))
        .route(
            "/main/table/:table_name/columns",
            get(tables::table_columns),
        )
        .route(
            "/main/table/:table_name/access",
            get(tables::get_access).put(tables::update_access),
        )
        .route("/main/:table_name/row/:id", get(rows::view))
        .route(
            "/main/:table_name/rows",
            get(rows::list).delete(rows::delete),
        )
        .route("/main/:table_name/insert", post(rows::insert))
        .route("/main/:table_name/update", axum::routing::put(rows::update))
        .route("/main/query", post(query::run_query).get(query::history))
        .route("/fn/:func_name", post(functions::run_function))
        .route("/function", get(functions::list_functions))
        .route("/function/create", post(functions::create_function))
        .route(
            "/function/:func_name",
            get(functions::get_function).delete(functions::delete_function),
        )
        .route(
            "/backup",
            get(backup::list_backups).post(backup::create_backup),
        )
        .route("/backup/restore", post(backup::restore_backup))
        .route("/backup/:file", delete(backup::delete_backup))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::attach_caller,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .with_state(state)
}
