//! Raw query console for admins, with a short history kept in a system
//! table.

use crate::auth::{require_admin, MaybeCaller};
use crate::error::AppError;
use crate::registry::QUERY_HISTORY_TABLE;
use crate::response::success_many;
use crate::sql::{quoted, row_to_json};
use crate::state::AppState;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;

/// History kept per instance.
const HISTORY_LIMIT: i64 = 10;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

pub async fn run_query(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<QueryRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    if body.query.trim().is_empty() {
        return Err(AppError::BadRequest("query is empty".into()));
    }

    let rows = sqlx::query(&body.query)
        .fetch_all(&state.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(_) => AppError::BadRequest("invalid query".into()),
            other => AppError::Db(other),
        })?;
    let data: Vec<serde_json::Value> = rows.iter().map(row_to_json).collect();

    // History bookkeeping stays off the response path.
    let pool = state.pool.clone();
    let query = body.query.clone();
    tokio::spawn(async move {
        let insert = sqlx::query(&format!(
            "INSERT INTO {} (query) VALUES (?)",
            quoted(QUERY_HISTORY_TABLE)
        ))
        .bind(&query)
        .execute(&pool)
        .await;
        if let Err(e) = insert {
            tracing::warn!(error = %e, "failed to record query history");
            return;
        }
        let prune = sqlx::query(&format!(
            "DELETE FROM {} WHERE id NOT IN (SELECT id FROM {} ORDER BY id DESC LIMIT {})",
            quoted(QUERY_HISTORY_TABLE),
            quoted(QUERY_HISTORY_TABLE),
            HISTORY_LIMIT
        ))
        .execute(&pool)
        .await;
        if let Err(e) = prune {
            tracing::warn!(error = %e, "failed to prune query history");
        }
    });

    Ok(success_many(data))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let rows = sqlx::query(&format!(
        "SELECT id, query, created_at FROM {} ORDER BY id DESC LIMIT {}",
        quoted(QUERY_HISTORY_TABLE),
        HISTORY_LIMIT
    ))
    .fetch_all(&state.pool)
    .await?;
    let data: Vec<serde_json::Value> = rows.iter().map(row_to_json).collect();
    Ok(success_many(data))
}
