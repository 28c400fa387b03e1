//! Backup administration: snapshot, list, stage a restore, delete.

use crate::auth::{require_admin, MaybeCaller};
use crate::error::AppError;
use crate::response::{success_created, success_many, success_one};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;

pub async fn list_backups(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let backups = state.backup.list()?;
    Ok(success_many(backups))
}

pub async fn create_backup(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let name = state.backup.create().await?;
    Ok(success_created(serde_json::json!({"file": name})))
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub file: String,
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<RestoreRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.backup.stage_restore(&body.file)?;
    Ok(success_one(serde_json::json!({
        "staged": body.file,
        "message": "restore takes effect at next start",
    })))
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(file): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.backup.remove(&file)?;
    Ok(success_one(serde_json::Value::Null))
}
