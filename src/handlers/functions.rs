//! Stored-function endpoints: admin CRUD plus the public run entry point.

use crate::auth::{require_admin, MaybeCaller};
use crate::error::AppError;
use crate::response::{success_created, success_many, success_one};
use crate::service::functions::StoredFunction;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};

pub async fn create_function(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<StoredFunction>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.functions().save(&body).await?;
    Ok(success_created(serde_json::json!({"name": body.name})))
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn list_functions(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Query(params): Query<SearchParams>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let names = state.functions().list(params.search.as_deref()).await?;
    Ok(success_many(names))
}

pub async fn get_function(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(func_name): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let function = state.functions().get(&func_name).await?;
    Ok(success_one(function))
}

pub async fn delete_function(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(func_name): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.functions().delete(&func_name).await?;
    Ok(success_one(serde_json::Value::Null))
}

#[derive(Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub data: Map<String, Value>,
}

pub async fn run_function(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(func_name): Path<String>,
    Json(body): Json<RunRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let produced = state
        .functions()
        .run(&func_name, caller.0.as_ref(), &body.data)
        .await?;
    Ok(success_one(Value::Object(produced)))
}
