//! Generic row endpoints: view, paged list, insert, update, batch delete.

use crate::auth::MaybeCaller;
use crate::error::AppError;
use crate::response::{success_created, success_one, RowsPage};
use crate::service::rows::FetchOptions;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;

pub async fn view(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path((table_name, id)): Path<(String, i64)>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let row = state.rows().view(caller.0.as_ref(), &table_name, id).await?;
    Ok(success_one(row))
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub get_count: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let opts = FetchOptions {
        filter: params.filter.clone(),
        order: params.sort.clone(),
        limit: params.page_size,
        offset: params.page_size.map(|size| (page - 1) * size),
    };

    let rows = state.rows();
    let data = rows.list(caller.0.as_ref(), &table_name, &opts).await?;
    let total_data = if params.get_count {
        Some(
            rows.count(caller.0.as_ref(), &table_name, params.filter.as_deref())
                .await?,
        )
    } else {
        None
    };

    Ok(Json(RowsPage {
        data,
        page,
        page_size: params.page_size.unwrap_or(0),
        total_data,
    }))
}

fn body_to_map(value: Value) -> Result<serde_json::Map<String, Value>, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

pub async fn insert(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let data = body_to_map(body)?;
    let id = state
        .rows()
        .insert(caller.0.as_ref(), &table_name, data)
        .await?;
    Ok(success_created(serde_json::json!({"id": id})))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let data = body_to_map(body)?;
    state
        .rows()
        .update(caller.0.as_ref(), &table_name, data.clone())
        .await?;
    Ok(success_one(Value::Object(data)))
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub id: Vec<Value>,
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Json(body): Json<DeleteRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let deleted = state
        .rows()
        .batch_delete(caller.0.as_ref(), &table_name, &body.id)
        .await?;
    Ok(success_one(serde_json::json!({"deleted": deleted})))
}
