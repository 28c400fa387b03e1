//! Table administration: listing, create, rename/rebuild, drop, columns,
//! access policy.

use crate::access::AccessPolicy;
use crate::auth::{require_admin, MaybeCaller};
use crate::error::AppError;
use crate::registry::IndexDef;
use crate::response::{success_created, success_many, success_one};
use crate::service::schema::{CreateTableRequest, FieldDef};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn list_tables(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Query(params): Query<SearchParams>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let tables = state.registry.list(params.search.as_deref()).await?;
    Ok(success_many(tables))
}

pub async fn create_table(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<CreateTableRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.schema().create(&body).await?;
    Ok(success_created(serde_json::json!({"name": body.name})))
}

#[derive(Deserialize)]
pub struct UpdateTableRequest {
    pub table_name: String,
    #[serde(default)]
    pub updated_table_name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

/// Rename when only the name changed; otherwise run the full rebuild
/// (which also covers a rename combined with new fields).
pub async fn update_table(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<UpdateTableRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let new_name = if body.updated_table_name.is_empty() {
        body.table_name.clone()
    } else {
        body.updated_table_name.clone()
    };

    if body.fields.is_empty() && body.indexes.is_empty() {
        if new_name == body.table_name {
            return Err(AppError::BadRequest("nothing to update".into()));
        }
        state.schema().rename(&body.table_name, &new_name).await?;
    } else {
        state
            .schema()
            .rebuild(&body.table_name, &new_name, body.fields, body.indexes)
            .await?;
    }
    Ok(success_one(serde_json::json!({"name": new_name})))
}

pub async fn delete_table(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.schema().drop(&table_name).await?;
    Ok(success_one(serde_json::Value::Null))
}

#[derive(Deserialize)]
pub struct ColumnsParams {
    #[serde(default)]
    pub include_auth: bool,
}

pub async fn table_columns(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Query(params): Query<ColumnsParams>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let columns = state
        .registry
        .columns(&table_name, params.include_auth)
        .await?;
    Ok(success_many(columns))
}

pub async fn get_access(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let info = state
        .registry
        .info(&table_name, &[crate::registry::MetaField::Access])
        .await?;
    Ok(success_one(info.access))
}

#[derive(Deserialize)]
pub struct UpdateAccessRequest {
    pub access: Vec<String>,
}

pub async fn update_access(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Path(table_name): Path<String>,
    Json(body): Json<UpdateAccessRequest>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    let policy = AccessPolicy::from_tokens(&body.access)?;
    state.registry.update_access(&table_name, &policy).await?;
    Ok(success_one(policy))
}
