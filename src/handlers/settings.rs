//! Typed settings endpoints. Updates persist and notify config listeners.

use crate::auth::{require_admin, MaybeCaller};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::response::success_one;
use crate::state::AppState;
use axum::{extract::State, Extension, Json};

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    Ok(success_one(state.config.get()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(caller): Extension<MaybeCaller>,
    Json(body): Json<AppConfig>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    require_admin(&caller)?;
    state.config.update(body.clone())?;
    Ok(success_one(body))
}
