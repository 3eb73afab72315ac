use axum::{extract::State, Extension, Json};

use super::AppState;
use crate::billing::{Authorization, CallerContext};
use crate::error::AppError;

/// Handle `GET /v1/balance`
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
) -> Result<Json<Authorization>, AppError> {
    Ok(Json(state.pipeline.authorize(&caller).await?))
}
