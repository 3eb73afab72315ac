use axum::{
    extract::{Path, State},
    response::Response,
    Extension,
};

use super::{artifact_response, AppState};
use crate::billing::CallerContext;
use crate::cache::CacheKey;
use crate::error::AppError;

/// Handle `GET /v1/artifacts/*key`
pub async fn get_artifact(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(raw_key): Path<String>,
) -> Result<Response, AppError> {
    let key = CacheKey::parse(&raw_key)?;
    let entry = state.pipeline.lookup_artifact(&key, &caller).await?;

    artifact_response(
        entry,
        &[("x-cache", "HIT".to_string()), ("x-artifact-key", key.to_string())],
    )
}
