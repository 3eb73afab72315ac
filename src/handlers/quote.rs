use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use super::{AppState, ImagePath, ImageQuery};
use crate::cache::CacheKey;
use crate::error::AppError;
use crate::models::{ImageQuality, ImageSize};
use crate::pricing::CostBreakdown;

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub key: CacheKey,
    pub quality: ImageQuality,
    pub size: ImageSize,
    pub count: u32,
    #[serde(flatten)]
    pub cost: CostBreakdown,
}

/// Handle `GET /v1/quote/:quality/:size/*prompt`
///
/// Prices a request without authorizing, charging or generating.
pub async fn handle_quote(
    State(state): State<AppState>,
    Path(path): Path<ImagePath>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<QuoteResponse>, AppError> {
    let request = path.into_raw(query).validate(&state.limits)?;

    Ok(Json(QuoteResponse {
        key: request.cache_key(),
        quality: request.quality(),
        size: request.size(),
        count: request.count(),
        cost: state.pipeline.quote(&request),
    }))
}
