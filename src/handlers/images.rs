use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension,
};

use super::{artifact_response, AppState, ImagePath, ImageQuery};
use crate::billing::CallerContext;
use crate::error::AppError;

/// Handle `GET /v1/images/:quality/:size/*prompt`
///
/// Returns the artifact bytes. `X-Cache` tells whether the caller was charged.
pub async fn handle_image(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(path): Path<ImagePath>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, AppError> {
    let request = path.into_raw(query).validate(&state.limits)?;

    let outcome = state.pipeline.handle(&request, &caller).await?;

    let mut headers = vec![
        ("x-cache", if outcome.cache_hit { "HIT" } else { "MISS" }.to_string()),
        ("x-charged-cents", outcome.charged_cents.to_string()),
        ("x-artifact-key", outcome.key.to_string()),
        ("x-request-id", outcome.request_id.clone()),
    ];
    if !outcome.extra_keys.is_empty() {
        let extra = outcome
            .extra_keys
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(",");
        headers.push(("x-extra-artifact-keys", extra));
    }

    artifact_response(outcome.artifact, &headers)
}
