use crate::billing::CallerContext;
use axum::{extract::Request, middleware::Next, response::Response};

/// Caller middleware.
///
/// Attaches a [`CallerContext`] to every request. It never rejects: missing or
/// malformed credentials produce an anonymous caller, and the pipeline decides
/// what an anonymous caller may do.
pub async fn caller_middleware(mut req: Request, next: Next) -> Response {
    let caller = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .map(CallerContext::from_api_key)
        .unwrap_or_else(CallerContext::anonymous);

    tracing::debug!(caller = %caller.log_label(), "Caller identified");
    req.extensions_mut().insert(caller);

    next.run(req).await
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    const BEARER_PREFIX: &str = "Bearer ";

    let token = auth_header.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    #[test]
    fn test_extract_bearer_token_success() {
        assert_eq!(extract_bearer_token("Bearer sk-test-key-123"), Some("sk-test-key-123"));
    }

    #[test]
    fn test_extract_bearer_token_missing_prefix() {
        assert_eq!(extract_bearer_token("sk-test-key-123"), None);
        assert_eq!(extract_bearer_token("Basic dXNlcjpwYXNz"), None);
    }

    #[test]
    fn test_extract_bearer_token_empty() {
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearer    "), None);
    }

    async fn echo(Extension(caller): Extension<CallerContext>) -> String {
        caller.key_hash().unwrap_or("anonymous").to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo))
            .layer(middleware::from_fn(caller_middleware))
    }

    async fn body_of(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_middleware_attaches_hashed_caller() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header("Authorization", "Bearer sk-alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, crate::billing::hash_api_key("sk-alice"));
    }

    #[tokio::test]
    async fn test_middleware_defaults_to_anonymous() {
        let response = app()
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "anonymous");
    }
}
