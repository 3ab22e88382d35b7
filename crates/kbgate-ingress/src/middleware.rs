//! Shared ingress middleware

use crate::types::{IngressError, RequestMetadata};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

/// Default maximum request body size (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Extension key for request metadata
#[derive(Clone)]
pub struct RequestMetadataExt(pub RequestMetadata);

/// Middleware to attach request metadata and echo the request ID
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let metadata = RequestMetadata::from_headers(req.headers());
    let request_id = metadata.request_id.clone();

    req.extensions_mut().insert(RequestMetadataExt(metadata));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Middleware to enforce body size limits
pub async fn body_size_limit_middleware(req: Request, next: Next, max_size: usize) -> Response {
    // Check content-length header
    if let Some(content_length) = req.headers().get(header::CONTENT_LENGTH)
        && let Ok(length_str) = content_length.to_str()
        && let Ok(length) = length_str.parse::<usize>()
        && length > max_size
    {
        return IngressError::RequestTooLarge(length).into_response();
    }

    next.run(req).await
}

/// Middleware to add security headers
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert("cache-control", HeaderValue::from_static("no-store"));

    response
}

/// Wrap `router` with the standard ingress middleware stack.
///
/// Chunked bodies without a content-length are capped by axum's
/// `DefaultBodyLimit` at the same size.
pub fn apply(router: Router, max_body_bytes: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(move |req, next| {
            body_size_limit_middleware(req, next, max_body_bytes)
        }))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_context_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Extension,
        body::Body,
        http::{Request, StatusCode},
        routing::{get, post},
    };
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    async fn session_handler(Extension(meta): Extension<RequestMetadataExt>) -> String {
        meta.0.runtime_session_id.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_request_context_middleware() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(request_context_middleware));

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers().get("x-request-id").unwrap();
        assert!(id.to_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_request_context_keeps_inbound_request_id() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(request_context_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header("x-request-id", "caller-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "caller-42");
    }

    #[tokio::test]
    async fn test_request_context_exposes_runtime_session() {
        let app = Router::new()
            .route("/test", get(session_handler))
            .layer(middleware::from_fn(request_context_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(kbgate_core::RUNTIME_SESSION_HEADER, "sess-9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"sess-9");
    }

    #[tokio::test]
    async fn test_security_headers_middleware() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert!(response.headers().get("strict-transport-security").is_some());
    }

    #[tokio::test]
    async fn test_body_size_limit_rejects_large_request() {
        let max_size = 100;
        let app = Router::new()
            .route("/test", post(test_handler))
            .layer(middleware::from_fn(move |req, next| {
                body_size_limit_middleware(req, next, max_size)
            }));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .header("content-length", "200")
                    .body(Body::from(vec![b'a'; 200]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Request too large: 200 bytes");
    }

    #[tokio::test]
    async fn test_body_size_limit_allows_small_request() {
        let max_size = 100;
        let app = Router::new()
            .route("/test", post(test_handler))
            .layer(middleware::from_fn(move |req, next| {
                body_size_limit_middleware(req, next, max_size)
            }));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .header("content-length", "5")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_apply_stack() {
        let app = apply(Router::new().route("/test", get(test_handler)), 1024);

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-request-id").is_some());
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
    }
}
