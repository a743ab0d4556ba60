//! Concrete wire transports. Each converts its own frame format to and from
//! [`crate::event::Event`] at its boundary and never leaks that format past it.

pub mod http_poll;
pub mod jsonrpc;
pub mod streaming;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Shared bearer-token check used by the HTTP and JSON-RPC transports.
///
/// `/api/health`, `OPTIONS` preflights, and the JSON-RPC `agent/card` method
/// are exempt per the transport contract; callers only invoke this when an
/// endpoint actually requires it.
#[must_use]
pub fn check_bearer(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

/// A bare 401 response for a failed bearer check.
pub fn unauthorized() -> Response {
    StatusCode::UNAUTHORIZED.into_response()
}

/// Minimal hand-rolled CORS: reflect `*` on every response and answer
/// preflight `OPTIONS` requests with the methods/headers this crate's
/// endpoints actually use. No `tower-http` dependency exists in this crate's
/// stack, so this is applied as a thin axum middleware layer rather than
/// pulling one in for a handful of headers.
pub async fn cors_layer(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if request.method() == axum::http::Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".parse().unwrap());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, POST, OPTIONS".parse().unwrap(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "content-type, authorization".parse().unwrap(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_check_matches_exact_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(check_bearer(&headers, "secret"));
        assert!(!check_bearer(&headers, "other"));
    }

    #[test]
    fn bearer_check_rejects_missing_header() {
        assert!(!check_bearer(&HeaderMap::new(), "secret"));
    }
}
