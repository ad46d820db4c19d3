//! Origin allowlist for browser clients.
//!
//! Requests without an `Origin` header (curl, SDKs, other servers) pass
//! through untouched. Browser requests from unlisted origins get 403.
//! With `"*"` listed, any origin is allowed but credentials are not.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
/// Includes the API key header.
const ALLOWED_HEADERS: &str = "content-type, x-api-key";
const PREFLIGHT_MAX_AGE_SECS: &str = "600";

/// Allowed browser origins.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Vec<String>,
    allow_any: bool,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        let origins: Vec<String> = origins
            .iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        let allow_any = origins.iter().any(|o| o == "*");
        Self { origins, allow_any }
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.allow_any || self.origins.iter().any(|o| o == origin)
    }

    fn decorate(&self, headers: &mut HeaderMap, origin: &str, preflight: bool) {
        let allow_origin = if self.allow_any {
            HeaderValue::from_static("*")
        } else {
            match HeaderValue::from_str(origin) {
                Ok(value) => value,
                Err(_) => return,
            }
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        if !self.allow_any {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        if preflight {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOWED_HEADERS),
            );
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
            );
        }
    }
}

/// Middleware applying the policy and answering preflight requests.
pub async fn enforce(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = match request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
    {
        Some(origin) => origin.to_string(),
        None => return next.run(request).await,
    };

    if !policy.allows(&origin) {
        warn!(origin = %origin, path = %request.uri().path(), "Origin not allowed");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Not allowed by CORS" })),
        )
            .into_response();
    }

    let preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    policy.decorate(response.headers_mut(), &origin, preflight);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::API_KEY_HEADER;

    #[test]
    fn test_allowlist() {
        let policy = CorsPolicy::new(&["http://localhost:5173/".into(), " ".into()]);
        assert!(policy.allows("http://localhost:5173"));
        assert!(!policy.allows("http://evil.example"));

        let any = CorsPolicy::new(&["*".into()]);
        assert!(any.allows("http://evil.example"));
    }

    #[test]
    fn test_credentials_only_for_listed_origins() {
        let mut headers = HeaderMap::new();
        CorsPolicy::new(&["http://app.local".into()]).decorate(
            &mut headers,
            "http://app.local",
            true,
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://app.local");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .contains(API_KEY_HEADER));

        let mut headers = HeaderMap::new();
        CorsPolicy::new(&["*".into()]).decorate(&mut headers, "http://x.local", false);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }
}
