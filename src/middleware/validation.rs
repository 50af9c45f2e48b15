use axum::{
    extract::Request,
    http::{header::CONTENT_TYPE, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

/// Default request body limit; main.rs uses the same value for `DefaultBodyLimit`.
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

pub fn max_body_size() -> usize {
    std::env::var("THUVIEN_MAX_BODY_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
        .clamp(64 * 1024, 20 * 1024 * 1024)
}

/// Rejects obviously malformed requests before they reach a handler:
///
/// - traversal sequences in the URI path
/// - bodies larger than [`max_body_size`] announced via `Content-Length`
/// - POST/PUT bodies that are not JSON
///
/// Suspicious user agents are only logged.
pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        return AppError::BadRequest("Path traversal detected in request".to_string()).into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(length) = length {
            let limit = max_body_size();
            if length > limit {
                return (
                    axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                    axum::Json(serde_json::json!({
                        "error": {
                            "code": "PAYLOAD_TOO_LARGE",
                            "message": format!("Request body exceeds maximum size of {} bytes", limit),
                        },
                        "status": 413,
                    })),
                )
                    .into_response();
            }
            if length > 0 && !is_json_content_type(req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok())) {
                return AppError::InvalidInput("Request body must be application/json".to_string())
                    .into_response();
            }
        }
    }

    next.run(req).await
}

fn is_json_content_type(value: Option<&str>) -> bool {
    match value {
        Some(ct) => {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        }
        None => false,
    }
}

/// Traversal sequences, raw or percent-encoded.
fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }

    let encoded_patterns = ["%2e%2e", "%252e%252e", "%2e/", "/%2e", "%2f%2e", "%5c%2e", "%00"];
    if encoded_patterns.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ["nikto", "sqlmap", "havij", "acunetix", "masscan", "zgrab"]
        .iter()
        .any(|tool| ua_lower.contains(tool))
}

/// Strips control characters and caps the length so user input can go into log lines.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(200)
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("/api/../etc/passwd"));
        assert!(contains_path_traversal("/api/%2e%2e/books"));
        assert!(contains_path_traversal("/api/books%00"));

        assert!(!contains_path_traversal("/api/books/12"));
        assert!(!contains_path_traversal("/api/export/books"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("sqlmap/1.7"));
        assert!(!is_suspicious_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
    }

    #[test]
    fn test_json_content_type() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("application/json; charset=utf-8")));
        assert!(!is_json_content_type(Some("text/plain")));
        assert!(!is_json_content_type(None));
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("thu\u{0}thu"), "thuthu");
        assert_eq!(sanitize_for_logging(&"a".repeat(300)).len(), 200);
    }
}
