use http::{HeaderMap, HeaderName};

/// Header carrying the client-chosen idempotency key.
pub static IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("idempotency-key");

/// Header set on responses replayed from the idempotency cache.
pub static CACHED_REPLAY_HEADER: HeaderName = HeaderName::from_static("x-idempotency-cached");

/// Reads the idempotency key from the request headers.
///
/// Header names are matched case-insensitively. A missing, non-UTF-8 or blank
/// value means the caller did not ask for idempotency.
pub fn extract_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(&IDEMPOTENCY_KEY_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Normalizes a request path into the endpoint identifier keys are scoped to.
///
/// Drops any query string and trailing slashes so `/a/b/` and `/a/b?x=1`
/// dedupe against `/a/b`.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
