use crate::domain_port::UpstreamError;
use std::time::Duration;

/// One client per gateway, carrying the caller-supplied deadline so every
/// upstream call times out instead of wedging a login guard.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

pub(crate) fn request_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(err.to_string())
    } else {
        UpstreamError::transport(err.to_string())
    }
}

/// First value found under any of the given keys, for upstreams that spell
/// the same field several ways across versions.
pub(crate) fn string_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
