//! Network utilities and helpers

use std::time::Duration;
use url::Url;

/// Default timeout for the reachability probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for format discovery; the backend probes the source page
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout applied to every request, including the progress stream
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Get user agent string
pub fn get_user_agent() -> String {
    format!("MediaOrchestrator/{}", env!("CARGO_PKG_VERSION"))
}

/// Join an API path onto an endpoint, keeping any path prefix the endpoint has
pub fn endpoint_url(endpoint: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Resolve a possibly relative `download_url` against the endpoint
pub fn resolve_location(endpoint: &Url, location: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    if location.is_empty() {
        return None;
    }
    Some(endpoint_url(endpoint, location))
}
