//! URL and input validation utilities

use url::Url;

use crate::core::error_handling::{errors, AppResult};

/// Validate a media page URL: non-empty, absolute, http(s), with a host
pub fn validate_media_url(url: &str) -> AppResult<Url> {
    if url.is_empty() {
        return Err(errors::invalid_input("media URL is empty"));
    }
    parse_http_url(url).map_err(|reason| errors::invalid_input(format!("invalid media URL '{url}': {reason}")))
}

/// Validate a backend endpoint URL. API paths are appended to it, so it may
/// carry a path prefix but no query or fragment.
pub fn validate_endpoint(endpoint: &str) -> AppResult<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(errors::invalid_input("backend endpoint is empty"));
    }
    let invalid = |reason: &str| errors::invalid_input(format!("invalid backend endpoint '{endpoint}': {reason}"));

    let parsed = parse_http_url(endpoint).map_err(|reason| invalid(&reason))?;
    if parsed.query().is_some() {
        return Err(invalid("query strings are not allowed"));
    }
    if parsed.fragment().is_some() {
        return Err(invalid("fragments are not allowed"));
    }
    Ok(parsed)
}

/// Check if URL is a valid video URL
pub fn is_valid_video_url(url: &str) -> bool {
    validate_media_url(url.trim()).is_ok()
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{other}'")),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(parsed)
}
