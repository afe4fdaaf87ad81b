//! Clock and relay-URL helpers.

use url::Url;

use crate::relays::types::RelayError;

/// Current time in whole seconds since the Unix epoch.
pub fn now_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Validate that a relay URL is a well-formed `ws://` or `wss://` URL.
pub fn validate_relay_url(url: &str) -> Result<(), RelayError> {
    let parsed = Url::parse(url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RelayError::InvalidUrl(format!(
                "unsupported scheme: {other}"
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(RelayError::InvalidUrl("missing host".to_string()));
    }
    Ok(())
}

/// Normalize a relay URL so the same relay never gets two supervisors.
///
/// Lowercases the scheme and host and trims a single trailing slash.
pub fn normalize_relay_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut normalized = parsed.to_string();
            if normalized.ends_with('/') && parsed.path() == "/" {
                normalized.pop();
            }
            normalized
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}
