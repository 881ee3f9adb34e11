use url::Url;

use super::ServerConfig;

/// Validate a fully merged configuration.
///
/// # Errors
/// Returns an error describing the first problem found:
/// - Missing upstream `app_id` or `access_token`
/// - Upstream URL that does not parse or lacks a `ws://` or `wss://` scheme
/// - Suggestion endpoint that is not an `http(s)` URL
/// - Zero suggestion timeout
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let upstream = &config.upstream;

    if upstream.app_id.trim().is_empty() {
        return Err("Upstream app_id is required (set DOUBAO_APP_ID or upstream.app_id)".into());
    }
    if upstream.access_token.trim().is_empty() {
        return Err(
            "Upstream access_token is required (set DOUBAO_ACCESS_TOKEN or upstream.access_token)"
                .into(),
        );
    }
    let url = Url::parse(&upstream.url)
        .map_err(|e| format!("Invalid upstream url '{}': {e}", upstream.url))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(format!(
            "Upstream url must use ws:// or wss:// scheme, got: {}",
            upstream.url
        )
        .into());
    }

    if config.has_suggestion_service() {
        let endpoint = Url::parse(&config.suggestion.endpoint).map_err(|e| {
            format!(
                "Invalid suggestion endpoint '{}': {e}",
                config.suggestion.endpoint
            )
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(format!(
                "Suggestion endpoint must use http:// or https://, got: {}",
                config.suggestion.endpoint
            )
            .into());
        }
    }
    if config.suggestion.timeout_ms == 0 {
        return Err("Suggestion timeout_ms must be greater than zero".into());
    }

    Ok(())
}
