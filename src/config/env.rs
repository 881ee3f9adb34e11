//! Environment variable loading.
//!
//! `.env` values are applied by `main` through `dotenvy` before this runs, so
//! real environment variables win over the file.

use std::env;
use std::str::FromStr;

use zeroize::Zeroizing;

use super::{ServerConfig, merge, validation};

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// Unset variables fall back to defaults. The result is validated.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

/// Read a variable, treating empty values as unset.
pub(super) fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse a variable.
pub(super) fn parse_var<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {e}").into()),
        None => Ok(None),
    }
}

/// Build a configuration from defaults overlaid with environment variables.
pub(super) fn load_env_config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var::<u16>("PORT")? {
        config.port = port;
    }
    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");

    // Upstream
    let upstream = &mut config.upstream;
    if let Some(url) = var("DOUBAO_WS_URL") {
        upstream.url = url;
    }
    if let Some(app_id) = var("DOUBAO_APP_ID") {
        upstream.app_id = app_id;
    }
    if let Some(token) = var("DOUBAO_ACCESS_TOKEN") {
        upstream.access_token = Zeroizing::new(token);
    }
    if let Some(resource_id) = var("DOUBAO_RESOURCE_ID") {
        upstream.resource_id = resource_id;
    }
    if let Some(app_key) = var("DOUBAO_APP_KEY") {
        upstream.app_key = Zeroizing::new(app_key);
    }

    // Dialogue
    let dialogue = &mut config.dialogue;
    if let Some(bot_name) = var("DIALOGUE_BOT_NAME") {
        dialogue.bot_name = bot_name;
    }
    if let Some(system_role) = var("DIALOGUE_SYSTEM_ROLE") {
        dialogue.system_role = system_role;
    }
    if let Some(speaker) = var("DIALOGUE_SPEAKER") {
        dialogue.speaker = speaker;
    }
    if let Some(greeting) = var("DIALOGUE_GREETING") {
        dialogue.greeting = greeting;
    }
    if let Some(delay) = parse_var::<u64>("DIALOGUE_GREETING_DELAY_MS")? {
        dialogue.greeting_delay_ms = delay;
    }
    if let Some(delay) = parse_var::<u64>("DIALOGUE_FINISH_DELAY_MS")? {
        dialogue.finish_delay_ms = delay;
    }

    // Suggestion
    let suggestion = &mut config.suggestion;
    if let Some(endpoint) = var("SUGGESTION_ENDPOINT") {
        suggestion.endpoint = endpoint;
    }
    suggestion.api_key = var("SUGGESTION_API_KEY").map(Zeroizing::new);
    if let Some(model) = var("SUGGESTION_MODEL") {
        suggestion.model = model;
    }
    if let Some(timeout) = parse_var::<u64>("SUGGESTION_TIMEOUT_MS")? {
        suggestion.timeout_ms = timeout;
    }

    Ok(config)
}
