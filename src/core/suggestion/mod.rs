//! Read-aloud suggestions for the user.
//!
//! Every finished reply should end with a bracketed sentence the user can say
//! back. When the dialogue model omits it, [`SuggestionDeriver`] asks a
//! secondary completion service and, if that fails or times out, falls back to
//! a keyword table. The result is never empty.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SuggestionConfig;
use crate::core::error::{RelayError, RelayResult};

pub mod dashscope;
pub mod extract;
pub mod heuristic;

pub use dashscope::{DashScopeClient, TextCompletion, completion_text};
pub use extract::{
    ASCII_CLOSE, ASCII_OPEN, Extraction, FULL_WIDTH_CLOSE, FULL_WIDTH_OPEN, extract_bracketed,
    has_bracketed_suggestion,
};
pub use heuristic::{DEFAULT_REPLY, EMPTY_INPUT_REPLY, heuristic_reply};

/// Produces the suggestion attached to a finished reply.
pub struct SuggestionDeriver {
    completion: Option<Arc<dyn TextCompletion>>,
    timeout: Duration,
}

impl SuggestionDeriver {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
        }
    }

    /// Deriver that only uses the keyword table.
    pub fn heuristic_only() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    /// Build from configuration. Without an API key no remote call is made.
    ///
    /// # Errors
    /// `SuggestionServiceFailure` if the HTTP client cannot be built.
    pub fn from_config(config: &SuggestionConfig) -> RelayResult<Self> {
        let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty());

        let completion: Option<Arc<dyn TextCompletion>> = match api_key {
            Some(api_key) => {
                let http_client = reqwest::Client::builder()
                    .timeout(config.timeout())
                    .build()
                    .map_err(|e| {
                        RelayError::SuggestionServiceFailure(format!(
                            "Failed to build HTTP client: {e}"
                        ))
                    })?;
                let client: Arc<dyn TextCompletion> =
                    Arc::new(DashScopeClient::new(http_client, config, api_key));
                Some(client)
            }
            None => None,
        };

        Ok(Self::new(completion, config.timeout()))
    }

    pub fn has_completion_service(&self) -> bool {
        self.completion.is_some()
    }

    /// Suggest something the user could say back to `spoken`.
    pub async fn derive_fallback(&self, spoken: &str) -> String {
        if let Some(completion) = &self.completion {
            match tokio::time::timeout(self.timeout, completion.complete(spoken)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    return text.trim().to_string();
                }
                Ok(Ok(_)) => {
                    warn!("Suggestion service returned an empty completion");
                }
                Ok(Err(e)) => {
                    warn!("{}", e);
                }
                Err(_) => {
                    let e = RelayError::SuggestionServiceFailure(format!(
                        "timed out after {}ms",
                        self.timeout.as_millis()
                    ));
                    warn!("{}", e);
                }
            }
        }

        let reply = heuristic_reply(spoken);
        debug!("Using keyword suggestion: {}", reply);
        reply.to_string()
    }

    /// Ensure `text` ends with a bracketed suggestion.
    ///
    /// Text that already carries one is returned unchanged.
    pub async fn finalize_reply(&self, text: &str) -> String {
        if has_bracketed_suggestion(text) {
            return text.to_string();
        }

        let suggestion = self.derive_fallback(text).await;
        format!("{text}{FULL_WIDTH_OPEN}{suggestion}{FULL_WIDTH_CLOSE}")
    }
}

impl std::fmt::Debug for SuggestionDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionDeriver")
            .field("completion", &self.completion.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
