use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{DialogueConfig, ServerConfig};
use crate::core::suggestion::SuggestionDeriver;
use crate::core::upstream::{DoubaoConnector, UpstreamConnect};

/// Shared application state handed to every handler
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Session parameters sent with every `StartSession`
    pub dialogue: Arc<DialogueConfig>,
    /// Opens one upstream dialogue link per client session
    pub connector: Arc<dyn UpstreamConnect>,
    pub suggestions: Arc<SuggestionDeriver>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let connector: Arc<dyn UpstreamConnect> =
            Arc::new(DoubaoConnector::new(Arc::new(config.upstream.clone())));
        Self::with_connector(config, connector)
    }

    /// Build state around a caller-supplied connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn UpstreamConnect>) -> Arc<Self> {
        let suggestions = match SuggestionDeriver::from_config(&config.suggestion) {
            Ok(deriver) => deriver,
            Err(e) => {
                warn!("{}, using keyword suggestions only", e);
                SuggestionDeriver::heuristic_only()
            }
        };

        if suggestions.has_completion_service() {
            info!(model = %config.suggestion.model, "Suggestion service enabled");
        } else {
            info!("No suggestion API key configured, using keyword suggestions");
        }

        Arc::new(Self {
            dialogue: Arc::new(config.dialogue.clone()),
            config: Arc::new(config),
            connector,
            suggestions: Arc::new(suggestions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    #[tokio::test]
    async fn test_new_without_suggestion_key() {
        let state = AppState::new(ServerConfig::default()).await;
        assert!(!state.suggestions.has_completion_service());
        assert_eq!(state.dialogue.bot_name, state.config.dialogue.bot_name);
    }

    #[tokio::test]
    async fn test_new_with_suggestion_key() {
        let mut config = ServerConfig::default();
        config.suggestion.api_key = Some(Zeroizing::new("sk-test".to_string()));
        let state = AppState::new(config).await;
        assert!(state.suggestions.has_completion_service());
    }
}
