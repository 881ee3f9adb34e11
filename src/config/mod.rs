//! Configuration module for the TalkCafe gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use talkcafe_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use zeroize::Zeroizing;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default WebSocket endpoint of the realtime dialogue service.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://openspeech.bytedance.com/api/v3/realtime/dialogue";

/// Resource ID the dialogue service expects for realtime dialogue.
pub const DEFAULT_RESOURCE_ID: &str = "volc.speech.dialog";

/// Fixed application key published for the realtime dialogue API.
pub const DEFAULT_APP_KEY: &str = "PlgvMymc7f3tQnJ6";

/// Default text-generation endpoint used for read-aloud suggestions.
pub const DEFAULT_SUGGESTION_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

const DEFAULT_SYSTEM_ROLE: &str = "You are an English speaking-practice partner helping the user practise conversation.

The most important rule: every reply must use this format:
what you say【the complete answer the user should read aloud】

For example:
- Hello! How are you today?【I'm doing great, thank you! And you?】
- That's nice! What do you like to do for fun?【I like watching movies and reading books.】
- Oh cool! What kind of movies do you like?【I really enjoy action movies and comedies.】

Rules:
1. The text inside 【】 is the full sentence the user reads aloud
2. It must be a natural answer to your question
3. Chat freely about any topic the user brings up
4. Every message must end with 【】
5. Open with a fun greeting and vary it every time";

// =============================================================================
// Upstream
// =============================================================================

/// Credentials and endpoint of the realtime dialogue service.
///
/// These are fixed for the lifetime of the process and attached to every
/// upstream connection as authentication headers.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// WebSocket URL (`ws://` or `wss://`)
    pub url: String,
    /// Sent as `X-Api-App-ID`
    pub app_id: String,
    /// Sent as `X-Api-Access-Key`
    pub access_token: Zeroizing<String>,
    /// Sent as `X-Api-Resource-Id`
    pub resource_id: String,
    /// Sent as `X-Api-App-Key`
    pub app_key: Zeroizing<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            app_id: String::new(),
            access_token: Zeroizing::new(String::new()),
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            app_key: Zeroizing::new(DEFAULT_APP_KEY.to_string()),
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("app_id", &self.app_id)
            .field("access_token", &"<redacted>")
            .field("resource_id", &self.resource_id)
            .field("app_key", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Dialogue
// =============================================================================

/// Fixed dialogue, TTS and ASR parameters sent with `StartSession`.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub bot_name: String,
    /// Persona prompt for the dialogue model
    pub system_role: String,
    pub speaking_style: String,
    /// Dialogue model variant (`dialog.extra.model`)
    pub model: String,
    /// TTS speaker voice ID
    pub speaker: String,
    /// Sample rate of synthesized audio (PCM s16le, mono)
    pub output_sample_rate: u32,
    /// Sample rate of uploaded microphone audio (PCM, mono)
    pub input_sample_rate: u32,
    /// Content of the synthetic greeting sent after the session starts
    pub greeting: String,
    /// Delay between `SessionStarted` and the greeting
    pub greeting_delay_ms: u64,
    /// Delay between `FinishSession` and `FinishConnection` on stop
    pub finish_delay_ms: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            bot_name: "English Coach".to_string(),
            system_role: DEFAULT_SYSTEM_ROLE.to_string(),
            speaking_style: "Friendly, patient and encouraging".to_string(),
            model: "O".to_string(),
            speaker: "zh_female_vv_jupiter_bigtts".to_string(),
            output_sample_rate: 24000,
            input_sample_rate: 16000,
            greeting: "Hello!".to_string(),
            greeting_delay_ms: 500,
            finish_delay_ms: 100,
        }
    }
}

impl DialogueConfig {
    /// Payload of the `StartSession` event.
    pub fn start_session_payload(&self) -> Value {
        json!({
            "dialog": {
                "bot_name": self.bot_name,
                "system_role": self.system_role,
                "speaking_style": self.speaking_style,
                "extra": {
                    "model": self.model,
                },
            },
            "tts": {
                "speaker": self.speaker,
                "audio_config": {
                    "channel": 1,
                    "format": "pcm_s16le",
                    "sample_rate": self.output_sample_rate,
                },
            },
            "asr": {
                "audio_info": {
                    "format": "pcm",
                    "sample_rate": self.input_sample_rate,
                    "channel": 1,
                },
            },
        })
    }

    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    pub fn finish_delay(&self) -> Duration {
        Duration::from_millis(self.finish_delay_ms)
    }
}

// =============================================================================
// Suggestion
// =============================================================================

/// Secondary text-completion service used when a reply has no suggestion.
#[derive(Clone)]
pub struct SuggestionConfig {
    pub endpoint: String,
    /// Bearer token; without it the remote call is skipped
    pub api_key: Option<Zeroizing<String>>,
    pub model: String,
    pub temperature: f32,
    /// Upper bound on the completion call
    pub timeout_ms: u64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SUGGESTION_ENDPOINT.to_string(),
            api_key: None,
            model: "qwen-turbo".to_string(),
            temperature: 0.8,
            timeout_ms: 5000,
        }
    }
}

impl SuggestionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for SuggestionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port)
/// - Upstream dialogue service credentials
/// - Dialogue persona and audio parameters
/// - Suggestion service settings
/// - Security settings (CORS)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,

    pub upstream: UpstreamConfig,
    pub dialogue: DialogueConfig,
    pub suggestion: SuggestionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_allowed_origins: None,
            upstream: UpstreamConfig::default(),
            dialogue: DialogueConfig::default(),
            suggestion: SuggestionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a suggestion service API key is configured
    pub fn has_suggestion_service(&self) -> bool {
        self.suggestion
            .api_key
            .as_ref()
            .is_some_and(|key| !key.is_empty())
    }
}
