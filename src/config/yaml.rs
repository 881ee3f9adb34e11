use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values present here take
/// precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3000
///
/// upstream:
///   url: "wss://openspeech.bytedance.com/api/v3/realtime/dialogue"
///   app_id: "your-app-id"
///   access_token: "your-access-token"
///   resource_id: "volc.speech.dialog"
///
/// dialogue:
///   bot_name: "English Coach"
///   speaker: "zh_female_vv_jupiter_bigtts"
///   greeting: "Hello!"
///   greeting_delay_ms: 500
///   finish_delay_ms: 100
///
/// suggestion:
///   api_key: "your-dashscope-key"
///   model: "qwen-turbo"
///   timeout_ms: 5000
///
/// security:
///   cors_allowed_origins: "*"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub dialogue: Option<DialogueYaml>,
    pub suggestion: Option<SuggestionYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Dialogue service endpoint and credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub app_id: Option<String>,
    pub access_token: Option<String>,
    pub resource_id: Option<String>,
    pub app_key: Option<String>,
}

/// Dialogue persona and audio parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DialogueYaml {
    pub bot_name: Option<String>,
    pub system_role: Option<String>,
    pub speaking_style: Option<String>,
    pub model: Option<String>,
    pub speaker: Option<String>,
    pub output_sample_rate: Option<u32>,
    pub input_sample_rate: Option<u32>,
    pub greeting: Option<String>,
    pub greeting_delay_ms: Option<u64>,
    pub finish_delay_ms: Option<u64>,
}

/// Suggestion completion service from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SuggestionYaml {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 3001

upstream:
  url: "ws://localhost:9000/dialogue"
  app_id: "app-123"
  access_token: "token-abc"
  resource_id: "volc.speech.dialog"
  app_key: "key-xyz"

dialogue:
  bot_name: "Coach"
  speaker: "en_female_test"
  output_sample_rate: 22050
  greeting: "Hey!"
  greeting_delay_ms: 0
  finish_delay_ms: 50

suggestion:
  endpoint: "http://localhost:9100/generate"
  api_key: "sk-test"
  model: "qwen-plus"
  temperature: 0.5
  timeout_ms: 2000

security:
  cors_allowed_origins: "https://talk.example.com"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(3001));

        let upstream = config.upstream.unwrap();
        assert_eq!(upstream.url.as_deref(), Some("ws://localhost:9000/dialogue"));
        assert_eq!(upstream.app_id.as_deref(), Some("app-123"));
        assert_eq!(upstream.access_token.as_deref(), Some("token-abc"));
        assert_eq!(upstream.app_key.as_deref(), Some("key-xyz"));

        let dialogue = config.dialogue.unwrap();
        assert_eq!(dialogue.bot_name.as_deref(), Some("Coach"));
        assert_eq!(dialogue.output_sample_rate, Some(22050));
        assert_eq!(dialogue.input_sample_rate, None);
        assert_eq!(dialogue.greeting_delay_ms, Some(0));

        let suggestion = config.suggestion.unwrap();
        assert_eq!(suggestion.model.as_deref(), Some("qwen-plus"));
        assert_eq!(suggestion.temperature, Some(0.5));
        assert_eq!(suggestion.timeout_ms, Some(2000));

        assert_eq!(
            config.security.unwrap().cors_allowed_origins.as_deref(),
            Some("https://talk.example.com")
        );
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
upstream:
  app_id: "only-app-id"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.server.is_none());
        assert!(config.dialogue.is_none());
        let upstream = config.upstream.unwrap();
        assert_eq!(upstream.app_id.as_deref(), Some("only-app-id"));
        assert!(upstream.access_token.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();

        assert!(config.server.is_none());
        assert!(config.upstream.is_none());
        assert!(config.suggestion.is_none());
        assert!(config.security.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "localhost"
  port: 3000
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }

    #[test]
    fn test_invalid_port_type() {
        let yaml = r#"
server:
  port: "not-a-port"
"#;
        let result: Result<YamlConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}
