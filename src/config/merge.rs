use zeroize::Zeroizing;

use super::ServerConfig;
use super::env::load_env_config;
use super::yaml::YamlConfig;

/// Merge YAML values over the environment-derived configuration.
///
/// Any field present in YAML replaces the environment (or default) value.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_env_config()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(upstream) = yaml.upstream {
        let target = &mut config.upstream;
        if let Some(url) = upstream.url {
            target.url = url;
        }
        if let Some(app_id) = upstream.app_id {
            target.app_id = app_id;
        }
        if let Some(token) = upstream.access_token {
            target.access_token = Zeroizing::new(token);
        }
        if let Some(resource_id) = upstream.resource_id {
            target.resource_id = resource_id;
        }
        if let Some(app_key) = upstream.app_key {
            target.app_key = Zeroizing::new(app_key);
        }
    }

    if let Some(dialogue) = yaml.dialogue {
        let target = &mut config.dialogue;
        if let Some(bot_name) = dialogue.bot_name {
            target.bot_name = bot_name;
        }
        if let Some(system_role) = dialogue.system_role {
            target.system_role = system_role;
        }
        if let Some(speaking_style) = dialogue.speaking_style {
            target.speaking_style = speaking_style;
        }
        if let Some(model) = dialogue.model {
            target.model = model;
        }
        if let Some(speaker) = dialogue.speaker {
            target.speaker = speaker;
        }
        if let Some(rate) = dialogue.output_sample_rate {
            target.output_sample_rate = rate;
        }
        if let Some(rate) = dialogue.input_sample_rate {
            target.input_sample_rate = rate;
        }
        if let Some(greeting) = dialogue.greeting {
            target.greeting = greeting;
        }
        if let Some(delay) = dialogue.greeting_delay_ms {
            target.greeting_delay_ms = delay;
        }
        if let Some(delay) = dialogue.finish_delay_ms {
            target.finish_delay_ms = delay;
        }
    }

    if let Some(suggestion) = yaml.suggestion {
        let target = &mut config.suggestion;
        if let Some(endpoint) = suggestion.endpoint {
            target.endpoint = endpoint;
        }
        if let Some(api_key) = suggestion.api_key {
            target.api_key = Some(Zeroizing::new(api_key));
        }
        if let Some(model) = suggestion.model {
            target.model = model;
        }
        if let Some(temperature) = suggestion.temperature {
            target.temperature = temperature;
        }
        if let Some(timeout) = suggestion.timeout_ms {
            target.timeout_ms = timeout;
        }
    }

    if let Some(security) = yaml.security
        && security.cors_allowed_origins.is_some()
    {
        config.cors_allowed_origins = security.cors_allowed_origins;
    }

    Ok(config)
}
