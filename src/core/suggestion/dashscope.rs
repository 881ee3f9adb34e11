//! DashScope text-generation client used to write read-aloud suggestions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::SuggestionConfig;
use crate::core::error::{RelayError, RelayResult};

const SYSTEM_PROMPT: &str = "You are an English speaking-practice assistant. The user gives you one line \
of English conversation and you write a natural, concrete English answer to it. Keep the answer simple \
and easy to read aloud for a beginner. Output only the English answer with no explanation.";

/// A single-shot text completion service.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Produce a short answer the user could say back to `utterance`.
    async fn complete(&self, utterance: &str) -> RelayResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    input: GenerationInput<'a>,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationInput<'a> {
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    temperature: f32,
    result_format: &'static str,
}

/// Client for the DashScope `text-generation/generation` endpoint.
pub struct DashScopeClient {
    http_client: Client,
    endpoint: String,
    api_key: Zeroizing<String>,
    model: String,
    temperature: f32,
}

impl DashScopeClient {
    pub fn new(http_client: Client, config: &SuggestionConfig, api_key: Zeroizing<String>) -> Self {
        Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn request_body<'a>(&'a self, utterance: &'a str) -> GenerationRequest<'a> {
        GenerationRequest {
            model: &self.model,
            input: GenerationInput {
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: SYSTEM_PROMPT.into(),
                    },
                    ChatMessage {
                        role: "user",
                        content: format!(
                            "The other person said: \"{utterance}\". Give a natural English answer (one or two sentences):"
                        )
                        .into(),
                    },
                ],
            },
            parameters: GenerationParameters {
                temperature: self.temperature,
                result_format: "message",
            },
        }
    }
}

/// Pull the completion text out of a response body.
///
/// Checks `output.choices[0].message.content`, then `output.text`, then
/// `choices[0].message.content`.
pub fn completion_text(body: &Value) -> Option<&str> {
    [
        "/output/choices/0/message/content",
        "/output/text",
        "/choices/0/message/content",
    ]
    .iter()
    .filter_map(|path| body.pointer(path).and_then(Value::as_str))
    .map(str::trim)
    .find(|text| !text.is_empty())
}

#[async_trait]
impl TextCompletion for DashScopeClient {
    async fn complete(&self, utterance: &str) -> RelayResult<String> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.as_str())
            .json(&self.request_body(utterance))
            .send()
            .await
            .map_err(|e| RelayError::SuggestionServiceFailure(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            RelayError::SuggestionServiceFailure(format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            return Err(RelayError::SuggestionServiceFailure(format!(
                "DashScope API error ({status}): {response_text}"
            )));
        }

        let body: Value = serde_json::from_str(&response_text).map_err(|e| {
            RelayError::SuggestionServiceFailure(format!("Invalid response body: {e}"))
        })?;

        let text = completion_text(&body).ok_or_else(|| {
            RelayError::SuggestionServiceFailure("Response carried no completion".to_string())
        })?;

        debug!("Completion generated: {} characters", text.len());
        Ok(text.to_string())
    }
}
