//! Dialogue WebSocket message types
//!
//! The client protocol is JSON text only. Binary client frames are accepted as
//! raw PCM audio as a convenience; everything the server sends is JSON.

use serde::{Deserialize, Serialize};

use crate::core::error::{RelayError, RelayResult};

/// Maximum allowed size for a base64 audio payload (1 MiB)
pub const MAX_AUDIO_SIZE: usize = 1024 * 1024;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Commands sent by the browser client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Open the upstream connection and start a session
    Start,

    /// One chunk of microphone audio
    Audio {
        /// Base64 PCM16LE mono 16 kHz
        data: String,
    },

    /// Typed user input
    TextQuery { text: String },

    /// Ask the model to greet the user
    SayHello {
        #[serde(default)]
        text: Option<String>,
    },

    /// End the session
    Stop,
}

impl ClientCommand {
    /// Parse and size-check a text frame from the client.
    ///
    /// # Errors
    /// `ClientCommandInvalid` for malformed JSON, an unknown `type`, or an
    /// oversized field.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let command: ClientCommand = serde_json::from_str(text)
            .map_err(|e| RelayError::ClientCommandInvalid(format!("{e}")))?;
        command.validate_size()?;
        Ok(command)
    }

    /// Validates field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> RelayResult<()> {
        let (size, max, what) = match self {
            ClientCommand::Audio { data } => (data.len(), MAX_AUDIO_SIZE, "Audio"),
            ClientCommand::TextQuery { text } => (text.len(), MAX_TEXT_SIZE, "Text"),
            ClientCommand::SayHello { text: Some(text) } => {
                (text.len(), MAX_TEXT_SIZE, "Greeting")
            }
            ClientCommand::SayHello { text: None }
            | ClientCommand::Start
            | ClientCommand::Stop => return Ok(()),
        };

        if size > max {
            return Err(RelayError::ClientCommandInvalid(format!(
                "{what} too large: {size} bytes (max: {max} bytes)"
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Start => "start",
            ClientCommand::Audio { .. } => "audio",
            ClientCommand::TextQuery { .. } => "text_query",
            ClientCommand::SayHello { .. } => "say_hello",
            ClientCommand::Stop => "stop",
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Messages sent to the browser client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Upstream session is live
    SessionStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "dialogId", skip_serializing_if = "Option::is_none")]
        dialog_id: Option<String>,
    },

    /// The user started speaking
    UserSpeaking {
        #[serde(rename = "questionId", skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
    },

    /// Recognition result for the current utterance
    AsrResult {
        text: String,
        #[serde(rename = "isInterim")]
        is_interim: bool,
    },

    UserSpeechEnded,

    /// The model started speaking a sentence
    AiSpeakingStart {
        text: String,
        #[serde(rename = "ttsType", skip_serializing_if = "Option::is_none")]
        tts_type: Option<String>,
    },

    /// Synthesized audio chunk
    Audio {
        /// Base64 PCM16LE mono 24 kHz
        data: String,
    },

    /// A chunk of reply text
    AiText {
        text: String,
        #[serde(rename = "questionId", skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        #[serde(rename = "replyId", skip_serializing_if = "Option::is_none")]
        reply_id: Option<String>,
    },

    AiSpeakingEnd,

    /// The full reply, always ending with a bracketed suggestion
    AiResponseEnded {
        #[serde(rename = "fullText")]
        full_text: String,
    },

    Error { message: String },
}

// =============================================================================
// Message Routing
// =============================================================================

/// Instructions for the client socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRoute {
    /// JSON text message
    Outgoing(ServerMessage),
    /// Close connection
    Close,
}
