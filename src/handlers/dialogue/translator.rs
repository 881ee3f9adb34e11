//! Mapping from decoded upstream frames to client messages.
//!
//! Lifecycle events (connection/session) and `ChatEnded` are not handled
//! here; they change session state and belong to the orchestrator.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use super::messages::ServerMessage;
use crate::core::protocol::{Frame, Payload, ServerEvent};

/// Translate one upstream frame into the message the client should see.
///
/// Returns `None` for events with no client counterpart and for frames whose
/// payload lacks what the message needs.
pub fn translate(frame: &Frame) -> Option<ServerMessage> {
    let payload = &frame.payload;

    match frame.server_event()? {
        ServerEvent::AsrInfo => Some(ServerMessage::UserSpeaking {
            question_id: id_field(payload, "question_id"),
        }),
        ServerEvent::AsrResponse => {
            let result = payload.as_json()?.get("results")?.as_array()?.first()?;
            Some(ServerMessage::AsrResult {
                text: result
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                is_interim: result
                    .get("is_interim")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        ServerEvent::AsrEnded => Some(ServerMessage::UserSpeechEnded),
        ServerEvent::TtsSentenceStart => Some(ServerMessage::AiSpeakingStart {
            text: payload.str_field("text").unwrap_or_default().to_string(),
            tts_type: payload.str_field("tts_type").map(str::to_string),
        }),
        ServerEvent::TtsResponse => Some(ServerMessage::Audio {
            data: BASE64.encode(payload.as_binary().filter(|audio| !audio.is_empty())?),
        }),
        ServerEvent::TtsSentenceEnd | ServerEvent::TtsEnded => Some(ServerMessage::AiSpeakingEnd),
        ServerEvent::ChatResponse => Some(ServerMessage::AiText {
            text: chat_content(payload).to_string(),
            question_id: id_field(payload, "question_id"),
            reply_id: id_field(payload, "reply_id"),
        }),
        ServerEvent::ConnectionStarted
        | ServerEvent::ConnectionFailed
        | ServerEvent::ConnectionFinished
        | ServerEvent::SessionStarted
        | ServerEvent::SessionFinished
        | ServerEvent::SessionFailed
        | ServerEvent::ChatEnded => None,
    }
}

/// Text chunk carried by a `ChatResponse` payload.
pub fn chat_content(payload: &Payload) -> &str {
    payload.str_field("content").unwrap_or_default()
}

/// Read an identifier that may arrive as a string or a number.
pub fn id_field(payload: &Payload, key: &str) -> Option<String> {
    match payload.as_json()?.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
