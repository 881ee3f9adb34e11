//! Dialogue WebSocket relay
//!
//! One client socket maps to one upstream dialogue session. The client speaks
//! a small JSON protocol:
//!
//! ```json
//! {"type": "start"}
//! {"type": "audio", "data": "<base64 PCM16LE 16kHz>"}
//! {"type": "text_query", "text": "How are you?"}
//! {"type": "say_hello", "text": "Hello!"}
//! {"type": "stop"}
//! ```
//!
//! and receives `session_started`, `user_speaking`, `asr_result`,
//! `user_speech_ended`, `ai_speaking_start`, `audio`, `ai_text`,
//! `ai_speaking_end`, `ai_response_ended` and `error` messages. Every
//! `ai_response_ended.fullText` ends with a bracketed suggestion such as
//! `【I'm doing great, thanks!】`.

pub mod handler;
pub mod messages;
pub mod orchestrator;
pub mod translator;

pub use handler::dialogue_handler;
pub use messages::{ClientCommand, ClientRoute, ServerMessage};
pub use orchestrator::{Orchestrator, SessionInput, SessionState, run_session};
