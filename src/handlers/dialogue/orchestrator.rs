//! Per-session dialogue state machine.
//!
//! Every input a session can receive (client command, client audio, upstream
//! event, timer expiry, client disconnect) arrives as a [`SessionInput`] on a
//! single channel and is applied by [`Orchestrator::handle`] in arrival order.
//! Upstream inputs and timers carry the generation of the link that produced
//! them; anything from an older link is ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{ClientCommand, ClientRoute, ServerMessage};
use super::translator::{chat_content, id_field, translate};
use crate::config::DialogueConfig;
use crate::core::error::{RelayError, RelayResult};
use crate::core::protocol::{ClientEvent, Frame, MessageType, ServerEvent, event_name};
use crate::core::suggestion::SuggestionDeriver;
use crate::core::upstream::{UpstreamConnect, UpstreamEvent, UpstreamEventCallback, UpstreamLink};

/// Capacity of the per-session input channel.
pub const SESSION_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on waiting for room in the client channel. A client that
/// stays backed up this long is treated as gone.
pub const CLIENT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Reason reported when a failure event carries no `error` field.
const DEFAULT_FAILURE_REASON: &str = "Connection failed";

/// Lifecycle of one dialogue session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ConnectionEstablished,
    SessionStarting,
    SessionActive,
    SessionEnding,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delayed actions scheduled by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Ask the model to speak first
    Greeting,
    /// Second half of an orderly stop
    FinishConnection,
}

/// One input to the state machine.
#[derive(Debug)]
pub enum SessionInput {
    Client(ClientCommand),
    /// Raw PCM from a binary client frame
    ClientAudio(Bytes),
    ClientClosed,
    Upstream {
        generation: u64,
        event: UpstreamEvent,
    },
    Timer {
        generation: u64,
        kind: TimerKind,
    },
}

/// Whether the session loop should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// State machine for one client connection.
pub struct Orchestrator {
    session_id: String,
    state: SessionState,
    /// Incremented whenever the current link is replaced or dropped
    generation: u64,
    link: Option<Box<dyn UpstreamLink>>,
    /// Reply text accumulated from `ChatResponse` chunks
    reply_buffer: String,
    dialogue: Arc<DialogueConfig>,
    connector: Arc<dyn UpstreamConnect>,
    suggestions: Arc<SuggestionDeriver>,
    client_tx: mpsc::Sender<ClientRoute>,
    session_tx: mpsc::Sender<SessionInput>,
    client_send_timeout: Duration,
    /// Set once a send to the client timed out
    client_stalled: bool,
}

impl Orchestrator {
    pub fn new(
        session_id: String,
        dialogue: Arc<DialogueConfig>,
        connector: Arc<dyn UpstreamConnect>,
        suggestions: Arc<SuggestionDeriver>,
        client_tx: mpsc::Sender<ClientRoute>,
        session_tx: mpsc::Sender<SessionInput>,
    ) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            generation: 0,
            link: None,
            reply_buffer: String::new(),
            dialogue,
            connector,
            suggestions,
            client_tx,
            session_tx,
            client_send_timeout: CLIENT_SEND_TIMEOUT,
            client_stalled: false,
        }
    }

    pub fn with_client_send_timeout(mut self, timeout: Duration) -> Self {
        self.client_send_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reply_buffer(&self) -> &str {
        &self.reply_buffer
    }

    /// Apply one input.
    pub async fn handle(&mut self, input: SessionInput) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Stop;
        }

        let flow = match input {
            SessionInput::Client(command) => self.handle_command(command).await,
            SessionInput::ClientAudio(audio) => {
                self.forward_audio(audio);
                Flow::Continue
            }
            SessionInput::ClientClosed => {
                info!(session_id = %self.session_id, "Client disconnected");
                self.shutdown();
                Flow::Stop
            }
            SessionInput::Upstream { generation, event } => {
                if generation != self.generation || self.link.is_none() {
                    debug!(generation, "Ignoring event from stale upstream link");
                    return Flow::Continue;
                }
                self.handle_upstream(event).await
            }
            SessionInput::Timer { generation, kind } => {
                if generation != self.generation {
                    return Flow::Continue;
                }
                self.handle_timer(kind);
                Flow::Continue
            }
        };

        if self.client_stalled && flow == Flow::Continue {
            warn!(session_id = %self.session_id, "Client stopped reading, closing session");
            self.shutdown();
            return Flow::Stop;
        }
        flow
    }

    /// Close the upstream link and mark the session closed. Idempotent.
    pub fn shutdown(&mut self) {
        self.drop_link();
        self.state = SessionState::Closed;
    }

    // ===== Client commands =====

    async fn handle_command(&mut self, command: ClientCommand) -> Flow {
        debug!(session_id = %self.session_id, command = command.name(), state = %self.state, "Client command");

        match command {
            ClientCommand::Start => self.start(),
            ClientCommand::Audio { data } => match BASE64.decode(data.as_bytes()) {
                Ok(audio) => self.forward_audio(Bytes::from(audio)),
                Err(e) => {
                    let e = RelayError::ClientCommandInvalid(format!("Invalid base64 audio: {e}"));
                    warn!("{}", e);
                }
            },
            ClientCommand::TextQuery { text } => {
                self.submit_if_active(ClientEvent::ChatTextQuery, json!({ "content": text }));
            }
            ClientCommand::SayHello { text } => {
                let content = text.unwrap_or_else(|| self.dialogue.greeting.clone());
                self.submit_if_active(ClientEvent::SayHello, json!({ "content": content }));
            }
            ClientCommand::Stop => self.stop(),
        }

        Flow::Continue
    }

    fn start(&mut self) {
        if self.state != SessionState::Idle {
            warn!(session_id = %self.session_id, state = %self.state, "Ignoring start: session already running");
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let tx = self.session_tx.clone();
        let on_event: UpstreamEventCallback = Arc::new(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(SessionInput::Upstream { generation, event }).await;
            })
        });

        info!(session_id = %self.session_id, "Connecting to dialogue service");
        self.link = Some(self.connector.connect(on_event));
        self.state = SessionState::Connecting;
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Connecting => {
                info!(session_id = %self.session_id, "Stop before connection opened");
                self.return_to_idle();
            }
            SessionState::ConnectionEstablished
            | SessionState::SessionStarting
            | SessionState::SessionActive => {
                info!(session_id = %self.session_id, "Finishing session");
                self.submit(ClientEvent::FinishSession, json!({}));
                self.state = SessionState::SessionEnding;
                self.schedule(TimerKind::FinishConnection, self.dialogue.finish_delay());
            }
            SessionState::Idle | SessionState::SessionEnding | SessionState::Closed => {
                debug!(state = %self.state, "Ignoring stop");
            }
        }
    }

    fn forward_audio(&mut self, audio: Bytes) {
        if self.state != SessionState::SessionActive {
            debug!(state = %self.state, bytes = audio.len(), "Dropping audio outside active session");
            return;
        }
        let frame = Frame::audio_request(&self.session_id, audio);
        self.submit_frame(frame);
    }

    // ===== Timers =====

    fn schedule(&self, kind: TimerKind, delay: Duration) {
        let tx = self.session_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionInput::Timer { generation, kind }).await;
        });
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Greeting => {
                if self.state == SessionState::SessionActive {
                    let greeting = self.dialogue.greeting.clone();
                    self.submit(ClientEvent::SayHello, json!({ "content": greeting }));
                }
            }
            TimerKind::FinishConnection => {
                if self.state == SessionState::SessionEnding {
                    self.submit(ClientEvent::FinishConnection, json!({}));
                    info!(session_id = %self.session_id, "Session finished");
                    self.return_to_idle();
                }
            }
        }
    }

    // ===== Upstream events =====

    async fn handle_upstream(&mut self, event: UpstreamEvent) -> Flow {
        match event {
            UpstreamEvent::Opened => {
                debug!(session_id = %self.session_id, "Upstream link open");
                Flow::Continue
            }
            UpstreamEvent::Frame(data) => match Frame::decode(&data) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(e) => self.terminate(e).await,
            },
            UpstreamEvent::Closed => {
                if self.state == SessionState::SessionEnding {
                    self.return_to_idle();
                    Flow::Continue
                } else {
                    info!(session_id = %self.session_id, state = %self.state, "Dialogue service closed the connection");
                    self.drop_link();
                    self.close_client()
                }
            }
            UpstreamEvent::Failed(reason) => {
                self.terminate(RelayError::UpstreamFailure(reason)).await
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Flow {
        if frame.message_type == MessageType::Error {
            let reason = failure_reason(&frame, "Dialogue service reported an error");
            return self.terminate(RelayError::UpstreamFailure(reason)).await;
        }

        let Some(event) = frame.server_event() else {
            debug!(
                event_id = ?frame.event_id,
                name = frame.event_id.map(event_name).unwrap_or("None"),
                "Ignoring frame without a known event"
            );
            return Flow::Continue;
        };
        debug!(session_id = %self.session_id, event = %event, "Dialogue event");

        match event {
            ServerEvent::ConnectionStarted => {
                if self.state == SessionState::Connecting {
                    self.state = SessionState::ConnectionEstablished;
                    let payload = self.dialogue.start_session_payload();
                    self.submit(ClientEvent::StartSession, payload);
                    self.state = SessionState::SessionStarting;
                }
            }
            ServerEvent::ConnectionFailed | ServerEvent::SessionFailed => {
                let reason = failure_reason(&frame, DEFAULT_FAILURE_REASON);
                return self.terminate(RelayError::UpstreamFailure(reason)).await;
            }
            ServerEvent::SessionStarted => {
                if self.state == SessionState::SessionStarting {
                    self.state = SessionState::SessionActive;
                    info!(session_id = %self.session_id, "Session active");
                    self.send(ServerMessage::SessionStarted {
                        session_id: self.session_id.clone(),
                        dialog_id: id_field(&frame.payload, "dialog_id"),
                    })
                    .await;
                    self.schedule(TimerKind::Greeting, self.dialogue.greeting_delay());
                }
            }
            ServerEvent::ConnectionFinished | ServerEvent::SessionFinished => {
                debug!(event = %event, "Upstream acknowledged finish");
            }
            ServerEvent::AsrInfo | ServerEvent::TtsSentenceStart => {
                self.reply_buffer.clear();
                self.send_translated(&frame).await;
            }
            ServerEvent::ChatResponse => {
                self.reply_buffer.push_str(chat_content(&frame.payload));
                self.send_translated(&frame).await;
            }
            ServerEvent::ChatEnded => {
                let full_text = self.suggestions.finalize_reply(&self.reply_buffer).await;
                self.send(ServerMessage::AiResponseEnded { full_text }).await;
            }
            ServerEvent::AsrResponse
            | ServerEvent::AsrEnded
            | ServerEvent::TtsSentenceEnd
            | ServerEvent::TtsResponse
            | ServerEvent::TtsEnded => {
                self.send_translated(&frame).await;
            }
        }

        Flow::Continue
    }

    // ===== Helpers =====

    /// End the session after a fatal error. Only upstream failures are shown
    /// to the client.
    async fn terminate(&mut self, err: RelayError) -> Flow {
        if err.is_client_visible() {
            error!(session_id = %self.session_id, "{}", err);
            self.send(ServerMessage::Error {
                message: err.reason().to_string(),
            })
            .await;
        } else {
            warn!(session_id = %self.session_id, "Closing session: {}", err);
        }
        self.drop_link();
        self.close_client()
    }

    /// Mark the session closed and ask the writer to close the socket. The
    /// close is never awaited; a writer that cannot take it is aborted by the
    /// socket teardown.
    fn close_client(&mut self) -> Flow {
        self.state = SessionState::Closed;
        if self.client_tx.try_send(ClientRoute::Close).is_err() {
            debug!(session_id = %self.session_id, "Client writer backed up, close left to teardown");
        }
        Flow::Stop
    }

    fn return_to_idle(&mut self) {
        self.drop_link();
        self.reply_buffer.clear();
        self.state = SessionState::Idle;
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
            self.generation += 1;
        }
    }

    fn submit_if_active(&mut self, event: ClientEvent, payload: Value) {
        if self.state != SessionState::SessionActive {
            debug!(event = %event, state = %self.state, "Dropping command outside active session");
            return;
        }
        self.submit(event, payload);
    }

    fn submit(&mut self, event: ClientEvent, payload: Value) {
        let frame = Frame::client_event(event, Some(&self.session_id), payload);
        self.submit_frame(frame);
    }

    fn submit_frame(&mut self, frame: Frame) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(e) = link.submit(frame.encode()) {
            warn!(session_id = %self.session_id, "Failed to submit frame: {}", e);
        }
    }

    async fn send_translated(&mut self, frame: &Frame) {
        if let Some(message) = translate(frame) {
            self.send(message).await;
        }
    }

    async fn send(&mut self, message: ServerMessage) {
        if self.client_stalled {
            return;
        }
        let route = ClientRoute::Outgoing(message);
        match tokio::time::timeout(self.client_send_timeout, self.client_tx.send(route)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!(session_id = %self.session_id, "Client writer gone");
            }
            Err(_) => {
                self.client_stalled = true;
            }
        }
    }
}

fn failure_reason(frame: &Frame, fallback: &str) -> String {
    frame
        .payload
        .str_field("error")
        .filter(|reason| !reason.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Run a session to completion, consuming inputs until a stop condition.
pub async fn run_session(
    mut orchestrator: Orchestrator,
    mut inputs: mpsc::Receiver<SessionInput>,
) -> RelayResult<()> {
    while let Some(input) = inputs.recv().await {
        if orchestrator.handle(input).await == Flow::Stop {
            break;
        }
    }
    orchestrator.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Payload, Serialization};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // ===== Mock upstream =====

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Bytes>>,
        connects: AtomicUsize,
    }

    struct MockLink {
        recorder: Arc<Recorder>,
        closed: AtomicBool,
    }

    impl UpstreamLink for MockLink {
        fn submit(&self, frame: Bytes) -> RelayResult<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RelayError::UpstreamFailure("closed".to_string()));
            }
            self.recorder.frames.lock().push(frame);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    struct MockConnector {
        recorder: Arc<Recorder>,
    }

    impl UpstreamConnect for MockConnector {
        fn connect(&self, _on_event: UpstreamEventCallback) -> Box<dyn UpstreamLink> {
            self.recorder.connects.fetch_add(1, Ordering::SeqCst);
            Box::new(MockLink {
                recorder: self.recorder.clone(),
                closed: AtomicBool::new(false),
            })
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        recorder: Arc<Recorder>,
        client_rx: mpsc::Receiver<ClientRoute>,
        session_rx: mpsc::Receiver<SessionInput>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_client_capacity(64)
        }

        fn with_client_capacity(capacity: usize) -> Self {
            let recorder = Arc::new(Recorder::default());
            let connector = Arc::new(MockConnector {
                recorder: recorder.clone(),
            });
            let dialogue = Arc::new(DialogueConfig {
                greeting_delay_ms: 0,
                finish_delay_ms: 0,
                ..Default::default()
            });
            let (client_tx, client_rx) = mpsc::channel(capacity);
            let (session_tx, session_rx) = mpsc::channel(64);
            let orchestrator = Orchestrator::new(
                "session-1".to_string(),
                dialogue,
                connector,
                Arc::new(SuggestionDeriver::heuristic_only()),
                client_tx,
                session_tx,
            );
            Self {
                orchestrator,
                recorder,
                client_rx,
                session_rx,
            }
        }

        async fn command(&mut self, command: ClientCommand) -> Flow {
            self.orchestrator.handle(SessionInput::Client(command)).await
        }

        async fn upstream(&mut self, event: ServerEvent, payload: Payload) -> Flow {
            let frame = Frame {
                message_type: if event == ServerEvent::TtsResponse {
                    MessageType::AudioOnlyResponse
                } else {
                    MessageType::FullServerResponse
                },
                flags: 0x04,
                serialization: Serialization::Json,
                event_id: Some(event.id()),
                session_id: (event.id() >= 100).then(|| "session-1".to_string()),
                payload,
            };
            self.raw_upstream(UpstreamEvent::Frame(frame.encode())).await
        }

        async fn raw_upstream(&mut self, event: UpstreamEvent) -> Flow {
            let generation = self.orchestrator.generation();
            self.orchestrator
                .handle(SessionInput::Upstream { generation, event })
                .await
        }

        /// Deliver the next timer the orchestrator scheduled.
        async fn fire_timer(&mut self) {
            let input = tokio::time::timeout(Duration::from_secs(1), self.session_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(input, SessionInput::Timer { .. }));
            self.orchestrator.handle(input).await;
        }

        fn sent_events(&self) -> Vec<u32> {
            self.recorder
                .frames
                .lock()
                .iter()
                .map(|bytes| Frame::decode(bytes).unwrap().event_id.unwrap())
                .collect()
        }

        fn client_messages(&mut self) -> Vec<ClientRoute> {
            let mut out = Vec::new();
            while let Ok(route) = self.client_rx.try_recv() {
                out.push(route);
            }
            out
        }

        async fn activate(&mut self) {
            self.command(ClientCommand::Start).await;
            self.upstream(ServerEvent::ConnectionStarted, Payload::Json(json!({})))
                .await;
            self.upstream(
                ServerEvent::SessionStarted,
                Payload::Json(json!({"dialog_id": "dlg-1"})),
            )
            .await;
            assert_eq!(self.orchestrator.state(), SessionState::SessionActive);
        }
    }

    fn audio_command() -> ClientCommand {
        ClientCommand::Audio {
            data: BASE64.encode([0u8, 1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_start_handshake_sequence() {
        let mut h = Harness::new();

        h.command(ClientCommand::Start).await;
        assert_eq!(h.orchestrator.state(), SessionState::Connecting);
        assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 1);
        assert!(h.sent_events().is_empty());

        h.upstream(ServerEvent::ConnectionStarted, Payload::Json(json!({})))
            .await;
        assert_eq!(h.orchestrator.state(), SessionState::SessionStarting);
        assert_eq!(h.sent_events(), vec![100]);

        let start = Frame::decode(&h.recorder.frames.lock()[0]).unwrap();
        assert_eq!(start.session_id.as_deref(), Some("session-1"));
        assert_eq!(
            start.payload.as_json().unwrap()["tts"]["audio_config"]["sample_rate"],
            24000
        );

        h.upstream(
            ServerEvent::SessionStarted,
            Payload::Json(json!({"dialog_id": "dlg-1"})),
        )
        .await;
        assert_eq!(h.orchestrator.state(), SessionState::SessionActive);
        assert_eq!(
            h.client_messages(),
            vec![ClientRoute::Outgoing(ServerMessage::SessionStarted {
                session_id: "session-1".to_string(),
                dialog_id: Some("dlg-1".to_string()),
            })]
        );

        h.fire_timer().await;
        assert_eq!(h.sent_events(), vec![100, 300]);
        let hello = Frame::decode(&h.recorder.frames.lock()[1]).unwrap();
        assert_eq!(hello.payload.str_field("content"), Some("Hello!"));
    }

    #[tokio::test]
    async fn test_audio_dropped_before_active() {
        let mut h = Harness::new();

        h.command(audio_command()).await;
        h.command(ClientCommand::Start).await;
        h.command(audio_command()).await;
        h.orchestrator
            .handle(SessionInput::ClientAudio(Bytes::from_static(&[1, 2])))
            .await;
        h.upstream(ServerEvent::ConnectionStarted, Payload::Json(json!({})))
            .await;
        h.command(audio_command()).await;

        // Only StartSession went upstream
        assert_eq!(h.sent_events(), vec![100]);
    }

    #[tokio::test]
    async fn test_audio_forwarded_when_active() {
        let mut h = Harness::new();
        h.activate().await;

        h.command(audio_command()).await;
        h.orchestrator
            .handle(SessionInput::ClientAudio(Bytes::from_static(&[9, 9])))
            .await;

        let frames = h.recorder.frames.lock().clone();
        let audio: Vec<Frame> = frames
            .iter()
            .map(|b| Frame::decode(b).unwrap())
            .filter(|f| f.event_id == Some(200))
            .collect();
        assert_eq!(audio.len(), 2);
        assert_eq!(audio[0].message_type, MessageType::AudioOnlyRequest);
        assert_eq!(audio[0].payload.to_bytes(), Bytes::from_static(&[0, 1, 2, 3]));
        assert_eq!(audio[1].payload.to_bytes(), Bytes::from_static(&[9, 9]));
    }

    #[tokio::test]
    async fn test_invalid_base64_is_ignored() {
        let mut h = Harness::new();
        h.activate().await;
        let before = h.sent_events().len();

        let flow = h
            .command(ClientCommand::Audio {
                data: "***not base64***".to_string(),
            })
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(h.sent_events().len(), before);
        assert_eq!(h.orchestrator.state(), SessionState::SessionActive);
    }

    #[tokio::test]
    async fn test_text_query_and_say_hello() {
        let mut h = Harness::new();

        // Not active yet
        h.command(ClientCommand::TextQuery {
            text: "early".to_string(),
        })
        .await;

        h.activate().await;
        h.command(ClientCommand::TextQuery {
            text: "I like coffee".to_string(),
        })
        .await;
        h.command(ClientCommand::SayHello { text: None }).await;

        assert_eq!(h.sent_events(), vec![100, 501, 300]);
        let frames = h.recorder.frames.lock().clone();
        let query = Frame::decode(&frames[1]).unwrap();
        assert_eq!(query.payload.str_field("content"), Some("I like coffee"));
        let hello = Frame::decode(&frames[2]).unwrap();
        assert_eq!(hello.payload.str_field("content"), Some("Hello!"));
    }

    #[tokio::test]
    async fn test_session_failed_produces_single_error() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();
        let sent_before = h.sent_events();

        let flow = h
            .upstream(
                ServerEvent::SessionFailed,
                Payload::Json(json!({"error": "quota exceeded"})),
            )
            .await;

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
        assert_eq!(
            h.client_messages(),
            vec![
                ClientRoute::Outgoing(ServerMessage::Error {
                    message: "quota exceeded".to_string()
                }),
                ClientRoute::Close,
            ]
        );

        // Nothing further goes upstream, and later inputs are ignored
        h.command(audio_command()).await;
        h.command(ClientCommand::Stop).await;
        assert_eq!(h.sent_events(), sent_before);
        assert!(h.client_messages().is_empty());
    }

    #[tokio::test]
    async fn test_connection_failed_default_reason() {
        let mut h = Harness::new();
        h.command(ClientCommand::Start).await;

        h.upstream(ServerEvent::ConnectionFailed, Payload::Empty)
            .await;

        assert_eq!(
            h.client_messages()[0],
            ClientRoute::Outgoing(ServerMessage::Error {
                message: "Connection failed".to_string()
            })
        );
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_upstream_socket_failure_is_surfaced() {
        let mut h = Harness::new();
        h.command(ClientCommand::Start).await;

        let flow = h
            .raw_upstream(UpstreamEvent::Failed("connection refused".to_string()))
            .await;

        assert_eq!(flow, Flow::Stop);
        assert_eq!(
            h.client_messages(),
            vec![
                ClientRoute::Outgoing(ServerMessage::Error {
                    message: "connection refused".to_string()
                }),
                ClientRoute::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_silently() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();

        let flow = h
            .raw_upstream(UpstreamEvent::Frame(Bytes::from_static(&[0x11, 0x94])))
            .await;

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
        assert_eq!(h.client_messages(), vec![ClientRoute::Close]);
    }

    #[tokio::test]
    async fn test_unexpected_upstream_close_is_terminal() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();

        let flow = h.raw_upstream(UpstreamEvent::Closed).await;

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.client_messages(), vec![ClientRoute::Close]);
    }

    #[tokio::test]
    async fn test_stop_and_restart_reuses_session_id() {
        let mut h = Harness::new();
        h.activate().await;
        h.fire_timer().await; // greeting

        h.command(ClientCommand::Stop).await;
        assert_eq!(h.orchestrator.state(), SessionState::SessionEnding);
        assert_eq!(h.sent_events(), vec![100, 300, 102]);

        h.fire_timer().await;
        assert_eq!(h.sent_events(), vec![100, 300, 102, 2]);
        assert_eq!(h.orchestrator.state(), SessionState::Idle);

        let finish = Frame::decode(h.recorder.frames.lock().last().unwrap()).unwrap();
        assert_eq!(finish.session_id, None);

        // Events from the old link no longer apply
        let stale = h.orchestrator.generation() - 1;
        let flow = h
            .orchestrator
            .handle(SessionInput::Upstream {
                generation: stale,
                event: UpstreamEvent::Closed,
            })
            .await;
        assert_eq!(flow, Flow::Continue);

        h.recorder.frames.lock().clear();
        h.client_messages();
        h.activate().await;
        assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 2);
        assert_eq!(
            h.client_messages()[0],
            ClientRoute::Outgoing(ServerMessage::SessionStarted {
                session_id: "session-1".to_string(),
                dialog_id: Some("dlg-1".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_stop_while_connecting_returns_to_idle() {
        let mut h = Harness::new();
        h.command(ClientCommand::Start).await;
        h.command(ClientCommand::Stop).await;

        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.sent_events().is_empty());
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let mut h = Harness::new();
        h.command(ClientCommand::Start).await;
        h.command(ClientCommand::Start).await;
        assert_eq!(h.recorder.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reply_accumulation_and_suggestion() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();

        h.upstream(ServerEvent::AsrInfo, Payload::Json(json!({"question_id": "q1"})))
            .await;
        h.upstream(
            ServerEvent::ChatResponse,
            Payload::Json(json!({"content": "What's your "})),
        )
        .await;
        h.upstream(
            ServerEvent::ChatResponse,
            Payload::Json(json!({"content": "name?"})),
        )
        .await;
        assert_eq!(h.orchestrator.reply_buffer(), "What's your name?");

        h.upstream(ServerEvent::ChatEnded, Payload::Json(json!({})))
            .await;

        let messages = h.client_messages();
        assert_eq!(
            messages.last(),
            Some(&ClientRoute::Outgoing(ServerMessage::AiResponseEnded {
                full_text: "What's your name?【My name is Alex. It's nice to meet you!】"
                    .to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_reply_with_suggestion_is_unchanged() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();

        h.upstream(
            ServerEvent::ChatResponse,
            Payload::Json(json!({"content": "Hi there!【I'm doing great, thanks!】"})),
        )
        .await;
        h.upstream(ServerEvent::ChatEnded, Payload::Empty).await;

        assert_eq!(
            h.client_messages().last(),
            Some(&ClientRoute::Outgoing(ServerMessage::AiResponseEnded {
                full_text: "Hi there!【I'm doing great, thanks!】".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_tts_sentence_start_clears_buffer() {
        let mut h = Harness::new();
        h.activate().await;

        h.upstream(
            ServerEvent::ChatResponse,
            Payload::Json(json!({"content": "old text"})),
        )
        .await;
        h.upstream(
            ServerEvent::TtsSentenceStart,
            Payload::Json(json!({"text": "new"})),
        )
        .await;

        assert_eq!(h.orchestrator.reply_buffer(), "");
    }

    #[tokio::test]
    async fn test_tts_audio_relayed_as_base64() {
        let mut h = Harness::new();
        h.activate().await;
        h.client_messages();

        h.upstream(
            ServerEvent::TtsResponse,
            Payload::Binary(Bytes::from_static(&[1, 2, 3])),
        )
        .await;

        assert_eq!(
            h.client_messages(),
            vec![ClientRoute::Outgoing(ServerMessage::Audio {
                data: "AQID".to_string()
            })]
        );
    }

    #[tokio::test]
    async fn test_client_closed_stops() {
        let mut h = Harness::new();
        h.activate().await;

        let flow = h.orchestrator.handle(SessionInput::ClientClosed).await;
        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_upstream_close_with_full_client_channel() {
        let mut h = Harness::with_client_capacity(1);
        // SessionStarted fills the only slot and nobody drains it
        h.activate().await;

        let flow = tokio::time::timeout(
            Duration::from_secs(2),
            h.raw_upstream(UpstreamEvent::Closed),
        )
        .await
        .expect("close must not wait for room in the client channel");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_stalled_client_ends_session() {
        let mut h = Harness::with_client_capacity(1);
        h.orchestrator = h
            .orchestrator
            .with_client_send_timeout(Duration::from_millis(50));
        h.activate().await;
        let link_frames = h.sent_events().len();

        let flow = tokio::time::timeout(
            Duration::from_secs(2),
            h.upstream(
                ServerEvent::ChatResponse,
                Payload::Json(json!({"content": "Hi"})),
            ),
        )
        .await
        .expect("send to a stalled client should time out");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);

        // The link is gone, so client audio goes nowhere
        h.command(audio_command()).await;
        assert_eq!(h.sent_events().len(), link_frames);
        assert_eq!(
            h.client_messages(),
            vec![ClientRoute::Outgoing(ServerMessage::SessionStarted {
                session_id: "session-1".to_string(),
                dialog_id: Some("dlg-1".to_string()),
            })]
        );
    }

    #[tokio::test]
    async fn test_failure_with_stalled_client_still_stops() {
        let mut h = Harness::with_client_capacity(1);
        h.orchestrator = h
            .orchestrator
            .with_client_send_timeout(Duration::from_millis(50));
        h.activate().await;

        let flow = tokio::time::timeout(
            Duration::from_secs(2),
            h.raw_upstream(UpstreamEvent::Failed("reset by peer".to_string())),
        )
        .await
        .expect("failure path should not block on the client");

        assert_eq!(flow, Flow::Stop);
        assert_eq!(h.orchestrator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_greeting_skipped_after_stop() {
        let mut h = Harness::new();
        h.activate().await;
        h.command(ClientCommand::Stop).await;

        // Greeting timer was scheduled first, then the finish timer
        h.fire_timer().await;
        h.fire_timer().await;

        assert_eq!(h.sent_events(), vec![100, 102, 2]);
    }
}
