//! Event catalog for the dialogue service protocol.
//!
//! Client-originated and server-originated events live in disjoint numbering
//! spaces. Events with an ID of 100 or above are session scoped and always
//! carry a session ID field on the wire; events below 100 never do.

use std::fmt;

/// First event ID that is scoped to a session.
pub const SESSION_SCOPED_MIN_ID: u32 = 100;

/// Whether frames for this event carry a session ID field.
#[inline]
pub fn carries_session_id(event_id: u32) -> bool {
    event_id >= SESSION_SCOPED_MIN_ID
}

/// Lifecycle phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Connection,
    Session,
    Task,
    Hello,
    Tts,
    Asr,
    Chat,
}

impl EventPhase {
    /// Derive the phase from the numeric range of an event ID.
    pub fn of(event_id: u32) -> Option<Self> {
        match event_id {
            1..=99 => Some(Self::Connection),
            100..=199 => Some(Self::Session),
            200..=299 => Some(Self::Task),
            300..=349 => Some(Self::Hello),
            350..=449 => Some(Self::Tts),
            450..=499 => Some(Self::Asr),
            500..=599 => Some(Self::Chat),
            _ => None,
        }
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Events sent by the relay to the dialogue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ClientEvent {
    StartConnection = 1,
    FinishConnection = 2,
    StartSession = 100,
    FinishSession = 102,
    /// Upload of an audio chunk
    TaskRequest = 200,
    SayHello = 300,
    ChatTtsText = 500,
    ChatTextQuery = 501,
}

impl ClientEvent {
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::StartConnection),
            2 => Some(Self::FinishConnection),
            100 => Some(Self::StartSession),
            102 => Some(Self::FinishSession),
            200 => Some(Self::TaskRequest),
            300 => Some(Self::SayHello),
            500 => Some(Self::ChatTtsText),
            501 => Some(Self::ChatTextQuery),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StartConnection => "StartConnection",
            Self::FinishConnection => "FinishConnection",
            Self::StartSession => "StartSession",
            Self::FinishSession => "FinishSession",
            Self::TaskRequest => "TaskRequest",
            Self::SayHello => "SayHello",
            Self::ChatTtsText => "ChatTTSText",
            Self::ChatTextQuery => "ChatTextQuery",
        }
    }

    pub fn phase(self) -> EventPhase {
        // IDs are all inside a known range
        EventPhase::of(self.id()).unwrap_or(EventPhase::Connection)
    }

    #[inline]
    pub fn carries_session_id(self) -> bool {
        carries_session_id(self.id())
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events emitted by the dialogue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ServerEvent {
    ConnectionStarted = 50,
    ConnectionFailed = 51,
    ConnectionFinished = 52,
    SessionStarted = 150,
    SessionFinished = 152,
    SessionFailed = 153,
    TtsSentenceStart = 350,
    TtsSentenceEnd = 351,
    /// Carries a chunk of synthesized audio
    TtsResponse = 352,
    TtsEnded = 359,
    /// The user started speaking
    AsrInfo = 450,
    AsrResponse = 451,
    /// The user stopped speaking
    AsrEnded = 459,
    /// A chunk of reply text
    ChatResponse = 550,
    ChatEnded = 559,
}

impl ServerEvent {
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            50 => Some(Self::ConnectionStarted),
            51 => Some(Self::ConnectionFailed),
            52 => Some(Self::ConnectionFinished),
            150 => Some(Self::SessionStarted),
            152 => Some(Self::SessionFinished),
            153 => Some(Self::SessionFailed),
            350 => Some(Self::TtsSentenceStart),
            351 => Some(Self::TtsSentenceEnd),
            352 => Some(Self::TtsResponse),
            359 => Some(Self::TtsEnded),
            450 => Some(Self::AsrInfo),
            451 => Some(Self::AsrResponse),
            459 => Some(Self::AsrEnded),
            550 => Some(Self::ChatResponse),
            559 => Some(Self::ChatEnded),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ConnectionStarted => "ConnectionStarted",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ConnectionFinished => "ConnectionFinished",
            Self::SessionStarted => "SessionStarted",
            Self::SessionFinished => "SessionFinished",
            Self::SessionFailed => "SessionFailed",
            Self::TtsSentenceStart => "TTSSentenceStart",
            Self::TtsSentenceEnd => "TTSSentenceEnd",
            Self::TtsResponse => "TTSResponse",
            Self::TtsEnded => "TTSEnded",
            Self::AsrInfo => "ASRInfo",
            Self::AsrResponse => "ASRResponse",
            Self::AsrEnded => "ASREnded",
            Self::ChatResponse => "ChatResponse",
            Self::ChatEnded => "ChatEnded",
        }
    }

    pub fn phase(self) -> EventPhase {
        EventPhase::of(self.id()).unwrap_or(EventPhase::Connection)
    }

    /// Whether the event reports a failure that ends the session.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::SessionFailed)
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

/// Human-readable name for any event ID, used for logging.
pub fn event_name(event_id: u32) -> &'static str {
    if let Some(event) = ServerEvent::from_id(event_id) {
        event.name()
    } else if let Some(event) = ClientEvent::from_id(event_id) {
        event.name()
    } else {
        "Unknown"
    }
}
