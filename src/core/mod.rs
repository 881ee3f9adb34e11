//! Core relay building blocks: the wire protocol, the upstream link and the
//! suggestion deriver. Nothing in here knows about axum or the client socket.

pub mod error;
pub mod protocol;
pub mod suggestion;
pub mod upstream;

pub use error::{RelayError, RelayResult};

pub use protocol::{ClientEvent, EventPhase, Frame, MessageType, Payload, Serialization, ServerEvent};

pub use upstream::{
    DoubaoConnector, OutboundGate, PendingQueue, UpstreamConnect, UpstreamEvent,
    UpstreamEventCallback, UpstreamLink,
};

pub use suggestion::{SuggestionDeriver, TextCompletion, extract_bracketed, heuristic_reply};
