//! Binary event protocol spoken by the remote speech-dialogue service.
//!
//! - [`frame`]: the wire codec (header, optional event ID, optional session
//!   ID, length-prefixed payload)
//! - [`events`]: the event catalog shared by both directions

pub mod events;
pub mod frame;

pub use events::{
    ClientEvent, EventPhase, SESSION_SCOPED_MIN_ID, ServerEvent, carries_session_id, event_name,
};
pub use frame::{FLAG_EVENT_ID, Frame, MessageType, Payload, Serialization};
