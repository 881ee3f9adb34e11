//! Upstream link to the remote speech-dialogue service.
//!
//! A session obtains one [`UpstreamLink`] per `start` from an
//! [`UpstreamConnect`] factory. The link reports everything it observes
//! through an [`UpstreamEventCallback`]; the orchestrator turns those reports
//! into inputs on its own channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::core::error::RelayResult;

pub mod doubao;
pub mod gate;

pub use doubao::{DoubaoConnector, DoubaoLink};
pub use gate::{OUTBOUND_CHANNEL_CAPACITY, OutboundGate, Outbound, PendingQueue};

/// Something observed on the upstream socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Socket open and handshake written
    Opened,
    /// One binary frame, still encoded
    Frame(Bytes),
    /// Socket closed by either side
    Closed,
    /// Connect or socket error
    Failed(String),
}

/// Callback invoked for each upstream event, in socket order.
pub type UpstreamEventCallback =
    Arc<dyn Fn(UpstreamEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handle to one live (or pending) upstream connection.
pub trait UpstreamLink: Send + Sync {
    /// Send an encoded frame, queueing it if the socket is not yet open.
    ///
    /// # Errors
    /// `UpstreamFailure` once the link is closed.
    fn submit(&self, frame: Bytes) -> RelayResult<()>;

    /// Close the socket. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Factory for upstream links.
///
/// `connect` returns immediately; the socket opens in the background and the
/// outcome arrives through `on_event`.
pub trait UpstreamConnect: Send + Sync {
    fn connect(&self, on_event: UpstreamEventCallback) -> Box<dyn UpstreamLink>;
}
