//! Outbound buffering in front of the upstream socket.
//!
//! Frames submitted before the socket is open are held in a [`PendingQueue`].
//! Opening the gate writes the handshake frame first and then every queued
//! frame in FIFO order, all under the same lock `submit` takes, so a frame
//! submitted concurrently with `open` can never overtake a queued one.
//!
//! Closing also raises a [`Notify`] permit, so the writer learns about the
//! close even when the channel is too full to carry [`Outbound::Close`].

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::core::error::{RelayError, RelayResult};

/// Capacity of the channel between the gate and the socket writer.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Instruction for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write one encoded binary frame
    Frame(Bytes),
    /// Close the socket
    Close,
}

/// FIFO of encoded frames waiting for the socket to open.
#[derive(Debug, Default)]
pub struct PendingQueue {
    frames: VecDeque<Bytes>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remove and yield every frame in enqueue order.
    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.frames.drain(..)
    }
}

#[derive(Debug)]
enum GateState {
    Pending(PendingQueue),
    Open,
    Closed,
}

/// Serializes access to the upstream writer.
#[derive(Debug)]
pub struct OutboundGate {
    state: Mutex<GateState>,
    tx: mpsc::Sender<Outbound>,
    closed: Notify,
}

impl OutboundGate {
    /// Create a gate in the pending state along with the writer's receiver.
    pub fn new() -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(OUTBOUND_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let gate = Self {
            state: Mutex::new(GateState::Pending(PendingQueue::new())),
            tx,
            closed: Notify::new(),
        };
        (gate, rx)
    }

    /// Queue or forward a frame depending on the gate state.
    ///
    /// # Errors
    /// `UpstreamFailure` if the gate is closed or the writer cannot keep up.
    pub fn submit(&self, frame: Bytes) -> RelayResult<()> {
        let mut state = self.state.lock();
        match &mut *state {
            GateState::Pending(queue) => {
                queue.push(frame);
                Ok(())
            }
            GateState::Open => self.forward(Outbound::Frame(frame)),
            GateState::Closed => Err(RelayError::UpstreamFailure(
                "upstream link is closed".to_string(),
            )),
        }
    }

    /// Write the handshake, flush the pending queue and switch to direct
    /// forwarding. Returns the number of queued frames flushed.
    ///
    /// # Errors
    /// `UpstreamFailure` if the gate was already opened or closed.
    pub fn open(&self, handshake: Bytes) -> RelayResult<usize> {
        let mut state = self.state.lock();
        let GateState::Pending(queue) = &mut *state else {
            return Err(RelayError::UpstreamFailure(
                "upstream link cannot be opened twice or after close".to_string(),
            ));
        };

        let mut queued = std::mem::take(queue);
        let flushed = queued.len();

        let result = std::iter::once(handshake)
            .chain(queued.drain())
            .try_for_each(|frame| self.forward(Outbound::Frame(frame)));

        *state = match result {
            Ok(()) => GateState::Open,
            Err(_) => GateState::Closed,
        };
        result.map(|()| flushed)
    }

    /// Close the gate. Queued frames are discarded and the writer is told to
    /// close the socket. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if matches!(*state, GateState::Closed) {
            return;
        }
        *state = GateState::Closed;
        self.closed.notify_one();
        // Dropped when the channel is full or the writer is gone
        let _ = self.tx.try_send(Outbound::Close);
    }

    /// Resolves once [`close`](Self::close) has been called, including calls
    /// made before this future was created.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), GateState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), GateState::Closed)
    }

    /// Number of frames waiting for the socket to open.
    pub fn pending_len(&self) -> usize {
        match &*self.state.lock() {
            GateState::Pending(queue) => queue.len(),
            _ => 0,
        }
    }

    fn forward(&self, outbound: Outbound) -> RelayResult<()> {
        self.tx.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RelayError::UpstreamFailure("upstream writer is backlogged".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                RelayError::UpstreamFailure("upstream writer has stopped".to_string())
            }
        })
    }
}
