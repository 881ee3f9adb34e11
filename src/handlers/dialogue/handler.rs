//! Dialogue WebSocket handler
//!
//! Each client socket gets three tasks: a writer draining [`ClientRoute`]s,
//! a reader turning client frames into [`SessionInput`]s, and the session
//! loop driving the [`Orchestrator`]. Teardown closes the upstream link,
//! sends a close frame and waits a bounded time for the writer.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

use super::messages::{ClientCommand, ClientRoute, MAX_AUDIO_SIZE};
use super::orchestrator::{Orchestrator, SESSION_CHANNEL_CAPACITY, SessionInput, run_session};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (2 MB)
const MAX_WS_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Maximum WebSocket message size (2 MB)
const MAX_WS_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Upper bound on waiting for the writer to flush during teardown
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Dialogue WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket carrying the JSON client
/// protocol for one dialogue session.
pub async fn dialogue_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Dialogue WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_dialogue_socket(socket, state))
}

/// Handle one dialogue WebSocket connection until either side ends it
async fn handle_dialogue_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);
    let (session_tx, session_rx) = mpsc::channel::<SessionInput>(SESSION_CHANNEL_CAPACITY);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = client_rx.recv().await {
            let result = match route {
                ClientRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                ClientRoute::Close => {
                    debug!("Closing client WebSocket connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    // Reader task for incoming client frames
    let reader_tx = session_tx.clone();
    let reader_task = tokio::spawn(async move {
        while let Some(msg_result) = receiver.next().await {
            let input = match msg_result {
                Ok(Message::Text(text)) => match ClientCommand::parse(text.as_str()) {
                    Ok(command) => SessionInput::Client(command),
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                },
                Ok(Message::Binary(data)) => {
                    if data.len() > MAX_AUDIO_SIZE {
                        warn!(bytes = data.len(), "Dropping oversized binary audio frame");
                        continue;
                    }
                    SessionInput::ClientAudio(data)
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Client WebSocket error: {}", e);
                    break;
                }
            };

            if reader_tx.send(input).await.is_err() {
                return;
            }
        }
        let _ = reader_tx.send(SessionInput::ClientClosed).await;
    });

    let orchestrator = Orchestrator::new(
        session_id.clone(),
        app_state.dialogue.clone(),
        app_state.connector.clone(),
        app_state.suggestions.clone(),
        client_tx.clone(),
        session_tx,
    );

    if let Err(e) = run_session(orchestrator, session_rx).await {
        error!(session_id = %session_id, "Session ended with error: {}", e);
    }

    // Cleanup
    reader_task.abort();
    close_writer(client_tx, sender_task, WRITER_SHUTDOWN_TIMEOUT).await;

    info!(session_id = %session_id, "Dialogue session closed");
}

/// Ask the writer to close the socket and wait at most `limit` for it.
///
/// The close request is never awaited, so a writer stuck on a client that
/// stopped reading is aborted once `limit` passes.
async fn close_writer(
    client_tx: mpsc::Sender<ClientRoute>,
    mut sender_task: JoinHandle<()>,
    limit: Duration,
) {
    if client_tx.try_send(ClientRoute::Close).is_err() {
        debug!("Client writer backed up, skipping close frame");
    }
    drop(client_tx);

    if tokio::time::timeout(limit, &mut sender_task).await.is_err() {
        warn!("Client writer did not finish in time");
        sender_task.abort();
    }
}
