//! WebSocket connector for the realtime dialogue service.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::gate::{OutboundGate, Outbound};
use super::{UpstreamConnect, UpstreamEvent, UpstreamEventCallback, UpstreamLink};
use crate::config::UpstreamConfig;
use crate::core::error::{RelayError, RelayResult};
use crate::core::protocol::{ClientEvent, Frame};

/// Upper bound on the TCP + TLS + upgrade handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const HEADER_APP_ID: &str = "X-Api-App-ID";
pub const HEADER_ACCESS_KEY: &str = "X-Api-Access-Key";
pub const HEADER_RESOURCE_ID: &str = "X-Api-Resource-Id";
pub const HEADER_APP_KEY: &str = "X-Api-App-Key";
pub const HEADER_CONNECT_ID: &str = "X-Api-Connect-Id";

/// Opens authenticated sockets to the dialogue service.
#[derive(Debug, Clone)]
pub struct DoubaoConnector {
    config: Arc<UpstreamConfig>,
}

impl DoubaoConnector {
    pub fn new(config: Arc<UpstreamConfig>) -> Self {
        Self { config }
    }

    /// Build the upgrade request with authentication headers and a fresh
    /// connect ID.
    pub fn build_request(&self) -> RelayResult<Request> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::UpstreamFailure(format!("Invalid upstream URL: {e}")))?;

        let connect_id = Uuid::new_v4().to_string();
        let headers = request.headers_mut();
        headers.insert(HEADER_APP_ID, header_value(&self.config.app_id)?);
        headers.insert(HEADER_ACCESS_KEY, header_value(&self.config.access_token)?);
        headers.insert(HEADER_RESOURCE_ID, header_value(&self.config.resource_id)?);
        headers.insert(HEADER_APP_KEY, header_value(&self.config.app_key)?);
        headers.insert(HEADER_CONNECT_ID, header_value(&connect_id)?);

        Ok(request)
    }
}

fn header_value(value: &str) -> RelayResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RelayError::UpstreamFailure(format!("Invalid header value: {e}")))
}

impl UpstreamConnect for DoubaoConnector {
    fn connect(&self, on_event: UpstreamEventCallback) -> Box<dyn UpstreamLink> {
        let (gate, rx) = OutboundGate::new();
        let gate = Arc::new(gate);
        let request = self.build_request();

        tokio::spawn(run_link(request, gate.clone(), rx, on_event));

        Box::new(DoubaoLink { gate })
    }
}

/// Session-side handle of a dialogue service socket.
#[derive(Debug)]
pub struct DoubaoLink {
    gate: Arc<OutboundGate>,
}

impl UpstreamLink for DoubaoLink {
    fn submit(&self, frame: Bytes) -> RelayResult<()> {
        self.gate.submit(frame)
    }

    fn close(&self) {
        self.gate.close();
    }

    fn is_open(&self) -> bool {
        self.gate.is_open()
    }
}

impl Drop for DoubaoLink {
    fn drop(&mut self) {
        self.gate.close();
    }
}

/// Drive one socket until either side closes it.
async fn run_link(
    request: RelayResult<Request>,
    gate: Arc<OutboundGate>,
    mut rx: mpsc::Receiver<Outbound>,
    on_event: UpstreamEventCallback,
) {
    let fail = |reason: String| {
        gate.close();
        on_event(UpstreamEvent::Failed(reason))
    };

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            error!("Cannot build upstream request: {}", e);
            fail(e.to_string()).await;
            return;
        }
    };

    let connect = tokio_tungstenite::connect_async(request);
    let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            error!("Failed to connect to dialogue service: {}", e);
            fail(format!("Failed to connect to dialogue service: {e}")).await;
            return;
        }
        Err(_) => {
            error!("Timed out connecting to dialogue service");
            fail("Timed out connecting to dialogue service".to_string()).await;
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let handshake = Frame::client_event(ClientEvent::StartConnection, None, json!({})).encode();
    match gate.open(handshake) {
        Ok(flushed) => {
            info!(flushed, "Connected to dialogue service");
        }
        Err(e) => {
            // Session gave up while the socket was opening
            debug!("Upstream link closed before open: {}", e);
            let _ = ws_sink.close().await;
            return;
        }
    }
    on_event(UpstreamEvent::Opened).await;

    loop {
        tokio::select! {
            // Frames queued ahead of a close still go out first
            biased;

            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(data)) => {
                    if let Err(e) = ws_sink.send(Message::Binary(data)).await {
                        error!("Failed to send upstream frame: {}", e);
                        fail(format!("Upstream send failed: {e}")).await;
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing upstream socket");
                    let _ = ws_sink.close().await;
                    gate.close();
                    on_event(UpstreamEvent::Closed).await;
                    return;
                }
            },

            _ = gate.closed() => {
                debug!("Upstream link closed by session");
                let _ = ws_sink.close().await;
                on_event(UpstreamEvent::Closed).await;
                return;
            }

            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    on_event(UpstreamEvent::Frame(data)).await;
                }
                Some(Ok(Message::Text(text))) => {
                    debug!("Ignoring text frame from dialogue service: {}", text.as_str());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Dialogue service closed the socket: {:?}", frame);
                    gate.close();
                    on_event(UpstreamEvent::Closed).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Upstream socket error: {}", e);
                    fail(format!("Upstream socket error: {e}")).await;
                    return;
                }
                None => {
                    info!("Upstream stream ended");
                    gate.close();
                    on_event(UpstreamEvent::Closed).await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn test_config(url: &str) -> Arc<UpstreamConfig> {
        Arc::new(UpstreamConfig {
            url: url.to_string(),
            app_id: "app-123".to_string(),
            access_token: Zeroizing::new("token-abc".to_string()),
            ..Default::default()
        })
    }

    fn collecting_callback() -> (UpstreamEventCallback, mpsc::UnboundedReceiver<UpstreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: UpstreamEventCallback = Arc::new(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(event);
            })
        });
        (callback, rx)
    }

    #[test]
    fn test_build_request_headers() {
        let connector = DoubaoConnector::new(test_config("wss://example.com/api/v3/realtime"));
        let request = connector.build_request().unwrap();
        let headers = request.headers();

        assert_eq!(headers[HEADER_APP_ID], "app-123");
        assert_eq!(headers[HEADER_ACCESS_KEY], "token-abc");
        assert_eq!(headers[HEADER_RESOURCE_ID], "volc.speech.dialog");
        assert_eq!(headers[HEADER_APP_KEY], crate::config::DEFAULT_APP_KEY);

        let connect_id = headers[HEADER_CONNECT_ID].to_str().unwrap();
        assert!(Uuid::parse_str(connect_id).is_ok());
    }

    #[test]
    fn test_connect_id_is_fresh() {
        let connector = DoubaoConnector::new(test_config("wss://example.com/dialogue"));
        let first = connector.build_request().unwrap();
        let second = connector.build_request().unwrap();
        assert_ne!(
            first.headers()[HEADER_CONNECT_ID],
            second.headers()[HEADER_CONNECT_ID]
        );
    }

    #[test]
    fn test_build_request_invalid_url() {
        let connector = DoubaoConnector::new(test_config("not a url"));
        assert!(matches!(
            connector.build_request(),
            Err(RelayError::UpstreamFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = DoubaoConnector::new(test_config(&format!("ws://{addr}/dialogue")));
        let (callback, mut events) = collecting_callback();
        let link = connector.connect(callback);

        // Submitted before open, never delivered
        link.submit(Bytes::from_static(b"queued")).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, UpstreamEvent::Failed(_)));
        assert!(!link.is_open());
        assert!(link.submit(Bytes::from_static(b"late")).is_err());
    }
}
