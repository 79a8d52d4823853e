//! Push channel over WebSocket.
//!
//! Provides [`PushConnection`], which handles WebSocket I/O for push events.
//! Each text frame carries one JSON event envelope.

use futures_util::{SinkExt, StreamExt};
use parley_proto::PushEvent;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::TransportError;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Something that came off the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushInbound {
    /// Decoded event.
    Event(PushEvent),
    /// Transport ended. No further items follow.
    Closed(String),
}

/// Handle to an open push transport.
///
/// Events are sent/received via the channels, and an internal task handles
/// the WebSocket I/O.
pub struct PushConnection {
    /// Send events to the server.
    pub to_server: mpsc::Sender<PushEvent>,
    /// Receive events from the server.
    pub from_server: mpsc::Receiver<PushInbound>,
    abort_handle: tokio::task::AbortHandle,
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Open a push transport to `url`.
pub async fn connect_push(url: &str) -> Result<PushConnection, TransportError> {
    let (ws, _response) = connect_async(url).await.map_err(|e| TransportError::Connection(e.to_string()))?;

    let (to_server_tx, to_server_rx) = mpsc::channel::<PushEvent>(64);
    let (from_server_tx, from_server_rx) = mpsc::channel::<PushInbound>(64);

    let handle = tokio::spawn(run_connection(ws, to_server_rx, from_server_tx));

    Ok(PushConnection { to_server: to_server_tx, from_server: from_server_rx, abort_handle: handle.abort_handle() })
}

async fn run_connection(ws: WsStream, mut outbound: mpsc::Receiver<PushEvent>, inbound: mpsc::Sender<PushInbound>) {
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = sink.close().await;
                    break "closed locally".to_string();
                };
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(%err, "dropping unencodable event");
                        continue;
                    },
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    break format!("send failed: {err}");
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match PushEvent::decode(text.as_str()) {
                    Ok(event) => {
                        if inbound.send(PushInbound::Event(event)).await.is_err() {
                            break "receiver dropped".to_string();
                        }
                    },
                    Err(err) => tracing::warn!(%err, "dropping malformed push frame"),
                },
                Some(Ok(Message::Close(_))) | None => break "server closed the connection".to_string(),
                Some(Ok(_)) => {},
                Some(Err(err)) => break err.to_string(),
            },
        }
    };

    tracing::debug!(%reason, "push transport ended");
    let _ = inbound.send(PushInbound::Closed(reason)).await;
}
