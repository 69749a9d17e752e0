//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The WebSocket variant speaks the text framing and uses a much
//! shorter keepalive than raw TCP: intermediaries between the client
//! and the chat server drop quiet WebSocket connections aggressively.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use camlink_protocol::FramingKind;

use crate::{Connection, Transport, TransportError};

/// Keepalive period for WebSocket connections.
const WS_KEEPALIVE: Duration = Duration::from_secs(20);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`Transport`] that dials chat servers over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    type Conn = WebSocketConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn, TransportError> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("ws://{addr}")
        };
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        tracing::debug!(%url, "WebSocket connection established");

        Ok(WebSocketConnection {
            ws: Mutex::new(ws),
        })
    }

    fn framing(&self) -> FramingKind {
        FramingKind::Text
    }

    fn keepalive_interval(&self) -> Duration {
        WS_KEEPALIVE
    }
}

/// One established WebSocket connection.
pub struct WebSocketConnection {
    ws: Mutex<WsStream>,
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        use futures_util::SinkExt;
        let text = String::from_utf8_lossy(data).into_owned();
        self.ws
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(io::Error::new(io::ErrorKind::BrokenPipe, e))
            })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        use futures_util::StreamExt;
        loop {
            let msg = self.ws.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // A close error usually means the peer beat us to it; either
        // way the connection is done.
        let _ = self.ws.lock().await.close(None).await;
        Ok(())
    }
}
