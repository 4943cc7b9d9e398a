//! Persistent connection used by the protocol session.
//!
//! [`Connector`] opens a connection; [`Transport`] sends text and yields raw
//! inbound payloads over it. The session composes one of each, which keeps the socket library out of
//! the protocol logic and lets tests drive the session in memory.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Headers the WebSocket handshake manages itself. Configured values for these
/// are not forwarded.
const HANDSHAKE_MANAGED: [&str; 7] = [
    "host",
    "connection",
    "upgrade",
    "content-length",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// An open, message-oriented connection.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&mut self, message: String) -> Result<()>;

    /// Next inbound payload as raw bytes. `None` once the peer has closed the
    /// connection. Text validation is left to the caller, per frame.
    async fn next_message(&mut self) -> Option<Result<Vec<u8>>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports on demand.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Transport: Transport;

    async fn open(&self) -> Result<Self::Transport>;
}

/// Opens WebSocket connections to the feed with the browser header set.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    headers: HeaderMap,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self) -> Result<WsTransport> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid feed URL {}", self.url))?;
        for (name, value) in &self.headers {
            if HANDSHAKE_MANAGED.contains(&name.as_str()) {
                continue;
            }
            request.headers_mut().insert(name.clone(), value.clone());
        }

        info!("Connecting to {}", self.url);
        let (stream, response) = connect_async(request)
            .await
            .with_context(|| format!("WebSocket connect to {} failed", self.url))?;
        info!("Connected, status {}", response.status());
        Ok(WsTransport { stream })
    }
}

/// WebSocket transport. Text and binary frames are both delivered as their
/// bytes, unmodified.
#[derive(Debug)]
pub struct WsTransport {
    stream: WsStream,
}

impl Transport for WsTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        self.stream
            .send(Message::Text(message.into()))
            .await
            .context("WebSocket send failed")
    }

    async fn next_message(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e).context("WebSocket receive failed")),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Message::Binary(bytes) => return Some(Ok(bytes.to_vec())),
                Message::Close(frame) => {
                    info!("Server closed connection: {frame:?}");
                    return None;
                }
                // Pings are answered by the library on the next read.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => {
                debug!("WebSocket already closed");
                Ok(())
            }
            Err(e) => Err(e).context("WebSocket close failed"),
        }
    }
}
