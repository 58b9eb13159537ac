// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! WebSocket transport to the backend's `/v1/stream` endpoint.

use futures_util::{SinkExt, StreamExt};
use noema_proto::{STREAM_PATH, SUBPROTOCOL};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::transport::{Connection, Connector, Incoming, TransportError};

/// Connects to `<api base>/v1/stream` with the `json_v1` subprotocol.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for the given HTTP(S) API base (e.g. `http://127.0.0.1:8000`).
    pub fn new(api_base: &str) -> Self {
        Self {
            url: stream_url(api_base),
        }
    }

    /// Resolved stream URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Map an API base onto its WebSocket stream URL.
pub fn stream_url(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_owned()
    } else {
        format!("ws://{base}")
    };
    if base.ends_with(STREAM_PATH) {
        base
    } else {
        format!("{base}{STREAM_PATH}")
    }
}

/// Live WebSocket connection.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, session_id: &str) -> Result<WsConnection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(session_id = %session_id, url = %self.url, status = %response.status(), "websocket connected");
        Ok(WsConnection { stream })
    }
}

impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Incoming, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
            };
            return match msg {
                Message::Text(text) => Some(Ok(Incoming::Frame(text.as_bytes().to_vec()))),
                Message::Binary(bytes) => Some(Ok(Incoming::Frame(bytes.to_vec()))),
                Message::Ping(_) | Message::Pong(_) => Some(Ok(Incoming::Heartbeat)),
                Message::Close(_) => None,
                Message::Frame(_) => continue,
            };
        }
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|err| TransportError::Probe(err.to_string()))
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(%err, "websocket close handshake failed");
        }
    }
}
