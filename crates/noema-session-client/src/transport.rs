// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connector/connection seam between the session driver and a concrete
//! transport.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// One unit read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A data frame to hand to the codec.
    Frame(Vec<u8>),
    /// Control traffic (ping/pong); proves liveness, carries no data.
    Heartbeat,
}

/// Transport-level failures. These end a session; nothing here retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Establishing the connection took too long.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// Writing to the connection failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Reading from the connection failed.
    #[error("receive failed: {0}")]
    Receive(String),
    /// The liveness probe could not be sent.
    #[error("probe failed: {0}")]
    Probe(String),
    /// The subscription request could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The peer is gone.
    #[error("connection closed")]
    Closed,
}

/// An established, bidirectional connection.
pub trait Connection: Send + 'static {
    /// Send one text frame.
    fn send_text(&mut self, text: String)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Await the next inbound unit. `None` means the peer closed cleanly.
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<Incoming, TransportError>>> + Send;

    /// Send a liveness probe.
    fn probe(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Best-effort graceful close.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

/// Factory for connections.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Conn: Connection;

    /// Open a connection for `session_id`.
    fn connect(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;
}
