// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process transport: a connector paired with a listener that plays the
//! backend. Used by tests and offline demos.

use noema_proto::{encode_frame, ServerFrame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::transport::{Connection, Connector, Incoming, TransportError};

/// Create a connected connector/listener pair.
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { peers: tx }, MemoryListener { peers: rx })
}

/// Client side factory.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server side: yields one [`MemoryPeer`] per client connection.
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next client.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    refuse: AtomicBool,
    count: AtomicUsize,
    closed: AtomicBool,
}

/// Server end of one in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    session_id: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Incoming>,
    probes: Arc<ProbeState>,
}

impl MemoryPeer {
    /// Session id the client connected for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next text frame sent by the client.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Push a server frame. Returns false once the client is gone.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        encode_frame(frame).is_ok_and(|text| self.send_raw(text))
    }

    /// Push raw bytes as a data frame.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(Incoming::Frame(text.into().into_bytes()))
            .is_ok()
    }

    /// Push control traffic.
    pub fn heartbeat(&self) -> bool {
        self.to_client.send(Incoming::Heartbeat).is_ok()
    }

    /// Make every later probe fail.
    pub fn refuse_probes(&self) {
        self.probes.refuse.store(true, Ordering::Release);
    }

    /// Probes received so far.
    pub fn probe_count(&self) -> usize {
        self.probes.count.load(Ordering::Acquire)
    }

    /// True once the client shut its end down.
    pub fn client_closed(&self) -> bool {
        self.probes.closed.load(Ordering::Acquire)
    }
}

/// Client end of one in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<Incoming>,
    probes: Arc<ProbeState>,
}

impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self, session_id: &str) -> Result<MemoryConnection, TransportError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let probes = Arc::new(ProbeState::default());
        let peer = MemoryPeer {
            session_id: session_id.to_owned(),
            from_client,
            to_client,
            probes: Arc::clone(&probes),
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect("listener dropped".into()))?;
        Ok(MemoryConnection {
            to_server,
            from_server,
            probes,
        })
    }
}

impl Connection for MemoryConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.to_server
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn next_frame(&mut self) -> Option<Result<Incoming, TransportError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.probes.count.fetch_add(1, Ordering::AcqRel);
        if self.probes.refuse.load(Ordering::Acquire) {
            return Err(TransportError::Probe("peer refused probe".into()));
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.probes.closed.store(true, Ordering::Release);
        self.from_server.close();
    }
}
