// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport session: one live subscription, a receive loop, a keep-alive
//! loop, and an inbox the owner drains on its own schedule.

use noema_proto::{decode_frame, encode_subscribe, DecodeError, Envelope, ServerFrame, SubscribeRequest};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::transport::{Connection, Connector, Incoming, TransportError};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner called `close` (or opened another session).
    Requested,
    /// The peer closed the connection.
    RemoteClosed,
    /// The server sent an `error` frame.
    ServerError(String),
    /// The keep-alive probe failed or the connection went silent.
    ProbeFailed,
    /// The connection failed while reading.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by owner"),
            CloseReason::RemoteClosed => f.write_str("closed by peer"),
            CloseReason::ServerError(detail) => write!(f, "server error: {detail}"),
            CloseReason::ProbeFailed => f.write_str("keep-alive probe failed"),
            CloseReason::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

/// Events delivered through a [`SessionInbox`].
#[derive(Debug)]
pub enum SessionEvent {
    /// The server accepted the subscription.
    Acknowledged {
        /// Server-assigned subscription id.
        subscription_id: String,
    },
    /// A decoded envelope.
    Envelope(Box<Envelope>),
    /// A frame was dropped because it did not decode.
    DecodeFailed(DecodeError),
    /// The session ended. Emitted exactly once, always last.
    Closed(CloseReason),
}

/// Timing knobs of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often the keep-alive loop asks for a probe.
    pub keepalive_interval: Duration,
    /// Longest tolerated silence before a probe counts as failed.
    pub probe_timeout: Duration,
    /// Upper bound on connection establishment.
    pub connect_timeout: Duration,
    /// How long `close` waits for a graceful shutdown before aborting.
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(250),
        }
    }
}

/// Receiving end of a session's event stream.
#[derive(Debug)]
pub struct SessionInbox {
    session_id: String,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    closed: bool,
}

impl SessionInbox {
    fn new(session_id: String, rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self {
            session_id,
            rx,
            closed: false,
        }
    }

    /// Session this inbox belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// True once `Closed` has been yielded.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Await the next event; `None` after `Closed` has been yielded.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => {
                self.observe(Some(&event));
                Some(event)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Up to `max` queued events, without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.try_recv() {
                Some(event) => out.push(event),
                None => break,
            }
        }
        out
    }

    fn observe(&mut self, event: Option<&SessionEvent>) {
        if matches!(event, Some(SessionEvent::Closed(_))) {
            self.closed = true;
        }
    }
}

/// Guarantees a single `Closed` per session regardless of who ends it.
#[derive(Debug, Clone, Default)]
struct CloseLatch(Arc<AtomicBool>);

impl CloseLatch {
    fn fire(&self, events: &mpsc::UnboundedSender<SessionEvent>, reason: CloseReason) -> bool {
        if self.0.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = events.send(SessionEvent::Closed(reason));
        true
    }
}

#[derive(Debug)]
enum Command {
    Probe,
    Shutdown,
}

struct ActiveSession {
    session_id: String,
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    latch: CloseLatch,
    receiver: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

/// Owns at most one live subscription at a time.
pub struct TransportSession<C: Connector> {
    connector: C,
    config: SessionConfig,
    active: Option<ActiveSession>,
}

impl<C: Connector> TransportSession<C> {
    /// Session manager over `connector`.
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            active: None,
        }
    }

    /// Timing configuration in use.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Id of the current session, if one was opened and not yet closed.
    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// True while the receive loop of the current session is running.
    pub fn is_live(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.receiver.is_finished())
    }

    /// Close any previous session, connect, subscribe and start both loops.
    pub async fn open(&mut self, request: SubscribeRequest) -> Result<SessionInbox, TransportError> {
        self.close().await;

        let subscribe = encode_subscribe(&request)?;
        let session_id = request.session_id;
        let mut conn = time::timeout(self.config.connect_timeout, self.connector.connect(&session_id))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.config.connect_timeout))??;
        if let Err(err) = conn.send_text(subscribe).await {
            conn.shutdown().await;
            return Err(err);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let latch = CloseLatch::default();

        let receiver = tokio::spawn(receive_loop(
            conn,
            session_id.clone(),
            events_tx.clone(),
            cmd_rx,
            latch.clone(),
            self.config.probe_timeout,
        ));
        let keepalive = tokio::spawn(keepalive_loop(cmd_tx.clone(), self.config.keepalive_interval));

        info!(session_id = %session_id, "session opened");
        self.active = Some(ActiveSession {
            session_id: session_id.clone(),
            commands: cmd_tx,
            events: events_tx,
            latch,
            receiver,
            keepalive,
        });
        Ok(SessionInbox::new(session_id, events_rx))
    }

    /// Stop both loops and release the connection. Idempotent.
    ///
    /// Asks the receive loop to shut the connection down, waits up to
    /// `shutdown_grace`, then aborts whatever is still running and awaits it.
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveSession {
            session_id,
            commands,
            events,
            latch,
            mut receiver,
            keepalive,
        } = active;

        keepalive.abort();
        let _ = commands.try_send(Command::Shutdown);
        match time::timeout(self.config.shutdown_grace, &mut receiver).await {
            Ok(res) => log_task_result("receive", &session_id, res),
            Err(_) => {
                receiver.abort();
                log_task_result("receive", &session_id, receiver.await);
            }
        }
        log_task_result("keepalive", &session_id, keepalive.await);

        latch.fire(&events, CloseReason::Requested);
        info!(session_id = %session_id, "session closed");
    }
}

impl<C: Connector> Drop for TransportSession<C> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.keepalive.abort();
            active.receiver.abort();
            active.latch.fire(&active.events, CloseReason::Requested);
        }
    }
}

async fn receive_loop<T: Connection>(
    mut conn: T,
    session_id: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut commands: mpsc::Receiver<Command>,
    latch: CloseLatch,
    probe_timeout: Duration,
) {
    let mut last_inbound = Instant::now();
    let reason = loop {
        tokio::select! {
            incoming = conn.next_frame() => match incoming {
                None => break CloseReason::RemoteClosed,
                Some(Err(err)) => {
                    warn!(session_id = %session_id, %err, "receive failed");
                    break CloseReason::Transport(err.to_string());
                }
                Some(Ok(Incoming::Heartbeat)) => last_inbound = Instant::now(),
                Some(Ok(Incoming::Frame(bytes))) => {
                    last_inbound = Instant::now();
                    let event = match decode_frame(&bytes) {
                        Ok(ServerFrame::Ack { subscription_id }) => {
                            debug!(session_id = %session_id, %subscription_id, "subscription acknowledged");
                            SessionEvent::Acknowledged { subscription_id }
                        }
                        Ok(ServerFrame::Event { envelope, .. }) => SessionEvent::Envelope(envelope),
                        Ok(ServerFrame::Error { detail }) => {
                            warn!(session_id = %session_id, %detail, "server rejected session");
                            break CloseReason::ServerError(detail);
                        }
                        Err(err) => {
                            debug!(session_id = %session_id, %err, "dropping undecodable frame");
                            SessionEvent::DecodeFailed(err)
                        }
                    };
                    if events.send(event).is_err() {
                        break CloseReason::Requested;
                    }
                }
            },
            command = commands.recv() => match command {
                Some(Command::Probe) => {
                    if last_inbound.elapsed() > probe_timeout {
                        warn!(session_id = %session_id, silent_for = ?last_inbound.elapsed(), "connection went silent");
                        break CloseReason::ProbeFailed;
                    }
                    if let Err(err) = conn.probe().await {
                        warn!(session_id = %session_id, %err, "keep-alive probe failed");
                        break CloseReason::ProbeFailed;
                    }
                }
                Some(Command::Shutdown) | None => break CloseReason::Requested,
            },
        }
    };
    conn.shutdown().await;
    if latch.fire(&events, reason.clone()) && reason != CloseReason::Requested {
        info!(session_id = %session_id, %reason, "session ended");
    }
}

async fn keepalive_loop(commands: mpsc::Sender<Command>, every: Duration) {
    let mut interval = time::interval(every);
    // interval() ticks immediately; the first probe waits a full period.
    interval.tick().await;
    loop {
        interval.tick().await;
        if commands.send(Command::Probe).await.is_err() {
            break;
        }
    }
}

fn log_task_result(name: &'static str, session_id: &str, res: Result<(), JoinError>) {
    let Err(err) = res else {
        return;
    };
    if err.is_cancelled() {
        return;
    }
    if err.is_panic() {
        error!(session_id = %session_id, ?err, "{name} task panicked");
    } else {
        warn!(session_id = %session_id, ?err, "{name} task failed");
    }
}
