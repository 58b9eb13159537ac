// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session orchestrator: owns the transport, the replica and cache, the
//! playback controller and the builder for one viewing session at a time.
//!
//! All mutation happens on the owner's task: the transport's receive loop
//! only fills the inbox, and [`SyncSession::tick`] drains it before building
//! the snapshot.

use noema_graph::GraphReplica;
use noema_proto::rest::{ReplayQuery, SnapshotResponse};
use noema_proto::{Envelope, MessageKind, Payload, SubscribeRequest};
use noema_session_client::{
    CloseReason, Connector, HistorySource, InboxPort, SessionConfig, SessionEvent, SessionPort,
    TransportSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::builder::{BuilderConfig, VisualSnapshot, VisualStateBuilder};
use crate::cache::{LatestValues, DEFAULT_ANOMALY_CAPACITY, DEFAULT_FLIP_CAPACITY};
use crate::playback::{Delivery, PlaybackController, PlaybackMode, TickOutcome, DEFAULT_PERIOD};
use crate::timeline::TimeAnchor;
use crate::SyncError;

/// Knobs of a [`SyncSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Kinds to subscribe to; empty means all.
    pub message_kinds: Vec<MessageKind>,
    /// Transport timing.
    pub session: SessionConfig,
    /// Builder knobs.
    pub builder: BuilderConfig,
    /// Replay clock period.
    pub playback_period: Duration,
    /// Initial playback rate.
    pub playback_rate: f64,
    /// Anomaly ring capacity.
    pub anomaly_capacity: usize,
    /// Flip ring capacity.
    pub flip_capacity: usize,
    /// Upper bound on inbox events folded per tick.
    pub max_events_per_tick: usize,
    /// Server-side cap on replay fetches.
    pub replay_max_messages: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            message_kinds: Vec::new(),
            session: SessionConfig::default(),
            builder: BuilderConfig::default(),
            playback_period: DEFAULT_PERIOD,
            playback_rate: 1.0,
            anomaly_capacity: DEFAULT_ANOMALY_CAPACITY,
            flip_capacity: DEFAULT_FLIP_CAPACITY,
            max_events_per_tick: 1024,
            replay_max_messages: None,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Live envelopes folded into the replica/cache.
    pub envelopes_applied: u64,
    /// Live envelopes dropped as already-seen sequences.
    pub duplicates_dropped: u64,
    /// Jumps in the live sequence (messages possibly missed).
    pub sequence_gaps: u64,
    /// Live envelopes dropped for naming another session.
    pub foreign_dropped: u64,
    /// Frames the transport could not decode.
    pub decode_failures: u64,
    /// Replay frames folded into the replay state.
    pub replay_frames_applied: u64,
    /// Replay messages rejected by the codec.
    pub replay_rejected: u64,
}

/// Replica plus cache; one for the live stream, one for replay.
#[derive(Debug, Clone)]
struct ViewState {
    replica: GraphReplica,
    cache: LatestValues,
}

impl ViewState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            replica: GraphReplica::new(),
            cache: LatestValues::with_capacity(config.anomaly_capacity, config.flip_capacity),
        }
    }

    fn seed(&mut self, seed: Option<&SnapshotResponse>) {
        match seed {
            Some(snapshot) => {
                self.replica.seed(&snapshot.graph.base_subgraph);
                self.cache.seed(snapshot);
            }
            None => {
                self.replica.clear();
                self.cache.clear();
            }
        }
    }

    fn fold(&mut self, env: &Envelope, time_ms: i64) {
        if let Payload::GraphDelta(delta) = &env.payload {
            let report = self.replica.apply_delta(delta);
            if report.unresolved > 0 {
                debug!(
                    delta_id = %delta.delta_id,
                    unresolved = report.unresolved,
                    "patches named unknown ids"
                );
            }
        }
        self.cache.observe(env, time_ms);
    }
}

/// One viewing session: transport, state, playback and builder.
pub struct SyncSession<C: Connector, H: HistorySource> {
    transport: TransportSession<C>,
    history: H,
    port: InboxPort,
    config: SyncConfig,
    session_id: Option<String>,
    subscription_id: Option<String>,
    close_reason: Option<CloseReason>,
    seed: Option<SnapshotResponse>,
    live: ViewState,
    replay: ViewState,
    anchor: TimeAnchor,
    last_sequence: u64,
    gap_pending: bool,
    since_observed: Duration,
    playback: PlaybackController,
    builder: VisualStateBuilder,
    stats: SyncStats,
}

impl<C: Connector, H: HistorySource> SyncSession<C, H> {
    /// Idle orchestrator; nothing is connected until [`SyncSession::open`].
    pub fn new(connector: C, history: H, config: SyncConfig) -> Result<Self, SyncError> {
        let builder = VisualStateBuilder::new(config.builder)?;
        let mut playback = PlaybackController::new(config.playback_period);
        playback.set_rate(config.playback_rate)?;
        Ok(Self {
            transport: TransportSession::new(connector, config.session),
            history,
            port: InboxPort::new(),
            session_id: None,
            subscription_id: None,
            close_reason: None,
            seed: None,
            live: ViewState::new(&config),
            replay: ViewState::new(&config),
            anchor: TimeAnchor::default(),
            last_sequence: 0,
            gap_pending: false,
            since_observed: Duration::ZERO,
            playback,
            builder,
            stats: SyncStats::default(),
            config,
        })
    }

    /// Close any current session, subscribe to `session_id`, and seed the
    /// replica and cache from its snapshot.
    ///
    /// Events that arrive while the snapshot is fetched stay queued and are
    /// folded on the next tick, on top of the seed.
    pub async fn open(&mut self, session_id: &str) -> Result<(), SyncError> {
        self.close().await;

        let request = SubscribeRequest::new(session_id, self.config.message_kinds.clone());
        let inbox = self.transport.open(request).await?;
        self.port.set_inbox(inbox);

        let snapshot = match self.history.fetch_snapshot(session_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(session_id = %session_id, %err, "snapshot fetch failed");
                self.transport.close().await;
                self.port.clear();
                return Err(err.into());
            }
        };
        self.session_id = Some(session_id.to_owned());
        self.apply_seed(snapshot);
        info!(
            session_id = %session_id,
            nodes = self.live.replica.node_count(),
            edges = self.live.replica.edge_count(),
            "session seeded"
        );
        Ok(())
    }

    /// Close the transport and drop every piece of session state.
    pub async fn close(&mut self) {
        self.transport.close().await;
        self.port.clear();
        if let Some(id) = self.session_id.take() {
            info!(session_id = %id, stats = ?self.stats, "session state cleared");
        }
        self.subscription_id = None;
        self.close_reason = None;
        self.seed = None;
        self.live = ViewState::new(&self.config);
        self.replay = ViewState::new(&self.config);
        self.anchor = TimeAnchor::default();
        self.last_sequence = 0;
        self.gap_pending = false;
        self.since_observed = Duration::ZERO;
        self.playback.reset();
        self.builder.reset();
        self.stats = SyncStats::default();
    }

    /// Drain the inbox, advance the replay clock by `elapsed`, then build and
    /// publish one snapshot.
    pub fn tick(&mut self, elapsed: Duration) -> Arc<VisualSnapshot> {
        self.drain_inbox();
        self.since_observed = self.since_observed.saturating_add(elapsed);
        match self.playback.advance(elapsed) {
            TickOutcome::Idle => {}
            TickOutcome::Advanced(delivery) => self.apply_delivery(delivery),
            TickOutcome::ReachedEnd(delivery) => {
                debug!(cursor_ms = delivery.cursor_ms, "replay reached end of window");
                self.apply_delivery(delivery);
            }
        }
        match self.playback.mode() {
            PlaybackMode::Replay => {
                let now = self.playback.cursor_ms();
                self.builder.tick(&self.replay.cache, &self.replay.replica, now)
            }
            PlaybackMode::Live => {
                let observed = self.live.cache.current_time_ms().unwrap_or(0);
                let drift = i64::try_from(self.since_observed.as_millis()).unwrap_or(i64::MAX);
                let now = observed.saturating_add(drift);
                self.builder.tick(&self.live.cache, &self.live.replica, now)
            }
        }
    }

    /// Refetch the snapshot of the open session and reseed the live state.
    ///
    /// Replay state keeps its window; it picks up the new seed on its next
    /// rewind.
    pub async fn resync(&mut self) -> Result<(), SyncError> {
        let session_id = self.session_id.clone().ok_or(SyncError::NoSession)?;
        let snapshot = self.history.fetch_snapshot(&session_id).await?;
        self.live.seed(Some(&snapshot));
        self.playback.observe_live(snapshot.t_rel_ms);
        self.since_observed = Duration::ZERO;
        self.seed = Some(snapshot);
        self.gap_pending = false;
        info!(
            session_id = %session_id,
            nodes = self.live.replica.node_count(),
            "live state resynced"
        );
        Ok(())
    }

    /// True once a sequence gap was seen since the last seed.
    pub fn needs_resync(&self) -> bool {
        self.gap_pending
    }

    /// Make sure `[from_ms, to_ms]` is cached, fetching it if needed.
    ///
    /// Returns the number of cached frames. A fresh window resets the replay
    /// replica and cache to the latest session snapshot (the one taken on
    /// open or on the last resync), not to the state at `from_ms`. Frames
    /// between that snapshot and `from_ms` are never fetched, so replayed
    /// state is snapshot-plus-window. Live deltas applied since the snapshot
    /// are not carried over.
    pub async fn load_replay(&mut self, from_ms: i64, to_ms: i64) -> Result<usize, SyncError> {
        let session_id = self.session_id.clone().ok_or(SyncError::NoSession)?;
        if self.playback.has_cache(from_ms, to_ms) {
            debug!(session_id = %session_id, from_ms, to_ms, "replay window already cached");
            return Ok(self.playback.cached_frames().len());
        }
        let query = ReplayQuery {
            from_ms,
            to_ms,
            message_kinds: self.config.message_kinds.clone(),
            max_messages: self.config.replay_max_messages,
        };
        let window = self.history.fetch_replay(&session_id, &query).await?;
        if window.rejected > 0 {
            warn!(session_id = %session_id, rejected = window.rejected, "replay messages rejected");
        }
        self.stats.replay_rejected += window.rejected as u64;
        let count = window.frames.len();
        self.playback
            .set_cache(window.frames, (window.from_ms, window.to_ms));
        self.replay.seed(self.seed.as_ref());
        info!(session_id = %session_id, from_ms = window.from_ms, to_ms = window.to_ms, frames = count, "replay window cached");
        Ok(count)
    }

    /// Scrub to `t_ms` (entering replay). Returns the number of frames applied.
    ///
    /// Scrubbing backwards rebuilds from the same snapshot seed as
    /// [`SyncSession::load_replay`].
    pub fn seek(&mut self, t_ms: i64) -> usize {
        let delivery = self.playback.seek(t_ms);
        let count = delivery.frames.len();
        self.apply_delivery(delivery);
        count
    }

    /// Start the replay clock (entering replay).
    pub fn play(&mut self) {
        self.playback.play();
    }

    /// Stop the replay clock.
    pub fn pause(&mut self) -> Result<(), SyncError> {
        Ok(self.playback.pause()?)
    }

    /// Change the replay rate.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), SyncError> {
        Ok(self.playback.set_rate(rate)?)
    }

    /// Return to live tailing.
    pub fn resume_live(&mut self) {
        self.playback.resume_live();
    }

    /// Receiver of published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<VisualSnapshot>> {
        self.builder.subscribe()
    }

    /// Builder, for overrides.
    pub fn builder_mut(&mut self) -> &mut VisualStateBuilder {
        &mut self.builder
    }

    /// History source (session listing, subgraph fetches).
    pub fn history(&self) -> &H {
        &self.history
    }

    /// Active session id.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Subscription id acknowledged by the server.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Why the transport ended, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// True while the transport's receive loop runs.
    pub fn is_live(&self) -> bool {
        self.transport.is_live()
    }

    /// Live replica.
    pub fn replica(&self) -> &GraphReplica {
        &self.live.replica
    }

    /// Live cache.
    pub fn cache(&self) -> &LatestValues {
        &self.live.cache
    }

    /// Replica as of the replay cursor.
    pub fn replay_replica(&self) -> &GraphReplica {
        &self.replay.replica
    }

    /// Cache as of the replay cursor.
    pub fn replay_cache(&self) -> &LatestValues {
        &self.replay.cache
    }

    /// Playback controller.
    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Counters since the session opened.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    fn apply_seed(&mut self, snapshot: SnapshotResponse) {
        self.live.seed(Some(&snapshot));
        self.replay.seed(Some(&snapshot));
        self.anchor = TimeAnchor::new(snapshot.t_rel_ms);
        self.playback.observe_live(snapshot.t_rel_ms);
        self.since_observed = Duration::ZERO;
        self.seed = Some(snapshot);
    }

    fn drain_inbox(&mut self) {
        for event in self.port.drain_events(self.config.max_events_per_tick) {
            match event {
                SessionEvent::Acknowledged { subscription_id } => {
                    self.subscription_id = Some(subscription_id);
                }
                SessionEvent::Envelope(env) => self.ingest(&env),
                SessionEvent::DecodeFailed(err) => {
                    self.stats.decode_failures += 1;
                    debug!(%err, "frame dropped");
                }
                SessionEvent::Closed(reason) => {
                    match &reason {
                        CloseReason::Requested => {
                            debug!(session_id = ?self.session_id, "transport closed");
                        }
                        other => warn!(session_id = ?self.session_id, reason = %other, "transport ended"),
                    }
                    self.close_reason = Some(reason);
                }
            }
        }
    }

    fn ingest(&mut self, env: &Envelope) {
        if self.session_id.as_deref() != Some(env.session_id.as_str()) {
            self.stats.foreign_dropped += 1;
            debug!(expected = ?self.session_id, got = %env.session_id, "envelope for another session");
            return;
        }
        if env.sequence > 0 {
            if env.sequence <= self.last_sequence {
                self.stats.duplicates_dropped += 1;
                debug!(sequence = env.sequence, last = self.last_sequence, "duplicate envelope");
                return;
            }
            if self.last_sequence > 0 && env.sequence > self.last_sequence + 1 {
                self.stats.sequence_gaps += 1;
                self.gap_pending = true;
                warn!(
                    sequence = env.sequence,
                    last = self.last_sequence,
                    "sequence gap; live state may have diverged"
                );
            }
            self.last_sequence = env.sequence;
        }
        let time_ms = self.anchor.derive(env);
        let before = self.live.cache.current_time_ms();
        self.live.fold(env, time_ms);
        self.playback.observe_live(time_ms);
        if self.live.cache.current_time_ms() != before {
            self.since_observed = Duration::ZERO;
        }
        self.stats.envelopes_applied += 1;
    }

    fn apply_delivery(&mut self, delivery: Delivery) {
        if delivery.rewind {
            self.replay.seed(self.seed.as_ref());
        }
        for frame in &delivery.frames {
            self.replay.fold(&frame.envelope, frame.time_ms);
        }
        self.stats.replay_frames_applied += delivery.frames.len() as u64;
    }
}
