// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end scenarios: in-process transport plus a canned history source.

use noema_proto::rest::{ReplayQuery, ReplayResponse, ReplayWindow, SessionSummary, SnapshotResponse};
use noema_proto::{decode_envelope_value, Envelope, ServerFrame};
use noema_session_client::memory::{memory_transport, MemoryConnector, MemoryListener, MemoryPeer};
use noema_session_client::{CloseReason, FetchError, HistorySource};
use noema_sync::mapping::layout_position;
use noema_sync::{PlaybackMode, SyncConfig, SyncError, SyncSession};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(33);

#[derive(Default)]
struct CannedHistory {
    seed_nodes: Vec<serde_json::Value>,
    replay_messages: Vec<serde_json::Value>,
    fail_snapshot: bool,
    snapshot_fetches: AtomicUsize,
    replay_fetches: AtomicUsize,
}

impl HistorySource for CannedHistory {
    async fn fetch_snapshot(&self, session_id: &str) -> Result<SnapshotResponse, FetchError> {
        self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshot {
            return Err(FetchError::Status {
                status: 404,
                url: format!("/v1/sessions/{session_id}/snapshot"),
                body: "Session not found".into(),
            });
        }
        Ok(serde_json::from_value(json!({
            "session_id": session_id,
            "t_rel_ms": 0,
            "mpg": {"mpg_id": "g-1", "base_subgraph": {"mpg_id": "g-1", "level": 0, "nodes": self.seed_nodes}}
        }))?)
    }

    async fn fetch_replay(
        &self,
        session_id: &str,
        query: &ReplayQuery,
    ) -> Result<ReplayWindow, FetchError> {
        self.replay_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ReplayResponse {
            session_id: session_id.to_owned(),
            from_ms: query.from_ms,
            to_ms: query.to_ms,
            messages: self.replay_messages.clone(),
        }
        .into_window())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, FetchError> {
        Ok(Vec::new())
    }
}

fn envelope(session_id: &str, sequence: u64, kind: &str, payload: serde_json::Value) -> serde_json::Value {
    json!({
        "v": "1",
        "message_type": kind,
        "timestamp_utc": "2025-01-01T00:00:00Z",
        "session_id": session_id,
        "subject_id": "subj",
        "sequence": sequence,
        "payload": payload
    })
}

fn add_node(session_id: &str, sequence: u64, id: &str, importance: f64) -> Envelope {
    decode_envelope_value(envelope(
        session_id,
        sequence,
        "mpg_delta",
        json!({
            "mpg_id": "g-1",
            "level": 0,
            "delta_id": format!("d-{sequence}"),
            "operations": [{"kind": "add_node", "node": {"id": id, "importance": importance}}]
        }),
    ))
    .unwrap()
}

fn state_at(session_id: &str, sequence: u64, t: i64) -> serde_json::Value {
    envelope(session_id, sequence, "somatic_state", json!({"t_rel_ms": t, "features": {"hr": 1.0}}))
}

fn push(peer: &MemoryPeer, env: Envelope) {
    assert!(peer.send_frame(&ServerFrame::Event {
        subscription_id: Some("sub".into()),
        envelope: Box::new(env),
    }));
}

async fn open(
    session: &mut SyncSession<MemoryConnector, CannedHistory>,
    listener: &mut MemoryListener,
    session_id: &str,
) -> MemoryPeer {
    session.open(session_id).await.unwrap();
    listener.accept().await.unwrap()
}

/// Tick until `done` holds, yielding so the receive loop can run.
async fn pump(
    session: &mut SyncSession<MemoryConnector, CannedHistory>,
    done: impl Fn(&SyncSession<MemoryConnector, CannedHistory>) -> bool,
) {
    for _ in 0..200 {
        tokio::task::yield_now().await;
        session.tick(TICK);
        if done(session) {
            return;
        }
    }
    panic!("condition not reached");
}

fn new_session(history: CannedHistory) -> (SyncSession<MemoryConnector, CannedHistory>, MemoryListener) {
    let (connector, listener) = memory_transport();
    let session = SyncSession::new(connector, history, SyncConfig::default()).unwrap();
    (session, listener)
}

#[tokio::test]
async fn graph_delta_becomes_one_render_instance() {
    let (mut session, mut listener) = new_session(CannedHistory::default());
    let peer = open(&mut session, &mut listener, "s-1").await;
    assert!(session.replica().is_empty());

    push(&peer, add_node("s-1", 1, "n1", 0.8));
    pump(&mut session, |s| s.replica().node_count() == 1).await;

    let snapshot = session.tick(TICK);
    assert_eq!(snapshot.nodes.len(), 1);
    let n1 = snapshot.node("n1").unwrap();
    assert_eq!(n1.position, layout_position("n1", 0, 0.8));
    assert!(snapshot.edges.is_empty());
    assert_eq!(*session.subscribe().borrow(), snapshot);
}

#[tokio::test]
async fn switching_sessions_drops_all_state() {
    let (mut session, mut listener) = new_session(CannedHistory::default());
    let peer_a = open(&mut session, &mut listener, "A").await;
    push(&peer_a, add_node("A", 1, "n1", 0.5));
    pump(&mut session, |s| s.replica().node("n1").is_some()).await;

    let peer_b = open(&mut session, &mut listener, "B").await;
    assert!(peer_a.client_closed());
    assert_eq!(peer_b.session_id(), "B");
    assert_eq!(session.session_id(), Some("B"));
    assert!(session.replica().node("n1").is_none());
    assert!(session.tick(TICK).nodes.is_empty());

    // Stale traffic naming the old session is ignored.
    push(&peer_b, add_node("A", 2, "n9", 0.5));
    pump(&mut session, |s| s.stats().foreign_dropped == 1).await;
    assert!(session.replica().is_empty());
}

#[tokio::test]
async fn duplicate_sequences_are_dropped() {
    let (mut session, mut listener) = new_session(CannedHistory::default());
    let peer = open(&mut session, &mut listener, "s-1").await;

    push(&peer, add_node("s-1", 2, "n1", 0.1));
    push(&peer, add_node("s-1", 2, "n2", 0.1));
    push(&peer, add_node("s-1", 1, "n3", 0.1));
    push(&peer, add_node("s-1", 0, "n4", 0.1));
    pump(&mut session, |s| {
        let st = s.stats();
        st.envelopes_applied + st.duplicates_dropped == 4
    })
    .await;

    assert_eq!(session.stats().duplicates_dropped, 2);
    let ids: Vec<_> = session.replica().nodes().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n4"]);
}

#[tokio::test]
async fn sequence_gap_requests_a_resync() {
    let (mut session, mut listener) = new_session(CannedHistory::default());
    let peer = open(&mut session, &mut listener, "s-1").await;

    push(&peer, add_node("s-1", 1, "n1", 0.1));
    push(&peer, add_node("s-1", 4, "n2", 0.1));
    pump(&mut session, |s| s.stats().envelopes_applied == 2).await;
    assert_eq!(session.stats().sequence_gaps, 1);
    assert!(session.needs_resync());

    session.resync().await.unwrap();
    assert!(!session.needs_resync());
    assert!(session.replica().is_empty());
    assert_eq!(session.history().snapshot_fetches.load(Ordering::SeqCst), 2);

    // Later traffic still dedups against the pre-resync sequence.
    push(&peer, add_node("s-1", 4, "n3", 0.1));
    push(&peer, add_node("s-1", 5, "n4", 0.1));
    pump(&mut session, |s| s.replica().node("n4").is_some()).await;
    assert!(session.replica().node("n3").is_none());
    assert!(!session.needs_resync());
}

#[tokio::test]
async fn replay_window_is_cached_and_scrubbed() {
    let history = CannedHistory {
        replay_messages: vec![
            state_at("s-1", 1, 0),
            state_at("s-1", 2, 500),
            json!({"message_type": "telepathy", "payload": {}}),
            state_at("s-1", 3, 1200),
        ],
        ..CannedHistory::default()
    };
    let (mut session, mut listener) = new_session(history);
    let _peer = open(&mut session, &mut listener, "s-1").await;

    assert_eq!(session.load_replay(0, 2000).await.unwrap(), 3);
    assert_eq!(session.stats().replay_rejected, 1);
    assert_eq!(session.load_replay(200, 1500).await.unwrap(), 3);
    assert_eq!(session.history().replay_fetches.load(Ordering::SeqCst), 1);

    assert_eq!(session.seek(1000), 2);
    assert_eq!(session.playback().mode(), PlaybackMode::Replay);
    let sv = session.replay_cache().state_vector().unwrap();
    assert_eq!(sv.value.t_rel_ms, 500);
    assert_eq!(session.seek(1300), 1);
    assert_eq!(session.replay_cache().state_vector().unwrap().value.t_rel_ms, 1200);

    // Scrubbing back rebuilds from the seed.
    assert_eq!(session.seek(100), 1);
    assert_eq!(session.replay_cache().state_vector().unwrap().value.t_rel_ms, 0);
    assert_eq!(session.tick(TICK).time_ms, 100);

    // Live state never saw the replayed frames.
    assert!(session.cache().state_vector().is_none());
    session.resume_live();
    assert_eq!(session.playback().mode(), PlaybackMode::Live);
}

#[tokio::test]
async fn replay_window_starts_from_the_session_snapshot() {
    let history = CannedHistory {
        seed_nodes: vec![json!({"id": "n-seed", "importance": 0.5})],
        replay_messages: vec![state_at("s-1", 7, 5000), state_at("s-1", 8, 6000)],
        ..CannedHistory::default()
    };
    let (mut session, mut listener) = new_session(history);
    let peer = open(&mut session, &mut listener, "s-1").await;
    push(&peer, add_node("s-1", 1, "n-live", 0.4));
    pump(&mut session, |s| s.replica().node("n-live").is_some()).await;

    // The window opens well after the snapshot; nothing between the two is fetched.
    assert_eq!(session.load_replay(5000, 8000).await.unwrap(), 2);
    assert!(session.replay_replica().node("n-seed").is_some());
    assert!(session.replay_replica().node("n-live").is_none());
    assert!(session.replay_cache().state_vector().is_none());

    assert_eq!(session.seek(5000), 1);
    assert_eq!(session.replay_replica().node_count(), 1);
    assert!(session.replay_replica().node("n-seed").is_some());
    assert_eq!(session.replay_cache().state_vector().unwrap().value.t_rel_ms, 5000);
    assert!(session.replica().node("n-live").is_some());
}

#[tokio::test]
async fn replay_requires_a_session_and_valid_rates() {
    let (mut session, _listener) = new_session(CannedHistory::default());
    assert!(matches!(session.load_replay(0, 10).await, Err(SyncError::NoSession)));
    assert!(matches!(session.set_rate(-1.0), Err(SyncError::Playback(_))));
    assert!(matches!(session.pause(), Err(SyncError::Playback(_))));
}

#[tokio::test]
async fn snapshot_failure_aborts_open() {
    let history = CannedHistory {
        fail_snapshot: true,
        ..CannedHistory::default()
    };
    let (mut session, mut listener) = new_session(history);
    let err = session.open("ghost").await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch(FetchError::Status { status: 404, .. })));
    assert!(!session.is_live());
    assert_eq!(session.session_id(), None);
    let peer = listener.accept().await.unwrap();
    assert!(peer.client_closed());
}

#[tokio::test]
async fn server_error_is_recorded_as_close_reason() {
    let (mut session, mut listener) = new_session(CannedHistory::default());
    let peer = open(&mut session, &mut listener, "s-1").await;
    peer.send_frame(&ServerFrame::Ack {
        subscription_id: "sub-9".into(),
    });
    peer.send_frame(&ServerFrame::Error {
        detail: "Session not found".into(),
    });
    pump(&mut session, |s| s.close_reason().is_some()).await;
    assert_eq!(session.subscription_id(), Some("sub-9"));
    assert_eq!(
        session.close_reason(),
        Some(&CloseReason::ServerError("Session not found".into()))
    );
}
