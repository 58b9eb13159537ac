// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response bodies of the history endpoints.

use noema_graph::Subgraph;
use serde::{Deserialize, Serialize};

use crate::{
    decode_envelope_value, BeliefState, CoherenceState, DecisionCycle, DecodeError, Envelope,
    MessageKind, StateVector,
};

/// Node/cluster counts for one level of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    /// Level.
    pub level: i64,
    /// Nodes at this level.
    pub node_count: u64,
    /// Clusters at this level.
    #[serde(rename = "segment_count", alias = "cluster_count")]
    pub cluster_count: u64,
}

/// Graph part of a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Graph id.
    #[serde(rename = "mpg_id", alias = "graph_id", default)]
    pub graph_id: String,
    /// Per-level counts.
    #[serde(default)]
    pub level_summaries: Vec<LevelSummary>,
    /// Seed subgraph for the replica.
    pub base_subgraph: Subgraph,
}

/// `GET /v1/sessions/{id}/snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// Session id.
    pub session_id: String,
    /// Session-relative time the snapshot was taken at.
    #[serde(default)]
    pub t_rel_ms: i64,
    /// Latest state vector.
    #[serde(rename = "somatic", alias = "state_vector", default)]
    pub state_vector: Option<StateVector>,
    /// Latest belief state.
    #[serde(rename = "symbolic", alias = "belief_state", default)]
    pub belief_state: Option<BeliefState>,
    /// Latest coherence state.
    #[serde(rename = "noetic", alias = "coherence_state", default)]
    pub coherence_state: Option<CoherenceState>,
    /// Latest decision-cycle transition.
    #[serde(default)]
    pub last_decision_cycle: Option<DecisionCycle>,
    /// Graph seed.
    #[serde(rename = "mpg", alias = "graph")]
    pub graph: GraphSnapshot,
}

/// `GET /v1/sessions/{id}/replay`, messages still undecoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResponse {
    /// Session id.
    pub session_id: String,
    /// Window start (session-relative ms).
    pub from_ms: i64,
    /// Window end (session-relative ms).
    pub to_ms: i64,
    /// Raw envelopes; each is decoded on its own.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Decoded replay window. Undecodable messages are counted, not fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayWindow {
    /// Session id.
    pub session_id: String,
    /// Window start.
    pub from_ms: i64,
    /// Window end.
    pub to_ms: i64,
    /// Envelopes in server order.
    pub frames: Vec<Envelope>,
    /// Messages that failed to decode.
    pub rejected: usize,
}

impl ReplayResponse {
    /// Decode every message, keeping the good ones.
    pub fn into_window(self) -> ReplayWindow {
        self.into_window_with(|_| {})
    }

    /// Like [`ReplayResponse::into_window`], reporting each rejection to `sink`.
    pub fn into_window_with(self, mut sink: impl FnMut(DecodeError)) -> ReplayWindow {
        let mut frames = Vec::with_capacity(self.messages.len());
        let mut rejected = 0;
        for raw in self.messages {
            match decode_envelope_value(raw) {
                Ok(env) => frames.push(env),
                Err(err) => {
                    rejected += 1;
                    sink(err);
                }
            }
        }
        ReplayWindow {
            session_id: self.session_id,
            from_ms: self.from_ms,
            to_ms: self.to_ms,
            frames,
            rejected,
        }
    }
}

/// Query of a replay fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayQuery {
    /// Window start.
    pub from_ms: i64,
    /// Window end.
    pub to_ms: i64,
    /// Restrict to these kinds; empty means all.
    pub message_kinds: Vec<MessageKind>,
    /// Server-side cap on returned messages.
    pub max_messages: Option<u32>,
}

impl ReplayQuery {
    /// Window `[from_ms, to_ms]`, all kinds, server default cap.
    pub fn window(from_ms: i64, to_ms: i64) -> Self {
        Self {
            from_ms,
            to_ms,
            message_kinds: Vec::new(),
            max_messages: None,
        }
    }

    /// Query-string pairs in backend names (`message_types` is comma joined).
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("from_ms", self.from_ms.to_string()),
            ("to_ms", self.to_ms.to_string()),
        ];
        if !self.message_kinds.is_empty() {
            let joined = self
                .message_kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("message_types", joined));
        }
        if let Some(max) = self.max_messages {
            pairs.push(("max_messages", max.to_string()));
        }
        pairs
    }
}

/// Entry of `GET /v1/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Experiment id.
    #[serde(default)]
    pub experiment_id: String,
    /// Subject id.
    #[serde(default)]
    pub subject_id: String,
    /// Backend status string (e.g. `active`, `ended`).
    #[serde(default)]
    pub status: String,
    /// RFC 3339 start.
    #[serde(default)]
    pub started_utc: String,
    /// RFC 3339 end, once ended.
    #[serde(default)]
    pub ended_utc: Option<String>,
}

/// Rogue-variable record of `GET /v1/sessions/{id}/qrv_events`.
///
/// Records read back from graph storage arrive flattened, so `detection`
/// is optional and unrecognised keys land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrvEvent {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Session id.
    #[serde(default)]
    pub session_id: String,
    /// Session-relative detection time.
    #[serde(default)]
    pub t_rel_ms: f64,
    /// Prompt the detection is tied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    /// Detector output, kept as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<serde_json::Value>,
    /// Any other keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body of `GET /v1/sessions/{id}/qrv_events`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QrvEventsResponse {
    /// Events in storage order.
    #[serde(default)]
    pub events: Vec<QrvEvent>,
}

/// `GET /v1/sessions/{id}/decisions/{decision_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    /// Session id.
    pub session_id: String,
    /// Decision id.
    pub decision_id: String,
    /// Phase transitions of the decision, oldest first.
    #[serde(default)]
    pub phases: Vec<DecisionCycle>,
    /// Flip events raised during the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mufs_events: Option<Vec<serde_json::Value>>,
    /// Rogue-variable events raised during the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rogue_variable_events: Option<Vec<serde_json::Value>>,
    /// Graph as the decision saw it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpg_full: Option<Subgraph>,
    /// Same graph with the flip-set removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpg_without_mufs: Option<Subgraph>,
}
