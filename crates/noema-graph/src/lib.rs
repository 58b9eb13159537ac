// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-side replica of the backend's cognitive graph.
//!
//! Pure data (nodes, edges, clusters) plus ordered delta application and
//! deterministic hashing. The backend is the only writer; a [`GraphReplica`]
//! only ever moves forward by applying [`GraphDelta`]s in sequence order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

mod op;
mod patch;
mod replica;

pub use op::{GraphDelta, GraphOp, OpError, Update};
pub use patch::{ClusterPatch, EdgePatch, NodeMetricsPatch, NodePatch};
pub use replica::{
    ApplyReport, GraphReplica, HashError, OpOutcome, ReplicaDiagnostics, Subgraph,
};

/// Blake3 state hash (32 bytes).
pub type Hash32 = [u8; 32];
/// Backend-assigned node identifier.
pub type NodeId = String;
/// Backend-assigned edge identifier.
pub type EdgeId = String;
/// Backend-assigned cluster identifier.
pub type ClusterId = String;

/// Bounded per-node metrics bundle.
///
/// `valence` is signed in [-1, 1]; the others live in [0, 1]. The replica
/// stores whatever the backend sends; consumers clamp on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetrics {
    /// Signed polarity.
    pub valence: f64,
    /// Activation intensity.
    pub intensity: f64,
    /// How recently the node was reinforced.
    pub recency: f64,
    /// How settled the node is across revisions.
    pub stability: f64,
}

/// Short evidence excerpt attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePreview {
    /// Evidence identifier.
    pub evidence_id: String,
    /// Human readable excerpt.
    pub snippet: String,
    /// Source classification (e.g. "chat", "sensor").
    pub source_class: String,
    /// RFC 3339 timestamp of the evidence.
    pub timestamp_utc: String,
}

/// Graph node as materialized on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Optional long-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Layer tags assigned by the backend.
    #[serde(default)]
    pub layer_tags: BTreeSet<String>,
    /// Metrics bundle.
    #[serde(default)]
    pub metrics: NodeMetrics,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Importance in [0, 1].
    #[serde(default)]
    pub importance: f64,
    /// Role tags.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Evidence excerpts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_preview: Vec<EvidencePreview>,
    /// Free-form provenance note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_provenance: Option<String>,
}

impl Node {
    /// Minimal node with the given id; all other fields default.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            description: None,
            layer_tags: BTreeSet::new(),
            metrics: NodeMetrics::default(),
            confidence: 0.0,
            importance: 0.0,
            roles: BTreeSet::new(),
            evidence_preview: Vec::new(),
            reasoning_provenance: None,
        }
    }
}

/// Directed relation between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier.
    pub id: EdgeId,
    /// Source node id (may dangle).
    pub source: NodeId,
    /// Target node id (may dangle).
    pub target: NodeId,
    /// Relation-type tag.
    #[serde(rename = "type", alias = "relation", default)]
    pub relation: String,
    /// Strength in [0, 1].
    #[serde(default)]
    pub strength: f64,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
}

/// Group of nodes with aggregate metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Abstraction level of the cluster.
    #[serde(default)]
    pub level: i64,
    /// Member node ids (may dangle).
    #[serde(default)]
    pub member_node_ids: BTreeSet<NodeId>,
    /// Internal cohesion in [0, 1].
    #[serde(default)]
    pub cohesion: f64,
    /// Mean importance of members.
    #[serde(default)]
    pub average_importance: f64,
    /// Mean confidence of members.
    #[serde(default)]
    pub average_confidence: f64,
    /// Optional affective load in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affective_load: Option<f64>,
}
