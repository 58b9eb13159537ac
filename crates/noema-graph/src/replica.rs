// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The mutable graph replica and its delta application rules.

use ciborium::ser::into_writer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    Cluster, ClusterId, Edge, EdgeId, GraphDelta, GraphOp, Hash32, Node, NodeId, Update,
};

/// Self-contained slice of the graph, as served in a session snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    /// Producing graph id.
    #[serde(rename = "mpg_id", alias = "graph_id", default)]
    pub graph_id: String,
    /// Abstraction level of the slice.
    #[serde(default)]
    pub level: i64,
    /// Optional focus node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_node_id: Option<NodeId>,
    /// Nodes in the slice.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges in the slice.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Clusters in the slice.
    #[serde(rename = "segments", alias = "clusters", default)]
    pub clusters: Vec<Cluster>,
}

/// What a single operation did to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// A new entity was stored.
    Inserted,
    /// An existing entity was overwritten wholesale.
    Replaced,
    /// A patch was merged onto an existing entity.
    Patched,
    /// A patch named an unknown id and was dropped.
    Unresolved,
}

/// Per-delta tally returned by [`GraphReplica::apply_delta`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// New entities stored.
    pub inserted: usize,
    /// Entities overwritten wholesale.
    pub replaced: usize,
    /// Patches merged.
    pub patched: usize,
    /// Patches dropped for unknown ids.
    pub unresolved: usize,
}

impl ApplyReport {
    fn record(&mut self, outcome: OpOutcome) {
        match outcome {
            OpOutcome::Inserted => self.inserted += 1,
            OpOutcome::Replaced => self.replaced += 1,
            OpOutcome::Patched => self.patched += 1,
            OpOutcome::Unresolved => self.unresolved += 1,
        }
    }
}

/// Running counters since the replica was created or last cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaDiagnostics {
    /// Deltas applied.
    pub applied: u64,
    /// Wholesale replacements (adds over existing ids included).
    pub replaced: u64,
    /// Patches merged.
    pub patched: u64,
    /// Patches dropped because the target id was unknown.
    pub unresolved_patches: u64,
}

/// Canonical encoding failed while hashing.
#[derive(Debug, Error)]
#[error("canonical encoding failed: {0}")]
pub struct HashError(#[from] ciborium::ser::Error<std::io::Error>);

/// Client-side read replica of the backend graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphReplica {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    clusters: BTreeMap<ClusterId, Cluster>,
    graph_id: String,
    level: i64,
    last_delta_id: Option<String>,
    diagnostics: ReplicaDiagnostics,
}

#[derive(Serialize)]
struct CanonicalView<'a> {
    graph_id: &'a str,
    level: i64,
    nodes: &'a BTreeMap<NodeId, Node>,
    edges: &'a BTreeMap<EdgeId, Edge>,
    clusters: &'a BTreeMap<ClusterId, Cluster>,
}

impl GraphReplica {
    /// Empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replica seeded from a snapshot subgraph.
    pub fn from_subgraph(subgraph: &Subgraph) -> Self {
        let mut replica = Self::new();
        replica.seed(subgraph);
        replica
    }

    /// Replace the whole contents with `subgraph`.
    ///
    /// Duplicate ids inside the subgraph resolve last-wins. Diagnostics are
    /// kept; `last_delta_id` is cleared.
    pub fn seed(&mut self, subgraph: &Subgraph) {
        self.nodes = subgraph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        self.edges = subgraph
            .edges
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        self.clusters = subgraph
            .clusters
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        self.graph_id.clone_from(&subgraph.graph_id);
        self.level = subgraph.level;
        self.last_delta_id = None;
    }

    /// Drop every entity and reset counters.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply one delta. Never fails; unresolved patches are counted.
    pub fn apply_delta(&mut self, delta: &GraphDelta) -> ApplyReport {
        self.level = delta.level;
        self.last_delta_id = Some(delta.delta_id.clone());
        if !delta.graph_id.is_empty() {
            self.graph_id.clone_from(&delta.graph_id);
        }
        let mut report = ApplyReport::default();
        for op in &delta.operations {
            report.record(self.apply_op(op));
        }
        self.diagnostics.applied += 1;
        report
    }

    /// Apply a single operation.
    pub fn apply_op(&mut self, op: &GraphOp) -> OpOutcome {
        let outcome = match op {
            GraphOp::AddNode(node) | GraphOp::UpdateNode(Update::Replace(node)) => {
                upsert(&mut self.nodes, &node.id, node)
            }
            GraphOp::UpdateNode(Update::Patch { id, patch }) => {
                merge(&mut self.nodes, id, |n| patch.apply_to(n))
            }
            GraphOp::AddEdge(edge) | GraphOp::UpdateEdge(Update::Replace(edge)) => {
                upsert(&mut self.edges, &edge.id, edge)
            }
            GraphOp::UpdateEdge(Update::Patch { id, patch }) => {
                merge(&mut self.edges, id, |e| patch.apply_to(e))
            }
            GraphOp::AddCluster(cluster) | GraphOp::UpdateCluster(Update::Replace(cluster)) => {
                upsert(&mut self.clusters, &cluster.id, cluster)
            }
            GraphOp::UpdateCluster(Update::Patch { id, patch }) => {
                merge(&mut self.clusters, id, |c| patch.apply_to(c))
            }
        };
        match outcome {
            OpOutcome::Replaced => self.diagnostics.replaced += 1,
            OpOutcome::Patched => self.diagnostics.patched += 1,
            OpOutcome::Unresolved => self.diagnostics.unresolved_patches += 1,
            OpOutcome::Inserted => {}
        }
        outcome
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Edge by id.
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Cluster by id.
    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges, ordered by id (dangling ones included).
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// All clusters, ordered by id.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    /// Edges whose endpoints both exist.
    pub fn resolved_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges
            .values()
            .filter(|e| self.nodes.contains_key(&e.source) && self.nodes.contains_key(&e.target))
    }

    /// Existing member nodes of a cluster; dangling member ids are skipped.
    pub fn cluster_members(&self, id: &str) -> Vec<&Node> {
        self.clusters.get(id).map_or_else(Vec::new, |c| {
            c.member_node_ids
                .iter()
                .filter_map(|m| self.nodes.get(m))
                .collect()
        })
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of clusters.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// True when the replica holds no entity at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.clusters.is_empty()
    }

    /// Level of the most recent delta (or seed).
    pub fn level(&self) -> i64 {
        self.level
    }

    /// Id of the most recent delta, if any was applied since the last seed.
    pub fn last_delta_id(&self) -> Option<&str> {
        self.last_delta_id.as_deref()
    }

    /// Producing graph id.
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// Running counters.
    pub fn diagnostics(&self) -> ReplicaDiagnostics {
        self.diagnostics
    }

    /// Canonical CBOR encoding of the materialized graph.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, HashError> {
        let mut bytes = Vec::new();
        into_writer(&self.canonical_view(), &mut bytes)?;
        Ok(bytes)
    }

    /// Blake3 hash of the canonical encoding.
    ///
    /// Covers entities, graph id and level; `last_delta_id` and diagnostics
    /// are excluded so two replicas that converged on the same contents hash
    /// equal.
    pub fn state_hash(&self) -> Result<Hash32, HashError> {
        let mut hasher = blake3::Hasher::new();
        into_writer(&self.canonical_view(), &mut hasher)?;
        Ok(hasher.finalize().into())
    }

    fn canonical_view(&self) -> CanonicalView<'_> {
        CanonicalView {
            graph_id: &self.graph_id,
            level: self.level,
            nodes: &self.nodes,
            edges: &self.edges,
            clusters: &self.clusters,
        }
    }
}

fn upsert<T: Clone>(map: &mut BTreeMap<String, T>, id: &str, value: &T) -> OpOutcome {
    match map.insert(id.to_owned(), value.clone()) {
        Some(_) => OpOutcome::Replaced,
        None => OpOutcome::Inserted,
    }
}

fn merge<T>(map: &mut BTreeMap<String, T>, id: &str, f: impl FnOnce(&mut T)) -> OpOutcome {
    map.get_mut(id).map_or(OpOutcome::Unresolved, |entity| {
        f(entity);
        OpOutcome::Patched
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::{ClusterPatch, EdgePatch, NodePatch};

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            relation: "supports".into(),
            strength: 0.5,
            confidence: 0.5,
        }
    }

    fn delta(id: &str, operations: Vec<GraphOp>) -> GraphDelta {
        GraphDelta {
            graph_id: "g".into(),
            level: 1,
            delta_id: id.into(),
            operations,
        }
    }

    #[test]
    fn add_over_existing_id_replaces() {
        let mut r = GraphReplica::new();
        let mut n = Node::new("n1");
        n.label = "first".into();
        assert_eq!(r.apply_op(&GraphOp::AddNode(n.clone())), OpOutcome::Inserted);
        n.label = "second".into();
        assert_eq!(r.apply_op(&GraphOp::AddNode(n)), OpOutcome::Replaced);
        assert_eq!(r.node("n1").unwrap().label, "second");
        assert_eq!(r.node_count(), 1);
        assert_eq!(r.diagnostics().replaced, 1);
    }

    #[test]
    fn patch_for_unknown_id_is_skipped_and_counted() {
        let mut r = GraphReplica::new();
        let report = r.apply_delta(&delta(
            "d1",
            vec![
                GraphOp::UpdateNode(Update::Patch {
                    id: "ghost".into(),
                    patch: NodePatch::default(),
                }),
                GraphOp::UpdateCluster(Update::Patch {
                    id: "ghost".into(),
                    patch: ClusterPatch::default(),
                }),
            ],
        ));
        assert_eq!(report.unresolved, 2);
        assert!(r.is_empty());
        assert_eq!(r.diagnostics().unresolved_patches, 2);
        assert_eq!(r.last_delta_id(), Some("d1"));
        assert_eq!(r.level(), 1);
    }

    #[test]
    fn edge_patch_for_unknown_id_leaves_edges_untouched() {
        let mut r = GraphReplica::new();
        r.apply_delta(&delta("d1", vec![GraphOp::AddEdge(edge("e1", "a", "b"))]));
        let before = r.edge("e1").cloned();
        let report = r.apply_delta(&delta(
            "d2",
            vec![GraphOp::UpdateEdge(Update::Patch {
                id: "ghost".into(),
                patch: EdgePatch {
                    strength: Some(0.9),
                    ..EdgePatch::default()
                },
            })],
        ));
        assert_eq!(report.unresolved, 1);
        assert_eq!(r.diagnostics().unresolved_patches, 1);
        assert_eq!(r.edge_count(), 1);
        assert!(r.edge("ghost").is_none());
        assert_eq!(r.edge("e1").cloned(), before);
        assert_eq!(r.last_delta_id(), Some("d2"));
    }

    #[test]
    fn dangling_references_are_tolerated() {
        let mut r = GraphReplica::new();
        r.apply_op(&GraphOp::AddNode(Node::new("a")));
        r.apply_op(&GraphOp::AddEdge(edge("e1", "a", "missing")));
        r.apply_op(&GraphOp::AddEdge(edge("e2", "a", "a")));
        let mut c = Cluster {
            id: "c1".into(),
            label: String::new(),
            level: 0,
            member_node_ids: ["a".to_owned(), "missing".to_owned()].into_iter().collect(),
            cohesion: 0.0,
            average_importance: 0.0,
            average_confidence: 0.0,
            affective_load: None,
        };
        r.apply_op(&GraphOp::AddCluster(c.clone()));
        assert_eq!(r.edge_count(), 2);
        let resolved: Vec<_> = r.resolved_edges().map(|e| e.id.as_str()).collect();
        assert_eq!(resolved, vec!["e2"]);
        assert_eq!(r.cluster_members("c1").len(), 1);
        assert!(r.cluster_members("nope").is_empty());
        c.member_node_ids.clear();
        r.apply_op(&GraphOp::UpdateCluster(Update::Replace(c)));
        assert!(r.cluster_members("c1").is_empty());
    }

    #[test]
    fn seed_replaces_everything() {
        let mut r = GraphReplica::new();
        r.apply_op(&GraphOp::AddNode(Node::new("old")));
        let sub = Subgraph {
            graph_id: "mpg-1".into(),
            level: 2,
            center_node_id: None,
            nodes: vec![Node::new("a"), Node::new("b")],
            edges: vec![edge("e", "a", "b")],
            clusters: Vec::new(),
        };
        r.seed(&sub);
        assert!(r.node("old").is_none());
        assert_eq!(r.node_count(), 2);
        assert_eq!(r.level(), 2);
        assert_eq!(r.graph_id(), "mpg-1");
        assert_eq!(r, GraphReplica::from_subgraph(&sub));
    }

    #[test]
    fn hash_ignores_delta_bookkeeping() {
        let mut a = GraphReplica::new();
        let mut b = GraphReplica::new();
        a.apply_delta(&delta("d1", vec![GraphOp::AddNode(Node::new("n1"))]));
        b.apply_delta(&delta("d7", vec![GraphOp::AddNode(Node::new("n1"))]));
        b.apply_delta(&delta("d8", vec![GraphOp::AddNode(Node::new("n1"))]));
        assert_eq!(a.state_hash().unwrap(), b.state_hash().unwrap());
        b.apply_op(&GraphOp::UpdateNode(Update::Patch {
            id: "n1".into(),
            patch: NodePatch {
                importance: Some(0.9),
                ..NodePatch::default()
            },
        }));
        assert_ne!(a.state_hash().unwrap(), b.state_hash().unwrap());
    }

    #[test]
    fn subgraph_decodes_backend_field_names() {
        let sub: Subgraph = serde_json::from_str(
            r#"{"mpg_id":"m","level":0,"nodes":[{"id":"a"}],"edges":[],"segments":[{"id":"s1","member_node_ids":["a"]}]}"#,
        )
        .unwrap();
        assert_eq!(sub.graph_id, "m");
        assert_eq!(sub.clusters.len(), 1);
        let r = GraphReplica::from_subgraph(&sub);
        assert_eq!(r.cluster_members("s1").len(), 1);
    }

    #[test]
    fn clear_resets_counters() {
        let mut r = GraphReplica::new();
        r.apply_delta(&delta("d1", vec![GraphOp::AddNode(Node::new("n1"))]));
        r.clear();
        assert!(r.is_empty());
        assert_eq!(r.diagnostics(), ReplicaDiagnostics::default());
        assert_eq!(r.last_delta_id(), None);
    }
}
