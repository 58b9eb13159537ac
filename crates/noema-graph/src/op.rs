// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph operations and delta batches as they travel on the wire.

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::{Cluster, ClusterPatch, Edge, EdgePatch, Node, NodePatch};

/// Entity update carried by an `update_*` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<T, P> {
    /// Replace the entity wholesale (same rule as an add).
    Replace(T),
    /// Merge a sparse patch onto an existing entity.
    Patch {
        /// Id of the entity to patch.
        id: String,
        /// Fields to overwrite.
        patch: P,
    },
}

/// One structural mutation of the replica.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireOp")]
pub enum GraphOp {
    /// Insert or replace a node.
    AddNode(Node),
    /// Replace or patch a node.
    UpdateNode(Update<Node, NodePatch>),
    /// Insert or replace an edge.
    AddEdge(Edge),
    /// Replace or patch an edge.
    UpdateEdge(Update<Edge, EdgePatch>),
    /// Insert or replace a cluster.
    AddCluster(Cluster),
    /// Replace or patch a cluster.
    UpdateCluster(Update<Cluster, ClusterPatch>),
}

impl GraphOp {
    /// Canonical wire tag for this operation.
    pub fn kind(&self) -> &'static str {
        self.op_kind().as_str()
    }

    fn op_kind(&self) -> OpKind {
        match self {
            GraphOp::AddNode(_) => OpKind::AddNode,
            GraphOp::UpdateNode(_) => OpKind::UpdateNode,
            GraphOp::AddEdge(_) => OpKind::AddEdge,
            GraphOp::UpdateEdge(_) => OpKind::UpdateEdge,
            GraphOp::AddCluster(_) => OpKind::AddCluster,
            GraphOp::UpdateCluster(_) => OpKind::UpdateCluster,
        }
    }
}

/// Ordered batch of operations produced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    /// Producing graph id.
    #[serde(rename = "mpg_id", alias = "graph_id", default)]
    pub graph_id: String,
    /// Abstraction level the delta was computed at.
    #[serde(default)]
    pub level: i64,
    /// Backend delta identifier.
    #[serde(default)]
    pub delta_id: String,
    /// Operations, applied in array order.
    #[serde(default)]
    pub operations: Vec<GraphOp>,
}

/// Reasons a wire operation cannot be turned into a [`GraphOp`].
#[derive(Debug, Error)]
pub enum OpError {
    /// Neither a full entity nor a patch was supplied.
    #[error("{kind}: operation carries no entity and no patch")]
    MissingEntity {
        /// Wire tag of the offending operation.
        kind: &'static str,
    },
    /// A patch was supplied without the id of its target.
    #[error("{kind}: patch without target id")]
    MissingId {
        /// Wire tag of the offending operation.
        kind: &'static str,
    },
    /// Patch fields have the wrong shape.
    #[error("{kind}: malformed patch: {source}")]
    Patch {
        /// Wire tag of the offending operation.
        kind: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum OpKind {
    #[serde(rename = "add_node", alias = "add-node")]
    AddNode,
    #[serde(rename = "update_node", alias = "update-node")]
    UpdateNode,
    #[serde(rename = "add_edge", alias = "add-edge")]
    AddEdge,
    #[serde(rename = "update_edge", alias = "update-edge")]
    UpdateEdge,
    #[serde(
        rename = "add_segment",
        alias = "add_cluster",
        alias = "add-cluster",
        alias = "add-segment"
    )]
    AddCluster,
    #[serde(
        rename = "update_segment",
        alias = "update_cluster",
        alias = "update-cluster",
        alias = "update-segment"
    )]
    UpdateCluster,
}

impl OpKind {
    fn as_str(self) -> &'static str {
        match self {
            OpKind::AddNode => "add_node",
            OpKind::UpdateNode => "update_node",
            OpKind::AddEdge => "add_edge",
            OpKind::UpdateEdge => "update_edge",
            OpKind::AddCluster => "add_segment",
            OpKind::UpdateCluster => "update_segment",
        }
    }
}

/// Flat wire form: `{kind, node?, node_id?, edge?, edge_id?, segment?, segment_id?, patch?}`.
#[derive(Debug, Deserialize)]
struct WireOp {
    kind: OpKind,
    #[serde(default)]
    node: Option<Node>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    edge: Option<Edge>,
    #[serde(default)]
    edge_id: Option<String>,
    #[serde(default, rename = "segment", alias = "cluster")]
    cluster: Option<Cluster>,
    #[serde(default, rename = "segment_id", alias = "cluster_id")]
    cluster_id: Option<String>,
    #[serde(default)]
    patch: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct WireOpRef<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<&'a Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge: Option<&'a Edge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge_id: Option<&'a str>,
    #[serde(rename = "segment", skip_serializing_if = "Option::is_none")]
    cluster: Option<&'a Cluster>,
    #[serde(rename = "segment_id", skip_serializing_if = "Option::is_none")]
    cluster_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch: Option<PatchRef<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PatchRef<'a> {
    Node(&'a NodePatch),
    Edge(&'a EdgePatch),
    Cluster(&'a ClusterPatch),
}

impl<'a> WireOpRef<'a> {
    fn empty(kind: OpKind) -> Self {
        Self {
            kind: kind.as_str(),
            node: None,
            node_id: None,
            edge: None,
            edge_id: None,
            cluster: None,
            cluster_id: None,
            patch: None,
        }
    }
}

impl Serialize for GraphOp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut wire = WireOpRef::empty(self.op_kind());
        match self {
            GraphOp::AddNode(node) | GraphOp::UpdateNode(Update::Replace(node)) => {
                wire.node = Some(node);
            }
            GraphOp::UpdateNode(Update::Patch { id, patch }) => {
                wire.node_id = Some(id);
                wire.patch = Some(PatchRef::Node(patch));
            }
            GraphOp::AddEdge(edge) | GraphOp::UpdateEdge(Update::Replace(edge)) => {
                wire.edge = Some(edge);
            }
            GraphOp::UpdateEdge(Update::Patch { id, patch }) => {
                wire.edge_id = Some(id);
                wire.patch = Some(PatchRef::Edge(patch));
            }
            GraphOp::AddCluster(cluster) | GraphOp::UpdateCluster(Update::Replace(cluster)) => {
                wire.cluster = Some(cluster);
            }
            GraphOp::UpdateCluster(Update::Patch { id, patch }) => {
                wire.cluster_id = Some(id);
                wire.patch = Some(PatchRef::Cluster(patch));
            }
        }
        wire.serialize(serializer)
    }
}

impl TryFrom<WireOp> for GraphOp {
    type Error = OpError;

    fn try_from(w: WireOp) -> Result<Self, Self::Error> {
        let kind = w.kind.as_str();
        let op = match w.kind {
            OpKind::AddNode => GraphOp::AddNode(w.node.ok_or(OpError::MissingEntity { kind })?),
            OpKind::AddEdge => GraphOp::AddEdge(w.edge.ok_or(OpError::MissingEntity { kind })?),
            OpKind::AddCluster => {
                GraphOp::AddCluster(w.cluster.ok_or(OpError::MissingEntity { kind })?)
            }
            OpKind::UpdateNode => {
                GraphOp::UpdateNode(update_from_wire(kind, w.node, w.node_id, w.patch)?)
            }
            OpKind::UpdateEdge => {
                GraphOp::UpdateEdge(update_from_wire(kind, w.edge, w.edge_id, w.patch)?)
            }
            OpKind::UpdateCluster => {
                GraphOp::UpdateCluster(update_from_wire(kind, w.cluster, w.cluster_id, w.patch)?)
            }
        };
        Ok(op)
    }
}

fn update_from_wire<T, P>(
    kind: &'static str,
    entity: Option<T>,
    id: Option<String>,
    patch: Option<serde_json::Value>,
) -> Result<Update<T, P>, OpError>
where
    P: for<'de> Deserialize<'de>,
{
    if let Some(entity) = entity {
        return Ok(Update::Replace(entity));
    }
    let Some(raw) = patch else {
        return Err(OpError::MissingEntity { kind });
    };
    let id = id.ok_or(OpError::MissingId { kind })?;
    let patch = serde_json::from_value(raw).map_err(|source| OpError::Patch { kind, source })?;
    Ok(Update::Patch { id, patch })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn decodes_backend_and_kebab_tags() {
        let ops: Vec<GraphOp> = serde_json::from_str(
            r#"[
                {"kind":"add-node","node":{"id":"n1","importance":0.8,"confidence":0.5}},
                {"kind":"update_segment","segment_id":"c1","patch":{"cohesion":0.4}},
                {"kind":"update_edge","edge":{"id":"e1","source":"a","target":"b","type":"r"}}
            ]"#,
        )
        .unwrap();
        assert!(matches!(&ops[0], GraphOp::AddNode(n) if n.id == "n1" && n.importance == 0.8));
        assert!(matches!(
            &ops[1],
            GraphOp::UpdateCluster(Update::Patch { id, patch }) if id == "c1" && patch.cohesion == Some(0.4)
        ));
        assert!(matches!(&ops[2], GraphOp::UpdateEdge(Update::Replace(e)) if e.relation == "r"));
    }

    #[test]
    fn update_without_entity_or_patch_is_rejected() {
        let err = serde_json::from_str::<GraphOp>(r#"{"kind":"update_node","node_id":"n1"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("no entity and no patch"));
    }

    #[test]
    fn patch_without_id_is_rejected() {
        let err = serde_json::from_str::<GraphOp>(r#"{"kind":"update_node","patch":{}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("patch without target id"));
    }

    #[test]
    fn serializes_in_backend_vocabulary() {
        let op = GraphOp::UpdateCluster(Update::Patch {
            id: "c9".into(),
            patch: ClusterPatch {
                level: Some(2),
                ..ClusterPatch::default()
            },
        });
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["kind"], "update_segment");
        assert_eq!(v["segment_id"], "c9");
        assert_eq!(v["patch"]["level"], 2);
        let back: GraphOp = serde_json::from_value(v).unwrap();
        assert_eq!(back, op);
    }
}
