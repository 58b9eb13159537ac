// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sparse field-level patches.
//!
//! A missing (or `null`) field leaves the target untouched. Ids are never
//! patchable; an `id` key in the wire map is ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{Cluster, Edge, EvidencePreview, Node, NodeId, NodeMetrics};

/// Sparse patch for [`NodeMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetricsPatch {
    /// New valence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valence: Option<f64>,
    /// New intensity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    /// New recency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f64>,
    /// New stability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
}

impl NodeMetricsPatch {
    /// Merge onto `metrics`, touching only the fields present here.
    pub fn apply_to(&self, metrics: &mut NodeMetrics) {
        set(&mut metrics.valence, self.valence);
        set(&mut metrics.intensity, self.intensity);
        set(&mut metrics.recency, self.recency);
        set(&mut metrics.stability, self.stability);
    }
}

/// Sparse patch for a [`Node`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePatch {
    /// New label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Replacement layer tag set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_tags: Option<BTreeSet<String>>,
    /// Nested metrics patch (merged field by field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetricsPatch>,
    /// New confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// New importance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Replacement role set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,
    /// Replacement evidence list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_preview: Option<Vec<EvidencePreview>>,
    /// New provenance note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_provenance: Option<String>,
}

impl NodePatch {
    /// Merge onto `node`.
    pub fn apply_to(&self, node: &mut Node) {
        set(&mut node.label, self.label.clone());
        if self.description.is_some() {
            node.description.clone_from(&self.description);
        }
        set(&mut node.layer_tags, self.layer_tags.clone());
        if let Some(metrics) = &self.metrics {
            metrics.apply_to(&mut node.metrics);
        }
        set(&mut node.confidence, self.confidence);
        set(&mut node.importance, self.importance);
        set(&mut node.roles, self.roles.clone());
        set(&mut node.evidence_preview, self.evidence_preview.clone());
        if self.reasoning_provenance.is_some() {
            node.reasoning_provenance
                .clone_from(&self.reasoning_provenance);
        }
    }
}

/// Sparse patch for an [`Edge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgePatch {
    /// New source node id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeId>,
    /// New target node id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
    /// New relation tag.
    #[serde(rename = "type", alias = "relation", skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// New strength.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    /// New confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl EdgePatch {
    /// Merge onto `edge`.
    pub fn apply_to(&self, edge: &mut Edge) {
        set(&mut edge.source, self.source.clone());
        set(&mut edge.target, self.target.clone());
        set(&mut edge.relation, self.relation.clone());
        set(&mut edge.strength, self.strength);
        set(&mut edge.confidence, self.confidence);
    }
}

/// Sparse patch for a [`Cluster`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterPatch {
    /// New label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    /// Replacement member set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_node_ids: Option<BTreeSet<NodeId>>,
    /// New cohesion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohesion: Option<f64>,
    /// New mean importance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_importance: Option<f64>,
    /// New mean confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f64>,
    /// New affective load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affective_load: Option<f64>,
}

impl ClusterPatch {
    /// Merge onto `cluster`.
    pub fn apply_to(&self, cluster: &mut Cluster) {
        set(&mut cluster.label, self.label.clone());
        set(&mut cluster.level, self.level);
        set(&mut cluster.member_node_ids, self.member_node_ids.clone());
        set(&mut cluster.cohesion, self.cohesion);
        set(&mut cluster.average_importance, self.average_importance);
        set(&mut cluster.average_confidence, self.average_confidence);
        if self.affective_load.is_some() {
            cluster.affective_load = self.affective_load;
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn metrics_patch_leaves_siblings_alone() {
        let mut node = Node::new("n1");
        node.metrics = NodeMetrics {
            valence: -0.4,
            intensity: 0.7,
            recency: 0.2,
            stability: 0.9,
        };
        let patch = NodePatch {
            metrics: Some(NodeMetricsPatch {
                intensity: Some(0.1),
                ..NodeMetricsPatch::default()
            }),
            ..NodePatch::default()
        };
        patch.apply_to(&mut node);
        assert_eq!(node.metrics.intensity, 0.1);
        assert_eq!(node.metrics.valence, -0.4);
        assert_eq!(node.metrics.recency, 0.2);
        assert_eq!(node.metrics.stability, 0.9);
    }

    #[test]
    fn wire_patch_ignores_id_and_nulls() {
        let patch: NodePatch =
            serde_json::from_str(r#"{"id":"other","label":null,"importance":0.3}"#).unwrap();
        let mut node = Node::new("n1");
        node.label = "kept".into();
        patch.apply_to(&mut node);
        assert_eq!(node.id, "n1");
        assert_eq!(node.label, "kept");
        assert_eq!(node.importance, 0.3);
    }

    #[test]
    fn edge_patch_accepts_backend_type_key() {
        let patch: EdgePatch = serde_json::from_str(r#"{"type":"supports"}"#).unwrap();
        let mut edge = Edge {
            id: "e1".into(),
            source: "a".into(),
            target: "b".into(),
            relation: "related".into(),
            strength: 0.5,
            confidence: 0.5,
        };
        patch.apply_to(&mut edge);
        assert_eq!(edge.relation, "supports");
        assert_eq!(edge.source, "a");
    }
}
