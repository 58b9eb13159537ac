// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed payload bodies, one per message kind.
//!
//! Field names follow the backend; a few generic aliases are accepted so
//! hand-written fixtures can use the neutral vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use noema_graph::GraphDelta;

/// Readiness marker attached to a state vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnticipatoryMarker {
    /// Marker family (`readiness_like`, `phase_locking`, `other`).
    pub marker_type: String,
    /// Lead time ahead of the event.
    pub lead_time_ms: i64,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Filtered physiological state (somatic stream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    /// Session-relative time of the sample window.
    pub t_rel_ms: i64,
    /// Window length.
    #[serde(default)]
    pub window_ms: i64,
    /// Named feature magnitudes.
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    /// Filter innovations per feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub innovation: Option<BTreeMap<String, f64>>,
    /// Diagonal of the state covariance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance_diag: Option<BTreeMap<String, f64>>,
    /// Backend-computed overall uncertainty in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_uncertainty_score: Option<f64>,
    /// A change point was detected in this window.
    #[serde(default)]
    pub change_point: bool,
    /// Anomaly score in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    /// Anticipatory markers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anticipatory_markers: Vec<AnticipatoryMarker>,
}

/// One belief in the symbolic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    /// Belief id.
    pub id: String,
    /// Belief kind (`entity`, `event`, `relation`, `policy`).
    pub kind: String,
    /// Display label.
    pub label: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Signed polarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valence: Option<f64>,
    /// Intensity in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    /// Recency in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<f64>,
    /// Stability in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Importance in [0, 1].
    pub importance: f64,
}

/// One candidate of a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOption {
    /// Predicted value.
    pub value: String,
    /// Probability in [0, 1].
    pub probability: f64,
}

/// A forecast made by the symbolic layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Prediction id.
    pub id: String,
    /// What is predicted (`word`, `event`, `outcome`).
    pub target_type: String,
    /// Forecast horizon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_ms: Option<i64>,
    /// Ranked candidates.
    #[serde(default)]
    pub topk: Vec<PredictionOption>,
    /// Brier score once realized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brier_score: Option<f64>,
    /// Realized value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_value: Option<String>,
    /// Realized error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_error: Option<f64>,
}

/// Named group of beliefs the backend is unsure about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyRegion {
    /// Region label.
    pub label: String,
    /// Member belief ids.
    #[serde(default)]
    pub belief_ids: Vec<String>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Symbolic belief state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    /// Session-relative time.
    pub t_rel_ms: i64,
    /// Revision id of this belief set.
    #[serde(default)]
    pub belief_revision_id: String,
    /// Current beliefs.
    #[serde(default)]
    pub beliefs: Vec<Belief>,
    /// Outstanding predictions.
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    /// Uncertainty regions.
    #[serde(default)]
    pub uncertainty_regions: Vec<UncertaintyRegion>,
}

/// Pairwise correlation between two input streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCorrelation {
    /// First stream.
    pub stream_x: String,
    /// Second stream.
    pub stream_y: String,
    /// Correlation in [-1, 1].
    pub r: f64,
}

/// One frequency band of the coherence spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumBand {
    /// Band label.
    pub band_label: String,
    /// Lower and upper frequency bound.
    pub freq_range_hz: (f64, f64),
    /// Coherence strength in [0, 1].
    pub coherence_strength: f64,
}

/// How well intuition beats baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyEstimate {
    /// Probability of beating baseline.
    pub p_better_than_baseline: f64,
    /// Calibration error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_error: Option<f64>,
}

/// Cross-modal coherence state (noetic stream).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoherenceState {
    /// Session-relative time.
    pub t_rel_ms: i64,
    /// Window length.
    #[serde(default)]
    pub window_ms: i64,
    /// Global coherence in [0, 1].
    #[serde(default)]
    pub global_coherence_score: f64,
    /// Signed entropy change over the window.
    #[serde(default)]
    pub entropy_change: f64,
    /// Stream correlations.
    #[serde(default)]
    pub stream_correlations: Vec<StreamCorrelation>,
    /// Coherence spectrum.
    #[serde(default)]
    pub coherence_spectrum: Vec<SpectrumBand>,
    /// Intuitive accuracy estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intuitive_accuracy_estimate: Option<AccuracyEstimate>,
}

/// Phase of the stimulus/organism/response/consequence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionPhase {
    /// Stimulus.
    S,
    /// Organism.
    O,
    /// Response.
    R,
    /// Consequence.
    K,
    /// Noetic adjustment.
    N,
    /// Next stimulus.
    #[serde(rename = "S_prime")]
    SPrime,
}

impl DecisionPhase {
    /// Position in the loop, starting at 0 for `S`.
    pub fn ordinal(self) -> u8 {
        match self {
            DecisionPhase::S => 0,
            DecisionPhase::O => 1,
            DecisionPhase::R => 2,
            DecisionPhase::K => 3,
            DecisionPhase::N => 4,
            DecisionPhase::SPrime => 5,
        }
    }
}

/// Action taken in the response phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAction {
    /// Action id.
    pub action_id: String,
    /// Display label.
    pub label: String,
    /// Opaque parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Observed consequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Outcome label.
    pub label: String,
    /// Named metrics.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Adjustments fed back by the noetic layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoeticAdjustment {
    /// Attention gain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_gain: Option<f64>,
    /// Decision threshold delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_threshold_delta: Option<f64>,
    /// Learning rate delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_delta: Option<f64>,
}

/// Decision-cycle phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionCycle {
    /// Cycle id.
    #[serde(rename = "sork_cycle_id", alias = "cycle_id")]
    pub cycle_id: String,
    /// Decision id, when the cycle belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    /// Current phase.
    pub phase: DecisionPhase,
    /// RFC 3339 start of the phase.
    pub phase_started_utc: String,
    /// RFC 3339 end of the phase, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_ended_utc: Option<String>,
    /// Stimulus references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stimulus_refs: Option<Vec<BTreeMap<String, String>>>,
    /// Beliefs the organism phase consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organism_belief_ids: Option<Vec<String>>,
    /// Response action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_action: Option<DecisionAction>,
    /// Consequence outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequence_outcome: Option<DecisionOutcome>,
    /// Noetic adjustments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noetic_adjustments: Option<NoeticAdjustment>,
}

/// Attribution statistics behind an anomaly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapleyStats {
    /// Mean absolute contribution.
    pub mean_abs_contrib: f64,
    /// Standard deviation of absolute contribution.
    pub std_abs_contrib: f64,
    /// Candidate's absolute contribution.
    pub candidate_abs_contrib: f64,
    /// Z score of the candidate.
    pub z_score: f64,
}

/// Impact breakdown of an anomaly, each factor in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactFactors {
    /// Rate of change.
    pub rate_of_change: f64,
    /// Breadth of impact.
    pub breadth_of_impact: f64,
    /// Amplification.
    pub amplification: f64,
    /// Emotional load.
    pub emotional_load: f64,
    /// Gate leverage.
    pub gate_leverage: f64,
    /// Robustness.
    pub robustness: f64,
}

/// Anomalous cluster or pathway flagged by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Event id.
    #[serde(rename = "rogue_id", alias = "anomaly_id")]
    pub anomaly_id: String,
    /// Graph the event refers to.
    #[serde(rename = "mpg_id", alias = "graph_id")]
    pub graph_id: String,
    /// `segment` or `pathway`.
    pub candidate_type: String,
    /// Inclusive level range.
    pub level_range: (i64, i64),
    /// Flagged clusters.
    #[serde(
        rename = "segment_ids",
        alias = "cluster_ids",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_ids: Option<Vec<String>>,
    /// Flagged pathway nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathway_nodes: Option<Vec<String>>,
    /// Attribution statistics.
    pub shapley_stats: ShapleyStats,
    /// Overall potency.
    pub potency_index: f64,
    /// Impact breakdown.
    pub impact_factors: ImpactFactors,
}

/// Kind of unawareness behind a flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnawarenessType {
    /// Input unawareness.
    #[serde(rename = "IU")]
    Input,
    /// Process unawareness.
    #[serde(rename = "PU")]
    Process,
}

/// Choice with its utility breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionUtility {
    /// Chosen option.
    pub choice: String,
    /// Utility per option.
    #[serde(default)]
    pub utility: BTreeMap<String, f64>,
}

/// Minimal unaware set whose removal flips a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipEvent {
    /// Event id.
    #[serde(rename = "mufs_id", alias = "flip_id")]
    pub flip_id: String,
    /// Decision that flips.
    pub decision_id: String,
    /// Graph the event refers to.
    #[serde(rename = "mpg_id", alias = "graph_id")]
    pub graph_id: String,
    /// Unawareness kinds involved.
    #[serde(default)]
    pub unawareness_types: Vec<UnawarenessType>,
    /// Inputs the subject was unaware of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_unaware_refs: Option<Vec<String>>,
    /// Graph nodes the subject was unaware of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_unaware_node_ids: Option<Vec<String>>,
    /// Decision with everything considered.
    pub decision_full: DecisionUtility,
    /// Decision with the unaware set removed.
    #[serde(rename = "decision_without_U", alias = "decision_without_unaware")]
    pub decision_without_unaware: DecisionUtility,
    /// Whether the set is minimal.
    #[serde(default)]
    pub minimal: bool,
    /// Opaque search diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_metadata: Option<serde_json::Value>,
}

impl FlipEvent {
    /// Process-unaware node ids (empty when absent).
    pub fn unaware_nodes(&self) -> &[String] {
        self.process_unaware_node_ids.as_deref().unwrap_or_default()
    }
}

impl AnomalyEvent {
    /// Flagged cluster ids (empty when absent).
    pub fn clusters(&self) -> &[String] {
        self.cluster_ids.as_deref().unwrap_or_default()
    }

    /// Flagged pathway node ids (empty when absent).
    pub fn pathway(&self) -> &[String] {
        self.pathway_nodes.as_deref().unwrap_or_default()
    }
}
