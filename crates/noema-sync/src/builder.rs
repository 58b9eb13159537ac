// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Visual state builder: turns the cache and the replica into one immutable,
//! bounded, smoothed [`VisualSnapshot`] per tick and publishes it on a
//! `watch` channel.

use noema_graph::GraphReplica;
use noema_proto::DecisionPhase;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::LatestValues;
use crate::mapping::{
    band_strengths, clamp01, edge_color, layout_position, noetic_ribbon, node_color, node_scale,
    phase_pulse, somatic_ribbon, symbolic_ribbon, Ribbon,
};
use crate::SyncError;

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.25;
/// Default period of the phase pulse.
pub const DEFAULT_PULSE_PERIOD_MS: u32 = 1200;

/// One coherence band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandLevel {
    /// Band label.
    pub label: String,
    /// Smoothed strength in [0, 1].
    pub strength: f64,
}

/// Decision phase with its pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseIndicator {
    /// Current phase.
    pub phase: DecisionPhase,
    /// Smoothed pulse in [0, 1].
    pub pulse: f64,
}

/// Render instance of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInstance {
    /// Node id.
    pub id: String,
    /// Layout position.
    pub position: [f64; 3],
    /// Uniform scale.
    pub scale: f64,
    /// RGB colour in [0, 1].
    pub color: [f64; 3],
    /// Part of the highlight overlay.
    pub highlighted: bool,
}

/// Render instance of an edge between two node instances.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInstance {
    /// Edge id.
    pub id: String,
    /// Index of the source in [`VisualSnapshot::nodes`].
    pub source: usize,
    /// Index of the target in [`VisualSnapshot::nodes`].
    pub target: usize,
    /// RGB colour in [0, 1].
    pub color: [f64; 3],
}

/// Everything a renderer may read, rebuilt every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualSnapshot {
    /// Builder tick that produced this snapshot (0 = nothing built yet).
    pub tick: u64,
    /// Time used for time-dependent mappings.
    pub time_ms: i64,
    /// Somatic ribbon.
    pub somatic: Ribbon,
    /// Symbolic ribbon.
    pub symbolic: Ribbon,
    /// Noetic ribbon.
    pub noetic: Ribbon,
    /// Global coherence in [0, 1].
    pub coherence: f64,
    /// Coherence bands by ascending frequency.
    pub bands: Vec<BandLevel>,
    /// Decision phase, once one was observed.
    pub phase: Option<PhaseIndicator>,
    /// Node instances sorted by id.
    pub nodes: Vec<NodeInstance>,
    /// Edge instances sorted by id; only resolved edges.
    pub edges: Vec<EdgeInstance>,
    /// Highlighted node ids.
    pub highlighted: BTreeSet<String>,
    /// Node ids named by recent flip events.
    pub flipped: BTreeSet<String>,
}

impl VisualSnapshot {
    /// Node instance by id.
    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }
}

/// Builder knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuilderConfig {
    /// Smoothing factor in (0, 1].
    pub alpha: f64,
    /// Phase pulse period.
    pub pulse_period_ms: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            pulse_period_ms: DEFAULT_PULSE_PERIOD_MS,
        }
    }
}

/// Fixed-rate snapshot producer.
#[derive(Debug)]
pub struct VisualStateBuilder {
    config: BuilderConfig,
    tick: u64,
    prev: Option<Arc<VisualSnapshot>>,
    replay_time_ms: Option<i64>,
    forced_highlight: Option<BTreeSet<String>>,
    tx: watch::Sender<Arc<VisualSnapshot>>,
}

impl VisualStateBuilder {
    /// Builder with the given knobs; rejects α outside (0, 1].
    pub fn new(config: BuilderConfig) -> Result<Self, SyncError> {
        if !(config.alpha > 0.0 && config.alpha <= 1.0) {
            return Err(SyncError::InvalidSmoothing(config.alpha));
        }
        let (tx, _rx) = watch::channel(Arc::new(VisualSnapshot::default()));
        Ok(Self {
            config,
            tick: 0,
            prev: None,
            replay_time_ms: None,
            forced_highlight: None,
            tx,
        })
    }

    /// Knobs in use.
    pub fn config(&self) -> BuilderConfig {
        self.config
    }

    /// Receiver that always holds the latest published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<VisualSnapshot>> {
        self.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> Arc<VisualSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Override the time used by time-dependent mappings; `None` clears it.
    pub fn set_replay_time(&mut self, time_ms: Option<i64>) {
        self.replay_time_ms = time_ms;
    }

    /// Replace the computed highlight set; `None` restores it.
    pub fn force_highlight(&mut self, ids: Option<BTreeSet<String>>) {
        self.forced_highlight = ids;
    }

    /// Forget the previous snapshot and every override. The next tick
    /// publishes its target unsmoothed.
    pub fn reset(&mut self) {
        self.prev = None;
        self.replay_time_ms = None;
        self.forced_highlight = None;
    }

    /// Build, smooth and publish one snapshot.
    ///
    /// `now_ms` is the cache-side current time; the replay override wins
    /// when set.
    pub fn tick(
        &mut self,
        cache: &LatestValues,
        replica: &GraphReplica,
        now_ms: i64,
    ) -> Arc<VisualSnapshot> {
        let now = self.replay_time_ms.unwrap_or(now_ms);
        let mut target = compose(
            cache,
            replica,
            now,
            self.config.pulse_period_ms,
            self.forced_highlight.as_ref(),
        );
        self.tick += 1;
        target.tick = self.tick;
        let next = match &self.prev {
            Some(prev) => blend(prev, target, self.config.alpha),
            None => target,
        };
        let next = Arc::new(next);
        self.prev = Some(Arc::clone(&next));
        self.tx.send_replace(Arc::clone(&next));
        next
    }
}

/// Unsmoothed target snapshot.
pub fn compose(
    cache: &LatestValues,
    replica: &GraphReplica,
    now_ms: i64,
    pulse_period_ms: u32,
    forced_highlight: Option<&BTreeSet<String>>,
) -> VisualSnapshot {
    let somatic = cache
        .state_vector()
        .map_or_else(Ribbon::default, |s| somatic_ribbon(&s.value));
    let symbolic = cache
        .belief_state()
        .map_or_else(Ribbon::default, |s| symbolic_ribbon(&s.value));
    let (noetic, coherence, bands) = cache.coherence().map_or_else(
        || (Ribbon::default(), 0.0, Vec::new()),
        |s| {
            let bands = band_strengths(&s.value)
                .into_iter()
                .map(|(label, strength)| BandLevel { label, strength })
                .collect();
            (noetic_ribbon(&s.value), clamp01(s.value.global_coherence_score), bands)
        },
    );
    let phase = cache.phase().map(|mark| PhaseIndicator {
        phase: mark.value.cycle.phase,
        pulse: phase_pulse(now_ms.saturating_sub(mark.value.started_ms), pulse_period_ms),
    });

    let highlighted = forced_highlight.cloned().unwrap_or_else(|| {
        let mut ids = BTreeSet::new();
        for ev in cache.anomalies() {
            for cluster in ev.value.clusters() {
                ids.extend(replica.cluster_members(cluster).into_iter().map(|n| n.id.clone()));
            }
            ids.extend(ev.value.pathway().iter().cloned());
        }
        ids
    });
    let flipped: BTreeSet<String> = cache
        .flips()
        .flat_map(|ev| ev.value.unaware_nodes().iter().cloned())
        .collect();

    let level = replica.level();
    let nodes: Vec<NodeInstance> = replica
        .nodes()
        .map(|n| NodeInstance {
            id: n.id.clone(),
            position: layout_position(&n.id, level, n.importance),
            scale: node_scale(n.importance),
            color: node_color(n.metrics.valence, n.confidence),
            highlighted: highlighted.contains(&n.id),
        })
        .collect();
    let index: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let edges = replica
        .resolved_edges()
        .filter_map(|e| {
            Some(EdgeInstance {
                id: e.id.clone(),
                source: *index.get(e.source.as_str())?,
                target: *index.get(e.target.as_str())?,
                color: edge_color(e.strength),
            })
        })
        .collect();

    VisualSnapshot {
        tick: 0,
        time_ms: now_ms,
        somatic,
        symbolic,
        noetic,
        coherence,
        bands,
        phase,
        nodes,
        edges,
        highlighted,
        flipped,
    }
}

/// `prev + (target - prev) * alpha`, never past `target`.
pub fn blend_scalar(prev: f64, target: f64, alpha: f64) -> f64 {
    let next = prev + (target - prev) * alpha;
    let (lo, hi) = if prev <= target {
        (prev, target)
    } else {
        (target, prev)
    };
    if next.is_nan() {
        target
    } else {
        next.clamp(lo, hi)
    }
}

fn blend_ribbon(prev: Ribbon, target: Ribbon, alpha: f64) -> Ribbon {
    Ribbon {
        activity: blend_scalar(prev.activity, target.activity, alpha),
        anomaly: blend_scalar(prev.anomaly, target.anomaly, alpha),
        uncertainty: blend_scalar(prev.uncertainty, target.uncertainty, alpha),
    }
}

fn blend(prev: &VisualSnapshot, mut target: VisualSnapshot, alpha: f64) -> VisualSnapshot {
    target.somatic = blend_ribbon(prev.somatic, target.somatic, alpha);
    target.symbolic = blend_ribbon(prev.symbolic, target.symbolic, alpha);
    target.noetic = blend_ribbon(prev.noetic, target.noetic, alpha);
    target.coherence = blend_scalar(prev.coherence, target.coherence, alpha);
    if target.bands.len() == prev.bands.len() {
        for (band, old) in target.bands.iter_mut().zip(&prev.bands) {
            band.strength = blend_scalar(old.strength, band.strength, alpha);
        }
    }
    if let (Some(phase), Some(old)) = (target.phase.as_mut(), prev.phase) {
        phase.pulse = blend_scalar(old.pulse, phase.pulse, alpha);
    }
    target
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use noema_proto::decode_envelope_value;

    fn coherence(score: f64, bands: usize) -> noema_proto::Envelope {
        let spectrum: Vec<_> = (0..bands)
            .map(|i| {
                serde_json::json!({
                    "band_label": format!("b{i}"),
                    "freq_range_hz": [i * 4, i * 4 + 4],
                    "coherence_strength": score
                })
            })
            .collect();
        decode_envelope_value(serde_json::json!({
            "message_type": "noetic_state",
            "timestamp_utc": "2025-01-01T00:00:00Z",
            "session_id": "s-1",
            "subject_id": "subj",
            "payload": {"t_rel_ms": 0, "global_coherence_score": score, "coherence_spectrum": spectrum}
        }))
        .unwrap()
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        for alpha in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(VisualStateBuilder::new(BuilderConfig {
                alpha,
                ..BuilderConfig::default()
            })
            .is_err());
        }
        assert!(VisualStateBuilder::new(BuilderConfig {
            alpha: 1.0,
            ..BuilderConfig::default()
        })
        .is_ok());
    }

    #[test]
    fn scalars_approach_target_without_overshoot() {
        let mut builder = VisualStateBuilder::new(BuilderConfig {
            alpha: 0.5,
            ..BuilderConfig::default()
        })
        .unwrap();
        let replica = GraphReplica::new();
        let mut cache = LatestValues::default();
        cache.observe(&coherence(0.0, 2), 0);
        assert_eq!(builder.tick(&cache, &replica, 0).coherence, 0.0);

        cache.observe(&coherence(1.0, 2), 10);
        let s = builder.tick(&cache, &replica, 10);
        assert_eq!(s.coherence, 0.5);
        assert_eq!(s.bands[1].strength, 0.5);
        let s = builder.tick(&cache, &replica, 20);
        assert_eq!(s.coherence, 0.75);

        // A new band count starts every band at its target.
        cache.observe(&coherence(1.0, 3), 30);
        let s = builder.tick(&cache, &replica, 30);
        assert_eq!(s.bands.len(), 3);
        assert!(s.bands.iter().all(|b| b.strength == 1.0));
        assert_eq!(s.tick, 4);
        assert_eq!(*builder.subscribe().borrow(), s);
    }

    #[test]
    fn constant_target_is_approached_strictly_from_below() {
        let mut builder = VisualStateBuilder::new(BuilderConfig {
            alpha: 0.25,
            ..BuilderConfig::default()
        })
        .unwrap();
        let replica = GraphReplica::new();
        let mut cache = LatestValues::default();
        cache.observe(&coherence(0.1, 2), 0);
        builder.tick(&cache, &replica, 0);

        cache.observe(&coherence(0.9, 2), 10);
        let mut prev_gap = 0.8_f64;
        for t in 1..=12 {
            let s = builder.tick(&cache, &replica, 10 * t);
            for v in [s.coherence, s.bands[0].strength, s.bands[1].strength] {
                assert!(v <= 0.9, "tick {t}: {v} overshot");
                let gap = 0.9 - v;
                assert!(gap < prev_gap, "tick {t}: gap {gap} did not shrink from {prev_gap}");
                assert!((gap - prev_gap * 0.75).abs() < 1e-12);
            }
            prev_gap = 0.9 - s.coherence;
        }
    }

    #[test]
    fn blend_is_clamped_between_prev_and_target() {
        assert_eq!(blend_scalar(0.2, 0.8, 1.0), 0.8);
        assert_eq!(blend_scalar(0.8, 0.2, 0.5), 0.5);
        assert_eq!(blend_scalar(0.3, 0.3, 0.7), 0.3);
        assert_eq!(blend_scalar(f64::NAN, 0.4, 0.5), 0.4);
    }

    #[test]
    fn overrides_replace_computed_values() {
        let mut builder = VisualStateBuilder::new(BuilderConfig {
            alpha: 1.0,
            pulse_period_ms: 1000,
        })
        .unwrap();
        let replica = GraphReplica::new();
        let mut cache = LatestValues::default();
        let cycle = decode_envelope_value(serde_json::json!({
            "message_type": "decision_cycle",
            "timestamp_utc": "2025-01-01T00:00:00Z",
            "session_id": "s-1",
            "subject_id": "subj",
            "payload": {"sork_cycle_id": "c1", "phase": "O", "phase_started_utc": "2025-01-01T00:00:00Z"}
        }))
        .unwrap();
        cache.observe(&cycle, 1000);

        let s = builder.tick(&cache, &replica, 1500);
        let phase = s.phase.unwrap();
        assert_eq!(phase.phase, DecisionPhase::O);
        assert!((phase.pulse - 1.0).abs() < 1e-12);

        builder.set_replay_time(Some(1000));
        let s = builder.tick(&cache, &replica, 1500);
        assert_eq!(s.time_ms, 1000);
        assert!(s.phase.unwrap().pulse.abs() < 1e-12);

        builder.force_highlight(Some(BTreeSet::from(["n7".to_owned()])));
        let s = builder.tick(&cache, &replica, 1500);
        assert!(s.highlighted.contains("n7"));
        builder.reset();
        let s = builder.tick(&cache, &replica, 1500);
        assert!(s.highlighted.is_empty());
        assert_eq!(s.time_ms, 1500);
    }
}
