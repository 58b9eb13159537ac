// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stateless mapping functions from telemetry values to bounded visual
//! parameters. Everything here is deterministic: same input, same output,
//! on every platform.

use blake3::Hasher;
use noema_proto::{BeliefState, CoherenceState, StateVector};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Base radius of the layout sphere.
const LAYOUT_RADIUS: f64 = 200.0;
/// Radius growth per graph level.
const LEVEL_SPREAD: f64 = 0.35;
/// Deepest level that still pushes nodes outward.
const MAX_LAYOUT_LEVEL: i64 = 16;

const COLD: [f64; 3] = [0.2, 0.6, 1.0];
const WARM: [f64; 3] = [1.0, 0.35, 0.2];

/// Activity, anomaly and uncertainty of one modality, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ribbon {
    /// How much is happening.
    pub activity: f64,
    /// How unusual it is.
    pub anomaly: f64,
    /// How unsure the backend is.
    pub uncertainty: f64,
}

/// Clamp into [0, 1]; NaN maps to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Squash a non-negative magnitude into [0, 1) with `x / (1 + x)`.
///
/// NaN and negative inputs map to 0, `+inf` to 1.
pub fn bound(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        0.0
    } else if x.is_infinite() {
        1.0
    } else {
        x / (1.0 + x)
    }
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0_u32), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / f64::from(n))
}

fn rms(values: impl IntoIterator<Item = f64>) -> f64 {
    mean(values.into_iter().map(|v| v * v)).map_or(0.0, f64::sqrt)
}

/// Somatic ribbon from a state vector.
pub fn somatic_ribbon(sv: &StateVector) -> Ribbon {
    let activity = bound(rms(sv.features.values().copied()));
    let change = if sv.change_point { 1.0 } else { 0.0 };
    let anomaly = clamp01(sv.anomaly_score.unwrap_or(0.0)).max(change);
    let uncertainty = match (sv.global_uncertainty_score, &sv.covariance_diag) {
        (Some(score), _) => clamp01(score),
        (None, Some(diag)) => bound(mean(diag.values().copied()).unwrap_or(0.0)),
        (None, None) => 0.0,
    };
    Ribbon {
        activity,
        anomaly,
        uncertainty,
    }
}

/// Symbolic ribbon from a belief state.
pub fn symbolic_ribbon(bs: &BeliefState) -> Ribbon {
    let activity = clamp01(mean(bs.beliefs.iter().filter_map(|b| b.intensity)).unwrap_or(0.0));
    let anomaly = clamp01(mean(bs.predictions.iter().filter_map(|p| p.brier_score)).unwrap_or(0.0));
    let uncertainty = mean(bs.beliefs.iter().map(|b| b.confidence))
        .map_or(0.0, |confidence| clamp01(1.0 - confidence));
    Ribbon {
        activity,
        anomaly,
        uncertainty,
    }
}

/// Noetic ribbon from a coherence state.
pub fn noetic_ribbon(cs: &CoherenceState) -> Ribbon {
    Ribbon {
        activity: clamp01(cs.global_coherence_score),
        anomaly: bound(cs.entropy_change.abs()),
        uncertainty: cs
            .intuitive_accuracy_estimate
            .as_ref()
            .map_or(0.5, |est| clamp01(1.0 - est.p_better_than_baseline)),
    }
}

/// Band strengths ordered by lower frequency bound (stable for ties).
pub fn band_strengths(cs: &CoherenceState) -> Vec<(String, f64)> {
    let mut bands: Vec<_> = cs.coherence_spectrum.iter().collect();
    bands.sort_by(|a, b| a.freq_range_hz.0.total_cmp(&b.freq_range_hz.0));
    bands
        .into_iter()
        .map(|band| (band.band_label.clone(), clamp01(band.coherence_strength)))
        .collect()
}

/// Periodic pulse in [0, 1]: `0.5 - 0.5 cos(2π frac)` where `frac` is the
/// position of `elapsed_ms` within the period. Zero at phase start.
pub fn phase_pulse(elapsed_ms: i64, period_ms: u32) -> f64 {
    if period_ms == 0 {
        return 0.0;
    }
    let within = elapsed_ms.rem_euclid(i64::from(period_ms));
    let frac = u32::try_from(within).map_or(0.0, f64::from) / f64::from(period_ms);
    0.5 - 0.5 * (TAU * frac).cos()
}

/// Deterministic layout position of a node.
///
/// Two angles come from the blake3 hash of the id; the radius grows with the
/// level and shrinks with importance so important nodes sit closer in.
pub fn layout_position(id: &str, level: i64, importance: f64) -> [f64; 3] {
    let mut h = Hasher::new();
    h.update(id.as_bytes());
    let digest = h.finalize();
    let b = digest.as_bytes();
    let unit = |i: usize| {
        f64::from(u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])) / f64::from(u32::MAX)
    };
    let theta = unit(0) * TAU;
    let phi = unit(4) * PI - FRAC_PI_2;
    let level = u8::try_from(level.clamp(0, MAX_LAYOUT_LEVEL)).map_or(0.0, f64::from);
    let r = LAYOUT_RADIUS * (1.0 + LEVEL_SPREAD * level) * (1.1 - 0.6 * clamp01(importance));
    [
        r * phi.cos() * theta.cos(),
        r * phi.sin(),
        r * phi.cos() * theta.sin(),
    ]
}

/// Instance scale from importance.
pub fn node_scale(importance: f64) -> f64 {
    0.6 + 1.4 * clamp01(importance)
}

/// Cold-to-warm colour by polarity, dimmed by low confidence.
pub fn node_color(valence: f64, confidence: f64) -> [f64; 3] {
    let mix = if valence.is_nan() {
        0.4
    } else {
        clamp01((valence + 1.0) / 2.0)
    };
    let brightness = 0.5 + 0.45 * clamp01(confidence);
    let mut rgb = [0.0; 3];
    for (i, c) in rgb.iter_mut().enumerate() {
        *c = clamp01((COLD[i] + (WARM[i] - COLD[i]) * mix) * brightness);
    }
    rgb
}

/// Edge colour by absolute strength.
pub fn edge_color(strength: f64) -> [f64; 3] {
    let s = clamp01(strength.abs());
    [0.5 * s, 0.7 * s + 0.2, 0.9 * s + 0.05]
}
