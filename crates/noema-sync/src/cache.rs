// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Latest-value cache: one slot per continuous stream plus bounded rings of
//! recent discrete events.

use noema_proto::rest::SnapshotResponse;
use noema_proto::{
    AnomalyEvent, BeliefState, CoherenceState, DecisionCycle, Envelope, FlipEvent, Payload,
    StateVector,
};
use std::collections::VecDeque;

use crate::timeline::phase_start_ms;

/// Default number of anomaly events kept.
pub const DEFAULT_ANOMALY_CAPACITY: usize = 16;
/// Default number of flip events kept.
pub const DEFAULT_FLIP_CAPACITY: usize = 16;

/// A cached value with the derived time and sequence it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    /// The value.
    pub value: T,
    /// Derived time of the carrying envelope.
    pub time_ms: i64,
    /// Sequence of the carrying envelope (0 for seeded values).
    pub sequence: u64,
}

/// Current decision phase with its start on the derived time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseMark {
    /// Last decision-cycle transition.
    pub cycle: DecisionCycle,
    /// Phase start, derived time.
    pub started_ms: i64,
}

/// Most recent value per payload kind.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValues {
    state_vector: Option<Stamped<StateVector>>,
    belief_state: Option<Stamped<BeliefState>>,
    coherence: Option<Stamped<CoherenceState>>,
    phase: Option<Stamped<PhaseMark>>,
    anomalies: VecDeque<Stamped<AnomalyEvent>>,
    flips: VecDeque<Stamped<FlipEvent>>,
    anomaly_capacity: usize,
    flip_capacity: usize,
    current_time_ms: Option<i64>,
}

impl Default for LatestValues {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ANOMALY_CAPACITY, DEFAULT_FLIP_CAPACITY)
    }
}

impl LatestValues {
    /// Empty cache with the given ring capacities (minimum 1).
    pub fn with_capacity(anomaly_capacity: usize, flip_capacity: usize) -> Self {
        let anomaly_capacity = anomaly_capacity.max(1);
        let flip_capacity = flip_capacity.max(1);
        Self {
            state_vector: None,
            belief_state: None,
            coherence: None,
            phase: None,
            anomalies: VecDeque::with_capacity(anomaly_capacity),
            flips: VecDeque::with_capacity(flip_capacity),
            anomaly_capacity,
            flip_capacity,
            current_time_ms: None,
        }
    }

    /// Fold one envelope observed at derived time `time_ms`.
    ///
    /// Graph deltas are not cached here and leave the cache untouched apart
    /// from the current time.
    pub fn observe(&mut self, env: &Envelope, time_ms: i64) {
        let sequence = env.sequence;
        match &env.payload {
            Payload::StateVector(sv) => {
                self.state_vector = Some(stamp(sv.clone(), time_ms, sequence));
            }
            Payload::BeliefState(bs) => {
                self.belief_state = Some(stamp(bs.clone(), time_ms, sequence));
            }
            Payload::CoherenceState(cs) => {
                self.coherence = Some(stamp(cs.clone(), time_ms, sequence));
            }
            Payload::DecisionCycle(cycle) => {
                let started_ms = phase_start_ms(env, time_ms, &cycle.phase_started_utc);
                let mark = PhaseMark {
                    cycle: cycle.clone(),
                    started_ms,
                };
                self.phase = Some(stamp(mark, time_ms, sequence));
            }
            Payload::AnomalyEvent(ev) => {
                push_bounded(
                    &mut self.anomalies,
                    self.anomaly_capacity,
                    stamp(ev.clone(), time_ms, sequence),
                );
            }
            Payload::FlipEvent(ev) => {
                push_bounded(
                    &mut self.flips,
                    self.flip_capacity,
                    stamp(ev.clone(), time_ms, sequence),
                );
            }
            Payload::GraphDelta(_) => {}
        }
        self.current_time_ms = Some(self.current_time_ms.map_or(time_ms, |t| t.max(time_ms)));
    }

    /// Replace every slot from a session snapshot. Rings are emptied.
    pub fn seed(&mut self, snapshot: &SnapshotResponse) {
        self.clear();
        let t = snapshot.t_rel_ms;
        self.state_vector = snapshot.state_vector.clone().map(|sv| {
            let time = sv.t_rel_ms;
            stamp(sv, time, 0)
        });
        self.belief_state = snapshot.belief_state.clone().map(|bs| {
            let time = bs.t_rel_ms;
            stamp(bs, time, 0)
        });
        self.coherence = snapshot.coherence_state.clone().map(|cs| {
            let time = cs.t_rel_ms;
            stamp(cs, time, 0)
        });
        self.phase = snapshot.last_decision_cycle.clone().map(|cycle| {
            stamp(
                PhaseMark {
                    cycle,
                    started_ms: t,
                },
                t,
                0,
            )
        });
        self.current_time_ms = Some(t);
    }

    /// Empty every slot and ring.
    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.anomaly_capacity, self.flip_capacity);
    }

    /// Latest state vector.
    pub fn state_vector(&self) -> Option<&Stamped<StateVector>> {
        self.state_vector.as_ref()
    }

    /// Latest belief state.
    pub fn belief_state(&self) -> Option<&Stamped<BeliefState>> {
        self.belief_state.as_ref()
    }

    /// Latest coherence state.
    pub fn coherence(&self) -> Option<&Stamped<CoherenceState>> {
        self.coherence.as_ref()
    }

    /// Current decision phase.
    pub fn phase(&self) -> Option<&Stamped<PhaseMark>> {
        self.phase.as_ref()
    }

    /// Recent anomaly events, oldest first.
    pub fn anomalies(&self) -> impl Iterator<Item = &Stamped<AnomalyEvent>> {
        self.anomalies.iter()
    }

    /// Recent flip events, oldest first.
    pub fn flips(&self) -> impl Iterator<Item = &Stamped<FlipEvent>> {
        self.flips.iter()
    }

    /// Latest derived time observed (or seeded).
    pub fn current_time_ms(&self) -> Option<i64> {
        self.current_time_ms
    }

    /// True when nothing has been observed or seeded.
    pub fn is_empty(&self) -> bool {
        self.current_time_ms.is_none()
    }
}

fn stamp<T>(value: T, time_ms: i64, sequence: u64) -> Stamped<T> {
    Stamped {
        value,
        time_ms,
        sequence,
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, capacity: usize, item: T) {
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}
