// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Derived time: one session-relative millisecond axis for envelopes that
//! carry an explicit time and those that only carry a wall-clock timestamp.

use noema_proto::{parse_utc_ms, Envelope};

/// Incremental time derivation for a live stream.
///
/// The first envelope with a parseable timestamp pins the anchor. Envelopes
/// with an explicit time use it as is; the others are placed relative to the
/// anchor; envelopes with neither inherit the previous derived time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeAnchor {
    anchor: Option<(i64, i64)>,
    last: Option<i64>,
    origin: i64,
}

impl TimeAnchor {
    /// Anchor whose fallback origin is `origin_ms`.
    pub fn new(origin_ms: i64) -> Self {
        Self {
            anchor: None,
            last: None,
            origin: origin_ms,
        }
    }

    /// Derived time of `env`, advancing the anchor state.
    pub fn derive(&mut self, env: &Envelope) -> i64 {
        let ts = env.timestamp_ms();
        let time = match (env.explicit_time_ms(), ts) {
            (Some(t), Some(ts)) => {
                self.anchor.get_or_insert((ts, t));
                t
            }
            (Some(t), None) => t,
            (None, Some(ts)) => {
                let base = self.last.unwrap_or(self.origin);
                let (anchor_ts, anchor_t) = *self.anchor.get_or_insert((ts, base));
                anchor_t.saturating_add(ts.saturating_sub(anchor_ts))
            }
            (None, None) => self.last.unwrap_or(self.origin),
        };
        self.last = Some(time);
        time
    }

    /// Forget the anchor and the last time.
    pub fn reset(&mut self, origin_ms: i64) {
        *self = Self::new(origin_ms);
    }
}

/// Derived times for a replay window, index-aligned with `frames`.
///
/// The anchor is the frame with the earliest parseable timestamp. If it has an
/// explicit time `t0`, timestamp-only frames land at `t0 + (ts - ts_anchor)`,
/// otherwise at `window_from + (ts - ts_anchor)`. Frames with neither inherit
/// the preceding frame's time (or `window_from`).
pub fn window_times(frames: &[Envelope], window_from: i64) -> Vec<i64> {
    let anchor = frames
        .iter()
        .filter_map(|env| env.timestamp_ms().map(|ts| (ts, env)))
        .min_by_key(|(ts, _)| *ts)
        .map(|(ts, env)| (ts, env.explicit_time_ms().unwrap_or(window_from)));

    let mut prev = window_from;
    frames
        .iter()
        .map(|env| {
            let time = match (env.explicit_time_ms(), env.timestamp_ms(), anchor) {
                (Some(t), _, _) => t,
                (None, Some(ts), Some((anchor_ts, anchor_t))) => {
                    anchor_t.saturating_add(ts.saturating_sub(anchor_ts))
                }
                _ => prev,
            };
            prev = time;
            time
        })
        .collect()
}

/// Start of a decision phase on the derived axis of the envelope carrying it.
///
/// `time_ms` is the envelope's derived time; the phase start is offset from it
/// by the gap between `phase_started_utc` and the envelope timestamp.
pub fn phase_start_ms(env: &Envelope, time_ms: i64, phase_started_utc: &str) -> i64 {
    match (parse_utc_ms(phase_started_utc), env.timestamp_ms()) {
        (Some(started), Some(sent)) => time_ms.saturating_add(started.saturating_sub(sent)),
        _ => time_ms,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use noema_proto::decode_envelope_value;

    fn env(kind: &str, ts: &str, payload: serde_json::Value) -> Envelope {
        decode_envelope_value(serde_json::json!({
            "message_type": kind,
            "timestamp_utc": ts,
            "session_id": "s-1",
            "subject_id": "subj",
            "payload": payload
        }))
        .unwrap()
    }

    fn state(ts: &str, t: i64) -> Envelope {
        env("somatic_state", ts, serde_json::json!({"t_rel_ms": t}))
    }

    fn delta(ts: &str) -> Envelope {
        env(
            "mpg_delta",
            ts,
            serde_json::json!({"mpg_id": "g", "level": 0, "delta_id": "d", "operations": []}),
        )
    }

    #[test]
    fn window_anchor_with_explicit_time() {
        let frames = vec![
            delta("2025-01-01T00:00:01.300Z"),
            state("2025-01-01T00:00:01Z", 5000),
            delta("not a time"),
        ];
        assert_eq!(window_times(&frames, 0), vec![5300, 5000, 5000]);
    }

    #[test]
    fn window_anchor_without_explicit_time_uses_window_start() {
        let frames = vec![
            delta("2025-01-01T00:00:00.500Z"),
            delta("2025-01-01T00:00:00Z"),
            delta("garbage"),
        ];
        assert_eq!(window_times(&frames, 1000), vec![1500, 1000, 1000]);
        assert_eq!(window_times(&[delta("garbage")], 42), vec![42]);
    }

    #[test]
    fn live_anchor_is_pinned_by_first_timestamp() {
        let mut anchor = TimeAnchor::new(0);
        assert_eq!(anchor.derive(&state("2025-01-01T00:00:10Z", 200)), 200);
        assert_eq!(anchor.derive(&delta("2025-01-01T00:00:10.750Z")), 950);
        assert_eq!(anchor.derive(&delta("bad")), 950);
        anchor.reset(7);
        assert_eq!(anchor.derive(&delta("bad")), 7);
        assert_eq!(anchor.derive(&delta("2025-01-01T00:00:00Z")), 7);
        assert_eq!(anchor.derive(&delta("2025-01-01T00:00:01Z")), 1007);
    }

    #[test]
    fn phase_start_follows_envelope_clock() {
        let e = delta("2025-01-01T00:00:02Z");
        assert_eq!(phase_start_ms(&e, 900, "2025-01-01T00:00:01.500Z"), 400);
        assert_eq!(phase_start_ms(&e, 900, "whenever"), 900);
    }
}
