// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the Noema telemetry stream.
//!
//! The backend pushes JSON frames over a WebSocket: an `ack` after the
//! subscription, then one `event` per [`Envelope`]. History (snapshot, replay,
//! session listing) is served over plain HTTP with the shapes in [`rest`].
//! Decoding is strict: the payload type is picked from the message kind
//! before the body is parsed, and unknown kinds are an explicit error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use time::{format_description::well_known::Iso8601, OffsetDateTime, PrimitiveDateTime};

mod payload;
pub mod rest;
pub mod wire;

pub use payload::{
    AccuracyEstimate, AnomalyEvent, AnticipatoryMarker, Belief, BeliefState, CoherenceState,
    DecisionAction, DecisionCycle, DecisionOutcome, DecisionPhase, DecisionUtility, FlipEvent,
    GraphDelta, ImpactFactors, NoeticAdjustment, Prediction, PredictionOption, ShapleyStats,
    SpectrumBand, StateVector, StreamCorrelation, UnawarenessType, UncertaintyRegion,
};
pub use noema_graph::Subgraph;
pub use wire::{
    decode_envelope_value, decode_frame, encode_envelope, encode_frame, encode_subscribe,
    DecodeError,
};

/// Envelope schema version understood by this crate.
pub const WIRE_VERSION: &str = "1";
/// WebSocket subprotocol announced when connecting.
pub const SUBPROTOCOL: &str = "json_v1";
/// Path of the streaming endpoint relative to the API base.
pub const STREAM_PATH: &str = "/v1/stream";

/// Default API base URL.
///
/// Reads `NOEMA_API_BASE` and falls back to a local backend.
pub fn default_api_base() -> String {
    std::env::var("NOEMA_API_BASE").unwrap_or_else(|_| "http://127.0.0.1:8000".to_owned())
}

/// Payload discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// Filtered physiological state.
    StateVector,
    /// Symbolic belief state.
    BeliefState,
    /// Cross-modal coherence state.
    CoherenceState,
    /// Decision-cycle phase transition.
    DecisionCycle,
    /// Graph delta batch.
    GraphDelta,
    /// Anomalous cluster/pathway event.
    AnomalyEvent,
    /// Decision flip event.
    FlipEvent,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 7] = [
        MessageKind::StateVector,
        MessageKind::BeliefState,
        MessageKind::CoherenceState,
        MessageKind::DecisionCycle,
        MessageKind::GraphDelta,
        MessageKind::AnomalyEvent,
        MessageKind::FlipEvent,
    ];

    /// Canonical backend tag.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::StateVector => "somatic_state",
            MessageKind::BeliefState => "symbolic_state",
            MessageKind::CoherenceState => "noetic_state",
            MessageKind::DecisionCycle => "decision_cycle",
            MessageKind::GraphDelta => "mpg_delta",
            MessageKind::AnomalyEvent => "rogue_variable_event",
            MessageKind::FlipEvent => "mufs_event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = DecodeError;

    /// Accepts the backend tags plus generic snake/kebab/camel spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // All-caps tags carry no camelCase boundaries.
        let source = if s.chars().any(|c| c.is_ascii_lowercase()) {
            s.to_owned()
        } else {
            s.to_ascii_lowercase()
        };
        let normalized: String = source
            .chars()
            .flat_map(|c| {
                if c == '-' {
                    vec!['_']
                } else if c.is_ascii_uppercase() {
                    vec!['_', c.to_ascii_lowercase()]
                } else {
                    vec![c]
                }
            })
            .collect();
        let kind = match normalized.trim_start_matches('_') {
            "somatic_state" | "state_vector" => MessageKind::StateVector,
            "symbolic_state" | "belief_state" => MessageKind::BeliefState,
            "noetic_state" | "coherence_state" => MessageKind::CoherenceState,
            "decision_cycle" | "decision_phase" => MessageKind::DecisionCycle,
            "mpg_delta" | "graph_delta" => MessageKind::GraphDelta,
            "rogue_variable_event" | "anomaly_event" => MessageKind::AnomalyEvent,
            "mufs_event" | "flip_event" => MessageKind::FlipEvent,
            _ => return Err(DecodeError::UnknownKind(s.to_owned())),
        };
        Ok(kind)
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Typed payload, selected by [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `somatic_state`.
    StateVector(StateVector),
    /// `symbolic_state`.
    BeliefState(BeliefState),
    /// `noetic_state`.
    CoherenceState(CoherenceState),
    /// `decision_cycle`.
    DecisionCycle(DecisionCycle),
    /// `mpg_delta`.
    GraphDelta(GraphDelta),
    /// `rogue_variable_event`.
    AnomalyEvent(AnomalyEvent),
    /// `mufs_event`.
    FlipEvent(FlipEvent),
}

impl Payload {
    /// Discriminant of this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::StateVector(_) => MessageKind::StateVector,
            Payload::BeliefState(_) => MessageKind::BeliefState,
            Payload::CoherenceState(_) => MessageKind::CoherenceState,
            Payload::DecisionCycle(_) => MessageKind::DecisionCycle,
            Payload::GraphDelta(_) => MessageKind::GraphDelta,
            Payload::AnomalyEvent(_) => MessageKind::AnomalyEvent,
            Payload::FlipEvent(_) => MessageKind::FlipEvent,
        }
    }

    /// Session-relative time carried inside the payload, if the kind has one.
    pub fn t_rel_ms(&self) -> Option<i64> {
        match self {
            Payload::StateVector(p) => Some(p.t_rel_ms),
            Payload::BeliefState(p) => Some(p.t_rel_ms),
            Payload::CoherenceState(p) => Some(p.t_rel_ms),
            _ => None,
        }
    }
}

/// One decoded telemetry message. Immutable once built by the codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Producing session.
    pub session_id: String,
    /// Subject the session observes.
    pub subject_id: String,
    /// Per-session ordering key; 0 means "unsequenced".
    pub sequence: u64,
    /// RFC 3339 send time.
    pub timestamp_utc: String,
    /// Experiment the session belongs to.
    pub experiment_id: Option<String>,
    /// Run within the experiment.
    pub run_id: Option<String>,
    /// Decision cycle the message belongs to.
    pub decision_cycle_id: Option<String>,
    /// Decision the message belongs to.
    pub decision_id: Option<String>,
    /// Emitting backend layer.
    pub source_layer: Option<String>,
    /// Typed body.
    pub payload: Payload,
}

impl Envelope {
    /// Discriminant of the payload.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Explicit session-relative time (state, belief and coherence payloads).
    pub fn explicit_time_ms(&self) -> Option<i64> {
        self.payload.t_rel_ms()
    }

    /// Header timestamp as unix milliseconds, when parseable.
    pub fn timestamp_ms(&self) -> Option<i64> {
        parse_utc_ms(&self.timestamp_utc)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        wire::EnvelopeRef::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        decode_envelope_value(value).map_err(serde::de::Error::custom)
    }
}

/// Parse an RFC 3339 (or offset-less ISO 8601, read as UTC) timestamp into
/// unix milliseconds.
pub fn parse_utc_ms(raw: &str) -> Option<i64> {
    let instant = OffsetDateTime::parse(raw, &Iso8601::DEFAULT)
        .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(|p| p.assume_utc()))
        .ok()?;
    i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).ok()
}

/// Format unix milliseconds as an RFC 3339 UTC timestamp.
pub fn format_utc_ms(ms: i64) -> Option<String> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()?;
    instant
        .format(&time::format_description::well_known::Rfc3339)
        .ok()
}

/// Subscription request sent once after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "subscribe")]
pub struct SubscribeRequest {
    /// Session to follow.
    pub session_id: String,
    /// Kinds to receive; empty means all.
    #[serde(rename = "message_types", alias = "messageKinds", default)]
    pub message_kinds: Vec<MessageKind>,
}

impl SubscribeRequest {
    /// Request for `session_id` with the given kinds.
    pub fn new(session_id: impl Into<String>, message_kinds: Vec<MessageKind>) -> Self {
        Self {
            session_id: session_id.into(),
            message_kinds,
        }
    }
}

/// Decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Subscription accepted.
    Ack {
        /// Server-assigned subscription id.
        subscription_id: String,
    },
    /// One telemetry envelope.
    Event {
        /// Subscription the event belongs to (absent for bare envelopes).
        subscription_id: Option<String>,
        /// Decoded envelope.
        envelope: Box<Envelope>,
    },
    /// Server-side rejection; the stream ends after this.
    Error {
        /// Human readable detail.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn kind_accepts_generic_spellings() {
        for (raw, kind) in [
            ("somatic_state", MessageKind::StateVector),
            ("state-vector", MessageKind::StateVector),
            ("stateVector", MessageKind::StateVector),
            ("belief_state", MessageKind::BeliefState),
            ("coherence-state", MessageKind::CoherenceState),
            ("graph-delta", MessageKind::GraphDelta),
            ("mpg_delta", MessageKind::GraphDelta),
            ("anomaly_event", MessageKind::AnomalyEvent),
            ("flip-event", MessageKind::FlipEvent),
            ("decision_cycle", MessageKind::DecisionCycle),
        ] {
            assert_eq!(raw.parse::<MessageKind>().unwrap(), kind, "{raw}");
        }
        assert!(matches!(
            "telepathy".parse::<MessageKind>(),
            Err(DecodeError::UnknownKind(k)) if k == "telepathy"
        ));
    }

    #[test]
    fn kind_accepts_all_caps_tags() {
        for (raw, kind) in [
            ("SOMATIC_STATE", MessageKind::StateVector),
            ("MPG-DELTA", MessageKind::GraphDelta),
            ("MUFS_EVENT", MessageKind::FlipEvent),
            ("StateVector", MessageKind::StateVector),
        ] {
            assert_eq!(raw.parse::<MessageKind>().unwrap(), kind, "{raw}");
        }
    }

    #[test]
    fn kind_display_is_backend_tag() {
        let tags: Vec<String> = MessageKind::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(tags[4], "mpg_delta");
        for tag in &tags {
            assert_eq!(&tag.parse::<MessageKind>().unwrap().to_string(), tag);
        }
    }

    #[test]
    fn subscribe_uses_backend_field_names() {
        let req = SubscribeRequest::new("s-1", vec![MessageKind::GraphDelta]);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"type":"subscribe","session_id":"s-1","message_types":["mpg_delta"]})
        );
    }

    #[test]
    fn timestamps_parse_with_and_without_offset() {
        assert_eq!(parse_utc_ms("1970-01-01T00:00:01.500Z"), Some(1500));
        assert_eq!(parse_utc_ms("1970-01-01T00:00:02+00:00"), Some(2000));
        assert_eq!(parse_utc_ms("1970-01-01T00:00:03"), Some(3000));
        assert_eq!(parse_utc_ms("yesterday"), None);
        let formatted = format_utc_ms(1_700_000_000_250).unwrap();
        assert_eq!(parse_utc_ms(&formatted), Some(1_700_000_000_250));
    }
}
