// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON framing for the telemetry stream.
//!
//! Server frames are objects tagged by `type` (`ack`, `event`, `error`). A bare
//! envelope object without `type` is accepted as an event; fixtures and replay
//! dumps use that form. Envelope decoding runs in a fixed order: object shape,
//! version, kind, payload presence, header, then the kind-selected payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    Envelope, MessageKind, Payload, ServerFrame, SubscribeRequest, WIRE_VERSION,
};

/// Keys that may carry the message kind, in lookup order.
const KIND_KEYS: [&str; 4] = ["message_type", "messageKind", "message_kind", "messageType"];
/// Keys that may carry the schema version.
const VERSION_KEYS: [&str; 2] = ["v", "version"];

/// Why a frame or envelope was rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input is not valid JSON.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// Input is JSON but not an object.
    #[error("frame is not a json object")]
    NotAnObject,
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// `type` names a frame this client does not speak.
    #[error("unknown frame type `{0}`")]
    UnknownFrameType(String),
    /// The message kind tag is not recognized.
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    /// The envelope version is not `1`.
    #[error("unsupported envelope version `{0}`")]
    UnsupportedVersion(String),
    /// Header fields have the wrong shape.
    #[error("bad envelope header: {0}")]
    Header(#[source] serde_json::Error),
    /// Payload body does not match the declared kind.
    #[error("{kind} payload does not match its kind: {source}")]
    Payload {
        /// Declared kind.
        kind: MessageKind,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Header {
    #[serde(alias = "sessionId")]
    session_id: String,
    #[serde(alias = "subjectId", default)]
    subject_id: String,
    #[serde(default)]
    sequence: u64,
    #[serde(alias = "timestampUtc", alias = "timestamp")]
    timestamp_utc: String,
    #[serde(alias = "experimentId", default)]
    experiment_id: Option<String>,
    #[serde(alias = "runId", default)]
    run_id: Option<String>,
    #[serde(
        rename = "sork_cycle_id",
        alias = "decision_cycle_id",
        alias = "decisionCycleId",
        default
    )]
    decision_cycle_id: Option<String>,
    #[serde(alias = "decisionId", default)]
    decision_id: Option<String>,
    #[serde(alias = "sourceLayer", default)]
    source_layer: Option<String>,
}

/// Borrowed serialization view of an [`Envelope`] in backend field names.
#[derive(Serialize)]
pub(crate) struct EnvelopeRef<'a> {
    v: &'static str,
    message_type: MessageKind,
    timestamp_utc: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    experiment_id: Option<&'a str>,
    session_id: &'a str,
    subject_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    #[serde(rename = "sork_cycle_id", skip_serializing_if = "Option::is_none")]
    decision_cycle_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_layer: Option<&'a str>,
    sequence: u64,
    payload: &'a Payload,
}

impl<'a> From<&'a Envelope> for EnvelopeRef<'a> {
    fn from(env: &'a Envelope) -> Self {
        Self {
            v: WIRE_VERSION,
            message_type: env.kind(),
            timestamp_utc: &env.timestamp_utc,
            experiment_id: env.experiment_id.as_deref(),
            session_id: &env.session_id,
            subject_id: &env.subject_id,
            run_id: env.run_id.as_deref(),
            decision_cycle_id: env.decision_cycle_id.as_deref(),
            decision_id: env.decision_id.as_deref(),
            source_layer: env.source_layer.as_deref(),
            sequence: env.sequence,
            payload: &env.payload,
        }
    }
}

/// Decode one raw server frame (text or binary JSON).
pub fn decode_frame(bytes: &[u8]) -> Result<ServerFrame, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let frame_type = match map.remove("type") {
        None => None,
        Some(Value::String(t)) => Some(t),
        Some(other) => return Err(DecodeError::UnknownFrameType(other.to_string())),
    };
    match frame_type.as_deref() {
        Some("ack") => {
            let subscription_id =
                take_string(&mut map, "subscription_id").ok_or(DecodeError::MissingField("subscription_id"))?;
            Ok(ServerFrame::Ack { subscription_id })
        }
        Some("event") => {
            let subscription_id = take_string(&mut map, "subscription_id");
            let data = map.remove("data").ok_or(DecodeError::MissingField("data"))?;
            Ok(ServerFrame::Event {
                subscription_id,
                envelope: Box::new(decode_envelope_value(data)?),
            })
        }
        Some("error") => {
            let detail = match map.remove("detail") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "unspecified server error".to_owned(),
            };
            Ok(ServerFrame::Error { detail })
        }
        Some(other) => Err(DecodeError::UnknownFrameType(other.to_owned())),
        None if KIND_KEYS.iter().any(|k| map.contains_key(*k)) => Ok(ServerFrame::Event {
            subscription_id: None,
            envelope: Box::new(decode_envelope_value(Value::Object(map))?),
        }),
        None => Err(DecodeError::MissingField("type")),
    }
}

/// Decode an envelope from an already-parsed JSON value.
pub fn decode_envelope_value(value: Value) -> Result<Envelope, DecodeError> {
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };
    check_version(&map)?;
    let kind: MessageKind = match KIND_KEYS.iter().find_map(|k| map.get(*k)) {
        Some(Value::String(tag)) => tag.parse()?,
        Some(other) => return Err(DecodeError::UnknownKind(other.to_string())),
        None => return Err(DecodeError::MissingField("message_type")),
    };
    let raw_payload = map.remove("payload").ok_or(DecodeError::MissingField("payload"))?;
    let header: Header = serde_json::from_value(Value::Object(map)).map_err(DecodeError::Header)?;
    let payload = decode_payload(kind, raw_payload)?;
    Ok(Envelope {
        session_id: header.session_id,
        subject_id: header.subject_id,
        sequence: header.sequence,
        timestamp_utc: header.timestamp_utc,
        experiment_id: header.experiment_id,
        run_id: header.run_id,
        decision_cycle_id: header.decision_cycle_id,
        decision_id: header.decision_id,
        source_layer: header.source_layer,
        payload,
    })
}

/// A missing version reads as the current one; anything other than `"1"`
/// (or the integer 1) is rejected.
fn check_version(map: &Map<String, Value>) -> Result<(), DecodeError> {
    match VERSION_KEYS.iter().find_map(|k| map.get(*k)) {
        None => Ok(()),
        Some(Value::String(v)) if v == WIRE_VERSION => Ok(()),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(()),
        Some(Value::String(v)) => Err(DecodeError::UnsupportedVersion(v.clone())),
        Some(other) => Err(DecodeError::UnsupportedVersion(other.to_string())),
    }
}

fn decode_payload(kind: MessageKind, raw: Value) -> Result<Payload, DecodeError> {
    let mismatch = |source| DecodeError::Payload { kind, source };
    let payload = match kind {
        MessageKind::StateVector => Payload::StateVector(serde_json::from_value(raw).map_err(mismatch)?),
        MessageKind::BeliefState => Payload::BeliefState(serde_json::from_value(raw).map_err(mismatch)?),
        MessageKind::CoherenceState => {
            Payload::CoherenceState(serde_json::from_value(raw).map_err(mismatch)?)
        }
        MessageKind::DecisionCycle => {
            Payload::DecisionCycle(serde_json::from_value(raw).map_err(mismatch)?)
        }
        MessageKind::GraphDelta => Payload::GraphDelta(serde_json::from_value(raw).map_err(mismatch)?),
        MessageKind::AnomalyEvent => {
            Payload::AnomalyEvent(serde_json::from_value(raw).map_err(mismatch)?)
        }
        MessageKind::FlipEvent => Payload::FlipEvent(serde_json::from_value(raw).map_err(mismatch)?),
    };
    Ok(payload)
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Encode the subscription request.
pub fn encode_subscribe(req: &SubscribeRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(req)
}

/// Encode a bare envelope in backend field names.
pub fn encode_envelope(env: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeRef::from(env))
}

/// Encode a server frame (used by in-process transports and fixtures).
pub fn encode_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    let value = match frame {
        ServerFrame::Ack { subscription_id } => {
            serde_json::json!({ "type": "ack", "subscription_id": subscription_id })
        }
        ServerFrame::Event {
            subscription_id,
            envelope,
        } => {
            let mut map = Map::new();
            map.insert("type".into(), Value::from("event"));
            if let Some(id) = subscription_id {
                map.insert("subscription_id".into(), Value::from(id.as_str()));
            }
            map.insert("data".into(), serde_json::to_value(EnvelopeRef::from(envelope.as_ref()))?);
            Value::Object(map)
        }
        ServerFrame::Error { detail } => serde_json::json!({ "type": "error", "detail": detail }),
    };
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::DecisionPhase;

    fn state_vector_json() -> Value {
        serde_json::json!({
            "v": "1",
            "message_type": "somatic_state",
            "timestamp_utc": "2025-01-01T00:00:00.250Z",
            "experiment_id": "exp",
            "session_id": "s-1",
            "subject_id": "subj",
            "source_layer": "Somatic",
            "sequence": 3,
            "payload": {"t_rel_ms": 250, "window_ms": 100, "features": {"hr": 0.7}}
        })
    }

    #[test]
    fn event_frame_decodes_to_typed_envelope() {
        let frame = serde_json::json!({"type": "event", "subscription_id": "sub", "data": state_vector_json()});
        let decoded = decode_frame(frame.to_string().as_bytes()).unwrap();
        let ServerFrame::Event {
            subscription_id,
            envelope,
        } = decoded
        else {
            panic!("expected event");
        };
        assert_eq!(subscription_id.as_deref(), Some("sub"));
        assert_eq!(envelope.kind(), MessageKind::StateVector);
        assert_eq!(envelope.sequence, 3);
        assert_eq!(envelope.explicit_time_ms(), Some(250));
        assert_eq!(envelope.source_layer.as_deref(), Some("Somatic"));
    }

    #[test]
    fn ack_and_error_frames() {
        assert_eq!(
            decode_frame(br#"{"type":"ack","subscription_id":"abc"}"#).unwrap(),
            ServerFrame::Ack {
                subscription_id: "abc".into()
            }
        );
        assert_eq!(
            decode_frame(br#"{"type":"error","detail":"Expected subscribe message"}"#).unwrap(),
            ServerFrame::Error {
                detail: "Expected subscribe message".into()
            }
        );
        assert!(matches!(
            decode_frame(br#"{"type":"ack"}"#),
            Err(DecodeError::MissingField("subscription_id"))
        ));
    }

    #[test]
    fn bare_envelope_with_camel_case_header() {
        let raw = serde_json::json!({
            "v": 1,
            "messageKind": "decision-cycle",
            "timestampUtc": "2025-01-01T00:00:00Z",
            "sessionId": "s-1",
            "subjectId": "subj",
            "sequence": 9,
            "payload": {"sork_cycle_id": "c1", "phase": "S_prime", "phase_started_utc": "2025-01-01T00:00:00Z"}
        });
        let ServerFrame::Event { envelope, .. } = decode_frame(raw.to_string().as_bytes()).unwrap()
        else {
            panic!("expected event");
        };
        let Payload::DecisionCycle(cycle) = &envelope.payload else {
            panic!("expected decision cycle");
        };
        assert_eq!(cycle.phase, DecisionPhase::SPrime);
        assert_eq!(envelope.session_id, "s-1");
    }

    #[test]
    fn rejections_are_classified() {
        assert!(matches!(decode_frame(b"{nope"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_frame(b"[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_frame(br#"{"hello":1}"#), Err(DecodeError::MissingField("type"))));
        assert!(matches!(
            decode_frame(br#"{"type":"snapshot"}"#),
            Err(DecodeError::UnknownFrameType(t)) if t == "snapshot"
        ));

        let mut env = state_vector_json();
        env["v"] = Value::from("2");
        assert!(matches!(
            decode_envelope_value(env),
            Err(DecodeError::UnsupportedVersion(v)) if v == "2"
        ));

        let mut env = state_vector_json();
        env["message_type"] = Value::from("telepathy");
        assert!(matches!(decode_envelope_value(env), Err(DecodeError::UnknownKind(_))));

        let mut env = state_vector_json();
        env.as_object_mut().unwrap().remove("payload");
        assert!(matches!(
            decode_envelope_value(env),
            Err(DecodeError::MissingField("payload"))
        ));

        let mut env = state_vector_json();
        env.as_object_mut().unwrap().remove("session_id");
        assert!(matches!(decode_envelope_value(env), Err(DecodeError::Header(_))));
    }

    #[test]
    fn payload_is_selected_by_kind_before_decoding() {
        let mut env = state_vector_json();
        env["message_type"] = Value::from("mpg_delta");
        match decode_envelope_value(env) {
            Err(DecodeError::Payload { kind, .. }) => assert_eq!(kind, MessageKind::GraphDelta),
            other => panic!("expected payload mismatch, got {other:?}"),
        }
    }

    #[test]
    fn encoded_frames_decode_back() {
        let env = decode_envelope_value(state_vector_json()).unwrap();
        let frame = ServerFrame::Event {
            subscription_id: Some("sub".into()),
            envelope: Box::new(env.clone()),
        };
        assert_eq!(decode_frame(encode_frame(&frame).unwrap().as_bytes()).unwrap(), frame);
        let bare = encode_envelope(&env).unwrap();
        let back: Envelope = serde_json::from_str(&bare).unwrap();
        assert_eq!(back, env);
    }
}
