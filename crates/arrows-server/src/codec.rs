//! Wire codec: a closed table of JSON envelopes keyed by `type`.
//!
//! | type               | direction          | payload                                  |
//! |--------------------|--------------------|------------------------------------------|
//! | `trial.answer`     | subject → server   | `orientation`, `clientTimestamp`, `index` |
//! | `trial.present`    | server → subjects  | `index`, `position`, `cues`              |
//! | `session.ready`    | server → all       |                                          |
//! | `session.result`   | server → observer  | `orientation`, `startingTime`, `endingTime` |
//! | `session.complete` | server → all       |                                          |
//! | `session.aborted`  | server → all       | `reason`                                 |
//! | `error`            | server → sender    | `code`, `message`                        |

use arrows_core::{Orientation, Position, ProtocolError, Trial, TrialResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every `type` tag the codec understands.
pub const KNOWN_TYPES: [&str; 7] = [
    TRIAL_ANSWER,
    TRIAL_PRESENT,
    SESSION_READY,
    SESSION_RESULT,
    SESSION_COMPLETE,
    SESSION_ABORTED,
    ERROR,
];

const TRIAL_ANSWER: &str = "trial.answer";
const TRIAL_PRESENT: &str = "trial.present";
const SESSION_READY: &str = "session.ready";
const SESSION_RESULT: &str = "session.result";
const SESSION_COMPLETE: &str = "session.complete";
const SESSION_ABORTED: &str = "session.aborted";
const ERROR: &str = "error";

/// A subject's reply to the current trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialAnswer {
    /// Direction the subject chose.
    pub orientation: Orientation,
    /// Client-side timestamp in ms. Logged only; timing uses server receipt.
    pub client_timestamp: i64,
    /// Trial the answer is for, echoed from `trial.present`. Required so the
    /// server can discard replies to a trial that already advanced.
    pub index: usize,
}

/// A trial as shown to subjects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialPresentation {
    /// Position of the trial in the scenario.
    pub index: usize,
    /// Row placement.
    pub position: Position,
    /// Cue row.
    pub cues: Vec<Orientation>,
}

impl TrialPresentation {
    /// Presentation of `trial` at `index`.
    pub fn new(index: usize, trial: &Trial) -> Self {
        Self {
            index,
            position: trial.position(),
            cues: trial.cues().to_vec(),
        }
    }
}

/// Every message that crosses the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Subject reply.
    #[serde(rename = "trial.answer")]
    TrialAnswer(TrialAnswer),
    /// Trial shown to both subjects.
    #[serde(rename = "trial.present")]
    TrialPresent(TrialPresentation),
    /// Both subjects are attached; trials begin.
    #[serde(rename = "session.ready")]
    SessionReady,
    /// Timed result for the observer.
    #[serde(rename = "session.result")]
    SessionResult(TrialResult),
    /// Every trial answered.
    #[serde(rename = "session.complete")]
    SessionComplete,
    /// Session ended early.
    #[serde(rename = "session.aborted")]
    SessionAborted {
        /// Why.
        reason: String,
    },
    /// A single inbound message was rejected.
    #[serde(rename = "error")]
    Error {
        /// Machine code, e.g. `VALIDATION_ERROR`.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl Envelope {
    /// The `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TrialAnswer(_) => TRIAL_ANSWER,
            Self::TrialPresent(_) => TRIAL_PRESENT,
            Self::SessionReady => SESSION_READY,
            Self::SessionResult(_) => SESSION_RESULT,
            Self::SessionComplete => SESSION_COMPLETE,
            Self::SessionAborted { .. } => SESSION_ABORTED,
            Self::Error { .. } => ERROR,
        }
    }

    /// `error` envelope for a rejected message.
    pub fn error(err: &ProtocolError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.message().to_string(),
        }
    }

    /// `session.aborted` envelope.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::SessionAborted {
            reason: reason.into(),
        }
    }
}

/// Messages a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// `trial.answer`.
    Answer(TrialAnswer),
}

/// Serialize an envelope.
pub fn encode(envelope: &Envelope) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|err| {
        tracing::error!(error = %err, kind = envelope.type_name(), "envelope serialization failed");
        String::from(r#"{"type":"error","code":"INTERNAL_ERROR","message":"encoding failed"}"#)
    })
}

/// Parse any envelope in the table.
pub fn decode(raw: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ProtocolError::Validation(format!("invalid JSON: {err}")))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(ProtocolError::Validation("`type` must be a string".into())),
        None => return Err(ProtocolError::Validation("missing `type`".into())),
    };
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::Validation(format!(
            "unknown message type '{kind}'"
        )));
    }

    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|err| ProtocolError::Validation(format!("invalid {kind} payload: {err}")))?;

    if let Envelope::TrialPresent(presentation) = &envelope {
        if presentation.cues.is_empty() {
            return Err(ProtocolError::Validation(
                "trial.present must carry at least one cue".into(),
            ));
        }
    }
    Ok(envelope)
}

/// Parse an inbound client message; server-only types are rejected.
pub fn decode_client(raw: &str) -> Result<ClientMessage, ProtocolError> {
    match decode(raw)? {
        Envelope::TrialAnswer(answer) => Ok(ClientMessage::Answer(answer)),
        other => Err(ProtocolError::Validation(format!(
            "'{}' is not accepted from clients",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrows_core::{ErrorKind, MillisecondTimestamp};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn to_value(envelope: &Envelope) -> Value {
        serde_json::from_str(&encode(envelope)).unwrap()
    }

    #[test]
    fn answer_wire_form() {
        let raw = r#"{"type":"trial.answer","orientation":"left","clientTimestamp":1700000000123,"index":2}"#;
        let msg = decode_client(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Answer(TrialAnswer {
                orientation: Orientation::Left,
                client_timestamp: 1_700_000_000_123,
                index: 2,
            })
        );
    }

    #[test]
    fn answer_without_index_is_rejected() {
        let raw = r#"{"type":"trial.answer","orientation":"right","clientTimestamp":5}"#;
        assert_matches!(
            decode_client(raw),
            Err(ProtocolError::Validation(m)) if m.contains("index")
        );
    }

    #[test]
    fn present_wire_form() {
        let trial = Trial::new(Position::Bottom, vec![Orientation::Left, Orientation::Right]).unwrap();
        let value = to_value(&Envelope::TrialPresent(TrialPresentation::new(3, &trial)));
        assert_eq!(
            value,
            json!({"type": "trial.present", "index": 3, "position": "bottom", "cues": ["left", "right"]})
        );
    }

    #[test]
    fn unit_envelopes() {
        assert_eq!(to_value(&Envelope::SessionReady), json!({"type": "session.ready"}));
        assert_eq!(to_value(&Envelope::SessionComplete), json!({"type": "session.complete"}));
        assert_eq!(
            to_value(&Envelope::aborted("subject one disconnected")),
            json!({"type": "session.aborted", "reason": "subject one disconnected"})
        );
    }

    #[test]
    fn result_wire_form() {
        let result = TrialResult {
            orientation: Orientation::Left,
            starting_time: MillisecondTimestamp::from_millis(100),
            ending_time: MillisecondTimestamp::from_millis(350),
        };
        assert_eq!(
            to_value(&Envelope::SessionResult(result)),
            json!({"type": "session.result", "orientation": "left", "startingTime": 100, "endingTime": 350})
        );
    }

    #[test]
    fn error_envelope_carries_code() {
        let err = ProtocolError::Validation("bad".into());
        assert_eq!(
            to_value(&Envelope::error(&err)),
            json!({"type": "error", "code": "VALIDATION_ERROR", "message": "bad"})
        );
    }

    #[test]
    fn server_envelopes_decode() {
        let trial = Trial::new(Position::Top, vec![Orientation::Right, Orientation::Left]).unwrap();
        let result = TrialResult {
            orientation: Orientation::Right,
            starting_time: MillisecondTimestamp::from_millis(1_700_000_000_000),
            ending_time: MillisecondTimestamp::from_millis(1_700_000_000_512),
        };
        for envelope in [
            Envelope::SessionReady,
            Envelope::TrialPresent(TrialPresentation::new(4, &trial)),
            Envelope::SessionResult(result),
            Envelope::SessionComplete,
            Envelope::aborted("x"),
            Envelope::error(&ProtocolError::Conflict("taken".into())),
        ] {
            assert_eq!(decode(&encode(&envelope)).unwrap(), envelope);
        }
    }

    #[test]
    fn result_round_trip_keeps_orientation_and_times() {
        let result = TrialResult {
            orientation: Orientation::Left,
            starting_time: MillisecondTimestamp::from_millis(100),
            ending_time: MillisecondTimestamp::from_millis(350),
        };
        let Envelope::SessionResult(decoded) = decode(&encode(&Envelope::SessionResult(result))).unwrap() else {
            panic!("expected session.result");
        };
        assert_eq!(decoded.orientation, Orientation::Left);
        assert_eq!(decoded.starting_time.as_millis(), 100);
        assert_eq!(decoded.ending_time.as_millis(), 350);
        assert_eq!(decoded.duration().num_milliseconds(), 250);
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = decode("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn missing_type() {
        assert_matches!(decode(r#"{"orientation":"left"}"#), Err(ProtocolError::Validation(m)) if m.contains("missing"));
        assert_matches!(decode(r#"{"type":7}"#), Err(ProtocolError::Validation(_)));
        assert_matches!(decode("[]"), Err(ProtocolError::Validation(_)));
    }

    #[test]
    fn unknown_type() {
        assert_matches!(
            decode(r#"{"type":"trial.skip"}"#),
            Err(ProtocolError::Validation(m)) if m.contains("trial.skip")
        );
    }

    #[test]
    fn bad_payload_shape() {
        let raw = r#"{"type":"trial.answer","orientation":"up","clientTimestamp":1}"#;
        assert_matches!(decode_client(raw), Err(ProtocolError::Validation(_)));
        let raw = r#"{"type":"trial.answer","orientation":"left"}"#;
        assert_matches!(decode_client(raw), Err(ProtocolError::Validation(_)));
        let raw = r#"{"type":"trial.present","index":0,"position":"top","cues":[]}"#;
        assert_matches!(decode(raw), Err(ProtocolError::Validation(_)));
    }

    #[test]
    fn clients_cannot_send_server_types() {
        assert_matches!(
            decode_client(r#"{"type":"session.complete"}"#),
            Err(ProtocolError::Validation(m)) if m.contains("session.complete")
        );
    }
}
