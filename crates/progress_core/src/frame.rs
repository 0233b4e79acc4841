use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::ProgressSnapshot;

/// Keep-alive sentinel sent outside the JSON envelope.
pub const PING: &str = "ping";
/// Reply to [`PING`].
pub const PONG: &str = "pong";

/// A raw frame as delivered by the stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    Pong,
    /// Last known server-side state, echoed once on connect.
    Status(ProgressSnapshot),
    /// Most recent truth; always replaces the held snapshot.
    Progress(ProgressSnapshot),
    Completed,
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid json envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Decodes one text frame into an [`Inbound`] message.
pub fn parse_inbound(text: &str) -> Result<Inbound, FrameError> {
    match text.trim() {
        PING => return Ok(Inbound::Ping),
        PONG => return Ok(Inbound::Pong),
        _ => {}
    }

    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.kind.as_str() {
        "status" => snapshot_payload("status", envelope.data).map(Inbound::Status),
        "progress" => snapshot_payload("progress", envelope.data).map(Inbound::Progress),
        "completed" => Ok(Inbound::Completed),
        "error" => Ok(Inbound::Error {
            message: error_message(&envelope.data),
        }),
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

fn snapshot_payload(kind: &'static str, data: Value) -> Result<ProgressSnapshot, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Payload { kind, source })
}

fn error_message(data: &Value) -> String {
    let text = match data {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => ["message", "error", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    };
    text.unwrap_or("task failed").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;

    #[test]
    fn keep_alive_sentinels_bypass_json() {
        assert_eq!(parse_inbound("ping").unwrap(), Inbound::Ping);
        assert_eq!(parse_inbound("pong\n").unwrap(), Inbound::Pong);
    }

    #[test]
    fn progress_envelope_decodes_snapshot() {
        let inbound = parse_inbound(
            r#"{"type":"progress","data":{"task_id":"t1","stage":"downloading","progress":42.5,"processed":3,"total":10}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Progress(snapshot) => {
                assert_eq!(snapshot.task_id, "t1");
                assert_eq!(snapshot.stage, Stage::Downloading);
                assert_eq!(snapshot.processed, 3);
                assert_eq!(snapshot.total, 10);
            }
            other => panic!("unexpected inbound {other:?}"),
        }
    }

    #[test]
    fn completed_needs_no_payload() {
        assert_eq!(
            parse_inbound(r#"{"type":"completed"}"#).unwrap(),
            Inbound::Completed
        );
    }

    #[test]
    fn error_message_is_extracted_from_common_shapes() {
        assert_eq!(
            parse_inbound(r#"{"type":"error","data":{"message":"pdf host down"}}"#).unwrap(),
            Inbound::Error {
                message: "pdf host down".to_string()
            }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"error","data":"boom"}"#).unwrap(),
            Inbound::Error {
                message: "boom".to_string()
            }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"error"}"#).unwrap(),
            Inbound::Error {
                message: "task failed".to_string()
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            parse_inbound("{\"type\":\"progress\""),
            Err(FrameError::Envelope(_))
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"heartbeat","data":{}}"#),
            Err(FrameError::UnknownType(kind)) if kind == "heartbeat"
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"status","data":{"processed":"many"}}"#),
            Err(FrameError::Payload { kind: "status", .. })
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"progress","data":null}"#),
            Err(FrameError::Payload { kind: "progress", .. })
        ));
    }
}
