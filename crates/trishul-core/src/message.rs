// ABOUTME: Push-channel message types sent to web clients.
// ABOUTME: Server-built snapshots plus validated worker events forwarded verbatim.

use crate::definitions::DefinitionSummary;
use crate::error::DecodeError;
use crate::stats::StatsDocument;
use crate::worker::{WorkerConfig, WorkerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one worker as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub kind: WorkerKind,
    pub running: bool,
    pub pid: Option<u32>,
    pub config: WorkerConfig,
    pub uptime_seconds: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Messages the server composes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    FullState {
        simulator: WorkerStatus,
        traps: WorkerStatus,
        stats: StatsDocument,
        mibs: DefinitionSummary,
    },
    Status {
        simulator: WorkerStatus,
        traps: WorkerStatus,
    },
    Stats {
        data: StatsDocument,
    },
    Mibs {
        mibs: DefinitionSummary,
    },
}

impl PushMessage {
    pub fn encode(&self) -> String {
        // Plain data with string keys; serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// An event received from a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    kind: String,
    raw: String,
}

impl WorkerEvent {
    /// Accepts a UTF-8 JSON object carrying a string `type` field.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        let value: serde_json::Value = serde_json::from_str(text)?;
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(DecodeError::MissingType)?;
        Ok(Self {
            kind: kind.to_string(),
            raw: text.to_string(),
        })
    }

    /// The `type` discriminator.
    pub fn event_type(&self) -> &str {
        &self.kind
    }

    /// The datagram text exactly as received.
    pub fn into_raw(self) -> String {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(kind: WorkerKind) -> WorkerStatus {
        WorkerStatus {
            kind,
            running: false,
            pid: None,
            config: WorkerConfig {
                port: kind.default_port(),
                community: "public".to_string(),
                resolve_mibs: true,
            },
            uptime_seconds: None,
            started_at: None,
        }
    }

    #[test]
    fn test_status_message_shape() {
        let msg = PushMessage::Status {
            simulator: status(WorkerKind::Simulator),
            traps: status(WorkerKind::Traps),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["simulator"]["kind"], "simulator");
        assert_eq!(json["traps"]["config"]["port"], 1162);
    }

    #[test]
    fn test_stats_message_shape() {
        let msg = PushMessage::Stats {
            data: StatsDocument::default(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["data"]["simulator"]["restart_count"], 0);
        assert_eq!(json["data"]["mibs"]["reload_count"], 0);
    }

    #[test]
    fn test_event_keeps_raw_text() {
        let raw = r#"{"type": "trap",  "trap": {"oid": "1.3.6.1"}}"#;
        let event = WorkerEvent::decode(raw.as_bytes()).unwrap();
        assert_eq!(event.event_type(), "trap");
        assert_eq!(event.into_raw(), raw);
    }

    #[test]
    fn test_event_rejects_malformed() {
        assert!(matches!(
            WorkerEvent::decode(&[0xff, 0xfe]),
            Err(DecodeError::Utf8(_))
        ));
        assert!(matches!(
            WorkerEvent::decode(b"{type: trap"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            WorkerEvent::decode(b"[1, 2]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            WorkerEvent::decode(br#"{"type": 5}"#),
            Err(DecodeError::MissingType)
        ));
    }
}
