//! Inbound frame classification
//!
//! The hub mixes plaintext banners with JSON arrays and objects on the same
//! line stream. Each line is classified exactly once into a typed [`Frame`];
//! nothing downstream looks at raw JSON again.
//!
//! Field names arrive with inconsistent casing from older firmware, so
//! top-level object keys are lowercased once here. Sensor values are likewise
//! normalized at this boundary into [`SensorValue`] — numeric strings become
//! numbers, everything else stays text.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{HubError, BANNER_PREFIX};
use crate::registry::{infer_kind, NodeKind, NodeListEntry, NodeStatus};

/// A single sensor reading, normalized from the wire
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Numeric reading (JSON numbers and numeric strings)
    Number(f64),
    /// Anything that does not parse as a number
    Text(String),
}

impl SensorValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => Some(*n),
            SensorValue::Text(_) => None,
        }
    }

    fn from_json(value: &Value) -> Option<SensorValue> {
        match value {
            Value::Number(n) => n.as_f64().map(SensorValue::Number),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => Some(SensorValue::Number(n)),
                Err(_) => Some(SensorValue::Text(s.clone())),
            },
            Value::Bool(b) => Some(SensorValue::Text(b.to_string())),
            Value::Null => None,
            other => Some(SensorValue::Text(other.to_string())),
        }
    }
}

/// Sensor-key to value mapping for one node
pub type SensorMap = BTreeMap<String, SensorValue>;

/// Device status frames (`{"status": ...}`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Hub confirmed it entered registration mode
    RegisterModeActive,
    /// Hub is idle and ready; registration mode is over
    SystemReady,
    /// A node stopped answering
    Offline {
        /// Id of the unreachable node
        id: String,
    },
    /// Unrecognized status, kept for logging
    Other(String),
}

/// Device event frames (`{"event": ...}`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventReport {
    /// A new node paired successfully
    Registered {
        /// Id assigned to the new node, when the hub reports one
        id: Option<String>,
    },
    /// Registration mode was cancelled (button or command)
    RegisterCancelled,
    /// A node was unpaired
    Deleted {
        /// Id of the removed node, when the hub reports one
        id: Option<String>,
    },
    /// The hub finished a full telemetry sweep
    DataCollectionFinished,
    /// The hub was factory-reset and forgot every node
    AllNodesDeleted,
    /// Unrecognized event, kept for logging
    Other(String),
}

/// Telemetry part of an object frame (`id` + `sensors`)
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Reporting node id
    pub id: String,
    /// Normalized sensor readings; replaces the node's previous map
    pub sensors: SensorMap,
}

/// One inbound JSON object, decomposed into its independently-routed parts.
///
/// The firmware is free to combine fields in one object (e.g. an `offline`
/// status that also carries sensors), so each part is optional and the
/// dispatcher handles them in order: status, event, telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubReport {
    /// `status` field, if present
    pub status: Option<StatusReport>,
    /// `event` field, if present
    pub event: Option<EventReport>,
    /// Telemetry upsert, if both `id` and `sensors` are present
    pub telemetry: Option<Telemetry>,
    /// `error` field, if present (hub-side failure text)
    pub error: Option<String>,
}

impl HubReport {
    /// True when no recognized part was found
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.event.is_none()
            && self.telemetry.is_none()
            && self.error.is_none()
    }
}

/// A classified inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake acknowledgment, e.g. `FW_V1.2`
    Banner {
        /// Full banner text, used verbatim as the firmware version
        firmware: String,
    },
    /// Non-JSON text that is not a banner; logged only
    Chatter(String),
    /// Full node-list refresh
    NodeList(Vec<NodeListEntry>),
    /// JSON object frame
    Report(HubReport),
}

impl Frame {
    /// Classify one inbound line. Returns `Ok(None)` for blank lines and
    /// `Err(HubError::Parse)` for malformed JSON; neither is fatal to the
    /// session.
    pub fn parse(line: &str) -> Result<Option<Frame>, HubError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if !line.starts_with('{') && !line.starts_with('[') {
            if line.starts_with(BANNER_PREFIX) {
                return Ok(Some(Frame::Banner {
                    firmware: line.to_string(),
                }));
            }
            return Ok(Some(Frame::Chatter(line.to_string())));
        }

        let value: Value =
            serde_json::from_str(line).map_err(|e| HubError::Parse(e.to_string()))?;

        match value {
            Value::Array(entries) => Ok(Some(Frame::NodeList(parse_node_list(&entries)))),
            Value::Object(map) => {
                // Canonical schema: lowercase the top-level keys once
                let fields: BTreeMap<String, Value> = map
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect();
                Ok(Some(Frame::Report(parse_report(&fields))))
            }
            other => Err(HubError::Parse(format!(
                "unexpected top-level JSON value: {}",
                other
            ))),
        }
    }
}

fn field_str(fields: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_node_list(entries: &[Value]) -> Vec<NodeListEntry> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(obj) = entry.as_object() else {
            tracing::warn!("node list entry is not an object: {}", entry);
            continue;
        };
        let fields: BTreeMap<String, Value> = obj
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        let Some(id) = field_str(&fields, "id").filter(|id| !id.is_empty()) else {
            tracing::warn!("node list entry without id: {}", entry);
            continue;
        };

        let kind = match field_str(&fields, "type") {
            Some(t) => parse_kind(&t),
            None => infer_kind(&id),
        };
        let status = match field_str(&fields, "status") {
            Some(s) if s.eq_ignore_ascii_case("offline") => NodeStatus::Offline,
            _ => NodeStatus::Online,
        };

        out.push(NodeListEntry { id, kind, status });
    }
    out
}

fn parse_kind(raw: &str) -> NodeKind {
    let t = raw.to_ascii_lowercase();
    if t.contains("atm") {
        NodeKind::Atmospheric
    } else if t.contains("soil") {
        NodeKind::Soil
    } else {
        NodeKind::Unknown
    }
}

fn parse_report(fields: &BTreeMap<String, Value>) -> HubReport {
    let id = field_str(fields, "id");

    let status = field_str(fields, "status").map(|s| match s.as_str() {
        "register_mode_active" => StatusReport::RegisterModeActive,
        "system_ready" => StatusReport::SystemReady,
        "offline" => match &id {
            Some(node_id) => StatusReport::Offline {
                id: node_id.clone(),
            },
            None => StatusReport::Other(s),
        },
        _ => StatusReport::Other(s),
    });

    let event = field_str(fields, "event").map(|e| match e.as_str() {
        "registered" => EventReport::Registered { id: id.clone() },
        "register_cancelled" => EventReport::RegisterCancelled,
        "deleted" => EventReport::Deleted { id: id.clone() },
        "data_collection_finished" => EventReport::DataCollectionFinished,
        "all_nodes_deleted" => EventReport::AllNodesDeleted,
        _ => EventReport::Other(e),
    });

    let telemetry = match (fields.get("sensors").and_then(Value::as_object), &id) {
        (Some(sensors), Some(node_id)) if !node_id.is_empty() => {
            let mut map = SensorMap::new();
            for (key, value) in sensors {
                if let Some(v) = SensorValue::from_json(value) {
                    map.insert(key.clone(), v);
                }
            }
            Some(Telemetry {
                id: node_id.clone(),
                sensors: map,
            })
        }
        _ => None,
    };

    let error = field_str(fields, "error");

    HubReport {
        status,
        event,
        telemetry,
        error,
    }
}
