//! Node registry
//!
//! Authoritative in-memory map of known sensor nodes and their latest
//! telemetry. Owned exclusively by the engine loop; all mutation is
//! synchronous and immediately visible to readers on that context.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::SensorMap;

/// What a node measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// In-ground probe (moisture, soil temperature)
    Soil,
    /// Weather station (air temperature, humidity, rain, wind, light, pressure)
    Atmospheric,
    /// Reported a type string we don't recognize
    Unknown,
}

/// Reachability of a node as last reported by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node answered its last poll
    Online,
    /// Hub reported the node unreachable
    Offline,
}

/// One entry of a full node-list refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeListEntry {
    /// Node id
    pub id: String,
    /// Node kind (parsed or inferred from the id)
    pub kind: NodeKind,
    /// Reported status
    pub status: NodeStatus,
}

/// A known sensor node and its latest readings
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Unique node id (registry key)
    pub id: String,
    /// What the node measures
    pub kind: NodeKind,
    /// Last reported reachability
    pub status: NodeStatus,
    /// Latest sensor readings; replaced wholesale on every telemetry frame
    pub sensors: SensorMap,
    /// When the node was last created or updated
    pub last_updated: DateTime<Utc>,
}

/// Infer a node's kind from its id. Ids are assigned by the hub with the
/// node family embedded ("atm-3", "soil12"); anything without "atm" is a
/// soil node.
pub fn infer_kind(id: &str) -> NodeKind {
    if id.to_ascii_lowercase().contains("atm") {
        NodeKind::Atmospheric
    } else {
        NodeKind::Soil
    }
}

/// Insertion-ordered collection of known nodes, keyed by id
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes are known
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Iterate all nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Nodes of one kind, in insertion order
    pub fn by_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Apply a telemetry frame: create the node on first sight (kind inferred
    /// from the id), mark it Online, and replace its sensor map.
    pub fn upsert(&mut self, id: &str, sensors: SensorMap, now: DateTime<Utc>) -> &Node {
        let idx = match self.nodes.iter().position(|n| n.id == id) {
            Some(idx) => idx,
            None => {
                self.nodes.push(Node {
                    id: id.to_string(),
                    kind: infer_kind(id),
                    status: NodeStatus::Online,
                    sensors: SensorMap::new(),
                    last_updated: now,
                });
                self.nodes.len() - 1
            }
        };
        let node = &mut self.nodes[idx];
        node.status = NodeStatus::Online;
        node.sensors = sensors;
        node.last_updated = now;
        node
    }

    /// Replace the whole registry from a list refresh. Entries absent from
    /// the new list are dropped, together with their sensor history; entries
    /// that survive keep their sensors.
    pub fn replace_all(&mut self, entries: Vec<NodeListEntry>, now: DateTime<Utc>) {
        let mut next = Vec::with_capacity(entries.len());
        for entry in entries {
            let sensors = self
                .nodes
                .iter()
                .find(|n| n.id == entry.id)
                .map(|n| n.sensors.clone())
                .unwrap_or_default();
            next.push(Node {
                id: entry.id,
                kind: entry.kind,
                status: entry.status,
                sensors,
                last_updated: now,
            });
        }
        self.nodes = next;
    }

    /// Mark a node Offline. Returns false for unknown ids.
    pub fn mark_offline(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.status = NodeStatus::Offline;
                node.last_updated = now;
                true
            }
            None => false,
        }
    }

    /// Forget every node (hub factory reset)
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Cloned view of all nodes, for handing across the UI channel
    pub fn snapshot(&self) -> Vec<Node> {
        self.nodes.clone()
    }
}
