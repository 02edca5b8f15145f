//! Telemetry upload
//!
//! Telemetry bursts from the hub arrive node by node; uploading each one
//! would hammer the ingestion endpoint with intermediate states. The
//! coalescer collapses a burst into a single POST: every upsert restarts a
//! settle window, and only a window that elapses undisturbed (or an explicit
//! `data_collection_finished`) produces an upload, built from the registry as
//! it stands at that moment.
//!
//! Delivery is fire-and-forget: one attempt, outcome reported as a status
//! event, no retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{HubError, SensorMap};
use crate::registry::{NodeKind, NodeRegistry};

/// Per-node section of the upload payload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodePayload {
    /// Node id
    pub node_id: String,
    /// Latest sensor readings
    pub sensors: SensorMap,
}

/// `data` section of the upload payload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadData {
    /// Every soil node with a non-empty sensor map
    pub soil_nodes: Vec<NodePayload>,
    /// The first atmospheric node with non-empty sensors, if any
    pub atmospheric_node: Option<NodePayload>,
}

/// Body of the ingestion POST
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadPayload {
    /// Hub identity from configuration
    pub hub_id: String,
    /// Snapshot time, UTC
    pub timestamp: DateTime<Utc>,
    /// Node data
    pub data: UploadData,
}

/// Build the payload from the registry's current state. Nodes without
/// sensors are left out; when several atmospheric nodes report, only the
/// first (insertion order) is uploaded.
pub fn build_payload(hub_id: &str, timestamp: DateTime<Utc>, registry: &NodeRegistry) -> UploadPayload {
    let soil_nodes = registry
        .by_kind(NodeKind::Soil)
        .filter(|n| !n.sensors.is_empty())
        .map(|n| NodePayload {
            node_id: n.id.clone(),
            sensors: n.sensors.clone(),
        })
        .collect();

    let atmospheric_node = registry
        .by_kind(NodeKind::Atmospheric)
        .find(|n| !n.sensors.is_empty())
        .map(|n| NodePayload {
            node_id: n.id.clone(),
            sensors: n.sensors.clone(),
        });

    UploadPayload {
        hub_id: hub_id.to_string(),
        timestamp,
        data: UploadData {
            soil_nodes,
            atmospheric_node,
        },
    }
}

/// Destination for upload payloads. The production sink POSTs JSON over
/// HTTP; tests substitute a channel.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Deliver one payload. One attempt; the caller never retries.
    async fn deliver(&self, endpoint: &str, payload: &UploadPayload) -> Result<(), HubError>;
}

/// HTTP sink posting to the configured ingestion endpoint
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    /// Sink with a fresh HTTP client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn deliver(&self, endpoint: &str, payload: &UploadPayload) -> Result<(), HubError> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| HubError::Upload(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| HubError::Upload(e.to_string()))?;
        Ok(())
    }
}

/// Debounce bookkeeping for the settle window.
///
/// Timing itself lives with the engine (it spawns a sleep per armed
/// generation); this type only decides which elapsed timer is still the
/// current one. Cancelling is a generation bump, so a stale timer firing
/// later is ignored instead of raced.
#[derive(Debug, Default)]
pub struct UploadCoalescer {
    generation: u64,
    armed: bool,
}

impl UploadCoalescer {
    /// New coalescer with no pending window
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start the settle window. Returns the generation the caller's
    /// timer must present to fire.
    pub fn arm(&mut self) -> u64 {
        self.generation += 1;
        self.armed = true;
        self.generation
    }

    /// Cancel any pending window (forced upload or shutdown)
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.armed = false;
    }

    /// True if a window is pending
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// A timer for `generation` elapsed. Returns true exactly when that
    /// window is still current, disarming it.
    pub fn try_fire(&mut self, generation: u64) -> bool {
        if self.armed && generation == self.generation {
            self.armed = false;
            true
        } else {
            false
        }
    }
}
