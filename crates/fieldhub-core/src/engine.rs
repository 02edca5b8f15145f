//! Hub engine
//!
//! The serialized main context. Everything that mutates the registry, the
//! session, or the debounce state happens inside [`HubEngine::run`]'s select
//! loop; the reader thread, the scanner task, the debounce timers and the
//! upload tasks only talk to it through channels, so a foreground consumer
//! always observes consistent state.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::HubConfig;
use crate::protocol::{
    EventReport, Frame, HubCommand, HubError, HubReport, SerialTransport, StatusReport, Telemetry,
    TransportEvent, SCAN_INTERVAL_MS, UPLOAD_SETTLE_MS,
};
use crate::registry::{Node, NodeRegistry};
use crate::scanner::{self, ScanOutcome, ScanUpdate, TransportProber};
use crate::session::{HubSession, RegistrationChange, SessionPhase};
use crate::uploader::{build_payload, HttpSink, TelemetrySink, UploadCoalescer};

/// Structured events for the embedding UI layer. Failures surface here as
/// events, never as panics or errors thrown across the boundary.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Human-readable log line
    Log(String),
    /// Session lifecycle change
    SessionChanged {
        /// Current phase
        phase: SessionPhase,
        /// Port attached (or last attached)
        port: String,
        /// Firmware banner, "Unknown" until the handshake
        firmware_version: String,
    },
    /// Registration mode was confirmed on or off by the hub
    RegistrationChanged(bool),
    /// Registry content changed; carries a full snapshot
    NodesChanged(Vec<Node>),
    /// Something the user should see as a notification
    Notify {
        /// Short title
        title: String,
        /// Body text
        message: String,
    },
    /// Outcome of one upload attempt
    UploadStatus {
        /// True on HTTP success
        ok: bool,
        /// Status or error text
        detail: String,
    },
}

/// Requests from the embedding UI layer
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// User toggled registration mode; sends a command, applies nothing
    /// until the hub confirms
    SetRegistrationMode(bool),
    /// Unpair a node; the registry drops it on the next list refresh
    DeleteNode(String),
    /// Ask the hub for an immediate telemetry sweep
    PollNow,
    /// Ask the hub for a node-list refresh
    RefreshList,
    /// Start a scan cycle now (for UIs running with `auto_scan` off)
    StartScan,
    /// Stop the engine loop and release the port
    Shutdown,
}

#[derive(Debug)]
enum EngineMsg {
    Command(EngineCommand),
    Scan(ScanUpdate),
    DebounceElapsed(u64),
    UploadDone(Result<(), HubError>),
}

/// Cloneable handle for sending [`EngineCommand`]s into a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl EngineHandle {
    /// Queue a command; silently dropped if the engine has shut down
    pub fn command(&self, cmd: EngineCommand) {
        let _ = self.tx.send(EngineMsg::Command(cmd));
    }
}

/// The hub communication engine
pub struct HubEngine<S: TelemetrySink> {
    config: HubConfig,
    config_path: Option<PathBuf>,
    transport: SerialTransport,
    registry: NodeRegistry,
    session: HubSession,
    coalescer: UploadCoalescer,
    sink: Arc<S>,
    scanning: bool,

    lines_tx: mpsc::UnboundedSender<TransportEvent>,
    lines_rx: mpsc::UnboundedReceiver<TransportEvent>,
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
    msg_rx: mpsc::UnboundedReceiver<EngineMsg>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    handshake_confirmed: watch::Sender<bool>,
}

impl HubEngine<HttpSink> {
    /// Engine with the production HTTP sink. Returns the engine (move it
    /// into [`HubEngine::run`]), a command handle, and the UI event stream.
    pub fn new(
        config: HubConfig,
        config_path: Option<PathBuf>,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<UiEvent>) {
        Self::with_sink(config, config_path, HttpSink::new())
    }
}

impl<S: TelemetrySink + 'static> HubEngine<S> {
    /// Engine with a custom telemetry sink (tests, alternative deliveries)
    pub fn with_sink(
        config: HubConfig,
        config_path: Option<PathBuf>,
        sink: S,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<UiEvent>) {
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (handshake_confirmed, _) = watch::channel(false);

        let baud_rate = config.baud_rate;
        let mut session = HubSession::new(baud_rate);
        session.port = config.saved_port.clone();

        let engine = Self {
            config,
            config_path,
            transport: SerialTransport::new(),
            registry: NodeRegistry::new(),
            session,
            coalescer: UploadCoalescer::new(),
            sink: Arc::new(sink),
            scanning: false,
            lines_tx,
            lines_rx,
            msg_tx: msg_tx.clone(),
            msg_rx,
            ui_tx,
            handshake_confirmed,
        };
        let handle = EngineHandle { tx: msg_tx };
        (engine, handle, ui_rx)
    }

    /// Channel the transport (or a simulated hub) feeds inbound lines into
    pub fn line_sender(&self) -> mpsc::UnboundedSender<TransportEvent> {
        self.lines_tx.clone()
    }

    /// Run the engine until [`EngineCommand::Shutdown`]
    pub async fn run(mut self) {
        let mut scan_tick = interval(Duration::from_millis(SCAN_INTERVAL_MS));
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let poll_secs = self.config.poll_interval_secs.max(1);
        let mut poll_tick = interval(Duration::from_secs(poll_secs));
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.log("Hub engine started. Waiting for connection...".to_string());

        loop {
            tokio::select! {
                _ = scan_tick.tick(), if self.config.auto_scan => {
                    self.maybe_start_scan();
                }
                _ = poll_tick.tick(), if self.session.connected() => {
                    self.send_command(HubCommand::GetDataNow);
                }
                Some(event) = self.lines_rx.recv() => {
                    match event {
                        TransportEvent::Line(line) => self.on_line(&line),
                        TransportEvent::Closed { reason } => self.on_link_lost(&reason),
                    }
                }
                Some(msg) = self.msg_rx.recv() => {
                    if !self.on_msg(msg) {
                        break;
                    }
                }
            }
        }

        self.transport.disconnect();
        tracing::info!("hub engine stopped");
    }

    // ---- scanning ----------------------------------------------------------

    fn maybe_start_scan(&mut self) {
        if self.session.connected() || self.scanning {
            return;
        }
        self.scanning = true;
        self.session.begin_scan();
        self.handshake_confirmed.send_replace(false);
        self.emit_session();

        let prober = TransportProber {
            transport: self.transport.clone(),
            baud_rate: self.config.baud_rate,
            confirmed: self.handshake_confirmed.subscribe(),
            lines: self.lines_tx.clone(),
        };

        let (scan_tx, mut scan_rx) = mpsc::unbounded_channel();
        tokio::spawn(scanner::run(
            self.config.saved_port.clone(),
            prober,
            scan_tx,
        ));

        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = scan_rx.recv().await {
                if msg_tx.send(EngineMsg::Scan(update)).is_err() {
                    break;
                }
            }
        });
    }

    fn on_scan_update(&mut self, update: ScanUpdate) {
        match update {
            ScanUpdate::Probing { port } => {
                self.session.begin_handshake(&port);
                self.emit_session();
            }
            ScanUpdate::ProbeFailed { port } => {
                tracing::debug!(port = %port, "handshake attempt failed");
                self.session.handshake_failed();
                self.emit_session();
            }
            ScanUpdate::Finished(outcome) => {
                self.scanning = false;
                match outcome {
                    ScanOutcome::Connected { port, attempts } => {
                        self.on_hub_found(port, attempts);
                    }
                    ScanOutcome::NoPorts => {
                        self.log("Scan: no serial ports found.".to_string());
                        self.scan_failed();
                    }
                    ScanOutcome::NotFound => {
                        self.log("Scan: hub not found on any port.".to_string());
                        self.scan_failed();
                    }
                    ScanOutcome::Superseded => {}
                }
            }
        }
    }

    fn scan_failed(&mut self) {
        if !self.session.connected() {
            self.session.reset();
            self.emit_session();
        }
    }

    fn on_hub_found(&mut self, port: String, attempts: usize) {
        tracing::info!(port = %port, attempts, "hub connected");
        self.config.saved_port = port.clone();
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save(path) {
                tracing::warn!(error = %e, "failed to persist winning port");
            }
        }

        self.send_command(HubCommand::GetListDevice);
        self.emit_session();
        self.notify("Hub", format!("Connected to hub at {}", port));
    }

    // ---- inbound dispatch --------------------------------------------------

    fn on_line(&mut self, line: &str) {
        match Frame::parse(line) {
            Ok(None) => {}
            Ok(Some(Frame::Banner { firmware })) => {
                self.log(format!("RX: {}", firmware));
                if self.session.mark_connected(&firmware) {
                    self.handshake_confirmed.send_replace(true);
                    self.emit_session();
                }
            }
            Ok(Some(Frame::Chatter(text))) => {
                self.log(format!("RX: {}", text));
            }
            Ok(Some(Frame::NodeList(entries))) => {
                self.registry.replace_all(entries, Utc::now());
                self.log(format!("Node list refreshed ({} nodes).", self.registry.len()));
                self.emit_nodes();
            }
            Ok(Some(Frame::Report(report))) => {
                self.on_report(report);
            }
            Err(e) => {
                tracing::warn!(line, error = %e, "dropping malformed frame");
                self.log(format!("JSON error: {}", e));
            }
        }
    }

    fn on_report(&mut self, report: HubReport) {
        if let Some(status) = report.status {
            self.on_status(status);
        }
        if let Some(event) = report.event {
            self.on_event(event);
        }
        if let Some(telemetry) = report.telemetry {
            self.on_telemetry(telemetry);
        }
        if let Some(error) = report.error {
            tracing::warn!(error = %error, "hub reported an error");
            self.log(format!("Hub error: {}", error));
        }
    }

    fn on_status(&mut self, status: StatusReport) {
        match status {
            StatusReport::RegisterModeActive => {
                self.confirm_registration(true);
            }
            StatusReport::SystemReady => {
                self.confirm_registration(false);
            }
            StatusReport::Offline { id } => {
                if self.registry.mark_offline(&id, Utc::now()) {
                    self.log(format!("Node <{}> offline.", id));
                    self.emit_nodes();
                }
            }
            StatusReport::Other(s) => {
                tracing::debug!(status = %s, "unhandled status");
            }
        }
    }

    fn on_event(&mut self, event: EventReport) {
        match event {
            EventReport::Registered { id } => {
                self.send_command(HubCommand::GetListDevice);
                self.confirm_registration(false);
                let id = id.unwrap_or_default();
                self.notify("New node", format!("Node {} registered successfully!", id));
            }
            EventReport::RegisterCancelled => {
                self.confirm_registration(false);
                self.notify("Registration", "Registration process was cancelled.".to_string());
            }
            EventReport::Deleted { id } => {
                let id = id.unwrap_or_default();
                self.notify("Node deleted", format!("Node {} has been removed.", id));
                self.send_command(HubCommand::GetListDevice);
            }
            EventReport::DataCollectionFinished => {
                self.coalescer.cancel();
                self.start_upload();
            }
            EventReport::AllNodesDeleted => {
                self.registry.clear();
                self.emit_nodes();
                self.notify("Hub reset", "All nodes were removed.".to_string());
            }
            EventReport::Other(e) => {
                tracing::debug!(event = %e, "unhandled event");
            }
        }
    }

    fn on_telemetry(&mut self, telemetry: Telemetry) {
        self.registry
            .upsert(&telemetry.id, telemetry.sensors, Utc::now());
        self.log(format!("Data <{}> updated.", telemetry.id));
        self.emit_nodes();
        self.schedule_debounce();
    }

    fn confirm_registration(&mut self, active: bool) {
        let (_, changed) = self
            .session
            .apply_registration(RegistrationChange::Confirmed(active));
        if changed {
            self.log(format!(
                "Registration mode {}.",
                if active { "active" } else { "off" }
            ));
            self.emit(UiEvent::RegistrationChanged(active));
        }
    }

    // ---- upload ------------------------------------------------------------

    fn schedule_debounce(&mut self) {
        if !self.config.upload_enabled {
            return;
        }
        let generation = self.coalescer.arm();
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(UPLOAD_SETTLE_MS)).await;
            let _ = msg_tx.send(EngineMsg::DebounceElapsed(generation));
        });
    }

    fn start_upload(&mut self) {
        if !self.config.upload_enabled {
            return;
        }
        if self.config.api_endpoint.is_empty() {
            tracing::warn!("upload requested but endpoint is not configured");
            self.log("Upload skipped: endpoint not configured.".to_string());
            return;
        }

        let payload = build_payload(&self.config.hub_id, Utc::now(), &self.registry);
        self.log("Uploading telemetry...".to_string());

        let sink = Arc::clone(&self.sink);
        let endpoint = self.config.api_endpoint.clone();
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = sink.deliver(&endpoint, &payload).await;
            let _ = msg_tx.send(EngineMsg::UploadDone(result));
        });
    }

    // ---- engine messages ---------------------------------------------------

    fn on_msg(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Command(cmd) => return self.on_command(cmd),
            EngineMsg::Scan(update) => self.on_scan_update(update),
            EngineMsg::DebounceElapsed(generation) => {
                if self.coalescer.try_fire(generation) {
                    self.start_upload();
                }
            }
            EngineMsg::UploadDone(result) => match result {
                Ok(()) => {
                    self.log("Telemetry uploaded.".to_string());
                    self.emit(UiEvent::UploadStatus {
                        ok: true,
                        detail: "Data uploaded successfully".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upload failed");
                    self.log(format!("Upload failed: {}", e));
                    self.emit(UiEvent::UploadStatus {
                        ok: false,
                        detail: e.to_string(),
                    });
                }
            },
        }
        true
    }

    fn on_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::SetRegistrationMode(enable) => {
                let (command, _) = self
                    .session
                    .apply_registration(RegistrationChange::LocalIntent(enable));
                if let Some(command) = command {
                    self.log(format!(
                        "CMD: {} register mode...",
                        if enable { "Entering" } else { "Cancelling" }
                    ));
                    self.send_command(command);
                }
            }
            EngineCommand::DeleteNode(id) => {
                self.send_command(HubCommand::DeleteNode(id.clone()));
                self.notify("Hub", format!("Sent delete command for {}", id));
            }
            EngineCommand::PollNow => self.send_command(HubCommand::GetDataNow),
            EngineCommand::RefreshList => self.send_command(HubCommand::GetListDevice),
            EngineCommand::StartScan => self.maybe_start_scan(),
            EngineCommand::Shutdown => return false,
        }
        true
    }

    // ---- link teardown -----------------------------------------------------

    fn send_command(&mut self, cmd: HubCommand) {
        match self.transport.send_line(&cmd.wire()) {
            Ok(()) => {}
            Err(HubError::NotConnected) => {
                tracing::debug!(command = %cmd, "command dropped, not connected");
            }
            Err(e) => {
                // The transport has already disconnected itself
                self.on_link_lost(&e.to_string());
            }
        }
    }

    fn on_link_lost(&mut self, reason: &str) {
        if self.session.phase() == SessionPhase::Disconnected {
            return;
        }
        tracing::warn!(reason, "hub link lost");
        self.transport.disconnect();
        self.handshake_confirmed.send_replace(false);
        self.session.reset();
        self.log(format!("Connection lost: {}", reason));
        self.emit_session();
    }

    // ---- UI events ---------------------------------------------------------

    fn emit(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }

    fn emit_session(&self) {
        self.emit(UiEvent::SessionChanged {
            phase: self.session.phase(),
            port: self.session.port.clone(),
            firmware_version: self.session.firmware_version.clone(),
        });
    }

    fn emit_nodes(&self) {
        self.emit(UiEvent::NodesChanged(self.registry.snapshot()));
    }

    fn log(&self, message: String) {
        tracing::info!("{}", message);
        self.emit(UiEvent::Log(message));
    }

    fn notify(&self, title: &str, message: String) {
        self.emit(UiEvent::Notify {
            title: title.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorValue;
    use crate::registry::{NodeKind, NodeStatus};
    use crate::uploader::UploadPayload;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct ChannelSink(mpsc::UnboundedSender<UploadPayload>);

    #[async_trait]
    impl TelemetrySink for ChannelSink {
        async fn deliver(&self, _endpoint: &str, payload: &UploadPayload) -> Result<(), HubError> {
            let _ = self.0.send(payload.clone());
            Ok(())
        }
    }

    fn test_engine() -> (
        HubEngine<ChannelSink>,
        mpsc::UnboundedReceiver<UiEvent>,
        mpsc::UnboundedReceiver<UploadPayload>,
    ) {
        let mut config = HubConfig::default();
        config.hub_id = "hub-test".to_string();
        config.api_endpoint = "http://ingest.example/api".to_string();
        config.auto_scan = false;
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        let (engine, _handle, ui_rx) = HubEngine::with_sink(config, None, ChannelSink(payload_tx));
        (engine, ui_rx, payload_rx)
    }

    fn connect(engine: &mut HubEngine<ChannelSink>) {
        engine.session.begin_scan();
        engine.session.begin_handshake("/dev/ttyACM0");
        engine.on_line("FW_V1.2");
        assert!(engine.session.connected());
    }

    #[tokio::test]
    async fn test_banner_connects_once_and_sets_watch() {
        let (mut engine, _ui, _payloads) = test_engine();
        engine.session.begin_scan();
        engine.session.begin_handshake("/dev/ttyACM0");

        assert!(!*engine.handshake_confirmed.borrow());
        engine.on_line("FW_V1.2");
        assert!(engine.session.connected());
        assert_eq!(engine.session.firmware_version, "FW_V1.2");
        assert!(*engine.handshake_confirmed.borrow());
    }

    #[tokio::test]
    async fn test_malformed_json_leaves_registry_untouched() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        assert_eq!(engine.registry.len(), 1);

        engine.on_line(r#"{"id":"soil2","sensors":{"#);
        assert_eq!(engine.registry.len(), 1);

        // Subsequent lines still processed
        engine.on_line(r#"{"id":"soil2","sensors":{"soil_moisture":50}}"#);
        assert_eq!(engine.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_telemetry_upsert_marks_online_and_arms_debounce() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_temperature":"23.4"}}"#);

        let node = engine.registry.get("soil1").unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.kind, NodeKind::Soil);
        assert_eq!(
            node.sensors.get("soil_temperature"),
            Some(&SensorValue::Number(23.4))
        );
        assert!(engine.coalescer.is_armed());
    }

    #[tokio::test]
    async fn test_debounce_not_armed_when_upload_disabled() {
        let (mut engine, _ui, _payloads) = test_engine();
        engine.config.upload_enabled = false;
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        assert!(!engine.coalescer.is_armed());
    }

    #[tokio::test]
    async fn test_list_refresh_removes_omitted_nodes() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        engine.on_line(r#"{"id":"soil2","sensors":{"soil_moisture":50}}"#);
        assert_eq!(engine.registry.len(), 2);

        engine.on_line(r#"[{"id":"soil2","type":"soil","status":"online"}]"#);
        assert!(engine.registry.get("soil1").is_none());
        assert!(engine.registry.get("soil2").is_some());
    }

    #[tokio::test]
    async fn test_offline_status_marks_node() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        engine.on_line(r#"{"id":"soil1","status":"offline"}"#);
        assert_eq!(
            engine.registry.get("soil1").unwrap().status,
            NodeStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_registration_confirmation_does_not_echo_command() {
        let (mut engine, mut ui, _payloads) = test_engine();
        connect(&mut engine);

        engine.on_line(r#"{"status":"register_mode_active"}"#);
        assert!(engine.session.registration_mode());

        engine.on_line(r#"{"status":"system_ready"}"#);
        assert!(!engine.session.registration_mode());

        let mut toggles = Vec::new();
        while let Ok(event) = ui.try_recv() {
            if let UiEvent::RegistrationChanged(v) = event {
                toggles.push(v);
            }
        }
        assert_eq!(toggles, vec![true, false]);
    }

    #[tokio::test]
    async fn test_local_intent_does_not_flip_flag() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        // No transport is open, so the command send is dropped, but the flag
        // must stay untouched either way until the hub confirms.
        engine.on_command(EngineCommand::SetRegistrationMode(true));
        assert!(!engine.session.registration_mode());
    }

    #[tokio::test]
    async fn test_all_nodes_deleted_clears_registry() {
        let (mut engine, _ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        engine.on_line(r#"{"event":"all_nodes_deleted"}"#);
        assert!(engine.registry.is_empty());
    }

    #[tokio::test]
    async fn test_data_collection_finished_uploads_immediately() {
        let (mut engine, _ui, mut payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        assert!(engine.coalescer.is_armed());

        engine.on_line(r#"{"event":"data_collection_finished"}"#);
        assert!(!engine.coalescer.is_armed());

        // The sink task runs on the test runtime
        let payload = tokio::time::timeout(Duration::from_secs(1), payloads.recv())
            .await
            .expect("upload should fire")
            .unwrap();
        assert_eq!(payload.hub_id, "hub-test");
        assert_eq!(payload.data.soil_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_skipped_without_endpoint() {
        let (mut engine, _ui, mut payloads) = test_engine();
        engine.config.api_endpoint = String::new();
        connect(&mut engine);
        engine.on_line(r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
        engine.on_line(r#"{"event":"data_collection_finished"}"#);

        tokio::task::yield_now().await;
        assert!(payloads.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scan_connected_persists_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let (mut engine, _ui, _payloads) = test_engine();
        engine.config_path = Some(path.clone());
        connect(&mut engine);

        engine.on_scan_update(ScanUpdate::Finished(ScanOutcome::Connected {
            port: "/dev/ttyACM0".to_string(),
            attempts: 2,
        }));

        assert!(!engine.scanning);
        assert_eq!(engine.config.saved_port, "/dev/ttyACM0");
        let persisted = HubConfig::load(&path);
        assert_eq!(persisted.saved_port, "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn test_link_lost_resets_session_once() {
        let (mut engine, mut ui, _payloads) = test_engine();
        connect(&mut engine);
        engine.on_line(r#"{"status":"register_mode_active"}"#);

        engine.on_link_lost("read error: unplugged");
        assert_eq!(engine.session.phase(), SessionPhase::Disconnected);
        assert!(!engine.session.registration_mode());
        assert!(!*engine.handshake_confirmed.borrow());

        // A second teardown (send failure racing the reader) is a no-op
        let mut resets = 0;
        engine.on_link_lost("write failed");
        while let Ok(event) = ui.try_recv() {
            if let UiEvent::Log(line) = event {
                if line.starts_with("Connection lost") {
                    resets += 1;
                }
            }
        }
        assert_eq!(resets, 1);
    }
}
