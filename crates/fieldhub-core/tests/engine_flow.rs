//! End-to-end engine tests: lines in through the transport channel, uploads
//! out through a test sink, with paused tokio time driving the debounce.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};

use fieldhub_core::config::HubConfig;
use fieldhub_core::engine::{EngineCommand, EngineHandle, HubEngine, UiEvent};
use fieldhub_core::protocol::{HubError, SensorValue, TransportEvent};
use fieldhub_core::session::SessionPhase;
use fieldhub_core::uploader::{TelemetrySink, UploadPayload};

struct ChannelSink(mpsc::UnboundedSender<UploadPayload>);

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn deliver(&self, _endpoint: &str, payload: &UploadPayload) -> Result<(), HubError> {
        let _ = self.0.send(payload.clone());
        Ok(())
    }
}

struct Harness {
    lines: mpsc::UnboundedSender<TransportEvent>,
    handle: EngineHandle,
    ui: mpsc::UnboundedReceiver<UiEvent>,
    payloads: mpsc::UnboundedReceiver<UploadPayload>,
}

fn start_engine() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut config = HubConfig::default();
    config.hub_id = "hub-flow".to_string();
    config.api_endpoint = "http://ingest.example/api/v1/data/ingest".to_string();
    config.auto_scan = false;

    let (payload_tx, payloads) = mpsc::unbounded_channel();
    let (engine, handle, ui) = HubEngine::with_sink(config, None, ChannelSink(payload_tx));
    let lines = engine.line_sender();
    tokio::spawn(engine.run());

    Harness {
        lines,
        handle,
        ui,
        payloads,
    }
}

fn send_line(harness: &Harness, line: &str) {
    harness
        .lines
        .send(TransportEvent::Line(line.to_string()))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn telemetry_burst_coalesces_into_one_upload() {
    let mut harness = start_engine();
    send_line(&harness, "FW_V1.2");

    for moisture in [10.0, 20.0, 30.0] {
        send_line(
            &harness,
            &format!(r#"{{"id":"soil1","sensors":{{"soil_moisture":{}}}}}"#, moisture),
        );
    }

    let payload = timeout(Duration::from_secs(10), harness.payloads.recv())
        .await
        .expect("one upload fires after the settle window")
        .unwrap();

    assert_eq!(payload.hub_id, "hub-flow");
    assert_eq!(payload.data.soil_nodes.len(), 1);
    assert_eq!(payload.data.soil_nodes[0].node_id, "soil1");
    // The last value of the burst wins
    assert_eq!(
        payload.data.soil_nodes[0].sensors.get("soil_moisture"),
        Some(&SensorValue::Number(30.0))
    );

    // No further upload from the earlier, superseded windows
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(harness.payloads.try_recv().is_err());

    harness.handle.command(EngineCommand::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn data_collection_finished_flushes_without_waiting() {
    let mut harness = start_engine();
    send_line(&harness, "FW_V1.2");
    send_line(&harness, r#"{"id":"soil1","sensors":{"soil_temperature":"23.4"}}"#);
    send_line(&harness, r#"{"event":"data_collection_finished"}"#);

    let before = Instant::now();
    let payload = timeout(Duration::from_secs(10), harness.payloads.recv())
        .await
        .expect("forced upload fires immediately")
        .unwrap();
    assert!(before.elapsed() < Duration::from_millis(2000));

    assert_eq!(
        payload.data.soil_nodes[0].sensors.get("soil_temperature"),
        Some(&SensorValue::Number(23.4))
    );

    // The cancelled debounce window must not produce a second upload
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(harness.payloads.try_recv().is_err());

    harness.handle.command(EngineCommand::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn malformed_line_does_not_stop_the_stream() {
    let mut harness = start_engine();
    send_line(&harness, "FW_V1.2");
    send_line(&harness, r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#);
    send_line(&harness, r#"{"id":"soil2","sensors":{"#);
    send_line(&harness, r#"[{"id":"soil1","type":"soil","status":"online"}]"#);

    // The list refresh after the bad line still lands: watch the snapshots
    let mut last_nodes = None;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match timeout(Duration::from_secs(1), harness.ui.recv()).await {
            Ok(Some(UiEvent::NodesChanged(nodes))) => last_nodes = Some(nodes),
            Ok(Some(_)) => {}
            _ => break,
        }
    }

    let nodes = last_nodes.expect("registry snapshots were emitted");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "soil1");

    harness.handle.command(EngineCommand::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn atmospheric_and_soil_split_in_payload() {
    let mut harness = start_engine();
    send_line(&harness, "FW_V1.2");
    send_line(&harness, r#"{"id":"soil-1","sensors":{"soil_moisture":41}}"#);
    send_line(
        &harness,
        r#"{"id":"atm-1","sensors":{"air_temperature":21.5,"wind_speed":"3.2"}}"#,
    );
    send_line(&harness, r#"{"event":"data_collection_finished"}"#);

    let payload = timeout(Duration::from_secs(10), harness.payloads.recv())
        .await
        .expect("upload fires")
        .unwrap();

    assert_eq!(payload.data.soil_nodes.len(), 1);
    let atm = payload.data.atmospheric_node.expect("atmospheric node present");
    assert_eq!(atm.node_id, "atm-1");
    assert_eq!(atm.sensors.get("wind_speed"), Some(&SensorValue::Number(3.2)));

    harness.handle.command(EngineCommand::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn upload_disabled_means_no_sink_calls() {
    let mut config = HubConfig::default();
    config.api_endpoint = "http://ingest.example/api".to_string();
    config.upload_enabled = false;
    config.auto_scan = false;

    let (payload_tx, mut payloads) = mpsc::unbounded_channel();
    let (engine, handle, _ui) = HubEngine::with_sink(config, None, ChannelSink(payload_tx));
    let lines = engine.line_sender();
    tokio::spawn(engine.run());

    lines
        .send(TransportEvent::Line("FW_V1.2".to_string()))
        .unwrap();
    lines
        .send(TransportEvent::Line(
            r#"{"id":"soil1","sensors":{"soil_moisture":40}}"#.to_string(),
        ))
        .unwrap();
    lines
        .send(TransportEvent::Line(
            r#"{"event":"data_collection_finished"}"#.to_string(),
        ))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(payloads.try_recv().is_err());

    handle.command(EngineCommand::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn transport_loss_resets_session_and_scan_recovers_state() {
    let mut harness = start_engine();
    send_line(&harness, "FW_V1.2");
    send_line(&harness, r#"{"status":"register_mode_active"}"#);

    harness
        .lines
        .send(TransportEvent::Closed {
            reason: "read error: device unplugged".to_string(),
        })
        .unwrap();

    // Expect a disconnect session event and the registration flag dropping
    let mut saw_disconnect = false;
    let mut registration_states = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match timeout(Duration::from_secs(1), harness.ui.recv()).await {
            Ok(Some(UiEvent::SessionChanged { phase, .. })) => {
                if phase == SessionPhase::Disconnected {
                    saw_disconnect = true;
                }
            }
            Ok(Some(UiEvent::RegistrationChanged(v))) => registration_states.push(v),
            Ok(Some(_)) => {}
            _ => break,
        }
    }

    assert!(saw_disconnect);
    assert_eq!(registration_states, vec![true]);

    harness.handle.command(EngineCommand::Shutdown);
}
