//! Hub Serial Protocol
//!
//! Implements the line-delimited text/JSON protocol spoken by the hub device:
//! plaintext command strings out, a mix of plaintext banners and JSON frames in.

pub mod commands;
mod error;
mod frame;
pub mod ports;
mod transport;

pub use commands::HubCommand;
pub use error::HubError;
pub use frame::{EventReport, Frame, HubReport, SensorMap, SensorValue, StatusReport, Telemetry};
pub use ports::{list_ports, open_port, PortInfo};
pub use transport::{SerialTransport, TransportEvent};

/// Default baud rate for the hub serial link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Handshake banner prefix sent by the hub firmware (e.g. `FW_V1.2`)
pub const BANNER_PREFIX: &str = "FW_";

/// How long the scanner waits for a banner on each candidate port
pub const HANDSHAKE_TIMEOUT_MS: u64 = 1000;

/// Cadence of automatic port-scan cycles while disconnected
pub const SCAN_INTERVAL_MS: u64 = 2000;

/// Read timeout of the background reader; a timeout just re-enters the loop
pub const READ_POLL_MS: u64 = 50;

/// Quiet period after the last telemetry upsert before an upload fires
pub const UPLOAD_SETTLE_MS: u64 = 2000;
