//! Hub session state machine
//!
//! Tracks the connection lifecycle (`Disconnected → Scanning → Handshaking →
//! Connected`) and the orthogonal registration-mode flag. Registration
//! changes are tagged by origin: a local intent sends a command to the hub
//! and waits for confirmation, a device confirmation applies the flag and
//! never sends — the two must stay distinguishable or the command echoes the
//! confirmation in a feedback loop.

use serde::Serialize;

use crate::protocol::HubCommand;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    /// No connection, no scan in flight
    Disconnected,
    /// A scan cycle is enumerating candidate ports
    Scanning,
    /// A candidate port is open and `helloMaster` has been sent
    Handshaking,
    /// Banner received; the hub link is live
    Connected,
}

/// Origin-tagged registration-mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationChange {
    /// The user asked for the mode; a command must go to the hub, and the
    /// flag flips only once the hub confirms
    LocalIntent(bool),
    /// The hub reported the mode via a status/event frame; apply the flag,
    /// never re-send a command
    Confirmed(bool),
}

/// State of the single hub connection. Reset, not destroyed, on disconnect.
#[derive(Debug, Clone)]
pub struct HubSession {
    /// Port the session is (or was last) attached to; empty before the first
    /// successful scan
    pub port: String,
    /// Baud rate of the hub link
    pub baud_rate: u32,
    /// Firmware banner text, "Unknown" until a banner arrives
    pub firmware_version: String,
    phase: SessionPhase,
    registration_mode: bool,
}

impl HubSession {
    /// Fresh disconnected session
    pub fn new(baud_rate: u32) -> Self {
        Self {
            port: String::new(),
            baud_rate,
            firmware_version: "Unknown".to_string(),
            phase: SessionPhase::Disconnected,
            registration_mode: false,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True while the hub link is live
    pub fn connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    /// True while the hub is in registration (pairing) mode
    pub fn registration_mode(&self) -> bool {
        self.registration_mode
    }

    /// A scan cycle started
    pub fn begin_scan(&mut self) {
        if self.phase == SessionPhase::Connected {
            tracing::warn!("scan started while connected; ignoring");
            return;
        }
        self.phase = SessionPhase::Scanning;
    }

    /// A candidate port opened and the handshake went out
    pub fn begin_handshake(&mut self, port: &str) {
        if self.phase == SessionPhase::Connected {
            return;
        }
        self.port = port.to_string();
        self.phase = SessionPhase::Handshaking;
    }

    /// A candidate port timed out; the scan moves on
    pub fn handshake_failed(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::Scanning;
        }
    }

    /// Banner observed: the link is live. Returns false if the session was
    /// already connected (a session connects at most once per scan cycle).
    pub fn mark_connected(&mut self, firmware: &str) -> bool {
        self.firmware_version = firmware.to_string();
        if self.phase == SessionPhase::Connected {
            return false;
        }
        self.phase = SessionPhase::Connected;
        true
    }

    /// Reset on disconnect: back to Disconnected, registration mode off,
    /// firmware forgotten. The last port is kept for the next scan to try
    /// first.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Disconnected;
        self.registration_mode = false;
        self.firmware_version = "Unknown".to_string();
    }

    /// Apply a registration-mode change. Returns the command to send for a
    /// local intent (the flag itself only flips on the confirmation path),
    /// and whether the flag value changed.
    pub fn apply_registration(&mut self, change: RegistrationChange) -> (Option<HubCommand>, bool) {
        match change {
            RegistrationChange::LocalIntent(enable) => {
                if !self.connected() {
                    tracing::warn!("registration request while not connected; dropped");
                    return (None, false);
                }
                let cmd = if enable {
                    HubCommand::RegisterNewNode
                } else {
                    HubCommand::CancelRegister
                };
                (Some(cmd), false)
            }
            RegistrationChange::Confirmed(active) => {
                let changed = self.registration_mode != active;
                self.registration_mode = active;
                (None, changed)
            }
        }
    }
}
