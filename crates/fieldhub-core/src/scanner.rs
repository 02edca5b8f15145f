//! Port scanner
//!
//! Finds the hub by probing candidate serial ports: connect, send
//! `helloMaster`, wait up to one second for the engine to observe the `FW_`
//! banner. The wait is a timeout-bound await on the engine's
//! handshake-confirmed watch channel, so the scanner sleeps until the banner
//! lands instead of polling.
//!
//! One cycle runs at a time (the engine holds the single-flight guard) and
//! yields as soon as a connection appears by any other path.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

use crate::protocol::{
    list_ports, HubCommand, HubError, SerialTransport, TransportEvent, HANDSHAKE_TIMEOUT_MS,
};

/// Result of one scan cycle, reported back to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No serial ports on the system; transient, not an error
    NoPorts,
    /// A port answered with a banner within the timeout
    Connected {
        /// The winning port, to be persisted in configuration
        port: String,
        /// Handshake attempts made, the winner included
        attempts: usize,
    },
    /// Every port was probed without a banner
    NotFound,
    /// A connection appeared by another path; the cycle stepped aside
    Superseded,
}

/// Progress notes emitted while a cycle runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUpdate {
    /// A candidate port opened and the handshake went out
    Probing {
        /// Port being probed
        port: String,
    },
    /// The probed port gave no banner; the cycle moves to the next one
    ProbeFailed {
        /// Port that was given up
        port: String,
    },
    /// The cycle ended
    Finished(ScanOutcome),
}

/// One handshake attempt against one port. Split out as a trait so cycle
/// logic is testable without hardware; the engine wires in the transport.
#[async_trait]
pub(crate) trait HandshakeProber {
    /// Open the port, send the handshake, wait for confirmation. On `Err`
    /// the prober has already cleaned up the attempt.
    async fn probe(&mut self, port: &str) -> Result<(), HubError>;

    /// True if some other path already established a connection
    fn already_connected(&self) -> bool;
}

/// Candidate ports in scan order: the saved port first when it is present,
/// then the rest in enumeration order.
pub(crate) fn candidate_ports(saved_port: &str) -> Vec<String> {
    let names = list_ports().into_iter().map(|p| p.name).collect();
    prioritize(names, saved_port)
}

fn prioritize(mut names: Vec<String>, saved_port: &str) -> Vec<String> {
    if !saved_port.is_empty() {
        if let Some(pos) = names.iter().position(|n| n == saved_port) {
            let saved = names.remove(pos);
            names.insert(0, saved);
        }
    }
    names
}

/// Run one cycle over `ports`, reporting progress on `updates`.
pub(crate) async fn scan_cycle<P: HandshakeProber>(
    ports: Vec<String>,
    prober: &mut P,
    updates: &mpsc::UnboundedSender<ScanUpdate>,
) -> ScanOutcome {
    if ports.is_empty() {
        tracing::info!("scan: no serial ports found");
        return ScanOutcome::NoPorts;
    }

    let mut attempts = 0usize;
    for port in ports {
        if prober.already_connected() {
            return ScanOutcome::Superseded;
        }

        tracing::debug!(port = %port, "scan: probing");
        let _ = updates.send(ScanUpdate::Probing { port: port.clone() });
        attempts += 1;

        match prober.probe(&port).await {
            Ok(()) => {
                tracing::info!(port = %port, attempts, "scan: hub found");
                return ScanOutcome::Connected { port, attempts };
            }
            Err(e) => {
                tracing::debug!(port = %port, error = %e, "scan: attempt failed, next");
                let _ = updates.send(ScanUpdate::ProbeFailed { port });
            }
        }
    }

    tracing::info!("scan: device not found on any port");
    ScanOutcome::NotFound
}

/// Production prober: drives the shared transport and awaits the engine's
/// handshake-confirmed watch channel.
pub(crate) struct TransportProber {
    pub transport: SerialTransport,
    pub baud_rate: u32,
    pub confirmed: watch::Receiver<bool>,
    pub lines: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl HandshakeProber for TransportProber {
    async fn probe(&mut self, port: &str) -> Result<(), HubError> {
        self.transport
            .connect(port, self.baud_rate, self.lines.clone())?;

        // On failure send_line has already disconnected
        self.transport.send_line(&HubCommand::Hello.wire())?;

        let wait = self.confirmed.wait_for(|confirmed| *confirmed);
        match timeout(Duration::from_millis(HANDSHAKE_TIMEOUT_MS), wait).await {
            Ok(Ok(_)) => Ok(()),
            // Watch sender gone (engine shut down) or timeout: give the port up
            Ok(Err(_)) | Err(_) => {
                self.transport.disconnect();
                Err(HubError::HandshakeTimeout(HANDSHAKE_TIMEOUT_MS))
            }
        }
    }

    fn already_connected(&self) -> bool {
        *self.confirmed.borrow()
    }
}

/// Run a full scan cycle against real hardware and report the outcome.
pub(crate) async fn run(
    saved_port: String,
    mut prober: TransportProber,
    updates: mpsc::UnboundedSender<ScanUpdate>,
) {
    let ports = candidate_ports(&saved_port);
    let outcome = scan_cycle(ports, &mut prober, &updates).await;
    let _ = updates.send(ScanUpdate::Finished(outcome));
}
