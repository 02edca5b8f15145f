//! Serial transport
//!
//! Owns the one serial connection to the hub. A dedicated OS thread runs the
//! blocking read loop and forwards complete lines over a channel in arrival
//! order; it never touches shared application state. Writes go through
//! [`SerialTransport::send_line`] and auto-disconnect on failure, so a pulled
//! cable tears the session down exactly once no matter which side notices
//! first.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serialport::SerialPort;
use tokio::sync::mpsc;

use super::{open_port, HubError};

/// What the reader hands to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound line, terminator stripped
    Line(String),
    /// The connection died from an IO failure (not an explicit disconnect)
    Closed {
        /// Human-readable failure description
        reason: String,
    },
}

struct TransportInner {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    connected: AtomicBool,
    // Bumped on every connect/disconnect; a reader that observes a stale
    // generation exits silently instead of tearing down the next connection.
    generation: AtomicU64,
}

/// Handle to the hub serial link. Cheap to clone; all clones share the one
/// underlying connection.
#[derive(Clone)]
pub struct SerialTransport {
    inner: Arc<TransportInner>,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    /// New transport, disconnected
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                port: Mutex::new(None),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// True while a connection is open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Open `port_name` and start the background reader. Any prior connection
    /// is torn down first. On failure the transport is left fully
    /// disconnected.
    pub fn connect(
        &self,
        port_name: &str,
        baud_rate: u32,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), HubError> {
        self.disconnect();

        let port = open_port(port_name, baud_rate)?;
        let generation = {
            let mut guard = lock_port(&self.inner);
            *guard = Some(port);
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.inner.connected.store(true, Ordering::SeqCst);

        tracing::info!(port = port_name, baud = baud_rate, "serial port opened");

        let inner = Arc::clone(&self.inner);
        let port_label = port_name.to_string();
        std::thread::Builder::new()
            .name(format!("hub-reader-{}", port_label))
            .spawn(move || read_loop(inner, generation, events))
            .map_err(|e| {
                self.disconnect();
                HubError::TransportIo(format!("failed to spawn reader thread: {}", e))
            })?;

        Ok(())
    }

    /// Tear the connection down. Idempotent: safe when already disconnected
    /// and safe concurrently with an in-flight read. Never raises.
    pub fn disconnect(&self) {
        // Invalidate any reader first so it exits silently
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        let dropped = lock_port(&self.inner).take();
        if was_connected && dropped.is_some() {
            tracing::info!("serial port closed");
        }
    }

    /// Write `text` plus a line terminator. A write failure disconnects the
    /// transport before the error is returned.
    pub fn send_line(&self, text: &str) -> Result<(), HubError> {
        let result = {
            let mut guard = lock_port(&self.inner);
            let Some(port) = guard.as_mut() else {
                return Err(HubError::NotConnected);
            };
            port.write_all(text.as_bytes())
                .and_then(|_| port.write_all(b"\n"))
                .and_then(|_| port.flush())
        };

        match result {
            Ok(()) => {
                tracing::debug!(command = text, "tx");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(command = text, error = %e, "serial write failed, disconnecting");
                self.disconnect();
                Err(HubError::TransportIo(e.to_string()))
            }
        }
    }
}

fn lock_port(
    inner: &TransportInner,
) -> std::sync::MutexGuard<'_, Option<Box<dyn SerialPort>>> {
    // The mutex only guards short reads/writes; a poisoned lock means a
    // reader panicked mid-IO and the port state is still structurally sound.
    inner.port.lock().unwrap_or_else(|e| e.into_inner())
}

/// Blocking read loop. Reads chunks under the port mutex with a short
/// timeout (bounded writer latency), accumulates bytes, and forwards each
/// complete line exactly once. A read timeout re-enters the loop; any other
/// IO error tears the connection down and reports `Closed`.
fn read_loop(
    inner: Arc<TransportInner>,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut buf = [0u8; 256];
    let mut acc: Vec<u8> = Vec::with_capacity(256);

    loop {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let read_result = {
            let mut guard = lock_port(&inner);
            let Some(port) = guard.as_mut() else { return };
            port.read(&mut buf)
        };

        match read_result {
            Ok(0) => {
                // EOF: device went away
                teardown(&inner, generation, &events, "serial stream ended");
                return;
            }
            Ok(n) => {
                for line in split_lines(&mut acc, &buf[..n]) {
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    if events.send(TransportEvent::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Expected; the timeout is how cancellation gets observed
            }
            Err(e) => {
                teardown(&inner, generation, &events, &format!("read error: {}", e));
                return;
            }
        }
    }
}

fn teardown(
    inner: &TransportInner,
    generation: u64,
    events: &mpsc::UnboundedSender<TransportEvent>,
    reason: &str,
) {
    // Only the reader of the current connection may tear it down; a stale
    // reader racing an explicit disconnect stays silent.
    if inner
        .generation
        .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        inner.connected.store(false, Ordering::SeqCst);
        lock_port(inner).take();
        tracing::warn!(reason, "serial connection lost");
        let _ = events.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

/// Append `chunk` to the accumulator and drain every complete line from it.
/// Lines are split on `\n`; a trailing `\r` is stripped. Empty lines are
/// dropped here so the dispatcher never sees them.
fn split_lines(acc: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    acc.extend_from_slice(chunk);

    let mut lines = Vec::new();
    while let Some(pos) = acc.iter().position(|&b| b == b'\n') {
        let mut raw: Vec<u8> = acc.drain(..=pos).collect();
        raw.pop(); // the \n itself
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}
