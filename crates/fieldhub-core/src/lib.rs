//! # FieldHub Core Library
//!
//! Core functionality for the FieldHub sensor fleet manager.
//!
//! This library provides:
//! - Serial transport to the hub device with automatic port discovery
//! - The hub line/JSON protocol (banners, node lists, status/event frames)
//! - An in-memory registry of sensor nodes and their latest telemetry
//! - Debounced telemetry uploads to a remote ingestion endpoint
//!
//! The engine runs as a single task; a UI layer drives it through
//! [`engine::EngineHandle`] and consumes [`engine::UiEvent`]s:
//!
//! ```rust,ignore
//! use fieldhub_core::{config::HubConfig, engine::HubEngine};
//!
//! let path = HubConfig::default_path().unwrap();
//! let config = HubConfig::load(&path);
//! let (engine, handle, mut ui_events) = HubEngine::new(config, Some(path));
//! tokio::spawn(engine.run());
//! while let Some(event) = ui_events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod uploader;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HubConfig;
    pub use crate::engine::{EngineCommand, EngineHandle, HubEngine, UiEvent};
    pub use crate::protocol::{
        Frame, HubCommand, HubError, SensorValue, SerialTransport, TransportEvent,
    };
    pub use crate::registry::{Node, NodeKind, NodeRegistry, NodeStatus};
    pub use crate::session::{HubSession, RegistrationChange, SessionPhase};
    pub use crate::uploader::{HttpSink, TelemetrySink, UploadPayload};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
