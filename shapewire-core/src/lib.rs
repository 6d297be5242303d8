//! Shapewire Core Library
//!
//! Telemetry and control channel for tunnel traffic shaping. A privileged
//! device streams packet events to an unprivileged controller through one
//! shared-memory ring and receives padding actions back through another.

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod platform;
pub mod ratelimit;
pub mod record;
pub mod server;
pub mod shm;
pub mod signal;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use client::Adapter;
pub use config::{ConfigLoader, DeviceConfig, LoggingConfig, SessionConfig, ShapingConfig};
pub use control::{ActivationRequest, ControlChannel};
pub use error::{
    ActivationError, HardValidationError, RingError, ShapeError, ShapeResult, StatusCode,
};
pub use platform::{ClientPlatform, LocalPlatform, ResourceSnapshot, ServerPlatform};
pub use record::{Action, ActionKind, ActionRecord, EventKind, EventRecord};
pub use server::{Device, PaddingOutcome, Peer, PeerSet};
pub use signal::{Signal, SignalHandle, SignalRights};
pub use transport::{DrainTransport, PacketTransport, StagedPacket};
pub use types::{Capacity, PeerKey, UserContext};
