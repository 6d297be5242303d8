// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for shapewire.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Every error maps to one caller-visible [`StatusCode`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the shaping channel.
#[derive(Debug, Error)]
pub enum ShapeError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Activation failed: {0}")]
    Activation(#[from] ActivationError),

    #[error("No active session on this adapter")]
    NoSession,

    #[error("Adapter was removed")]
    AdapterRemoved,

    // =========================================================================
    // Steady-State Ring Statuses
    // =========================================================================
    /// The event ring was empty. A normal condition, not a failure.
    #[error("No more items in the event ring")]
    NoMoreItems,

    /// The action ring was full. The caller owns the retry policy.
    #[error("Action ring is full")]
    InsufficientBuffer,

    #[error("Ring error: {0}")]
    Ring(#[from] RingError),

    // =========================================================================
    // Shared Memory Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ShapeError {
    /// Status code surfaced to callers for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::HardValidation(_)
            | Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::NoSession => StatusCode::InvalidParameter,
            Self::Activation(err) => err.status(),
            Self::AdapterRemoved => StatusCode::AdapterRemoved,
            Self::NoMoreItems => StatusCode::NoMoreItems,
            Self::InsufficientBuffer => StatusCode::InsufficientBuffer,
            Self::Ring(RingError::Full) => StatusCode::InsufficientBuffer,
            Self::Ring(_) => StatusCode::InvalidParameter,
            Self::SharedMemory(_) | Self::Io { .. } => StatusCode::InsufficientResources,
        }
    }
}

/// Caller-visible status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Zero or overflowing capacities, missing device or session.
    InvalidParameter,
    /// Allocation or signal-object failure.
    InsufficientResources,
    /// Event ring empty.
    NoMoreItems,
    /// Action ring full.
    InsufficientBuffer,
    /// Client-supplied memory not accessible or pinnable.
    InvalidUserBuffer,
    /// Device torn down mid-call.
    AdapterRemoved,
}

impl StatusCode {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid-parameter",
            Self::InsufficientResources => "insufficient-resources",
            Self::NoMoreItems => "no-more-items",
            Self::InsufficientBuffer => "insufficient-buffer",
            Self::InvalidUserBuffer => "invalid-user-buffer",
            Self::AdapterRemoved => "adapter-removed",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ring-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("Ring buffer full")]
    Full,

    #[error("Ring capacity must be non-zero")]
    InvalidCapacity,

    #[error("Ring of {capacity} elements x {element_size} bytes exceeds a 32-bit byte count")]
    TooLarge {
        capacity: usize,
        element_size: usize,
    },
}

/// Activation errors, one variant per failure step.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("{ring} ring capacity must be non-zero")]
    InvalidCapacity { ring: &'static str },

    #[error("{ring} ring is too large: {source}")]
    RingTooLarge {
        ring: &'static str,
        #[source]
        source: RingError,
    },

    #[error("A session is already active on this device")]
    AlreadyActive,

    #[error("Device is being removed")]
    DeviceRemoved,

    #[error("{ring} ring buffer at {address:#x} ({len} bytes) cannot be pinned")]
    InvalidUserBuffer {
        ring: &'static str,
        address: usize,
        len: usize,
    },

    #[error("Failed to reference {ring} signal: {reason}")]
    SignalReference { ring: &'static str, reason: String },

    #[error("Failed to create {ring} signal: {reason}")]
    SignalCreate { ring: &'static str, reason: String },

    #[error("Failed to allocate ring region of {len} bytes: {reason}")]
    RegionAlloc { len: usize, reason: String },

    #[error("Failed to spawn action processor: {source}")]
    TaskSpawn {
        #[source]
        source: std::io::Error,
    },
}

impl ActivationError {
    /// Map a capacity check failure for `ring`.
    pub fn capacity(ring: &'static str, source: RingError) -> Self {
        match source {
            RingError::InvalidCapacity => Self::InvalidCapacity { ring },
            source => Self::RingTooLarge { ring, source },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCapacity { .. } | Self::RingTooLarge { .. } | Self::AlreadyActive => {
                StatusCode::InvalidParameter
            }
            Self::DeviceRemoved => StatusCode::AdapterRemoved,
            Self::InvalidUserBuffer { .. } => StatusCode::InvalidUserBuffer,
            Self::SignalReference { .. }
            | Self::SignalCreate { .. }
            | Self::RegionAlloc { .. }
            | Self::TaskSpawn { .. } => StatusCode::InsufficientResources,
        }
    }
}

/// Hard validation errors stop a configuration from being used at all.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid peer key: {reason}")]
    InvalidPeerKey { reason: String },
}

/// Shared memory errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },
}

/// Result type alias using ShapeError.
pub type ShapeResult<T> = Result<T, ShapeError>;
