// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Synchronous control calls from the client to the server.

use crate::error::ShapeResult;
use crate::signal::SignalHandle;

/// Everything the server needs to arm a session.
///
/// Addresses point into one region the client allocated; capacities are in
/// elements.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub event_capacity: usize,
    pub event_ring: usize,
    pub event_signal: SignalHandle,
    pub action_capacity: usize,
    pub action_ring: usize,
    pub action_signal: SignalHandle,
}

/// Control surface a device exposes to its client.
pub trait ControlChannel: Send + Sync {
    /// Arm a session. Rejected if one is already enabled.
    fn activate(&self, request: &ActivationRequest) -> ShapeResult<()>;

    /// Tear down the active session, if any.
    fn deactivate(&self);

    /// Whether the device has been removed.
    fn is_removed(&self) -> bool;
}
