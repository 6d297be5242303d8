// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The tunnel device as seen by the shaping channel.
//!
//! A device owns its peer set, MTUs, up/removed state and at most one session.
//! Packet paths call the `*_sent`/`*_received` hooks; the client reaches the
//! device through [`ControlChannel`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{DeviceConfig, ShapingConfig};
use crate::control::{ActivationRequest, ControlChannel};
use crate::error::{ActivationError, ShapeResult};
use crate::platform::ServerPlatform;
use crate::ratelimit::RateLimiter;
use crate::record::EventKind;
use crate::server::events::EventChannel;
use crate::server::padding::{self, PaddingOutcome};
use crate::server::peer::PeerSet;
use crate::server::session::ServerSession;
use crate::signal::Signal;
use crate::transport::PacketTransport;
use crate::types::{PeerKey, UserContext};

/// State shared with the action processor. Holds no session resources.
pub(crate) struct DataPlane {
    pub(crate) name: String,
    pub(crate) config: DeviceConfig,
    pub(crate) peers: PeerSet,
    pub(crate) transport: Arc<dyn PacketTransport>,
    pub(crate) events: EventChannel,
    pub(crate) replace_limiter: RateLimiter,
    up: AtomicBool,
}

impl DataPlane {
    pub(crate) fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// MTU for the address family of `endpoint`.
    pub(crate) fn mtu_for(&self, endpoint: &SocketAddr) -> u16 {
        match endpoint {
            SocketAddr::V4(_) => self.config.mtu4,
            SocketAddr::V6(_) => self.config.mtu6,
        }
    }
}

pub(crate) struct DeviceInner {
    pub(crate) plane: Arc<DataPlane>,
    pub(crate) platform: Arc<dyn ServerPlatform>,
    /// At most one armed session; also serializes activation and teardown.
    pub(crate) session: Mutex<Option<ServerSession>>,
    pub(crate) removed: Signal,
    removing: AtomicBool,
}

impl DeviceInner {
    pub(crate) fn is_removing(&self) -> bool {
        self.removing.load(Ordering::Acquire)
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        ServerSession::teardown(self);
    }
}

/// Handle to a tunnel device. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        config: &ShapingConfig,
        platform: Arc<dyn ServerPlatform>,
        transport: Arc<dyn PacketTransport>,
    ) -> Self {
        let plane = DataPlane {
            name: name.into(),
            config: config.device,
            peers: PeerSet::new(),
            transport,
            events: EventChannel::new(config.logging.drop_log_interval),
            replace_limiter: RateLimiter::new(config.logging.drop_log_interval),
            up: AtomicBool::new(true),
        };

        Self {
            inner: Arc::new(DeviceInner {
                plane: Arc::new(plane),
                platform,
                session: Mutex::new(None),
                removed: Signal::manual_reset(),
                removing: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.plane.name
    }

    pub(crate) fn plane(&self) -> &DataPlane {
        &self.inner.plane
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<DeviceInner> {
        &self.inner
    }

    #[cfg(test)]
    pub(crate) fn shared_plane(&self) -> Arc<DataPlane> {
        Arc::clone(&self.inner.plane)
    }

    pub fn peers(&self) -> &PeerSet {
        &self.inner.plane.peers
    }

    pub fn set_up(&self, up: bool) {
        self.inner.plane.up.store(up, Ordering::Release);
    }

    pub fn is_up(&self) -> bool {
        self.inner.plane.is_up()
    }

    /// Whether a session is currently armed.
    pub fn is_session_active(&self) -> bool {
        self.inner.plane.events.is_enabled()
    }

    /// Events pushed and dropped since the device was created.
    pub fn event_counts(&self) -> (u64, u64) {
        let events = &self.inner.plane.events;
        (events.emitted(), events.dropped())
    }

    /// Record an event for `peer`. Never blocks and never fails.
    pub fn emit(&self, peer: &PeerKey, kind: EventKind, byte_count: u32, user_context: UserContext) {
        self.inner
            .plane
            .events
            .emit(peer, kind, byte_count, user_context);
    }

    pub fn nonpadding_sent(&self, peer: &PeerKey, length: u32) {
        self.emit(peer, EventKind::NonpaddingSent, length, UserContext::NONE);
    }

    pub fn nonpadding_received(&self, peer: &PeerKey, length: u32) {
        self.emit(peer, EventKind::NonpaddingReceived, length, UserContext::NONE);
    }

    pub fn padding_received(&self, peer: &PeerKey, length: u32) {
        tracing::debug!(peer = %peer.short(), length = length, "Padding received");
        self.emit(peer, EventKind::PaddingReceived, length, UserContext::NONE);
    }

    /// Run the padding hook directly, as the action processor does.
    pub fn inject_padding(
        &self,
        peer: &PeerKey,
        byte_count: u16,
        replace: bool,
        user_context: UserContext,
    ) -> PaddingOutcome {
        padding::inject_padding(self.plane(), peer, byte_count, replace, user_context)
    }

    /// Validate and arm a session. All-or-nothing.
    pub fn activate_session(&self, request: &ActivationRequest) -> Result<(), ActivationError> {
        ServerSession::activate(&self.inner, request)
    }

    /// Tear down the armed session. Returns whether one existed.
    pub fn deactivate_session(&self) -> bool {
        ServerSession::teardown(&self.inner)
    }

    /// Mark the device removed, stop the action processor and free the session.
    pub fn remove(&self) {
        if self.inner.removing.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(device = %self.name(), "Removing device");
        self.inner.removed.set();
        ServerSession::teardown(&self.inner);
    }

    pub fn is_removed(&self) -> bool {
        self.inner.is_removing()
    }
}

impl ControlChannel for Device {
    fn activate(&self, request: &ActivationRequest) -> ShapeResult<()> {
        Ok(self.activate_session(request)?)
    }

    fn deactivate(&self) {
        self.deactivate_session();
    }

    fn is_removed(&self) -> bool {
        Device::is_removed(self)
    }
}
