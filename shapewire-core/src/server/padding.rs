// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Padding injection hook.

use crate::record::EventKind;
use crate::server::device::DataPlane;
use crate::transport::PADDING_HEADER_LEN;
use crate::types::{PeerKey, UserContext};

/// What the hook did with one inject-padding action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingOutcome {
    /// A synthetic packet of `wire_len` payload bytes was staged and sent.
    Injected { wire_len: u16 },
    /// An equal-sized padding packet was already queued.
    Replaced,
    DeviceDown,
    UnknownPeer,
    /// The peer has no current endpoint.
    NoEndpoint,
    /// The requested length is below the padding header or above `mtu`.
    OutOfRange { mtu: u16 },
    AllocationFailed,
}

impl PaddingOutcome {
    /// Whether a `PaddingSent` event was emitted.
    pub fn emitted(&self) -> bool {
        matches!(self, Self::Injected { .. } | Self::Replaced)
    }
}

pub(crate) fn inject_padding(
    plane: &DataPlane,
    key: &PeerKey,
    byte_count: u16,
    replace: bool,
    user_context: UserContext,
) -> PaddingOutcome {
    if !plane.is_up() {
        return PaddingOutcome::DeviceDown;
    }

    let Some(peer) = plane.peers.get(key) else {
        return PaddingOutcome::UnknownPeer;
    };
    let Some(endpoint) = peer.endpoint() else {
        return PaddingOutcome::NoEndpoint;
    };

    let mtu = plane.mtu_for(&endpoint);
    if usize::from(byte_count) < PADDING_HEADER_LEN || byte_count > mtu {
        return PaddingOutcome::OutOfRange { mtu };
    }

    if replace && peer.has_padding_queued(byte_count) {
        if let Some(suppressed) = plane.replace_limiter.check() {
            tracing::debug!(
                peer = %key.short(),
                length = byte_count,
                suppressed = suppressed,
                "Padding already queued, not injecting"
            );
        }
        plane
            .events
            .emit(key, EventKind::PaddingSent, u32::from(byte_count), user_context);
        return PaddingOutcome::Replaced;
    }

    let wire_len = if plane.config.constant_packet_size {
        mtu
    } else {
        byte_count
    };

    let Some(mut packet) = plane.transport.allocate(usize::from(wire_len)) else {
        tracing::warn!(
            device = %plane.name,
            peer = %key.short(),
            length = wire_len,
            "Dropping padding packet, allocation failed"
        );
        return PaddingOutcome::AllocationFailed;
    };
    packet.write_padding_header(byte_count);

    peer.stage(packet);
    plane
        .events
        .emit(key, EventKind::PaddingSent, u32::from(byte_count), user_context);
    tracing::debug!(peer = %key.short(), length = byte_count, wire_len = wire_len, "Padding sent");
    plane.transport.send_staged(&peer);

    PaddingOutcome::Injected { wire_len }
}
