// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Outbound packet buffers and the transport that sends them.
//!
//! Packets are staged on a peer's queue as a transport data header followed by
//! the plaintext payload. Synthetic padding payloads start with a 4-byte
//! padding header: `{ tag: 0xFF, reserved: 0, total_length: u16 BE }`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::server::Peer;

/// Bytes reserved in front of every payload for the transport data header.
pub const DATA_HEADER_LEN: usize = 16;

/// First payload byte of a synthetic padding packet.
pub const PADDING_TAG: u8 = 0xFF;

/// Length of the padding header, also the smallest padding request accepted.
pub const PADDING_HEADER_LEN: usize = 4;

/// A packet buffer waiting on a peer's staging queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPacket {
    data: Vec<u8>,
}

impl StagedPacket {
    /// Wrap an existing payload as a regular data packet.
    pub fn data_packet(payload: &[u8]) -> Self {
        let mut data = vec![0u8; DATA_HEADER_LEN + payload.len()];
        data[DATA_HEADER_LEN..].copy_from_slice(payload);
        Self { data }
    }

    /// Zeroed buffer with room for `payload_len` payload bytes, or `None` if
    /// the allocation fails.
    pub fn try_zeroed(payload_len: usize) -> Option<Self> {
        let len = DATA_HEADER_LEN.checked_add(payload_len)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.resize(len, 0);
        Some(Self { data })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[DATA_HEADER_LEN..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[DATA_HEADER_LEN..]
    }

    /// Total buffer length including the data header.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write a padding header declaring `total_length`.
    pub fn write_padding_header(&mut self, total_length: u16) {
        let payload = self.payload_mut();
        if payload.len() < PADDING_HEADER_LEN {
            return;
        }
        payload[0] = PADDING_TAG;
        payload[1] = 0;
        payload[2..4].copy_from_slice(&total_length.to_be_bytes());
    }

    /// Declared length if this is a synthetic padding packet.
    pub fn padding_length(&self) -> Option<u16> {
        let payload = self.payload();
        if payload.len() < PADDING_HEADER_LEN || payload[0] != PADDING_TAG {
            return None;
        }
        Some(u16::from_be_bytes([payload[2], payload[3]]))
    }
}

/// The data plane's packet transport.
pub trait PacketTransport: Send + Sync {
    /// Allocate a zeroed packet with `payload_len` payload bytes.
    fn allocate(&self, payload_len: usize) -> Option<StagedPacket>;

    /// Encrypt and transmit whatever is staged for `peer`.
    fn send_staged(&self, peer: &Peer);
}

/// Transport that drains staging queues and only counts what it sends.
#[derive(Debug, Default)]
pub struct DrainTransport {
    packets: AtomicU64,
    padding_packets: AtomicU64,
    bytes: AtomicU64,
}

impl DrainTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn padding_sent(&self) -> u64 {
        self.padding_packets.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl PacketTransport for DrainTransport {
    fn allocate(&self, payload_len: usize) -> Option<StagedPacket> {
        StagedPacket::try_zeroed(payload_len)
    }

    fn send_staged(&self, peer: &Peer) {
        for packet in peer.take_staged() {
            self.packets.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
            if packet.padding_length().is_some() {
                self.padding_packets.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
