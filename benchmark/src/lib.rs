// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shapewire benchmark fixtures.
//!
//! - **Ring buffer**: push/drain throughput of one ring at several capacities
//! - **Event path**: `emit` through an armed device into a client adapter

use std::ptr::NonNull;
use std::sync::Arc;

use shapewire_core::error::SharedMemoryError;
use shapewire_core::shm::{RingBuffer, RingElement, RingLayout, SharedMemoryRegion};
use shapewire_core::{
    Adapter, Device, DrainTransport, LocalPlatform, Peer, PeerKey, ShapeResult, ShapingConfig,
};

/// One ring in its own anonymous mapping, with producer and consumer views.
pub struct RingFixture<T: RingElement> {
    pub producer: RingBuffer<T>,
    pub consumer: RingBuffer<T>,
    _region: SharedMemoryRegion,
}

impl<T: RingElement> RingFixture<T> {
    pub fn new(capacity: usize) -> ShapeResult<Self> {
        let layout = RingLayout::<T>::new(capacity)?;
        let region = SharedMemoryRegion::anonymous(layout.total_len())?;
        let base = NonNull::new(region.as_ptr()).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "null mapping".to_string(),
        })?;
        // SAFETY: the mapping is page aligned, sized by the layout and owned
        // by the fixture, which drops the views first.
        let (producer, consumer) = unsafe {
            (
                RingBuffer::from_raw(base, layout.capacity()),
                RingBuffer::from_raw(base, layout.capacity()),
            )
        };
        Ok(Self {
            producer,
            consumer,
            _region: region,
        })
    }
}

/// An armed device with one peer and its client adapter.
pub struct SessionFixture {
    pub device: Device,
    pub adapter: Adapter,
    pub peer: PeerKey,
}

impl SessionFixture {
    pub fn new(event_capacity: usize, action_capacity: usize) -> ShapeResult<Self> {
        let platform = LocalPlatform::new();
        let device = Device::new(
            "bench0",
            &ShapingConfig::default(),
            Arc::new(platform.clone()),
            Arc::new(DrainTransport::new()),
        );
        let peer = PeerKey::new([0x42; 32]);
        device
            .peers()
            .insert(Peer::with_endpoint(peer, ([192, 0, 2, 1], 51820).into()));

        let adapter = Adapter::new(Arc::new(device.clone()), Arc::new(platform));
        adapter.activate(event_capacity, action_capacity)?;
        Ok(Self {
            device,
            adapter,
            peer,
        })
    }
}
