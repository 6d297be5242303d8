// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Byte layout of the rings inside the combined shared region.
//!
//! ```text
//! +--------------------+  0
//! | event header       |  read:u32, write:u32
//! | event slots [N]    |
//! +--------------------+  action_offset (64-byte aligned)
//! | action header      |
//! | action slots [M]   |
//! +--------------------+  total
//! ```

use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use crate::error::RingError;
use crate::record::{ActionRecord, EventRecord};
use crate::shm::ring_buffer::RingHeader;
use crate::types::Capacity;

/// Alignment of each ring inside the combined region.
pub const RING_ALIGNMENT: usize = 64;

/// Layout of one ring of `T`.
#[derive(Debug)]
pub struct RingLayout<T> {
    capacity: Capacity,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RingLayout<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RingLayout<T> {}

impl<T> RingLayout<T> {
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        Ok(Self {
            capacity: Capacity::of::<T>(capacity)?,
            _marker: PhantomData,
        })
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Offset of the first slot from the ring start.
    pub const fn slots_offset() -> usize {
        align_up(size_of::<RingHeader>(), align_of::<T>())
    }

    /// Required alignment of the ring start.
    pub const fn alignment() -> usize {
        let t = align_of::<T>();
        let h = align_of::<RingHeader>();
        if t > h {
            t
        } else {
            h
        }
    }

    /// Byte length of the slot array. Fits in `u32` by construction.
    pub fn slots_len(&self) -> usize {
        self.capacity.as_usize() * size_of::<T>()
    }

    /// Total byte length of header plus slots.
    pub fn total_len(&self) -> usize {
        Self::slots_offset() + self.slots_len()
    }
}

/// Placement of both rings inside one contiguous allocation.
#[derive(Debug, Clone, Copy)]
pub struct SessionLayout {
    pub event: RingLayout<EventRecord>,
    pub action: RingLayout<ActionRecord>,
    pub action_offset: usize,
    pub total_len: usize,
}

impl SessionLayout {
    pub fn new(event_capacity: usize, action_capacity: usize) -> Result<Self, RingError> {
        let event = RingLayout::<EventRecord>::new(event_capacity)?;
        let action = RingLayout::<ActionRecord>::new(action_capacity)?;
        let action_offset = align_up(event.total_len(), RING_ALIGNMENT);
        Ok(Self {
            event,
            action,
            action_offset,
            total_len: action_offset + action.total_len(),
        })
    }
}

/// Round `value` up to a power-of-two `alignment`.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
