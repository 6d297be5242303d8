// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! One contiguous mapping holds both rings. Offsets in each ring header are
//! the only synchronization between the two sides.

mod layout;
mod region;
mod ring_buffer;

pub use layout::{align_up, RingLayout, SessionLayout, RING_ALIGNMENT};
pub use region::SharedMemoryRegion;
pub use ring_buffer::{RingBuffer, RingConsumer, RingElement, RingHeader, RingProducer};
