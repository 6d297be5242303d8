// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Privileged side of the shaping channel.
//!
//! A [`Device`] streams events into the client's event ring from packet paths
//! and runs one action processor per armed session, which applies padding
//! actions to the device's peers.

mod device;
mod events;
mod padding;
mod peer;
mod processor;
mod session;

pub use device::Device;
pub use padding::PaddingOutcome;
pub use peer::{Peer, PeerSet};
