// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fixed-size records carried by the event and action rings.
//!
//! Records live in memory writable by both sides, so every field is a plain
//! integer or byte array: any bit pattern is a valid record. Kinds are kept
//! as raw `u32` and decoded with `TryFrom`, unknown values are reported to the
//! caller instead of being trusted.

use crate::shm::RingElement;
use crate::types::{PeerKey, UserContext, PEER_KEY_LEN};

/// Kind of an observed packet.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NonpaddingSent = 0,
    NonpaddingReceived = 1,
    PaddingSent = 2,
    PaddingReceived = 3,
}

impl EventKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NonpaddingSent => "nonpadding-sent",
            Self::NonpaddingReceived => "nonpadding-received",
            Self::PaddingSent => "padding-sent",
            Self::PaddingReceived => "padding-received",
        }
    }
}

impl TryFrom<u32> for EventKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NonpaddingSent),
            1 => Ok(Self::NonpaddingReceived),
            2 => Ok(Self::PaddingSent),
            3 => Ok(Self::PaddingReceived),
            other => Err(other),
        }
    }
}

/// Kind of a controller command.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    InjectPadding = 0,
}

impl TryFrom<u32> for ActionKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::InjectPadding),
            other => Err(other),
        }
    }
}

/// Telemetry record for one transmitted or received packet.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub peer: [u8; PEER_KEY_LEN],
    pub kind: u32,
    /// Wire byte count, truncated to 16 bits.
    pub byte_count: u16,
    pub user_context: usize,
}

impl EventRecord {
    /// Build a record. Byte counts above `u16::MAX` wrap.
    pub fn new(peer: &PeerKey, kind: EventKind, byte_count: u32, user_context: UserContext) -> Self {
        Self {
            peer: *peer.as_bytes(),
            kind: kind as u32,
            byte_count: byte_count as u16,
            user_context: user_context.0,
        }
    }

    pub fn peer(&self) -> PeerKey {
        PeerKey::new(self.peer)
    }

    pub fn kind(&self) -> Result<EventKind, u32> {
        EventKind::try_from(self.kind)
    }

    pub fn user_context(&self) -> UserContext {
        UserContext(self.user_context)
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self {
            peer: [0; PEER_KEY_LEN],
            kind: EventKind::NonpaddingSent as u32,
            byte_count: 0,
            user_context: 0,
        }
    }
}

/// Payload of an inject-padding command.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingPayload {
    pub byte_count: u16,
    /// Non-zero means "replace": skip injection if an equal-sized padding packet is queued.
    pub replace: u8,
}

/// Controller command record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRecord {
    pub peer: [u8; PEER_KEY_LEN],
    pub kind: u32,
    pub padding: PaddingPayload,
    /// Echoed into every event this action triggers.
    pub user_context: usize,
}

impl ActionRecord {
    pub fn inject_padding(
        peer: &PeerKey,
        byte_count: u16,
        replace: bool,
        user_context: UserContext,
    ) -> Self {
        Self {
            peer: *peer.as_bytes(),
            kind: ActionKind::InjectPadding as u32,
            padding: PaddingPayload {
                byte_count,
                replace: replace as u8,
            },
            user_context: user_context.0,
        }
    }

    /// Decode into a typed action, or return the unrecognized raw kind.
    pub fn decode(&self) -> Result<Action, u32> {
        match ActionKind::try_from(self.kind)? {
            ActionKind::InjectPadding => Ok(Action::InjectPadding {
                peer: PeerKey::new(self.peer),
                byte_count: self.padding.byte_count,
                replace: self.padding.replace != 0,
                user_context: UserContext(self.user_context),
            }),
        }
    }
}

/// Decoded controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    InjectPadding {
        peer: PeerKey,
        byte_count: u16,
        replace: bool,
        user_context: UserContext,
    },
}

// SAFETY: both records are `repr(C)` aggregates of integers and byte arrays,
// so every bit pattern written by the other side is a valid value.
unsafe impl RingElement for EventRecord {}
unsafe impl RingElement for ActionRecord {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_count_truncates_to_16_bits() {
        let key = PeerKey::new([1; PEER_KEY_LEN]);
        let record = EventRecord::new(&key, EventKind::NonpaddingSent, 70_000, UserContext::NONE);
        assert_eq!(record.byte_count, (70_000u32 % 65_536) as u16);
        assert_eq!(record.byte_count, 4464);
    }

    #[test]
    fn test_event_kind_conversion() {
        assert_eq!(EventKind::try_from(2), Ok(EventKind::PaddingSent));
        assert_eq!(EventKind::try_from(9), Err(9));
    }

    #[test]
    fn test_action_decode() {
        let key = PeerKey::new([7; PEER_KEY_LEN]);
        let record = ActionRecord::inject_padding(&key, 120, true, UserContext(42));
        assert_eq!(
            record.decode(),
            Ok(Action::InjectPadding {
                peer: key,
                byte_count: 120,
                replace: true,
                user_context: UserContext(42),
            })
        );

        let mut unknown = record;
        unknown.kind = 77;
        assert_eq!(unknown.decode(), Err(77));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<EventRecord>(), 48);
        assert_eq!(std::mem::size_of::<ActionRecord>(), 48);
    }
}
