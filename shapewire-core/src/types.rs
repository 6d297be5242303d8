// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! All types validate their invariants at creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, RingError};

/// Length of a peer public key in bytes.
pub const PEER_KEY_LEN: usize = 32;

/// Fixed-length public-key identifier of a tunnel peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerKey([u8; PEER_KEY_LEN]);

impl PeerKey {
    pub const fn new(bytes: [u8; PEER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_KEY_LEN] {
        &self.0
    }

    /// Short form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({}..)", self.short())
    }
}

impl FromStr for PeerKey {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; PEER_KEY_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| HardValidationError::InvalidPeerKey {
            reason: format!("expected {} hex-encoded bytes: {}", PEER_KEY_LEN, e),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PeerKey {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerKey> for String {
    fn from(key: PeerKey) -> Self {
        key.to_string()
    }
}

impl From<[u8; PEER_KEY_LEN]> for PeerKey {
    fn from(bytes: [u8; PEER_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

/// Validated ring capacity in elements.
///
/// Must be non-zero, and `element_size * capacity` must fit a 32-bit byte count.
/// A ring of capacity N holds at most N-1 live elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capacity(u32);

impl Capacity {
    /// Validate a capacity for elements of `element_size` bytes.
    pub fn new(capacity: usize, element_size: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::InvalidCapacity);
        }
        let too_large = RingError::TooLarge {
            capacity,
            element_size,
        };
        let bytes = capacity.checked_mul(element_size).ok_or(too_large)?;
        if bytes > u32::MAX as usize {
            return Err(too_large);
        }
        // bytes <= u32::MAX and element_size >= 1 imply capacity fits u32.
        Ok(Self(capacity as u32))
    }

    /// Capacity for ring elements of type `T`.
    pub fn of<T>(capacity: usize) -> Result<Self, RingError> {
        Self::new(capacity, std::mem::size_of::<T>().max(1))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer-sized value echoed from an action into the events it triggers.
///
/// Zero means "unused".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UserContext(pub usize);

impl UserContext {
    pub const NONE: Self = Self(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_key_hex_roundtrip() {
        let key = PeerKey::new([0xab; PEER_KEY_LEN]);
        let text = key.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<PeerKey>().unwrap(), key);
        assert_eq!(key.short(), "abababab");
    }

    #[test]
    fn test_peer_key_rejects_bad_hex() {
        assert!("abcd".parse::<PeerKey>().is_err());
        assert!("zz".repeat(32).parse::<PeerKey>().is_err());
    }

    #[test]
    fn test_capacity_validation() {
        assert_eq!(Capacity::new(0, 8), Err(RingError::InvalidCapacity));
        assert!(Capacity::new(1, 8).is_ok());
        assert_eq!(Capacity::new(16, 48).unwrap().get(), 16);

        let max_elements = u32::MAX as usize / 48;
        assert!(Capacity::new(max_elements, 48).is_ok());
        assert!(matches!(
            Capacity::new(max_elements + 1, 48),
            Err(RingError::TooLarge { .. })
        ));
        assert!(matches!(
            Capacity::new(usize::MAX, 2),
            Err(RingError::TooLarge { .. })
        ));
    }
}
