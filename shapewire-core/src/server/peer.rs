// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Tunnel peers as seen by the padding hook.
//!
//! Provides concurrent lookup by public key and the per-peer staging queue.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use dashmap::DashMap;

use crate::transport::StagedPacket;
use crate::types::PeerKey;

/// A tunnel peer.
#[derive(Debug)]
pub struct Peer {
    key: PeerKey,
    endpoint: RwLock<Option<SocketAddr>>,
    staged: Mutex<VecDeque<StagedPacket>>,
}

impl Peer {
    pub fn new(key: PeerKey) -> Self {
        Self {
            key,
            endpoint: RwLock::new(None),
            staged: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_endpoint(key: PeerKey, endpoint: SocketAddr) -> Self {
        let peer = Self::new(key);
        peer.set_endpoint(Some(endpoint));
        peer
    }

    pub fn key(&self) -> &PeerKey {
        &self.key
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self
            .endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_endpoint(&self, endpoint: Option<SocketAddr>) {
        *self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = endpoint;
    }

    fn staged(&self) -> MutexGuard<'_, VecDeque<StagedPacket>> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a packet to the staging queue.
    pub fn stage(&self, packet: StagedPacket) {
        self.staged().push_back(packet);
    }

    pub fn staged_len(&self) -> usize {
        self.staged().len()
    }

    /// Remove and return everything staged, oldest first.
    pub fn take_staged(&self) -> Vec<StagedPacket> {
        self.staged().drain(..).collect()
    }

    /// Whether a synthetic padding packet declaring `length` is already staged.
    pub fn has_padding_queued(&self, length: u16) -> bool {
        self.staged()
            .iter()
            .any(|packet| packet.padding_length() == Some(length))
    }
}

/// Concurrent set of peers keyed by public key.
///
/// Lookups take a shard read lock, so any number may run at once.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: DashMap<PeerKey, Arc<Peer>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer, replacing any peer with the same key.
    pub fn insert(&self, peer: Peer) -> Arc<Peer> {
        let peer = Arc::new(peer);
        self.peers.insert(*peer.key(), Arc::clone(&peer));
        peer
    }

    pub fn remove(&self, key: &PeerKey) -> Option<Arc<Peer>> {
        self.peers.remove(key).map(|(_, peer)| peer)
    }

    /// Exact-match lookup by key.
    pub fn get(&self, key: &PeerKey) -> Option<Arc<Peer>> {
        self.peers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn keys(&self) -> Vec<PeerKey> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(byte: u8) -> PeerKey {
        PeerKey::new([byte; 32])
    }

    #[test]
    fn test_padding_queue_scan() {
        let peer = Peer::new(key(1));
        peer.stage(StagedPacket::data_packet(&[0x45; 120]));
        assert!(!peer.has_padding_queued(120));

        let mut padding = StagedPacket::try_zeroed(1420).unwrap();
        padding.write_padding_header(120);
        peer.stage(padding);
        assert!(peer.has_padding_queued(120));
        assert!(!peer.has_padding_queued(121));

        assert_eq!(peer.take_staged().len(), 2);
        assert_eq!(peer.staged_len(), 0);
    }

    #[test]
    fn test_peer_set_concurrent_lookup() {
        let peers = Arc::new(PeerSet::new());
        for i in 0..8 {
            peers.insert(Peer::new(key(i)));
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let peers = Arc::clone(&peers);
                thread::spawn(move || (0..8).all(|i| peers.get(&key(i)).is_some()))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(peers.get(&key(99)).is_none());
        assert_eq!(peers.len(), 8);
    }
}
