// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Server side of the event channel.
//!
//! `emit` is called from packet paths. It never blocks on the client and
//! never fails: a full ring drops the event and logs at a limited rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::ratelimit::RateLimiter;
use crate::record::{EventKind, EventRecord};
use crate::shm::RingProducer;
use crate::signal::SignalHandle;
use crate::types::{PeerKey, UserContext};

/// Producer state installed while a session is armed.
pub(crate) struct EventSink {
    /// Serializes concurrent packet-path producers.
    pub(crate) producer: Mutex<RingProducer<EventRecord>>,
    /// Modify-only reference to the client's data-available signal.
    pub(crate) signal: SignalHandle,
}

pub(crate) struct EventChannel {
    enabled: AtomicBool,
    sink: RwLock<Option<EventSink>>,
    drop_limiter: RateLimiter,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventChannel {
    pub(crate) fn new(drop_log_interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sink: RwLock::new(None),
            drop_limiter: RateLimiter::new(drop_log_interval),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn install(&self, sink: EventSink) {
        *self
            .sink
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sink);
        self.enabled.store(true, Ordering::Release);
    }

    /// Disable emission and hand back the sink for release.
    pub(crate) fn uninstall(&self) -> Option<EventSink> {
        self.enabled.store(false, Ordering::Release);
        self.sink
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Push one event and wake the client. No-op without a session.
    pub(crate) fn emit(
        &self,
        peer: &PeerKey,
        kind: EventKind,
        byte_count: u32,
        user_context: UserContext,
    ) {
        if !self.is_enabled() {
            return;
        }

        let sink = self
            .sink
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sink) = sink.as_ref() else {
            return;
        };

        let record = EventRecord::new(peer, kind, byte_count, user_context);
        let pushed = sink
            .producer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_push(record);

        match pushed {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                sink.signal.set();
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = self.drop_limiter.check() {
                    tracing::info!(
                        kind = kind.name(),
                        suppressed = suppressed,
                        "Dropping event since event buffer is full"
                    );
                }
            }
        }
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::{RingBuffer, RingLayout, SharedMemoryRegion};
    use crate::signal::{Signal, SignalRights};
    use std::ptr::NonNull;

    fn armed(capacity: usize) -> (SharedMemoryRegion, RingBuffer<EventRecord>, Signal, EventChannel) {
        let layout = RingLayout::<EventRecord>::new(capacity).unwrap();
        let region = SharedMemoryRegion::anonymous(layout.total_len()).unwrap();
        let base = NonNull::new(region.as_ptr()).unwrap();
        // SAFETY: both views cover the same live mapping
        let (client, server) = unsafe {
            (
                RingBuffer::from_raw(base, layout.capacity()),
                RingBuffer::from_raw(base, layout.capacity()),
            )
        };

        let signal = Signal::auto_reset();
        let channel = EventChannel::new(Duration::from_secs(60));
        channel.install(EventSink {
            producer: Mutex::new(RingProducer::new(server)),
            signal: SignalHandle::new(signal.clone(), SignalRights::MODIFY),
        });
        (region, client, signal, channel)
    }

    #[test]
    fn test_emit_without_session_is_noop() {
        let channel = EventChannel::new(Duration::from_secs(1));
        channel.emit(&PeerKey::default(), EventKind::NonpaddingSent, 10, UserContext::NONE);
        assert_eq!(channel.emitted(), 0);
        assert_eq!(channel.dropped(), 0);
    }

    #[test]
    fn test_emit_pushes_and_signals() {
        let (_region, mut client, signal, channel) = armed(4);
        let key = PeerKey::new([3; 32]);
        channel.emit(&key, EventKind::NonpaddingReceived, 70_000, UserContext::NONE);

        assert!(signal.try_acquire());
        let events = client.drain_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].peer(), key);
        assert_eq!(events[0].kind(), Ok(EventKind::NonpaddingReceived));
        assert_eq!(events[0].byte_count, 4464);
    }

    #[test]
    fn test_full_ring_drops_silently() {
        let (_region, mut client, _signal, channel) = armed(3);
        for i in 0..5 {
            channel.emit(&PeerKey::default(), EventKind::PaddingSent, i, UserContext(1));
        }
        assert_eq!(channel.emitted(), 2);
        assert_eq!(channel.dropped(), 3);
        assert_eq!(client.drain_all().len(), 2);
    }

    #[test]
    fn test_uninstall_disables() {
        let (_region, mut client, _signal, channel) = armed(4);
        assert!(channel.uninstall().is_some());
        channel.emit(&PeerKey::default(), EventKind::PaddingSent, 1, UserContext::NONE);
        assert!(client.drain_all().is_empty());
    }
}
