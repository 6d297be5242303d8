// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Action processor task.
//!
//! One per armed session. Sleeps on quit, device-removed and action-available,
//! and drains every pending action per wake.

use std::sync::Arc;

use crate::record::{Action, ActionRecord};
use crate::server::device::DataPlane;
use crate::server::padding;
use crate::shm::RingConsumer;
use crate::signal::{wait_any, Signal};

const QUIT: usize = 0;
const REMOVED: usize = 1;

pub(crate) struct ActionProcessor {
    plane: Arc<DataPlane>,
    consumer: RingConsumer<ActionRecord>,
    quit: Signal,
    removed: Signal,
    data_available: Signal,
}

impl ActionProcessor {
    pub(crate) fn new(
        plane: Arc<DataPlane>,
        consumer: RingConsumer<ActionRecord>,
        quit: Signal,
        removed: Signal,
        data_available: Signal,
    ) -> Self {
        Self {
            plane,
            consumer,
            quit,
            removed,
            data_available,
        }
    }

    /// Run until quit or device removal.
    pub(crate) fn run(mut self) {
        tracing::info!(device = %self.plane.name, "Action processor started");

        loop {
            let signals = [&self.quit, &self.removed, &self.data_available];
            match wait_any(&signals, None) {
                Some(QUIT) | Some(REMOVED) => break,
                // Data or spurious wake: drain whatever is there.
                _ => {}
            }
            self.drain();
        }

        tracing::info!(device = %self.plane.name, "Action processor stopped");
    }

    /// Dispatch every pending action and publish the read offset once.
    fn drain(&mut self) -> usize {
        let plane = &self.plane;
        self.consumer.drain_with(|record| dispatch(plane, &record))
    }
}

fn dispatch(plane: &DataPlane, record: &ActionRecord) {
    match record.decode() {
        Ok(Action::InjectPadding {
            peer,
            byte_count,
            replace,
            user_context,
        }) => {
            let outcome = padding::inject_padding(plane, &peer, byte_count, replace, user_context);
            if !outcome.emitted() {
                tracing::debug!(peer = %peer.short(), outcome = ?outcome, "Padding action not applied");
            }
        }
        Err(kind) => {
            tracing::error!(device = %plane.name, kind = kind, "Unknown action kind, skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShapingConfig;
    use crate::platform::LocalPlatform;
    use crate::server::{Device, Peer};
    use crate::shm::{RingBuffer, RingLayout, SharedMemoryRegion};
    use crate::transport::DrainTransport;
    use crate::types::{PeerKey, UserContext};
    use std::ptr::NonNull;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        _region: SharedMemoryRegion,
        client: RingBuffer<ActionRecord>,
        transport: Arc<DrainTransport>,
        device: Device,
        quit: Signal,
        removed: Signal,
        data: Signal,
        task: Option<thread::JoinHandle<()>>,
    }

    fn harness() -> Harness {
        let layout = RingLayout::<ActionRecord>::new(8).unwrap();
        let region = SharedMemoryRegion::anonymous(layout.total_len()).unwrap();
        let base = NonNull::new(region.as_ptr()).unwrap();
        // SAFETY: both views cover the same live mapping
        let (client, server) = unsafe {
            (
                RingBuffer::from_raw(base, layout.capacity()),
                RingBuffer::from_raw(base, layout.capacity()),
            )
        };

        let transport = Arc::new(DrainTransport::new());
        let device = Device::new(
            "proc0",
            &ShapingConfig::default(),
            Arc::new(LocalPlatform::new()),
            transport.clone(),
        );
        device.peers().insert(Peer::with_endpoint(
            PeerKey::new([1; 32]),
            "[2001:db8::1]:51820".parse().unwrap(),
        ));

        let quit = Signal::manual_reset();
        let removed = Signal::manual_reset();
        let data = Signal::auto_reset();
        let processor = ActionProcessor::new(
            device.shared_plane(),
            RingConsumer::new(server),
            quit.clone(),
            removed.clone(),
            data.clone(),
        );
        let task = thread::spawn(move || processor.run());

        Harness {
            _region: region,
            client,
            transport,
            device,
            quit,
            removed,
            data,
            task: Some(task),
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_drains_batch_and_skips_unknown_kinds() {
        let mut h = harness();
        let key = PeerKey::new([1; 32]);

        let mut bogus = ActionRecord::inject_padding(&key, 100, false, UserContext::NONE);
        bogus.kind = 42;
        h.client
            .try_push(ActionRecord::inject_padding(&key, 100, false, UserContext(1)))
            .unwrap();
        h.client.try_push(bogus).unwrap();
        h.client
            .try_push(ActionRecord::inject_padding(&key, 200, false, UserContext(2)))
            .unwrap();
        h.data.set();

        assert!(wait_for(|| h.transport.padding_sent() == 2));
        assert!(wait_for(|| h.client.is_empty()));

        h.quit.set();
        h.task.take().unwrap().join().unwrap();
        drop(h.device);
    }

    #[test]
    fn test_exits_on_device_removal() {
        let mut h = harness();
        h.removed.set();
        h.task.take().unwrap().join().unwrap();
    }

    #[test]
    fn test_quit_wins_over_pending_data() {
        let mut h = harness();
        let key = PeerKey::new([1; 32]);

        h.client
            .try_push(ActionRecord::inject_padding(&key, 100, false, UserContext(1)))
            .unwrap();
        h.quit.set();
        h.data.set();
        h.task.take().unwrap().join().unwrap();

        assert_eq!(h.transport.padding_sent(), 0);
        assert_eq!(h.client.len(), 1);
    }
}
