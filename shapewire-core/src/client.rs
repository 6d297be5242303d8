// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Unprivileged side of the shaping channel.
//!
//! An [`Adapter`] owns one combined ring region and two signal objects while a
//! session is active. Any number of threads may receive events and send
//! actions concurrently; each ring has its own client-local lock.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::config::SessionConfig;
use crate::control::{ActivationRequest, ControlChannel};
use crate::error::{ActivationError, ShapeError, ShapeResult};
use crate::platform::ClientPlatform;
use crate::record::{ActionRecord, EventRecord};
use crate::shm::{RingBuffer, RingLayout, SessionLayout, SharedMemoryRegion};
use crate::signal::SignalHandle;

/// Client resources of one active session.
struct ClientSession {
    events: Mutex<RingBuffer<EventRecord>>,
    actions: Mutex<RingBuffer<ActionRecord>>,
    event_signal: SignalHandle,
    action_signal: SignalHandle,
    region: SharedMemoryRegion,
}

impl ClientSession {
    fn events(&self) -> MutexGuard<'_, RingBuffer<EventRecord>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn actions(&self) -> MutexGuard<'_, RingBuffer<ActionRecord>> {
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Client handle to one device's shaping channel.
pub struct Adapter {
    control: Arc<dyn ControlChannel>,
    platform: Arc<dyn ClientPlatform>,
    session: RwLock<Option<ClientSession>>,
}

impl Adapter {
    pub fn new(control: Arc<dyn ControlChannel>, platform: Arc<dyn ClientPlatform>) -> Self {
        Self {
            control,
            platform,
            session: RwLock::new(None),
        }
    }

    fn check_removed(&self) -> ShapeResult<()> {
        if self.control.is_removed() {
            return Err(ShapeError::AdapterRemoved);
        }
        Ok(())
    }

    /// Run `f` against the active session.
    fn with_session<R>(&self, f: impl FnOnce(&ClientSession) -> ShapeResult<R>) -> ShapeResult<R> {
        self.check_removed()?;
        let slot = self
            .session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_ref() {
            Some(session) => f(session),
            None => Err(ShapeError::NoSession),
        }
    }

    pub fn is_active(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Activate with capacities from configuration.
    pub fn activate_with(&self, config: &SessionConfig) -> ShapeResult<()> {
        self.activate(config.event_capacity, config.action_capacity)
    }

    /// Allocate both rings and signals and arm the server side.
    ///
    /// Returns `Ok` without doing anything if this adapter already has a
    /// session. On failure every client resource is released.
    pub fn activate(&self, event_capacity: usize, action_capacity: usize) -> ShapeResult<()> {
        self.check_removed()?;

        let event = RingLayout::<EventRecord>::new(event_capacity)
            .map_err(|source| ActivationError::capacity("event", source))?;
        let action = RingLayout::<ActionRecord>::new(action_capacity)
            .map_err(|source| ActivationError::capacity("action", source))?;
        let layout = SessionLayout::new(event_capacity, action_capacity)?;

        let mut slot = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        let platform = self.platform.as_ref();
        let event_signal = platform
            .create_signal()
            .map_err(|e| ActivationError::SignalCreate {
                ring: "event",
                reason: e.to_string(),
            })?;
        let action_signal = match platform.create_signal() {
            Ok(signal) => signal,
            Err(e) => {
                platform.close_signal(event_signal);
                return Err(ActivationError::SignalCreate {
                    ring: "action",
                    reason: e.to_string(),
                }
                .into());
            }
        };
        let region = match platform.allocate_region(layout.total_len) {
            Ok(region) => region,
            Err(e) => {
                platform.close_signal(action_signal);
                platform.close_signal(event_signal);
                return Err(ActivationError::RegionAlloc {
                    len: layout.total_len,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let base = region.address();
        let request = ActivationRequest {
            event_capacity,
            event_ring: base,
            event_signal: event_signal.clone(),
            action_capacity,
            action_ring: base + layout.action_offset,
            action_signal: action_signal.clone(),
        };

        let views = NonNull::new(region.as_ptr()).map(|start| {
            // SAFETY: the region is page aligned, spans `layout.total_len`
            // bytes and is only freed after both views are dropped.
            unsafe {
                let action_base = NonNull::new_unchecked(start.as_ptr().add(layout.action_offset));
                (
                    RingBuffer::from_raw(start, event.capacity()),
                    RingBuffer::from_raw(action_base, action.capacity()),
                )
            }
        });

        let armed = match views {
            Some(views) => self.control.activate(&request).map(|()| views),
            None => Err(ActivationError::RegionAlloc {
                len: layout.total_len,
                reason: "null mapping".to_string(),
            }
            .into()),
        };
        drop(request);

        match armed {
            Ok((events, actions)) => {
                tracing::info!(
                    event_capacity = event_capacity,
                    action_capacity = action_capacity,
                    region_len = layout.total_len,
                    "Adapter session active"
                );
                *slot = Some(ClientSession {
                    events: Mutex::new(events),
                    actions: Mutex::new(actions),
                    event_signal,
                    action_signal,
                    region,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Adapter activation failed");
                platform.free_region(region);
                platform.close_signal(action_signal);
                platform.close_signal(event_signal);
                Err(e)
            }
        }
    }

    /// Drain all pending events into `out`.
    ///
    /// An empty ring is reported as [`ShapeError::NoMoreItems`], which is a
    /// normal condition.
    pub fn receive_events(&self, out: &mut Vec<EventRecord>) -> ShapeResult<usize> {
        self.with_session(|session| match session.events().drain_into(out) {
            0 => Err(ShapeError::NoMoreItems),
            n => Ok(n),
        })
    }

    /// Push one action and wake the server's processor.
    ///
    /// A full ring is reported as [`ShapeError::InsufficientBuffer`]; nothing
    /// is written and retrying is up to the caller.
    pub fn send_action(&self, action: &ActionRecord) -> ShapeResult<()> {
        self.with_session(|session| {
            session
                .actions()
                .try_push(*action)
                .map_err(|_| ShapeError::InsufficientBuffer)?;
            session.action_signal.set();
            Ok(())
        })
    }

    /// Handle to wait on for new events. Auto-reset: one wake per set.
    pub fn event_data_available_handle(&self) -> ShapeResult<SignalHandle> {
        self.with_session(|session| Ok(session.event_signal.clone()))
    }

    /// Tear down the server side and release every client resource.
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        let session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(session) = session else {
            return;
        };

        self.control.deactivate();

        let ClientSession {
            events,
            actions,
            event_signal,
            action_signal,
            region,
        } = session;
        drop(events);
        drop(actions);

        self.platform.close_signal(action_signal);
        self.platform.close_signal(event_signal);
        self.platform.free_region(region);
        tracing::info!("Adapter session closed");
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::platform::{LocalPlatform, PlatformError, ResourceSnapshot};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Control channel that records calls instead of arming anything.
    #[derive(Default)]
    struct StubControl {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
        reject: AtomicBool,
        removed: AtomicBool,
    }

    impl ControlChannel for StubControl {
        fn activate(&self, _request: &ActivationRequest) -> ShapeResult<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(ActivationError::AlreadyActive.into());
            }
            Ok(())
        }

        fn deactivate(&self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }

        fn is_removed(&self) -> bool {
            self.removed.load(Ordering::SeqCst)
        }
    }

    /// Client services that run out of signals after `signals` creations.
    struct LimitedPlatform {
        local: LocalPlatform,
        signals: AtomicUsize,
        regions: bool,
    }

    impl ClientPlatform for LimitedPlatform {
        fn allocate_region(&self, len: usize) -> Result<SharedMemoryRegion, PlatformError> {
            if !self.regions {
                return Err(PlatformError::Exhausted { what: "memory" });
            }
            self.local.allocate_region(len)
        }

        fn free_region(&self, region: SharedMemoryRegion) {
            self.local.free_region(region)
        }

        fn create_signal(&self) -> Result<SignalHandle, PlatformError> {
            let left = self.signals.load(Ordering::SeqCst);
            if left == 0 {
                return Err(PlatformError::Exhausted { what: "signals" });
            }
            self.signals.store(left - 1, Ordering::SeqCst);
            self.local.create_signal()
        }

        fn close_signal(&self, handle: SignalHandle) {
            self.local.close_signal(handle)
        }
    }

    fn adapter() -> (Arc<StubControl>, LocalPlatform, Adapter) {
        let control = Arc::new(StubControl::default());
        let local = LocalPlatform::new();
        let adapter = Adapter::new(control.clone(), Arc::new(local.clone()));
        (control, local, adapter)
    }

    #[test]
    fn test_calls_without_session() {
        let (_control, _local, adapter) = adapter();
        let mut out = Vec::new();
        assert!(matches!(adapter.receive_events(&mut out), Err(ShapeError::NoSession)));
        assert!(matches!(
            adapter.send_action(&ActionRecord::inject_padding(
                &Default::default(),
                64,
                false,
                Default::default()
            )),
            Err(ShapeError::NoSession)
        ));
        assert!(adapter.event_data_available_handle().is_err());
    }

    #[test]
    fn test_activate_is_idempotent() {
        let (control, local, adapter) = adapter();
        adapter.activate(16, 16).unwrap();
        let snapshot = local.resources();
        adapter.activate(16, 16).unwrap();

        assert_eq!(control.activations.load(Ordering::SeqCst), 1);
        assert_eq!(local.resources(), snapshot);
        assert_eq!(snapshot.regions, 1);
        assert_eq!(snapshot.signals, 2);
    }

    #[test]
    fn test_invalid_capacity_is_rejected_early() {
        let (control, local, adapter) = adapter();
        let err = adapter.activate(0, 16).unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidParameter);
        assert_eq!(control.activations.load(Ordering::SeqCst), 0);
        assert_eq!(local.resources(), ResourceSnapshot::default());
    }

    #[test]
    fn test_server_rejection_releases_everything() {
        let (control, local, adapter) = adapter();
        control.reject.store(true, Ordering::SeqCst);

        assert!(adapter.activate(16, 16).is_err());
        assert!(!adapter.is_active());
        assert_eq!(local.resources(), ResourceSnapshot::default());
    }

    #[test]
    fn test_resource_failures_roll_back() {
        for (signals, regions) in [(0, true), (1, true), (2, false)] {
            let local = LocalPlatform::new();
            let platform = Arc::new(LimitedPlatform {
                local: local.clone(),
                signals: AtomicUsize::new(signals),
                regions,
            });
            let adapter = Adapter::new(Arc::new(StubControl::default()), platform);

            let err = adapter.activate(16, 16).unwrap_err();
            assert_eq!(err.status(), StatusCode::InsufficientResources);
            assert_eq!(local.resources(), ResourceSnapshot::default());
        }
    }

    #[test]
    fn test_removed_device_fails_fast() {
        let (control, _local, adapter) = adapter();
        adapter.activate(16, 16).unwrap();
        control.removed.store(true, Ordering::SeqCst);

        let mut out = Vec::new();
        let err = adapter.receive_events(&mut out).unwrap_err();
        assert_eq!(err.status(), StatusCode::AdapterRemoved);
        assert!(matches!(adapter.activate(16, 16), Err(ShapeError::AdapterRemoved)));
    }

    #[test]
    fn test_close_releases_once() {
        let (control, local, adapter) = adapter();
        adapter.activate(16, 16).unwrap();
        adapter.close();
        adapter.close();

        assert_eq!(control.deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(local.resources(), ResourceSnapshot::default());
        drop(adapter);
        assert_eq!(control.deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_action_ring_full_is_insufficient_buffer() {
        let (_control, _local, adapter) = adapter();
        adapter.activate(4, 3).unwrap();
        let action = ActionRecord::inject_padding(&Default::default(), 64, false, Default::default());

        adapter.send_action(&action).unwrap();
        adapter.send_action(&action).unwrap();
        let err = adapter.send_action(&action).unwrap_err();
        assert!(matches!(err, ShapeError::InsufficientBuffer));
    }
}
