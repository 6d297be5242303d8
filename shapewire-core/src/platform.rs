// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Services the channel borrows from its host.
//!
//! The privileged side needs to pin client memory, reference client signal
//! handles with reduced rights and spawn a task. The unprivileged side needs to
//! allocate the ring region and create signal objects. [`LocalPlatform`]
//! provides both for a client and server living in one process, and counts
//! every live resource so leaks are observable.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::error::SharedMemoryError;
use crate::shm::SharedMemoryRegion;
use crate::signal::{Signal, SignalHandle, SignalRights};

/// Failures reported by platform services.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Range {address:#x}+{len} is not accessible")]
    NotAccessible { address: usize, len: usize },

    #[error("Handle does not grant the requested rights")]
    AccessDenied,

    #[error("Out of {what}")]
    Exhausted { what: &'static str },

    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),
}

/// Client memory pinned into the server's view for a session's lifetime.
#[derive(Debug)]
pub struct PinnedRegion {
    id: u64,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the pinned range stays mapped until unpinned; the handle itself is
// just an address and length.
unsafe impl Send for PinnedRegion {}
unsafe impl Sync for PinnedRegion {}

impl PinnedRegion {
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Services used by the privileged side.
pub trait ServerPlatform: Send + Sync {
    /// Pin `len` bytes of client memory at `address`.
    fn pin(&self, address: usize, len: usize) -> Result<PinnedRegion, PlatformError>;

    /// Release a pin. Called exactly once per successful `pin`.
    fn unpin(&self, region: PinnedRegion);

    /// Reference a client handle with exactly `rights`.
    fn reference_signal(
        &self,
        handle: &SignalHandle,
        rights: SignalRights,
    ) -> Result<SignalHandle, PlatformError>;

    /// Drop a reference obtained from `reference_signal`.
    fn release_signal(&self, handle: SignalHandle);

    /// Start a long-lived task.
    fn spawn(
        &self,
        name: &str,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> std::io::Result<JoinHandle<()>>;
}

/// Services used by the unprivileged side.
pub trait ClientPlatform: Send + Sync {
    /// Allocate one zeroed region holding both rings.
    fn allocate_region(&self, len: usize) -> Result<SharedMemoryRegion, PlatformError>;

    /// Free the region. Freed once, as a whole.
    fn free_region(&self, region: SharedMemoryRegion);

    /// Create an auto-reset signal object with full rights.
    fn create_signal(&self) -> Result<SignalHandle, PlatformError>;

    fn close_signal(&self, handle: SignalHandle);
}

/// Counts of live resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub pins: usize,
    pub signal_refs: usize,
    pub tasks: usize,
    pub regions: usize,
    pub signals: usize,
}

#[derive(Debug, Default)]
struct ResourceStats {
    pins: AtomicUsize,
    signal_refs: AtomicUsize,
    tasks: AtomicUsize,
    regions: AtomicUsize,
    signals: AtomicUsize,
}

/// A client allocation known to the platform.
struct Mapping {
    start: usize,
    len: usize,
    pins: usize,
    /// Held here when the client frees while the server still has pins.
    deferred: Option<SharedMemoryRegion>,
}

#[derive(Default)]
struct Registry {
    mappings: Mutex<Vec<Mapping>>,
    next_pin: AtomicU64,
    stats: ResourceStats,
}

impl Registry {
    fn mappings(&self) -> MutexGuard<'_, Vec<Mapping>> {
        self.mappings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Client and server services for a single process.
#[derive(Clone, Default)]
pub struct LocalPlatform {
    registry: Arc<Registry>,
    region_name: Option<String>,
}

impl LocalPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate rings in a named POSIX shm object so other processes can attach.
    pub fn with_region_name(name: impl Into<String>) -> Self {
        Self {
            registry: Arc::default(),
            region_name: Some(name.into()),
        }
    }

    pub fn resources(&self) -> ResourceSnapshot {
        let stats = &self.registry.stats;
        ResourceSnapshot {
            pins: stats.pins.load(Ordering::Acquire),
            signal_refs: stats.signal_refs.load(Ordering::Acquire),
            tasks: stats.tasks.load(Ordering::Acquire),
            regions: stats.regions.load(Ordering::Acquire),
            signals: stats.signals.load(Ordering::Acquire),
        }
    }
}

impl ServerPlatform for LocalPlatform {
    fn pin(&self, address: usize, len: usize) -> Result<PinnedRegion, PlatformError> {
        let not_accessible = PlatformError::NotAccessible { address, len };
        let end = address.checked_add(len).ok_or(not_accessible)?;
        let base = NonNull::new(address as *mut u8).ok_or(PlatformError::NotAccessible {
            address,
            len,
        })?;

        let mut mappings = self.registry.mappings();
        let mapping = mappings
            .iter_mut()
            .find(|m| m.deferred.is_none() && address >= m.start && end <= m.start + m.len)
            .ok_or(PlatformError::NotAccessible { address, len })?;
        mapping.pins += 1;

        self.registry.stats.pins.fetch_add(1, Ordering::AcqRel);
        let id = self.registry.next_pin.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(address = address, len = len, pin = id, "Pinned client range");
        Ok(PinnedRegion { id, base, len })
    }

    fn unpin(&self, region: PinnedRegion) {
        let address = region.base.as_ptr() as usize;
        let mut mappings = self.registry.mappings();
        if let Some(index) = mappings
            .iter()
            .position(|m| address >= m.start && address < m.start + m.len && m.pins > 0)
        {
            mappings[index].pins -= 1;
            if mappings[index].pins == 0 && mappings[index].deferred.is_some() {
                let mapping = mappings.swap_remove(index);
                drop(mapping.deferred);
                self.registry.stats.regions.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.registry.stats.pins.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(pin = region.id, "Unpinned client range");
    }

    fn reference_signal(
        &self,
        handle: &SignalHandle,
        rights: SignalRights,
    ) -> Result<SignalHandle, PlatformError> {
        let duplicate = handle
            .duplicate(rights)
            .ok_or(PlatformError::AccessDenied)?;
        self.registry.stats.signal_refs.fetch_add(1, Ordering::AcqRel);
        Ok(duplicate)
    }

    fn release_signal(&self, handle: SignalHandle) {
        drop(handle);
        self.registry.stats.signal_refs.fetch_sub(1, Ordering::AcqRel);
    }

    fn spawn(
        &self,
        name: &str,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> std::io::Result<JoinHandle<()>> {
        let registry = Arc::clone(&self.registry);
        registry.stats.tasks.fetch_add(1, Ordering::AcqRel);
        let result = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                task();
                registry.stats.tasks.fetch_sub(1, Ordering::AcqRel);
            });
        if result.is_err() {
            self.registry.stats.tasks.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }
}

impl ClientPlatform for LocalPlatform {
    fn allocate_region(&self, len: usize) -> Result<SharedMemoryRegion, PlatformError> {
        let region = match &self.region_name {
            Some(name) => SharedMemoryRegion::create(name, len)?,
            None => SharedMemoryRegion::anonymous(len)?,
        };
        self.registry.mappings().push(Mapping {
            start: region.address(),
            len: region.size(),
            pins: 0,
            deferred: None,
        });
        self.registry.stats.regions.fetch_add(1, Ordering::AcqRel);
        Ok(region)
    }

    fn free_region(&self, region: SharedMemoryRegion) {
        let mut mappings = self.registry.mappings();
        let Some(index) = mappings
            .iter()
            .position(|m| m.start == region.address() && m.deferred.is_none())
        else {
            tracing::error!(address = region.address(), "Freeing unknown region");
            return;
        };

        if mappings[index].pins > 0 {
            tracing::debug!(
                address = region.address(),
                pins = mappings[index].pins,
                "Deferring unmap of pinned region"
            );
            mappings[index].deferred = Some(region);
            return;
        }

        mappings.swap_remove(index);
        drop(mappings);
        drop(region);
        self.registry.stats.regions.fetch_sub(1, Ordering::AcqRel);
    }

    fn create_signal(&self) -> Result<SignalHandle, PlatformError> {
        self.registry.stats.signals.fetch_add(1, Ordering::AcqRel);
        Ok(SignalHandle::new(Signal::auto_reset(), SignalRights::ALL))
    }

    fn close_signal(&self, handle: SignalHandle) {
        drop(handle);
        self.registry.stats.signals.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_requires_known_mapping() {
        let platform = LocalPlatform::new();
        assert!(matches!(
            platform.pin(0x1000, 64),
            Err(PlatformError::NotAccessible { .. })
        ));

        let region = platform.allocate_region(256).unwrap();
        let pinned = platform.pin(region.address() + 64, 128).unwrap();
        assert_eq!(pinned.len(), 128);
        assert!(platform.pin(region.address() + 200, 128).is_err());

        platform.unpin(pinned);
        platform.free_region(region);
        assert_eq!(platform.resources(), ResourceSnapshot::default());
    }

    #[test]
    fn test_free_while_pinned_is_deferred() {
        let platform = LocalPlatform::new();
        let region = platform.allocate_region(64).unwrap();
        let pinned = platform.pin(region.address(), 64).unwrap();

        platform.free_region(region);
        assert_eq!(platform.resources().regions, 1);

        // SAFETY: the pin keeps the mapping alive
        unsafe { pinned.base().as_ptr().write(7) };

        platform.unpin(pinned);
        assert_eq!(platform.resources(), ResourceSnapshot::default());
    }

    #[test]
    fn test_reference_signal_checks_rights() {
        let platform = LocalPlatform::new();
        let handle = platform.create_signal().unwrap();
        let modify = platform
            .reference_signal(&handle, SignalRights::MODIFY)
            .unwrap();
        assert!(platform
            .reference_signal(&modify, SignalRights::ALL)
            .is_err());

        platform.release_signal(modify);
        platform.close_signal(handle);
        assert_eq!(platform.resources(), ResourceSnapshot::default());
    }

    #[test]
    fn test_spawned_task_is_counted_until_exit() {
        let platform = LocalPlatform::new();
        let handle = platform.spawn("test-task", Box::new(|| {})).unwrap();
        handle.join().unwrap();
        assert_eq!(platform.resources().tasks, 0);
    }
}
