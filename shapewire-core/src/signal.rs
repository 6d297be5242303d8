// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Event objects used for cross-domain wakeups.
//!
//! A [`Signal`] is either auto-reset (a successful wait consumes it, like an
//! edge-triggered doorbell) or manual-reset (stays set until reset, used for
//! quit and device-removed). [`wait_any`] blocks on several signals at once
//! and reports the first one that is set, in slice order, so cancellation
//! sources listed first win over data-available.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Reset behaviour of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Cleared by the wait that observes it.
    Auto,
    /// Stays set until [`Signal::reset`].
    Manual,
}

/// Access rights carried by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalRights {
    /// May set or reset the signal.
    pub modify: bool,
    /// May wait on the signal.
    pub synchronize: bool,
}

impl SignalRights {
    pub const MODIFY: Self = Self {
        modify: true,
        synchronize: false,
    };
    pub const SYNCHRONIZE: Self = Self {
        modify: false,
        synchronize: true,
    };
    pub const ALL: Self = Self {
        modify: true,
        synchronize: true,
    };

    /// Whether every right in `other` is also in `self`.
    pub fn contains(&self, other: SignalRights) -> bool {
        (self.modify || !other.modify) && (self.synchronize || !other.synchronize)
    }
}

/// Wakes a multi-signal waiter.
#[derive(Default)]
struct Parker {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Parker {
    fn unpark(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }
}

struct Inner {
    mode: ResetMode,
    state: Mutex<bool>,
    cond: Condvar,
    parkers: Mutex<Vec<Weak<Parker>>>,
}

/// Event object. Cloning yields another reference to the same object.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("mode", &self.inner.mode)
            .field("set", &self.is_set())
            .finish()
    }
}

impl Signal {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode,
                state: Mutex::new(false),
                cond: Condvar::new(),
                parkers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn auto_reset() -> Self {
        Self::new(ResetMode::Auto)
    }

    pub fn manual_reset() -> Self {
        Self::new(ResetMode::Manual)
    }

    pub fn mode(&self) -> ResetMode {
        self.inner.mode
    }

    /// Set the signal and wake every waiter.
    pub fn set(&self) {
        {
            let mut state = lock(&self.inner.state);
            *state = true;
            match self.inner.mode {
                ResetMode::Auto => self.inner.cond.notify_one(),
                ResetMode::Manual => self.inner.cond.notify_all(),
            }
        }

        let mut parkers = lock(&self.inner.parkers);
        parkers.retain(|weak| match weak.upgrade() {
            Some(parker) => {
                parker.unpark();
                true
            }
            None => false,
        });
    }

    pub fn reset(&self) {
        *lock(&self.inner.state) = false;
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.inner.state)
    }

    /// Observe the signal without blocking, consuming it if auto-reset.
    pub fn try_acquire(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if !*state {
            return false;
        }
        if self.inner.mode == ResetMode::Auto {
            *state = false;
        }
        true
    }

    /// Block until set.
    pub fn wait(&self) {
        let mut state = lock(&self.inner.state);
        while !*state {
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if self.inner.mode == ResetMode::Auto {
            *state = false;
        }
    }

    /// Block until set or until `timeout` elapses. Returns whether it was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        while !*state {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        if self.inner.mode == ResetMode::Auto {
            *state = false;
        }
        true
    }

    fn register(&self, parker: &Arc<Parker>) {
        let mut parkers = lock(&self.inner.parkers);
        parkers.retain(|weak| weak.strong_count() > 0);
        parkers.push(Arc::downgrade(parker));
    }

    fn unregister(&self, parker: &Arc<Parker>) {
        let target = Arc::downgrade(parker);
        lock(&self.inner.parkers).retain(|weak| !weak.ptr_eq(&target));
    }

    /// Number of handles referring to this object.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// Block until any of `signals` is set, or `timeout` elapses.
///
/// Returns the index of the first set signal in slice order (consuming it if
/// auto-reset), or `None` on timeout.
pub fn wait_any(signals: &[&Signal], timeout: Option<Duration>) -> Option<usize> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let parker = Arc::new(Parker::default());
    for signal in signals {
        signal.register(&parker);
    }

    let result = loop {
        let observed = *lock(&parker.generation);

        if let Some(index) = signals.iter().position(|s| s.try_acquire()) {
            break Some(index);
        }

        let mut generation = lock(&parker.generation);
        let mut timed_out = false;
        while *generation == observed {
            match deadline {
                None => {
                    generation = parker
                        .cond
                        .wait(generation)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        break;
                    }
                    generation = parker
                        .cond
                        .wait_timeout(generation, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
            }
        }
        drop(generation);

        if timed_out {
            break signals.iter().position(|s| s.try_acquire());
        }
    };

    for signal in signals {
        signal.unregister(&parker);
    }
    result
}

/// Handle to a signal carrying the rights granted to its holder.
#[derive(Debug, Clone)]
pub struct SignalHandle {
    signal: Signal,
    rights: SignalRights,
}

impl SignalHandle {
    pub fn new(signal: Signal, rights: SignalRights) -> Self {
        Self { signal, rights }
    }

    pub fn rights(&self) -> SignalRights {
        self.rights
    }

    /// Duplicate with a subset of this handle's rights.
    pub fn duplicate(&self, rights: SignalRights) -> Option<SignalHandle> {
        if !self.rights.contains(rights) {
            return None;
        }
        Some(Self {
            signal: self.signal.clone(),
            rights,
        })
    }

    /// Set the signal. No-op without modify rights.
    pub fn set(&self) {
        if self.rights.modify {
            self.signal.set();
        } else {
            tracing::error!("Signal set without modify rights");
        }
    }

    /// The underlying object, if this handle may wait on it.
    pub fn waitable(&self) -> Option<&Signal> {
        self.rights.synchronize.then_some(&self.signal)
    }

    /// Block until set or timeout. Returns false without synchronize rights.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.waitable() {
            Some(signal) => signal.wait_timeout(timeout),
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
