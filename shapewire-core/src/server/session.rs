// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Arming and tearing down a session on the privileged side.
//!
//! Activation pins both rings, references both signals, installs the event
//! producer and spawns the action processor. A failure at any step releases
//! everything acquired so far in reverse order and leaves the device with no
//! session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::control::ActivationRequest;
use crate::error::ActivationError;
use crate::platform::{PinnedRegion, ServerPlatform};
use crate::record::{ActionRecord, EventRecord};
use crate::server::device::DeviceInner;
use crate::server::events::EventSink;
use crate::server::processor::ActionProcessor;
use crate::shm::{RingBuffer, RingConsumer, RingElement, RingLayout, RingProducer};
use crate::signal::{Signal, SignalHandle, SignalRights};

/// Client resources referenced by the server.
///
/// While a session is armed the event signal lives in the event sink; it is
/// put back here before release.
#[derive(Default)]
struct Held {
    event_pin: Option<PinnedRegion>,
    event_signal: Option<SignalHandle>,
    action_pin: Option<PinnedRegion>,
    action_signal: Option<SignalHandle>,
}

impl Held {
    /// Reclaim the event signal from an uninstalled sink.
    fn reclaim(&mut self, sink: Option<EventSink>) {
        if let Some(sink) = sink {
            drop(sink.producer);
            self.event_signal = Some(sink.signal);
        }
    }

    /// Release in reverse order of acquisition.
    fn release(self, platform: &dyn ServerPlatform) {
        if let Some(signal) = self.action_signal {
            platform.release_signal(signal);
        }
        if let Some(pin) = self.action_pin {
            platform.unpin(pin);
        }
        if let Some(signal) = self.event_signal {
            platform.release_signal(signal);
        }
        if let Some(pin) = self.event_pin {
            platform.unpin(pin);
        }
    }
}

pub(crate) struct ServerSession {
    held: Held,
    quit: Signal,
    processor: JoinHandle<()>,
}

fn lock(session: &Mutex<Option<ServerSession>>) -> MutexGuard<'_, Option<ServerSession>> {
    session
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ring_layout<T>(ring: &'static str, capacity: usize) -> Result<RingLayout<T>, ActivationError> {
    RingLayout::<T>::new(capacity).map_err(|source| ActivationError::capacity(ring, source))
}

fn pin_ring<T: RingElement>(
    platform: &dyn ServerPlatform,
    ring: &'static str,
    address: usize,
    layout: &RingLayout<T>,
) -> Result<PinnedRegion, ActivationError> {
    let len = layout.total_len();
    let invalid = ActivationError::InvalidUserBuffer { ring, address, len };
    if address % RingLayout::<T>::alignment() != 0 {
        return Err(invalid);
    }
    platform.pin(address, len).map_err(|e| {
        tracing::debug!(ring = ring, error = %e, "Pinning ring failed");
        invalid
    })
}

fn reference(
    platform: &dyn ServerPlatform,
    ring: &'static str,
    handle: &SignalHandle,
    rights: SignalRights,
) -> Result<SignalHandle, ActivationError> {
    platform
        .reference_signal(handle, rights)
        .map_err(|e| ActivationError::SignalReference {
            ring,
            reason: e.to_string(),
        })
}

fn view<T: RingElement>(pin: &PinnedRegion, layout: &RingLayout<T>) -> RingBuffer<T> {
    // SAFETY: the pin covers `layout.total_len()` bytes at an aligned address
    // and is released only after the processor is joined and the event sink
    // uninstalled, which drops every view of it.
    unsafe { RingBuffer::from_raw(pin.base(), layout.capacity()) }
}

impl ServerSession {
    pub(crate) fn activate(
        device: &Arc<DeviceInner>,
        request: &ActivationRequest,
    ) -> Result<(), ActivationError> {
        let event_layout = ring_layout::<EventRecord>("event", request.event_capacity)?;
        let action_layout = ring_layout::<ActionRecord>("action", request.action_capacity)?;

        // Checked under the slot lock: `remove` sets the flag before its
        // teardown takes the lock, so no session can be armed after it.
        let mut slot = lock(&device.session);
        if device.is_removing() {
            return Err(ActivationError::DeviceRemoved);
        }
        if slot.is_some() {
            return Err(ActivationError::AlreadyActive);
        }

        let mut held = Held::default();
        match Self::arm(device, request, &event_layout, &action_layout, &mut held) {
            Ok((quit, processor)) => {
                tracing::info!(
                    device = %device.plane.name,
                    event_capacity = request.event_capacity,
                    action_capacity = request.action_capacity,
                    "Shaping session armed"
                );
                *slot = Some(ServerSession {
                    held,
                    quit,
                    processor,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %device.plane.name, error = %e, "Activation failed");
                held.reclaim(device.plane.events.uninstall());
                held.release(device.platform.as_ref());
                Err(e)
            }
        }
    }

    /// Acquire everything into `held`, then start the processor.
    fn arm(
        device: &Arc<DeviceInner>,
        request: &ActivationRequest,
        event_layout: &RingLayout<EventRecord>,
        action_layout: &RingLayout<ActionRecord>,
        held: &mut Held,
    ) -> Result<(Signal, JoinHandle<()>), ActivationError> {
        let platform = device.platform.as_ref();

        let event_pin = held.event_pin.insert(pin_ring(
            platform,
            "event",
            request.event_ring,
            event_layout,
        )?);
        let event_producer = RingProducer::new(view(event_pin, event_layout));

        let event_signal = reference(platform, "event", &request.event_signal, SignalRights::MODIFY)?;
        held.event_signal = Some(event_signal);

        let action_pin = held.action_pin.insert(pin_ring(
            platform,
            "action",
            request.action_ring,
            action_layout,
        )?);
        let action_consumer = RingConsumer::new(view(action_pin, action_layout));

        // The processor waits on it, so it needs synchronize as well.
        let action_signal = held.action_signal.insert(reference(
            platform,
            "action",
            &request.action_signal,
            SignalRights::ALL,
        )?);
        let data_available = action_signal.waitable().cloned().ok_or_else(|| {
            ActivationError::SignalReference {
                ring: "action",
                reason: "reference is not waitable".to_string(),
            }
        })?;

        if let Some(signal) = held.event_signal.take() {
            device.plane.events.install(EventSink {
                producer: Mutex::new(event_producer),
                signal,
            });
        }

        let quit = Signal::manual_reset();
        let processor = ActionProcessor::new(
            Arc::clone(&device.plane),
            action_consumer,
            quit.clone(),
            device.removed.clone(),
            data_available,
        );
        let handle = platform
            .spawn(
                &format!("{}-actions", device.plane.name),
                Box::new(move || processor.run()),
            )
            .map_err(|source| ActivationError::TaskSpawn { source })?;

        Ok((quit, handle))
    }

    /// Stop the processor and release every session resource.
    ///
    /// Returns whether a session was armed.
    pub(crate) fn teardown(device: &DeviceInner) -> bool {
        let mut slot = lock(&device.session);
        let Some(session) = slot.take() else {
            return false;
        };

        tracing::info!(device = %device.plane.name, "Destroying shaping session");

        let ServerSession {
            mut held,
            quit,
            processor,
        } = session;

        let sink = device.plane.events.uninstall();
        quit.set();
        if processor.join().is_err() {
            tracing::error!(device = %device.plane.name, "Action processor panicked");
        }

        held.reclaim(sink);
        held.release(device.platform.as_ref());
        true
    }
}
