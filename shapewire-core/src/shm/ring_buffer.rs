// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fixed-capacity circular buffer shared across a trust boundary.
//!
//! The header holds two element offsets, both reduced modulo capacity. They
//! are the only cross-domain synchronization: the producer writes the slot and
//! then release-stores `write`; the consumer acquire-loads `write` before
//! reading slots and release-stores `read` when done. One slot is always left
//! free so `read == write` means empty and `write + 1 == read` means full.
//!
//! Each side serializes its own callers (methods take `&mut self`, wrap the
//! ring in a mutex to share it). No lock is ever shared with the other side.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::RingError;
use crate::shm::layout::RingLayout;
use crate::types::Capacity;

/// Plain-old-data element that may be copied in and out of shared memory.
///
/// # Safety
/// Every bit pattern must be a valid value of the type, and the type must not
/// own heap memory or references.
pub unsafe trait RingElement: Copy + Send + 'static {}

unsafe impl RingElement for u8 {}
unsafe impl RingElement for u32 {}
unsafe impl RingElement for u64 {}

/// Ring header stored at the start of each ring.
#[repr(C)]
pub struct RingHeader {
    /// Next slot the consumer will read.
    pub(crate) read: AtomicU32,
    /// Next slot the producer will write.
    pub(crate) write: AtomicU32,
}

/// View of one ring living in shared memory.
pub struct RingBuffer<T: RingElement> {
    header: NonNull<RingHeader>,
    slots: NonNull<T>,
    capacity: u32,
    _marker: PhantomData<T>,
}

// SAFETY: the view only touches shared memory through atomics and raw copies
// governed by the offset protocol; mutation requires `&mut self`.
unsafe impl<T: RingElement> Send for RingBuffer<T> {}
unsafe impl<T: RingElement> Sync for RingBuffer<T> {}

impl<T: RingElement> RingBuffer<T> {
    /// Create a view over a ring starting at `base`.
    ///
    /// # Safety
    /// `base` must be aligned to [`RingLayout::alignment`], valid for reads and
    /// writes of `RingLayout::<T>::total_len()` bytes, and stay mapped for as
    /// long as the view (and any view derived from it) is used.
    pub unsafe fn from_raw(base: NonNull<u8>, capacity: Capacity) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % RingLayout::<T>::alignment(), 0);
        let slots = base.as_ptr().add(RingLayout::<T>::slots_offset()) as *mut T;
        Self {
            header: base.cast(),
            // SAFETY: derived from a non-null base with an in-bounds offset
            slots: NonNull::new_unchecked(slots),
            capacity: capacity.get(),
            _marker: PhantomData,
        }
    }

    /// Get the capacity in elements.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: header is valid for the lifetime of the view
        unsafe { self.header.as_ref() }
    }

    /// Shared read offset, reduced modulo capacity.
    pub fn read_offset(&self) -> u32 {
        self.header().read.load(Ordering::Acquire) % self.capacity
    }

    /// Shared write offset, reduced modulo capacity.
    pub fn write_offset(&self) -> u32 {
        self.header().write.load(Ordering::Acquire) % self.capacity
    }

    /// Number of live elements given the shared offsets.
    pub fn len(&self) -> usize {
        self.distance(self.read_offset(), self.write_offset())
    }

    /// Elements between `read` and `write`, computed without u32 overflow.
    fn distance(&self, read: u32, write: u32) -> usize {
        let capacity = u64::from(self.capacity);
        ((u64::from(write) + capacity - u64::from(read)) % capacity) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.read_offset() == self.write_offset()
    }

    /// Push one element, publishing it with a release store of `write`.
    ///
    /// Returns `RingError::Full` without writing anything if the ring holds
    /// `capacity - 1` elements.
    pub fn try_push(&mut self, item: T) -> Result<(), RingError> {
        let write = self.write_offset();
        self.push_at(write, item)?;
        Ok(())
    }

    /// Drain every available element, appending them to `out` in order.
    ///
    /// Returns the number drained; zero means the ring was empty.
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        let read = self.read_offset();
        let write = self.write_offset();
        let count = self.copy_range(read, write, out);
        if count > 0 {
            self.header().read.store(write, Ordering::Release);
        }
        count
    }

    /// Drain every available element.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        self.drain_into(&mut out);
        out
    }

    /// Write `item` at `write` unless that would fill the ring, then publish.
    /// Returns the new write offset.
    fn push_at(&self, write: u32, item: T) -> Result<u32, RingError> {
        let next = (write + 1) % self.capacity;
        if next == self.read_offset() {
            return Err(RingError::Full);
        }

        // SAFETY: write < capacity, and the slot is owned by the producer
        // until the offset below is published.
        unsafe { self.slots.as_ptr().add(write as usize).write(item) };

        self.header().write.store(next, Ordering::Release);
        Ok(next)
    }

    /// Copy slots `[read, write)` into `out`, handling wraparound as two
    /// contiguous copies.
    fn copy_range(&self, read: u32, write: u32, out: &mut Vec<T>) -> usize {
        if read == write {
            return 0;
        }
        if read < write {
            self.copy_slots(read as usize, (write - read) as usize, out);
        } else {
            self.copy_slots(read as usize, (self.capacity - read) as usize, out);
            self.copy_slots(0, write as usize, out);
        }
        self.distance(read, write)
    }

    fn copy_slots(&self, start: usize, count: usize, out: &mut Vec<T>) {
        if count == 0 {
            return;
        }
        debug_assert!(start + count <= self.capacity as usize);
        out.reserve(count);
        let len = out.len();
        // SAFETY: the source range is inside the slot array, the destination
        // was reserved above, and T is plain data.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.slots.as_ptr().add(start),
                out.as_mut_ptr().add(len),
                count,
            );
            out.set_len(len + count);
        }
    }

    fn read_slot(&self, index: u32) -> T {
        // SAFETY: index < capacity and the slot was published by the producer
        unsafe { self.slots.as_ptr().add(index as usize).read() }
    }
}

/// Producer that keeps its own write cursor instead of trusting the shared one.
///
/// Used on the privileged side: the peer can scribble over the header, but the
/// producer only ever writes at its private cursor and reduces the peer's read
/// offset modulo capacity.
pub struct RingProducer<T: RingElement> {
    ring: RingBuffer<T>,
    write: u32,
}

impl<T: RingElement> RingProducer<T> {
    pub fn new(ring: RingBuffer<T>) -> Self {
        let write = ring.write_offset();
        Self { ring, write }
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    pub fn try_push(&mut self, item: T) -> Result<(), RingError> {
        self.write = self.ring.push_at(self.write, item)?;
        Ok(())
    }
}

/// Sole consumer that keeps its own read cursor.
///
/// Publishes the advanced read offset once per drained batch.
pub struct RingConsumer<T: RingElement> {
    ring: RingBuffer<T>,
    read: u32,
}

impl<T: RingElement> RingConsumer<T> {
    pub fn new(ring: RingBuffer<T>) -> Self {
        let read = ring.read_offset();
        Self { ring, read }
    }

    /// Whether the producer has published anything past our cursor.
    pub fn has_pending(&self) -> bool {
        self.ring.write_offset() != self.read
    }

    /// Hand every pending element to `handle`, then publish the read offset once.
    ///
    /// Returns the number of elements handled.
    pub fn drain_with(&mut self, mut handle: impl FnMut(T)) -> usize {
        let write = self.ring.write_offset();
        if write == self.read {
            return 0;
        }

        let capacity = self.ring.capacity();
        let mut read = self.read;
        let mut count = 0;
        while read != write {
            handle(self.ring.read_slot(read));
            read = (read + 1) % capacity;
            count += 1;
        }

        self.read = read;
        self.ring.header().read.store(read, Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemoryRegion;

    fn ring<T: RingElement>(capacity: usize) -> (SharedMemoryRegion, RingBuffer<T>) {
        let layout = RingLayout::<T>::new(capacity).unwrap();
        let region = SharedMemoryRegion::anonymous(layout.total_len()).unwrap();
        let base = NonNull::new(region.as_ptr()).unwrap();
        // SAFETY: the region is page aligned, large enough and outlives the view
        let view = unsafe { RingBuffer::from_raw(base, layout.capacity()) };
        (region, view)
    }

    fn second_view<T: RingElement>(region: &SharedMemoryRegion, capacity: usize) -> RingBuffer<T> {
        let layout = RingLayout::<T>::new(capacity).unwrap();
        let base = NonNull::new(region.as_ptr()).unwrap();
        // SAFETY: same mapping as the first view
        unsafe { RingBuffer::from_raw(base, layout.capacity()) }
    }

    #[test]
    fn test_holds_at_most_capacity_minus_one() {
        let (_region, mut ring) = ring::<u64>(8);
        for i in 0..7 {
            ring.try_push(i).unwrap();
        }
        assert_eq!(ring.len(), 7);
        assert_eq!(ring.try_push(99), Err(RingError::Full));
        assert_eq!(ring.drain_all(), (0..7).collect::<Vec<_>>());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_empty_disambiguation_capacity_two() {
        let (_region, mut ring) = ring::<u32>(2);
        ring.try_push(1).unwrap();
        assert_eq!(ring.try_push(2), Err(RingError::Full));

        assert_eq!(ring.drain_all(), vec![1]);
        let mut out = Vec::new();
        assert_eq!(ring.drain_into(&mut out), 0);
        assert!(out.is_empty());

        ring.try_push(3).unwrap();
        assert_eq!(ring.drain_all(), vec![3]);
    }

    #[test]
    fn test_capacity_one_is_always_full() {
        let (_region, mut ring) = ring::<u32>(1);
        assert_eq!(ring.try_push(1), Err(RingError::Full));
        assert!(ring.drain_all().is_empty());
    }

    #[test]
    fn test_drain_wraps_in_logical_order() {
        let (_region, mut ring) = ring::<u32>(4);
        // Move both offsets to index 2.
        ring.try_push(0).unwrap();
        ring.try_push(0).unwrap();
        ring.drain_all();
        assert_eq!(ring.read_offset(), 2);

        ring.try_push(10).unwrap();
        ring.try_push(11).unwrap();
        ring.try_push(12).unwrap();
        assert_eq!(ring.write_offset(), 1);
        assert_eq!(ring.try_push(13), Err(RingError::Full));

        assert_eq!(ring.drain_all(), vec![10, 11, 12]);
        assert_eq!(ring.read_offset(), 1);
    }

    #[test]
    fn test_producer_ignores_corrupted_shared_write() {
        let (region, shared) = ring::<u32>(4);
        let mut producer = RingProducer::new(shared);
        producer.try_push(5).unwrap();

        // Peer scribbles an out-of-range offset into the header.
        let mut other = second_view::<u32>(&region, 4);
        other.header().write.store(u32::MAX, Ordering::Release);

        // Producer still writes at its private cursor and republishes.
        producer.try_push(6).unwrap();
        assert_eq!(other.write_offset(), 2);
        assert_eq!(other.drain_all(), vec![5, 6]);
    }

    #[test]
    fn test_consumer_publishes_once_per_batch() {
        let (region, mut client) = ring::<u32>(8);
        let mut consumer = RingConsumer::new(second_view::<u32>(&region, 8));
        assert!(!consumer.has_pending());

        for i in 0..5 {
            client.try_push(i).unwrap();
        }
        assert!(consumer.has_pending());

        let mut seen = Vec::new();
        assert_eq!(consumer.drain_with(|v| seen.push(v)), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(client.read_offset(), 5);
        assert_eq!(consumer.drain_with(|_| panic!("nothing pending")), 0);
    }

    #[test]
    fn test_cross_thread_spsc_preserves_order() {
        let (region, mut producer) = ring::<u64>(16);
        let mut consumer = second_view::<u64>(&region, 16);
        const COUNT: u64 = 10_000;

        let handle = std::thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                if producer.try_push(next).is_ok() {
                    next += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(COUNT as usize);
        while (received.len() as u64) < COUNT {
            if consumer.drain_into(&mut received) == 0 {
                std::thread::yield_now();
            }
        }
        handle.join().unwrap();

        assert!(received.iter().copied().eq(0..COUNT));
        drop(region);
    }
}
