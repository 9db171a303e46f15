//! Bounded MPMC ring buffer (spec §4's component C4), used to hold pending
//! records during segmented-file rotation (§4.10) and as the general-purpose
//! bounded queue behind the pre-init buffer (§4.12).
//!
//! This is the classic Vyukov bounded MPMC queue: each slot carries a
//! sequence number instead of a coarse enum, which is what lets push/pop
//! complete in a handful of atomic ops with no CAS loop longer than a cache
//! miss. It still implements the four-state contract the spec describes
//! (VACANT → WRITING → READY → READING): a slot whose sequence equals its
//! slot index is VACANT-for-writing; once written its sequence advances to
//! `index + 1`, which is READY-for-reading; after a reader claims and drains
//! it, the sequence advances to `index + capacity`, wrapping back to VACANT
//! for the next lap. WRITING/READING are the transient states a producer or
//! consumer holds between claiming a slot (via CAS on the enqueue/dequeue
//! cursor) and publishing the next sequence value.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded multi-producer multi-consumer ring buffer.
///
/// Capacity is rounded up to the next power of two at construction (the
/// `& (capacity - 1)` index mask requires it); callers that need an exact
/// size should treat the constructor argument as a lower bound.
pub struct RingBuffer<T> {
    mask: usize,
    buffer: Box<[Slot<T>]>,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring with room for at least `capacity` in-flight elements.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot { sequence: AtomicUsize::new(i), value: UnsafeCell::new(MaybeUninit::uninit()) })
            .collect();
        RingBuffer {
            mask: capacity - 1,
            buffer,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    /// Usable capacity (a power of two, possibly larger than requested).
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Best-effort count of items currently enqueued. Monotone with respect
    /// to the issuance order of `push`/`pop` calls, but may be stale under
    /// concurrent access (spec invariant #9 only requires push/pop to be
    /// linearizable, not `len`).
    pub fn len(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Acquire);
        let deq = self.dequeue_pos.load(Ordering::Acquire);
        enq.saturating_sub(deq)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt to enqueue `value`. Returns it back on failure (ring full).
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            match diff.cmp(&0) {
                std::cmp::Ordering::Equal => {
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            unsafe { (*cell.value.get()).write(value) };
                            cell.sequence.store(pos + 1, Ordering::Release);
                            return Ok(());
                        }
                        Err(current) => pos = current,
                    }
                }
                std::cmp::Ordering::Less => return Err(value),
                std::cmp::Ordering::Greater => pos = self.enqueue_pos.load(Ordering::Relaxed),
            }
        }
    }

    /// Push, spin-waiting with CPU relaxation while the ring is full. Used by
    /// the segmented-file target's hot path, where the spec requires writers
    /// to spin rather than drop when the pending ring backs up (§4.10).
    pub fn push_spin(&self, mut value: T) {
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Attempt to dequeue the oldest enqueued item, FIFO.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;
            match diff.cmp(&0) {
                std::cmp::Ordering::Equal => {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            let value = unsafe { (*cell.value.get()).assume_init_read() };
                            cell.sequence.store(pos + self.mask + 1, Ordering::Release);
                            return Some(value);
                        }
                        Err(current) => pos = current,
                    }
                }
                std::cmp::Ordering::Less => return None,
                std::cmp::Ordering::Greater => pos = self.dequeue_pos.load(Ordering::Relaxed),
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let r: RingBuffer<u32> = RingBuffer::new(5);
        assert_eq!(r.capacity(), 8);
    }

    #[test]
    fn push_pop_fifo_order() {
        let r = RingBuffer::new(4);
        r.try_push(1).unwrap();
        r.try_push(2).unwrap();
        r.try_push(3).unwrap();
        assert_eq!(r.try_pop(), Some(1));
        assert_eq!(r.try_pop(), Some(2));
        assert_eq!(r.try_pop(), Some(3));
        assert_eq!(r.try_pop(), None);
    }

    #[test]
    fn push_fails_when_full() {
        let r = RingBuffer::new(2);
        r.try_push(1).unwrap();
        r.try_push(2).unwrap();
        assert_eq!(r.try_push(3), Err(3));
    }

    #[test]
    fn len_is_monotone_with_pushes_and_pops() {
        let r = RingBuffer::new(8);
        assert_eq!(r.len(), 0);
        r.try_push(1).unwrap();
        assert_eq!(r.len(), 1);
        r.try_push(2).unwrap();
        assert_eq!(r.len(), 2);
        r.try_pop();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_all_items() {
        let ring = Arc::new(RingBuffer::new(16));
        let total_produced = std::sync::atomic::AtomicUsize::new(0);
        let total_produced = Arc::new(total_produced);
        const PER_PRODUCER: u64 = 1000;
        const PRODUCERS: u64 = 4;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|t| {
                let ring = ring.clone();
                let total_produced = total_produced.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        ring.push_spin(t * PER_PRODUCER + i);
                        total_produced.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        // A consumer has to run concurrently with the producers: once the
        // ring's 16 slots fill, `push_spin` spins on a `try_pop` freeing a
        // slot, so draining only after `join()` would deadlock every
        // producer against a full ring.
        let consumer = {
            let ring = ring.clone();
            let total_produced = total_produced.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                let target = (PRODUCERS * PER_PRODUCER) as usize;
                while seen.len() < target {
                    match ring.try_pop() {
                        Some(v) => seen.push(v),
                        None => {
                            if total_produced.load(Ordering::Relaxed) >= target && ring.is_empty() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        let mut seen = consumer.join().unwrap();
        assert_eq!(seen.len(), 4000);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4000);
    }
}
