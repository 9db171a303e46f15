//! Per-thread statistics substrate (spec §3 "Statistics Variable", component C3).
//!
//! Every counter is an array of per-thread cache-line-aligned slots. `add`
//! stores only to the calling thread's slot (no cross-thread contention);
//! `sum` walks every slot. Slot ids are allocated once per thread on first use
//! and released on thread exit, bounded by a configured ceiling — requests
//! beyond the ceiling are counted as dropped rather than failing loudly,
//! matching the spec's "exception/panic policy" (§9): faults on this path
//! become counters, never propagate.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Default maximum number of distinct logging threads tracked per-process.
/// Matches the teacher's sizing instinct (`state.rs` defaults like
/// `buffer_size: 8192`): a generous constant rather than a user-tunable knob
/// on the hot path.
pub const DEFAULT_THREAD_SLOT_CAPACITY: usize = 256;

#[repr(align(64))]
struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    const fn new() -> Self {
        PaddedCounter(AtomicU64::new(0))
    }
}

struct SlotAllocator {
    capacity: usize,
    next: AtomicUsize,
    free: Mutex<Vec<usize>>,
    dropped: AtomicU64,
}

impl SlotAllocator {
    fn new(capacity: usize) -> Self {
        SlotAllocator {
            capacity,
            next: AtomicUsize::new(0),
            free: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn alloc(&self) -> Option<usize> {
        if let Some(slot) = self.free.lock().pop() {
            return Some(slot);
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        if slot < self.capacity {
            Some(slot)
        } else {
            // Over the ceiling: give the counter back, don't let `next` run away.
            self.next.fetch_sub(1, Ordering::Relaxed);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn release(&self, slot: usize) {
        self.free.lock().push(slot);
    }
}

static SLOT_ALLOCATOR: Lazy<SlotAllocator> = Lazy::new(|| SlotAllocator::new(DEFAULT_THREAD_SLOT_CAPACITY));

struct SlotGuard {
    slot: Option<usize>,
}

impl SlotGuard {
    fn new() -> Self {
        SlotGuard { slot: SLOT_ALLOCATOR.alloc() }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot {
            SLOT_ALLOCATOR.release(slot);
        }
    }
}

thread_local! {
    static THREAD_SLOT: SlotGuard = SlotGuard::new();
}

/// The current thread's stats slot, or `None` if the slot ceiling was
/// exceeded when this thread first logged.
#[inline]
fn current_slot() -> Option<usize> {
    THREAD_SLOT.with(|g| g.slot)
}

/// Count of thread-slot requests that exceeded the ceiling and were dropped.
pub fn dropped_slot_requests() -> u64 {
    SLOT_ALLOCATOR.dropped.load(Ordering::Relaxed)
}

/// A single named per-thread counter.
pub struct StatVar {
    counters: Box<[PaddedCounter]>,
}

impl StatVar {
    /// Create a counter sized to `capacity` thread slots.
    pub fn new(capacity: usize) -> Self {
        let counters = (0..capacity).map(|_| PaddedCounter::new()).collect();
        StatVar { counters }
    }

    /// Add `n` to the current thread's slot. A no-op (beyond bumping the
    /// global dropped-slot-requests counter) if this thread never obtained a
    /// slot.
    #[inline]
    pub fn add(&self, n: u64) {
        if let Some(slot) = current_slot() {
            if let Some(counter) = self.counters.get(slot) {
                counter.0.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    /// Increment the current thread's slot by one.
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    /// Sum across all thread slots.
    pub fn sum(&self) -> u64 {
        self.counters.iter().map(|c| c.0.load(Ordering::Relaxed)).sum()
    }
}

impl Default for StatVar {
    fn default() -> Self {
        StatVar::new(DEFAULT_THREAD_SLOT_CAPACITY)
    }
}

/// The base set of counters every [`crate::target::Target`] maintains,
/// extensible by concrete sinks (e.g. [`crate::target::buffered_file::BufferedFileWriter`]
/// adds buffer-write/byte/failure counters of its own).
#[derive(Default)]
pub struct TargetStats {
    pub submitted: StatVar,
    pub written: StatVar,
    pub failed_write: StatVar,
    pub discarded: StatVar,
    pub bytes_written: StatVar,
    pub flushes: StatVar,
}

/// A point-in-time snapshot of [`TargetStats`], safe to hand to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStatsSnapshot {
    pub submitted: u64,
    pub written: u64,
    pub failed_write: u64,
    pub discarded: u64,
    pub bytes_written: u64,
    pub flushes: u64,
}

impl TargetStats {
    pub fn snapshot(&self) -> TargetStatsSnapshot {
        TargetStatsSnapshot {
            submitted: self.submitted.sum(),
            written: self.written.sum(),
            failed_write: self.failed_write.sum(),
            discarded: self.discarded.sum(),
            bytes_written: self.bytes_written.sum(),
            flushes: self.flushes.sum(),
        }
    }
}
