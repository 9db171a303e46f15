//! Lock-free format-string cache (spec §4.3, component C5).
//!
//! Maps the numeric value of a compile-time format-string pointer to a
//! stable small index, so callers can resolve a `&'static str` literal once
//! and reference it cheaply afterwards (e.g. a binary formatter emitting an
//! id instead of the text). The table never deep-copies the string and is
//! never resized; a key of zero means "vacant".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

const TOMBSTONE: u64 = u64::MAX;

struct Slot {
    key: AtomicU64,
    value: OnceLock<&'static str>,
}

/// A fixed-size, lock-free open-addressed table from format-pointer key to
/// format string.
pub struct FormatCache {
    mask: usize,
    slots: Box<[Slot]>,
}

impl FormatCache {
    /// Build a cache sized to the next power of two `>= capacity`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots: Box<[Slot]> = (0..capacity)
            .map(|_| Slot { key: AtomicU64::new(0), value: OnceLock::new() })
            .collect();
        FormatCache { mask: capacity - 1, slots }
    }

    /// Compute the cache key for a `&'static str` format literal: the
    /// address of its first byte, treated as an opaque 64-bit integer. Two
    /// calls with the same compiled-in literal observe the same key because
    /// the compiler deduplicates identical string literals into one static.
    pub fn key_of(format: &'static str) -> u64 {
        let addr = format.as_ptr() as u64;
        // Address zero is reserved to mean "vacant"; this cannot happen for
        // a real static but guard against it rather than document UB.
        if addr == 0 { 1 } else { addr }
    }

    fn probe(&self, key: u64) -> impl Iterator<Item = usize> + '_ {
        let start = (key as usize) & self.mask;
        let len = self.slots.len();
        (0..len).map(move |i| (start + i) & self.mask)
    }

    /// Insert or overwrite `value` under `key`. Returns the stable slot index.
    pub fn set(&self, key: u64, value: &'static str) -> Option<usize> {
        self.get_or_set(key, value).map(|(index, _)| index)
    }

    /// Look up `key` without inserting.
    pub fn get(&self, key: u64) -> Option<&'static str> {
        for idx in self.probe(key) {
            let slot = &self.slots[idx];
            let existing = slot.key.load(Ordering::Acquire);
            if existing == 0 {
                return None;
            }
            if existing == key {
                return slot.value.get().copied();
            }
        }
        None
    }

    /// Return the value already cached at `key`, or claim a vacant slot and
    /// install `value`. Idempotent: repeated calls with the same key return
    /// the same index (spec invariant #10).
    pub fn get_or_set(&self, key: u64, value: &'static str) -> Option<(usize, &'static str)> {
        for idx in self.probe(key) {
            let slot = &self.slots[idx];
            loop {
                let existing = slot.key.load(Ordering::Acquire);
                if existing == key {
                    // Claimed (by us or a racing thread); make sure the
                    // value is published before handing it back.
                    let v = loop {
                        if let Some(v) = slot.value.get() {
                            break *v;
                        }
                        std::hint::spin_loop();
                    };
                    return Some((idx, v));
                }
                if existing == 0 {
                    match slot.key.compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => {
                            let _ = slot.value.set(value);
                            return Some((idx, *slot.value.get().unwrap()));
                        }
                        Err(_) => continue, // another thread claimed it; re-check
                    }
                }
                if existing == TOMBSTONE {
                    break; // skip past a removed entry, keep probing
                }
                break; // occupied by a different key, probe next slot
            }
        }
        None // table full
    }

    /// Fetch the value stored at a previously returned stable index.
    pub fn get_at(&self, index: usize) -> Option<&'static str> {
        self.slots.get(index).and_then(|slot| slot.value.get().copied())
    }

    /// Remove `key`. Implemented as a tombstone (the slot never becomes
    /// reusable for a different key) since the table is never resized or
    /// reclaimed — acceptable for a cache whose keys are a bounded set of
    /// compile-time literals.
    pub fn remove(&self, key: u64) -> bool {
        for idx in self.probe(key) {
            let slot = &self.slots[idx];
            let existing = slot.key.load(Ordering::Acquire);
            if existing == 0 {
                return false;
            }
            if existing == key {
                slot.key.store(TOMBSTONE, Ordering::Release);
                return true;
            }
        }
        false
    }
}
