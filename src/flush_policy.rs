//! Flush scheduling policy (spec §4.7, component C9).
//!
//! A target calls [`FlushPolicy::record_write`] after every write and flushes
//! iff it returns [`FlushDecision::Flush`], then calls
//! [`FlushPolicy::mark_flushed`]. `Group` adds leader election: when several
//! threads cross the threshold around the same time, only one is told to
//! flush (and is expected to do so on behalf of the others); the rest hold.
//! `Chain` lets a controller's flush decisions themselves be throttled by a
//! [`Moderator`], so a flood of small writes can't turn into a flush storm.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::rate_limiter::{Moderator, ModeratorOutcome};

/// Whether a target should flush after the write just recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    Hold,
    Flush,
}

enum Trigger {
    Never,
    Immediate,
    Count { threshold: u64, seen: AtomicU64 },
    Size { threshold: u64, seen: AtomicU64 },
    Time { period: Duration, last: Mutex<Instant> },
    Group { size: u64, timeout: Duration, seen: AtomicU64, leading: AtomicBool, window_start: Mutex<Instant> },
    Chain { controller: Box<FlushPolicy>, moderator: Moderator },
}

/// A flush-scheduling policy attached to a target.
pub struct FlushPolicy {
    trigger: Trigger,
}

impl FlushPolicy {
    pub fn never() -> Self {
        FlushPolicy { trigger: Trigger::Never }
    }

    pub fn immediate() -> Self {
        FlushPolicy { trigger: Trigger::Immediate }
    }

    pub fn count(threshold: u64) -> Self {
        FlushPolicy { trigger: Trigger::Count { threshold: threshold.max(1), seen: AtomicU64::new(0) } }
    }

    pub fn size(threshold_bytes: u64) -> Self {
        FlushPolicy { trigger: Trigger::Size { threshold: threshold_bytes.max(1), seen: AtomicU64::new(0) } }
    }

    pub fn time(period: Duration) -> Self {
        FlushPolicy { trigger: Trigger::Time { period, last: Mutex::new(Instant::now()) } }
    }

    pub fn group(size: u64, timeout: Duration) -> Self {
        FlushPolicy {
            trigger: Trigger::Group {
                size: size.max(1),
                timeout,
                seen: AtomicU64::new(0),
                leading: AtomicBool::new(false),
                window_start: Mutex::new(Instant::now()),
            },
        }
    }

    pub fn chain(controller: FlushPolicy, moderator: Moderator) -> Self {
        FlushPolicy { trigger: Trigger::Chain { controller: Box::new(controller), moderator } }
    }

    /// Record one write of `bytes` bytes; returns whether to flush now.
    pub fn record_write(&self, bytes: usize) -> FlushDecision {
        match &self.trigger {
            Trigger::Never => FlushDecision::Hold,
            Trigger::Immediate => FlushDecision::Flush,
            Trigger::Count { threshold, seen } => {
                let n = seen.fetch_add(1, Ordering::AcqRel) + 1;
                if n >= *threshold {
                    FlushDecision::Flush
                } else {
                    FlushDecision::Hold
                }
            }
            Trigger::Size { threshold, seen } => {
                let n = seen.fetch_add(bytes as u64, Ordering::AcqRel) + bytes as u64;
                if n >= *threshold {
                    FlushDecision::Flush
                } else {
                    FlushDecision::Hold
                }
            }
            Trigger::Time { period, last } => {
                let mut last = last.lock();
                if last.elapsed() >= *period {
                    *last = Instant::now();
                    FlushDecision::Flush
                } else {
                    FlushDecision::Hold
                }
            }
            Trigger::Group { size, timeout, seen, leading, window_start } => {
                let n = seen.fetch_add(1, Ordering::AcqRel) + 1;
                let timed_out = window_start.lock().elapsed() >= *timeout;
                if n >= *size || timed_out {
                    // Only the thread that wins the CAS leads this group's flush.
                    if leading
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        FlushDecision::Flush
                    } else {
                        FlushDecision::Hold
                    }
                } else {
                    FlushDecision::Hold
                }
            }
            Trigger::Chain { controller, moderator } => match controller.record_write(bytes) {
                FlushDecision::Hold => FlushDecision::Hold,
                FlushDecision::Flush => match moderator.check() {
                    ModeratorOutcome::Denied => FlushDecision::Hold,
                    ModeratorOutcome::Admitted | ModeratorOutcome::AdmittedAfterBurst { .. } => FlushDecision::Flush,
                },
            },
        }
    }

    /// Reset internal counters after a flush has actually happened.
    /// Idempotent: calling it without an intervening `record_write` that
    /// returned `Flush` is harmless.
    pub fn mark_flushed(&self) {
        match &self.trigger {
            Trigger::Never | Trigger::Immediate => {}
            Trigger::Count { seen, .. } => seen.store(0, Ordering::Release),
            Trigger::Size { seen, .. } => seen.store(0, Ordering::Release),
            Trigger::Time { last, .. } => *last.lock() = Instant::now(),
            Trigger::Group { seen, leading, window_start, .. } => {
                seen.store(0, Ordering::Release);
                *window_start.lock() = Instant::now();
                leading.store(false, Ordering::Release);
            }
            Trigger::Chain { controller, .. } => controller.mark_flushed(),
        }
    }
}
