//! Log target abstraction (spec §4.8, component C12).
//!
//! `Target` is the sink interface every concrete writer (buffered file,
//! segmented file, console, tracer, and any out-of-scope remote connector)
//! implements. `TargetBase` holds the state common to every target — level
//! ceiling, filter, flush policy, statistics, start/stop latches — so a
//! concrete target only has to implement `write_log_record` plus the
//! optional `do_start`/`do_stop`/`do_flush` hooks.

pub mod buffered_file;
pub mod console;
pub mod remote;
pub mod segmented_file;
pub mod syslog;
pub mod tracer;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::Result;
use crate::filter::{Filter, FilterOutcome};
use crate::flush_policy::{FlushDecision, FlushPolicy};
use crate::level::Level;
use crate::record::LogRecord;
use crate::stats::{TargetStats, TargetStatsSnapshot};

/// Bound all targets share: level ceiling, optional filter, flush policy,
/// statistics, and one-shot start/stop latches.
pub struct TargetBase {
    id: u32,
    name: String,
    pass_key: Option<String>,
    level: AtomicU8,
    filter: Option<Filter>,
    flush_policy: FlushPolicy,
    stats: TargetStats,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl TargetBase {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        pass_key: Option<String>,
        level: Level,
        filter: Option<Filter>,
        flush_policy: FlushPolicy,
    ) -> Self {
        TargetBase {
            id,
            name: name.into(),
            pass_key,
            level: AtomicU8::new(level.ordinal()),
            filter,
            flush_policy,
            stats: TargetStats::default(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn level(&self) -> Level {
        Level::from_ordinal(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Info)
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level.ordinal(), Ordering::Relaxed);
    }

    fn evaluate_filter(&self, record: &LogRecord) -> FilterOutcome {
        match &self.filter {
            Some(filter) => filter.evaluate(record),
            None => FilterOutcome { admit: true, burst_summary: None },
        }
    }

    /// Record a write failure that happened outside the normal `log` flow,
    /// for a target whose failure path doesn't go through `write_log_record`
    /// at all (and so never reaches `log`'s own `discarded` accounting).
    /// A target whose failures do flow through `write_log_record`'s `0`
    /// return (every concrete target in this crate, currently) should not
    /// call this — `log` already counts that as `discarded`.
    pub fn note_failed_write(&self) {
        self.stats.failed_write.incr();
    }
}

/// A log sink. `log` is the public entry point and has a default
/// implementation that evaluates the level/filter, calls
/// `write_log_record`, updates statistics, and consults the flush policy —
/// concrete targets should not need to override it.
pub trait Target: Send + Sync {
    fn base(&self) -> &TargetBase;

    /// Write the record, returning the number of bytes written, or `0` to
    /// mean "dropped by the target's own internal filter".
    fn write_log_record(&self, record: &LogRecord) -> usize;

    fn do_start(&self) -> Result<()> {
        Ok(())
    }

    fn do_stop(&self) {}

    fn do_flush(&self) {}

    fn id(&self) -> u32 {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn pass_key(&self) -> Option<&str> {
        self.base().pass_key.as_deref()
    }

    fn stats(&self) -> TargetStatsSnapshot {
        self.base().stats.snapshot()
    }

    /// One-shot, idempotent.
    fn start(&self) -> Result<()> {
        if self.base().started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.do_start()
    }

    /// One-shot, idempotent. Returns `true` once stopped (including when
    /// already stopped by a previous call).
    fn stop(&self) -> bool {
        let already_stopped = self.base().stopped.swap(true, Ordering::AcqRel);
        if !already_stopped {
            self.do_stop();
        }
        true
    }

    fn is_stopped(&self) -> bool {
        self.base().stopped.load(Ordering::Acquire)
    }

    /// The public write entry: evaluate level and filter, write, update
    /// stats, consult the flush policy. A target that has been stopped
    /// silently drops new work rather than erroring.
    fn log(&self, record: &LogRecord) {
        if self.is_stopped() {
            return;
        }
        if !record.level.admitted_by(self.base().level()) {
            return;
        }
        let outcome = self.base().evaluate_filter(record);
        if !outcome.admit {
            self.base().stats.discarded.incr();
            return;
        }
        self.base().stats.submitted.incr();
        let bytes = self.write_log_record(record);
        if bytes == 0 {
            self.base().stats.discarded.incr();
            return;
        }
        self.base().stats.written.incr();
        self.base().stats.bytes_written.add(bytes as u64);
        if self.base().flush_policy.record_write(bytes) == FlushDecision::Flush {
            self.flush();
        }
    }

    fn flush(&self) {
        self.do_flush();
        self.base().stats.flushes.incr();
        self.base().flush_policy.mark_flushed();
    }
}
