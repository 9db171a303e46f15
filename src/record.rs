//! The immutable log record descriptor (spec §3 "Log Record", component C2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use crate::level::Level;
use crate::logger::LoggerInner;

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide monotonic record id.
///
/// Grounded on the teacher's handler-id counter pattern
/// (`state.rs::LoggerState::next_handler_id`), generalized to an atomic
/// fetch-add since records are produced concurrently from many threads.
pub fn next_record_id() -> u64 {
    NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static THREAD_ID: u64 = allocate_thread_id();
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

fn allocate_thread_id() -> u64 {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

/// An opaque, process-unique id for the calling thread.
///
/// Real OS thread ids are not portably available as a plain integer in safe
/// Rust, so the core mints its own process-wide sequence the first time each
/// thread logs, matching the spec's "opaque 64-bit thread id" requirement.
#[inline]
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// One logged event.
///
/// A value type: constructed on the issuing thread by a [`crate::record_builder::RecordBuilder`],
/// never mutated after the dispatcher is invoked. It may be copied explicitly
/// (pre-init buffering, the segmented-file pending ring) via `Clone`.
#[derive(Clone)]
pub struct LogRecord {
    /// Process-wide monotonic id.
    pub id: u64,
    /// Wall-clock timestamp with sub-second resolution.
    pub timestamp: DateTime<Utc>,
    /// Opaque id of the thread that produced the record.
    pub thread_id: u64,
    /// Id of the source this record was issued through.
    pub source_id: u32,
    /// Severity.
    pub level: Level,
    /// The formatted message. Owned (`Arc<str>`) rather than a borrowed
    /// pointer: the record routinely outlives the builder's buffer (pre-init
    /// replay, segmented-file pending ring), so the safe Rust rendition
    /// promotes the buffer slice to a ref-counted string at record-finalize
    /// time instead of carrying a raw pointer + length.
    pub message: Arc<str>,
    /// Weak reference back to the logger that issued this record, so a sink
    /// can recover source metadata for late formatting without keeping the
    /// logger alive.
    pub logger: Weak<LoggerInner>,
}

impl LogRecord {
    /// Construct a record, stamping id/timestamp/thread id at call time.
    pub fn new(source_id: u32, level: Level, message: Arc<str>, logger: Weak<LoggerInner>) -> Self {
        LogRecord {
            id: next_record_id(),
            timestamp: Utc::now(),
            thread_id: current_thread_id(),
            source_id,
            level,
            message,
            logger,
        }
    }

    /// Byte length of the formatted message, used by flush-policy byte counts
    /// and the segmented-file target's space reservation.
    #[inline]
    pub fn len(&self) -> usize {
        self.message.len()
    }

    /// True when the message is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}
