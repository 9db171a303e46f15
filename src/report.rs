//! Internal diagnostics channel (spec §4.13, component C17).
//!
//! The core's own diagnostics (failed file opens, misuse reports, config
//! warnings) are issued through a dedicated source named `elog`, routed
//! through the same dispatcher every user-registered target sees, plus an
//! optional application-installed [`ReportHandler`] callback (`setReportHandler`,
//! recovered from `elog_report_handler.h` [SUPPLEMENT]). Recursion is bounded
//! by a per-thread depth counter: if handling one `elog` record itself
//! triggers another (e.g. a target's write path fails and reports that
//! failure), the record at depth 2 short-circuits straight to stderr instead
//! of recursing into dispatch again.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::level::Level;
use crate::logger::Logger;
use crate::registry::Registry;
use crate::source::SourceTree;

/// Qualified name of the dedicated internal-diagnostics source.
pub const REPORT_SOURCE_NAME: &str = "elog";

/// A record at this depth short-circuits to stderr rather than dispatching.
const MAX_REPORT_DEPTH: u8 = 2;

thread_local! {
    static REPORT_DEPTH: Cell<u8> = Cell::new(0);
}

/// Callback an application may install to observe every report-channel
/// record in addition to normal dispatch.
pub trait ReportHandler: Send + Sync {
    fn on_report(&self, level: Level, message: &str);
}

/// The core's internal diagnostics sink.
pub struct ReportChannel {
    logger: Logger,
    level: AtomicU8,
    handler: RwLock<Option<Arc<dyn ReportHandler>>>,
}

impl ReportChannel {
    pub fn new(sources: &Arc<SourceTree>, registry: Arc<Registry>, level: Level) -> Self {
        let source = sources
            .define_source(REPORT_SOURCE_NAME, true)
            .expect("defining the built-in elog source cannot fail");
        ReportChannel {
            logger: Logger::new_shared(source, registry),
            level: AtomicU8::new(level.ordinal()),
            handler: RwLock::new(None),
        }
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level.ordinal(), Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        Level::from_ordinal(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Warn)
    }

    pub fn is_trace_enabled(&self) -> bool {
        self.level().ordinal() >= Level::Trace.ordinal()
    }

    pub fn set_handler(&self, handler: Option<Arc<dyn ReportHandler>>) {
        *self.handler.write() = handler;
    }

    /// Emit one diagnostic record.
    pub fn report(&self, level: Level, message: &str) {
        if level.ordinal() > self.level().ordinal() {
            return;
        }
        if let Some(handler) = self.handler.read().as_ref() {
            handler.on_report(level, message);
        }

        struct DepthGuard;
        impl Drop for DepthGuard {
            fn drop(&mut self) {
                REPORT_DEPTH.with(|d| d.set(d.get() - 1));
            }
        }
        let depth = REPORT_DEPTH.with(|d| {
            let current = d.get();
            d.set(current + 1);
            current
        });
        let _guard = DepthGuard;

        if depth >= MAX_REPORT_DEPTH {
            eprintln!("[{level}] {message}");
            return;
        }
        self.logger.log_no_format(level, message);
    }
}

static GLOBAL: RwLock<Option<Arc<ReportChannel>>> = RwLock::new(None);

/// Install the process-wide report channel, replacing any previous one —
/// called on every `initialize` (including a re-initialize after
/// `terminate`), not just the first.
pub fn install(channel: Arc<ReportChannel>) {
    *GLOBAL.write() = Some(channel);
}

/// Drop the process-wide report channel (called by `terminate`); later
/// reports fall back to stderr until the next `install`.
pub fn uninstall() {
    *GLOBAL.write() = None;
}

/// Fetch the process-wide report channel, if `initialize` has run.
pub fn global() -> Option<Arc<ReportChannel>> {
    GLOBAL.read().clone()
}

/// Report through the global channel, or straight to stderr if none has been
/// installed yet (pre-`initialize` diagnostics).
pub fn report(level: Level, message: &str) {
    match global() {
        Some(channel) => channel.report(level, message),
        None => eprintln!("[{level}] {message}"),
    }
}

pub fn report_error(message: impl AsRef<str>) {
    report(Level::Error, message.as_ref());
}

pub fn report_warning(message: impl AsRef<str>) {
    report(Level::Warn, message.as_ref());
}

pub fn report_trace(message: impl AsRef<str>) {
    report(Level::Trace, message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush_policy::FlushPolicy;
    use crate::record::LogRecord;
    use crate::target::{Target, TargetBase};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    struct RecordingTarget {
        base: TargetBase,
        lines: Mutex<Vec<String>>,
    }

    impl RecordingTarget {
        fn new() -> Arc<Self> {
            Arc::new(RecordingTarget {
                base: TargetBase::new(0, "recorder", None, Level::Trace, None, FlushPolicy::immediate()),
                lines: Mutex::new(Vec::new()),
            })
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    impl Target for RecordingTarget {
        fn base(&self) -> &TargetBase {
            &self.base
        }

        fn write_log_record(&self, record: &LogRecord) -> usize {
            self.lines.lock().push(record.message.to_string());
            record.len()
        }
    }

    fn fresh_channel() -> (Arc<ReportChannel>, Arc<RecordingTarget>) {
        let tree = Arc::new(SourceTree::new());
        let registry = Arc::new(Registry::new(tree.clone()));
        let target = RecordingTarget::new();
        registry.add_target(target.clone()).unwrap();
        let channel = Arc::new(ReportChannel::new(&tree, registry, Level::Diag));
        (channel, target)
    }

    #[test]
    fn report_dispatches_through_the_elog_source() {
        let (channel, target) = fresh_channel();
        channel.report(Level::Warn, "something is off");
        assert_eq!(target.lines(), vec!["something is off".to_string()]);
    }

    #[test]
    fn report_above_level_ceiling_is_dropped() {
        let (channel, target) = fresh_channel();
        channel.set_level(Level::Error);
        channel.report(Level::Trace, "too noisy");
        assert!(target.lines().is_empty());
    }

    #[test]
    fn installed_handler_sees_every_report() {
        let (channel, _target) = fresh_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        struct Recorder(Arc<Mutex<Vec<String>>>);
        impl ReportHandler for Recorder {
            fn on_report(&self, _level: Level, message: &str) {
                self.0.lock().push(message.to_string());
            }
        }
        channel.set_handler(Some(Arc::new(Recorder(seen.clone()))));
        channel.report(Level::Info, "observed");
        assert_eq!(seen.lock().clone(), vec!["observed".to_string()]);
    }

    struct RecursiveTarget {
        base: TargetBase,
        lines: Mutex<Vec<String>>,
        channel: Mutex<Option<Arc<ReportChannel>>>,
        calls: AtomicU32,
    }

    impl RecursiveTarget {
        fn new() -> Arc<Self> {
            Arc::new(RecursiveTarget {
                base: TargetBase::new(0, "recursive", None, Level::Trace, None, FlushPolicy::immediate()),
                lines: Mutex::new(Vec::new()),
                channel: Mutex::new(None),
                calls: AtomicU32::new(0),
            })
        }

        fn set_channel(&self, channel: Arc<ReportChannel>) {
            *self.channel.lock() = Some(channel);
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    impl Target for RecursiveTarget {
        fn base(&self) -> &TargetBase {
            &self.base
        }

        fn write_log_record(&self, record: &LogRecord) -> usize {
            self.lines.lock().push(record.message.to_string());
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            if n < 2 {
                if let Some(channel) = self.channel.lock().clone() {
                    let next = if n == 0 { "nested" } else { "double-nested" };
                    channel.report(Level::Error, next);
                }
            }
            record.len()
        }
    }

    #[test]
    fn recursive_reports_short_circuit_at_depth_two() {
        let tree = Arc::new(SourceTree::new());
        let registry = Arc::new(Registry::new(tree.clone()));
        let target = RecursiveTarget::new();
        registry.add_target(target.clone()).unwrap();
        let channel = Arc::new(ReportChannel::new(&tree, registry, Level::Diag));
        target.set_channel(channel.clone());

        channel.report(Level::Error, "top");

        // "top" dispatches and writes; the target's write path re-enters
        // `report` with "nested" (depth 1, still dispatches and writes);
        // that re-enters again with "double-nested", which hits depth 2 and
        // short-circuits to stderr instead of reaching the target.
        assert_eq!(target.lines(), vec!["top".to_string(), "nested".to_string()]);
    }
}
