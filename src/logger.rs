//! Thread-safe front-end bound to a source (spec §4.2, component C11).
//!
//! A `Logger` is either *shared* (its record-builder stack lives in the
//! calling thread's thread-local storage, so many loggers on the same thread
//! interleave through the same re-entrancy stack) or *private* (it owns a
//! [`OwnedBuilderStack`] instead, for single-thread use). Both expose
//! identical methods; only the builder-stack storage differs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::level::Level;
use crate::record::LogRecord;
use crate::record_builder::{self, OwnedBuilderStack, RecordBuilder};
use crate::registry::Registry;
use crate::source::Source;

static NEXT_LOGGER_ID: AtomicU64 = AtomicU64::new(1);

fn next_logger_id() -> u64 {
    NEXT_LOGGER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a logger's record-builder stack lives.
enum BuilderStack {
    Shared,
    Private(OwnedBuilderStack),
}

impl BuilderStack {
    fn acquire_depth(&self) -> usize {
        match self {
            BuilderStack::Shared => record_builder::acquire_depth(),
            BuilderStack::Private(stack) => stack.acquire_depth(),
        }
    }

    fn with_depth<R>(&self, depth: usize, f: impl FnOnce(&mut RecordBuilder) -> R) -> R {
        match self {
            BuilderStack::Shared => record_builder::with_depth(depth, f),
            BuilderStack::Private(stack) => stack.with_depth(depth, f),
        }
    }

    fn finish_at_depth(&self, depth: usize) -> Arc<str> {
        match self {
            BuilderStack::Shared => record_builder::finish_at_depth(depth),
            BuilderStack::Private(stack) => stack.finish_at_depth(depth),
        }
    }
}

/// Shared state behind a [`Logger`] handle. Records carry a `Weak<LoggerInner>`
/// back-reference (see [`crate::record::LogRecord::logger`]) so a sink can
/// recover source metadata for late formatting without keeping the logger
/// itself alive.
pub struct LoggerInner {
    id: u64,
    source: Arc<Source>,
    registry: Arc<Registry>,
    builders: BuilderStack,
}

/// A handle bound to a [`Source`], used to emit records through a [`Registry`].
#[derive(Clone)]
pub struct Logger(Arc<LoggerInner>);

impl Logger {
    /// A logger whose builder stack lives in the calling thread's TLS — safe
    /// to clone and use concurrently from any thread.
    pub fn new_shared(source: Arc<Source>, registry: Arc<Registry>) -> Logger {
        Logger(Arc::new(LoggerInner {
            id: next_logger_id(),
            source,
            registry,
            builders: BuilderStack::Shared,
        }))
    }

    /// A logger with its own builder stack. Intended for single-threaded
    /// use; concurrent calls contend on an internal mutex rather than racing.
    pub fn new_private(source: Arc<Source>, registry: Arc<Registry>) -> Logger {
        Logger(Arc::new(LoggerInner {
            id: next_logger_id(),
            source,
            registry,
            builders: BuilderStack::Private(OwnedBuilderStack::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.0.source
    }

    /// `true` iff a record at `level` would be admitted by this logger's
    /// source ceiling. Hot-path check; callers should skip formatting work
    /// entirely when this returns `false`.
    #[inline]
    pub fn can_log(&self, level: Level) -> bool {
        self.0.source.can_log(level)
    }

    fn weak(&self) -> Weak<LoggerInner> {
        Arc::downgrade(&self.0)
    }

    fn dispatch(&self, level: Level, message: Arc<str>) {
        let record = LogRecord::new(self.0.source.id(), level, message, self.weak());
        self.0.registry.dispatch(&record);
    }

    /// `logNoFormat`: write `message` verbatim.
    pub fn log_no_format(&self, level: Level, message: &str) {
        if !self.can_log(level) {
            return;
        }
        let depth = self.0.builders.acquire_depth();
        self.0.builders.with_depth(depth, |b| b.push_str(message));
        let finished = self.0.builders.finish_at_depth(depth);
        self.dispatch(level, finished);
    }

    /// `logFormat`: format `args` directly into the acquired builder via
    /// `std::fmt::Write`, without an intermediate `String` allocation.
    pub fn log_format(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.can_log(level) {
            return;
        }
        let depth = self.0.builders.acquire_depth();
        self.0.builders.with_depth(depth, |b| {
            let _ = fmt::Write::write_fmt(b, args);
        });
        let finished = self.0.builders.finish_at_depth(depth);
        self.dispatch(level, finished);
    }

    /// `startLog`: begin a multi-part record. Returns `None` if the level is
    /// not admitted (mirroring the single-shot hot-path short-circuit); the
    /// caller then has no handle and cannot call `appendLog`/`finishLog`,
    /// which is how this crate makes "appendLog without startLog" structurally
    /// unreachable through the public API rather than a reported misuse.
    pub fn start_log(&self, level: Level) -> Option<MultiPartHandle> {
        if !self.can_log(level) {
            return None;
        }
        let depth = self.0.builders.acquire_depth();
        self.0.builders.with_depth(depth, |b| b.start());
        Some(MultiPartHandle { logger: self.clone(), level, depth })
    }
}

/// Token returned by [`Logger::start_log`]; pass it to `append_log` any
/// number of times, then consume it with `finish_log` to dispatch the
/// assembled record.
pub struct MultiPartHandle {
    logger: Logger,
    level: Level,
    depth: usize,
}

impl MultiPartHandle {
    /// `appendLog`: append to the in-progress record.
    pub fn append_log(&self, text: &str) {
        self.logger.0.builders.with_depth(self.depth, |b| {
            // `start_log` always calls `b.start()` before handing out a
            // handle, so `append` cannot fail here.
            let _ = b.append(text);
        });
    }

    /// `finishLog`: finalize and dispatch the assembled record.
    pub fn finish_log(self) {
        let finished = self.logger.0.builders.finish_at_depth(self.depth);
        self.logger.dispatch(self.level, finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush_policy::FlushPolicy;
    use crate::source::SourceTree;
    use crate::target::{Target, TargetBase};
    use parking_lot::Mutex;
    use std::sync::Weak as StdWeak;

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

    /// A registry and its source tree, sharing the same `SourceTree` a test's
    /// logger is built on — dispatch resolves affinity/pass-keys by looking
    /// a record's source id back up in the registry's own tree, so the two
    /// must agree on which tree that is.
    fn fresh_registry() -> (Arc<Registry>, Arc<SourceTree>, Arc<RecordingTarget>) {
        let tree = Arc::new(SourceTree::new());
        let registry = Arc::new(Registry::new(tree.clone()));
        let target = RecordingTarget::new();
        registry.add_target(target.clone()).unwrap();
        (registry, tree, target)
    }

    #[test]
    fn can_log_respects_source_level() {
        let (registry, tree, _target) = fresh_registry();
        let src = tree.define_source("svc", true).unwrap();
        src.set_level(Level::Warn, crate::source::Propagate::None);
        let logger = Logger::new_shared(src, registry);
        assert!(logger.can_log(Level::Error));
        assert!(!logger.can_log(Level::Info));
    }

    #[test]
    fn log_no_format_dispatches_verbatim_message() {
        let (registry, tree, target) = fresh_registry();
        let logger = Logger::new_shared(tree.root(), registry);
        logger.log_no_format(Level::Info, "hello there");
        assert_eq!(target.lines(), vec!["hello there".to_string()]);
    }

    #[test]
    fn log_format_writes_fmt_arguments() {
        let (registry, tree, target) = fresh_registry();
        let logger = Logger::new_shared(tree.root(), registry);
        logger.log_format(Level::Info, format_args!("x={} y={}", 1, 2));
        assert_eq!(target.lines(), vec!["x=1 y=2".to_string()]);
    }

    #[test]
    fn below_ceiling_level_never_touches_the_builder_or_dispatch() {
        let (registry, tree, target) = fresh_registry();
        let source = tree.root();
        source.set_level(Level::Warn, crate::source::Propagate::None);
        let logger = Logger::new_shared(source, registry);
        logger.log_no_format(Level::Info, "too quiet");
        assert!(target.lines().is_empty());
        assert!(logger.start_log(Level::Info).is_none());
    }

    #[test]
    fn multi_part_record_assembles_across_separate_calls() {
        let (registry, tree, target) = fresh_registry();
        let logger = Logger::new_shared(tree.root(), registry);
        let handle = logger.start_log(Level::Info).unwrap();
        handle.append_log("part1-");
        handle.append_log("part2");
        handle.finish_log();
        assert_eq!(target.lines(), vec!["part1-part2".to_string()]);
    }

    #[test]
    fn nested_single_shot_call_during_a_multipart_record_uses_a_fresh_builder() {
        let (registry, tree, target) = fresh_registry();
        let logger = Logger::new_shared(tree.root(), registry);
        let handle = logger.start_log(Level::Info).unwrap();
        handle.append_log("outer-partial");
        // a nested single-shot call on the same thread must not clobber the
        // in-progress multi-part builder.
        logger.log_no_format(Level::Info, "inner");
        handle.append_log("-outer-rest");
        handle.finish_log();
        assert_eq!(target.lines(), vec!["inner".to_string(), "outer-partial-outer-rest".to_string()]);
    }

    #[test]
    fn private_logger_uses_its_own_stack_independent_of_shared_loggers() {
        let (registry, tree, target) = fresh_registry();
        let source = tree.root();
        let shared = Logger::new_shared(source.clone(), registry.clone());
        let private = Logger::new_private(source, registry);
        let private_handle = private.start_log(Level::Info).unwrap();
        private_handle.append_log("private-part");
        shared.log_no_format(Level::Info, "shared-message");
        private_handle.finish_log();
        assert_eq!(target.lines(), vec!["shared-message".to_string(), "private-part".to_string()]);
    }

    #[test]
    fn record_carries_a_weak_back_reference_to_its_logger() {
        let (registry, tree, _target) = fresh_registry();
        let logger = Logger::new_shared(tree.root(), registry);
        let weak: StdWeak<LoggerInner> = logger.weak();
        assert!(weak.upgrade().is_some());
        drop(logger);
        assert!(weak.upgrade().is_none());
    }
}
