//! Per-thread record builder (spec §4.2/§9, component C1).
//!
//! Each thread keeps a stack of builders, almost always one deep. The base
//! builder is reused across calls (its buffer cleared after each record);
//! a second builder is only pushed when a log call happens while the base
//! builder is mid-build — i.e. a logging call made from inside a `Display`
//! impl or callback invoked by an in-progress format. `RecordBuilder`'s
//! inline storage is a stack-resident `SmallVec<[u8; INLINE_CAPACITY]>`,
//! the safe-Rust rendition of the spec's "1024-byte fixed buffer overflowing
//! to an explicitly bounded heap allocation".

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{ElogError, Result};

/// Inline capacity before a builder's buffer spills to the heap.
pub const INLINE_CAPACITY: usize = 1024;

type Buf = SmallVec<[u8; INLINE_CAPACITY]>;

/// A single thread-local message buffer, reused across non-nested calls.
pub struct RecordBuilder {
    buffer: Buf,
    multi_part_active: bool,
}

impl RecordBuilder {
    fn new() -> Self {
        RecordBuilder { buffer: SmallVec::new(), multi_part_active: false }
    }

    /// `true` when nothing has been written and no multi-part build is open
    /// — safe to reuse for the next single-shot log call.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && !self.multi_part_active
    }

    /// Append formatted text (single-shot `logFormat`/`logNoFormat` path).
    pub fn push_str(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Begin a multi-part record, discarding anything already buffered.
    pub fn start(&mut self) {
        self.buffer.clear();
        self.multi_part_active = true;
    }

    /// Append to an in-progress multi-part record.
    ///
    /// Fails with `InvalidState` (routed to the Report Channel by the
    /// caller, never panicking) if `start` was not called first.
    pub fn append(&mut self, s: &str) -> Result<()> {
        if !self.multi_part_active {
            return Err(ElogError::InvalidState("appendLog called without a preceding startLog".to_string()));
        }
        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Finalize the buffered bytes into an owned, shareable message and
    /// reset this builder for reuse.
    pub fn finish(&mut self) -> Arc<str> {
        let message = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.multi_part_active = false;
        Arc::from(message)
    }
}

impl std::fmt::Write for RecordBuilder {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

/// Acquire the top of `stack`, pushing a new builder if the current top is
/// mid-build (spec step 4: "if its buffer offset is non-zero, push a new
/// builder"). Returns the depth of the acquired builder.
fn acquire_on(stack: &mut Vec<RecordBuilder>) -> usize {
    let needs_new = !stack.last().map(RecordBuilder::is_idle).unwrap_or(true);
    if needs_new {
        stack.push(RecordBuilder::new());
    }
    stack.len() - 1
}

/// Finalize and (if nested) pop the builder at `depth` in `stack`.
fn finish_on(stack: &mut Vec<RecordBuilder>, depth: usize) -> Arc<str> {
    let message = stack[depth].finish();
    if depth > 0 {
        stack.truncate(depth);
    }
    message
}

thread_local! {
    static BUILDER_STACK: RefCell<Vec<RecordBuilder>> = RefCell::new(vec![RecordBuilder::new()]);
}

/// A handle onto the builder this call acquired — either the thread's base
/// builder or, under re-entrancy, a freshly pushed one.
pub struct BuilderHandle {
    depth: usize,
}

/// Acquire the top-of-stack builder for the calling thread. See [`acquire`].
pub fn acquire() -> BuilderHandle {
    BuilderHandle { depth: acquire_depth() }
}

/// Same as [`acquire`] but returns the bare depth, for callers (a *shared*
/// [`crate::logger::Logger`]) that address the builder by depth across
/// separate method calls rather than holding a live [`BuilderHandle`].
pub fn acquire_depth() -> usize {
    BUILDER_STACK.with(|stack| acquire_on(&mut stack.borrow_mut()))
}

/// Run `f` against the builder at a specific stack depth. See [`acquire_depth`].
pub fn with_depth<R>(depth: usize, f: impl FnOnce(&mut RecordBuilder) -> R) -> R {
    BUILDER_STACK.with(|stack| f(&mut stack.borrow_mut()[depth]))
}

/// Finalize and (if nested) pop the builder at `depth`. See [`with_depth`].
pub fn finish_at_depth(depth: usize) -> Arc<str> {
    BUILDER_STACK.with(|stack| finish_on(&mut stack.borrow_mut(), depth))
}

impl BuilderHandle {
    /// The stack depth this handle refers to, for callers that need to
    /// address the same builder again later via [`with_depth`]/[`finish_at_depth`].
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `f` against the builder this handle refers to.
    pub fn with<R>(&self, f: impl FnOnce(&mut RecordBuilder) -> R) -> R {
        with_depth(self.depth, f)
    }

    /// Finalize the referenced builder into a message, popping it off the
    /// stack if it was a nested (re-entrant) builder.
    pub fn finish(self) -> Arc<str> {
        finish_at_depth(self.depth)
    }
}

/// A record-builder stack owned directly by one *private* [`crate::logger::Logger`]
/// instead of living in thread-local storage — the spec's "private logger
/// owns its own record-builder stack" (§3 "Logger"). Guarded by a
/// `parking_lot::Mutex` rather than left unsynchronized: private loggers are
/// documented as single-thread-only, but a stray concurrent call should
/// contend on a lock instead of racing on the buffer.
pub struct OwnedBuilderStack(Mutex<Vec<RecordBuilder>>);

impl OwnedBuilderStack {
    pub fn new() -> Self {
        OwnedBuilderStack(Mutex::new(vec![RecordBuilder::new()]))
    }

    pub fn acquire_depth(&self) -> usize {
        acquire_on(&mut self.0.lock())
    }

    pub fn with_depth<R>(&self, depth: usize, f: impl FnOnce(&mut RecordBuilder) -> R) -> R {
        f(&mut self.0.lock()[depth])
    }

    pub fn finish_at_depth(&self, depth: usize) -> Arc<str> {
        finish_on(&mut self.0.lock(), depth)
    }
}

impl Default for OwnedBuilderStack {
    fn default() -> Self {
        OwnedBuilderStack::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_shot_round_trip() {
        let handle = acquire();
        handle.with(|b| b.push_str("hello"));
        assert_eq!(&*handle.finish(), "hello");
    }

    #[test]
    fn reentrant_call_pushes_a_nested_builder() {
        let outer = acquire();
        outer.with(|b| b.push_str("outer-partial"));
        // outer builder is now non-idle; a nested call must get a new one.
        let inner = acquire();
        inner.with(|b| b.push_str("inner"));
        assert_eq!(&*inner.finish(), "inner");
        assert_eq!(&*outer.finish(), "outer-partial");
    }

    #[test]
    fn multi_part_requires_start_before_append() {
        let handle = acquire();
        let err = handle.with(|b| b.append("oops"));
        assert!(err.is_err());
        handle.with(|b| b.start());
        handle.with(|b| b.append("part1-").unwrap());
        handle.with(|b| b.append("part2").unwrap());
        assert_eq!(&*handle.finish(), "part1-part2");
    }

    #[test]
    fn overflowing_inline_capacity_still_round_trips() {
        let handle = acquire();
        let long = "x".repeat(INLINE_CAPACITY * 3);
        handle.with(|b| b.push_str(&long));
        assert_eq!(handle.finish().len(), long.len());
    }

    #[test]
    fn depth_addressed_access_survives_across_separate_calls() {
        let handle = acquire();
        let depth = handle.depth();
        handle.with(|b| b.start());
        with_depth(depth, |b| b.append("a-").unwrap());
        with_depth(depth, |b| b.append("b").unwrap());
        assert_eq!(&*finish_at_depth(depth), "a-b");
    }

    #[test]
    fn idle_builder_is_reused_for_sequential_calls() {
        let first = acquire();
        assert_eq!(first.depth, 0);
        let _ = first.finish();
        let second = acquire();
        assert_eq!(second.depth, 0);
        let _ = second.finish();
    }

    #[test]
    fn owned_builder_stack_is_independent_of_the_thread_local_one() {
        let owned = OwnedBuilderStack::new();
        let depth = owned.acquire_depth();
        owned.with_depth(depth, |b| b.push_str("private"));
        assert_eq!(&*owned.finish_at_depth(depth), "private");

        // the thread-local stack was never touched.
        let handle = acquire();
        assert_eq!(handle.depth(), 0);
        let _ = handle.finish();
    }
}
