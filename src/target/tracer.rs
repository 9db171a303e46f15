//! In-memory tracer target (`addTracer`, spec §6) [SUPPLEMENT].
//!
//! Recovered from `examples/original_source/.../elog_buffer.h` /
//! `elog_read_buffer.h`'s circular scratch buffer: a bounded ring of
//! formatted lines kept in memory for diagnostic dumping rather than
//! written to a persistent sink. The in-memory-sink-for-assertions idiom
//! itself is grounded on the pack's `logwise` example (`inmemory_logger.rs`).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::flush_policy::FlushPolicy;
use crate::formatter::Formatter;
use crate::level::Level;
use crate::record::LogRecord;
use crate::target::{Target, TargetBase};

pub struct TracerTarget {
    base: TargetBase,
    formatter: Option<Formatter>,
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl TracerTarget {
    pub fn new(id: u32, name: impl Into<String>, level: Level, capacity: usize, formatter: Option<Formatter>) -> Self {
        TracerTarget {
            base: TargetBase::new(id, name, None, level, None, FlushPolicy::never()),
            formatter,
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// A point-in-time copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl Target for TracerTarget {
    fn base(&self) -> &TargetBase {
        &self.base
    }

    fn write_log_record(&self, record: &LogRecord) -> usize {
        let text = match &self.formatter {
            Some(formatter) => formatter.format(record),
            None => record.message.to_string(),
        };
        let bytes = text.len();
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(text);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    fn record(message: &str) -> LogRecord {
        LogRecord::new(0, Level::Info, Arc::from(message), Weak::new())
    }

    #[test]
    fn retains_only_the_most_recent_capacity_lines() {
        let tracer = TracerTarget::new(1, "tracer", Level::Trace, 2, None);
        tracer.log(&record("a"));
        tracer.log(&record("b"));
        tracer.log(&record("c"));
        assert_eq!(tracer.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let tracer = TracerTarget::new(1, "tracer", Level::Trace, 4, None);
        tracer.log(&record("a"));
        tracer.clear();
        assert!(tracer.snapshot().is_empty());
    }
}
