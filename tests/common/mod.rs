//! Shared fixtures for the boundary-scenario integration tests.

use std::sync::Arc;

use elog_core::flush_policy::FlushPolicy;
use elog_core::level::Level;
use elog_core::record::LogRecord;
use elog_core::target::{Target, TargetBase};
use parking_lot::Mutex;

/// A target that just remembers the messages it received, in order.
pub struct RecordingTarget {
    base: TargetBase,
    lines: Mutex<Vec<String>>,
}

impl RecordingTarget {
    pub fn new(id: u32, pass_key: Option<&str>) -> Arc<Self> {
        Arc::new(RecordingTarget {
            base: TargetBase::new(id, format!("recorder-{id}"), pass_key.map(str::to_string), Level::Trace, None, FlushPolicy::immediate()),
            lines: Mutex::new(Vec::new()),
        })
    }

    pub fn lines(&self) -> Vec<String> {
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

/// An `on_warning` callback for segmented-file targets that fails the test
/// loudly instead of silently swallowing an unexpected scan diagnostic.
pub fn panic_on_warning() -> Box<dyn Fn(&str) + Send + Sync> {
    Box::new(|msg: &str| panic!("unexpected warning: {msg}"))
}
