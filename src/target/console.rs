//! Stdout/stderr targets (`addStdOutTarget`/`addStdErrTarget`, spec §6) [SUPPLEMENT].
//!
//! Not named as a distinct component in the distilled spec, but listed among
//! the public constructors in §6; the core needs at least one built-in text
//! sink to be useful before any application-supplied target is registered
//! (and is also what the default target in the Registry, §4.11, writes to).

use std::io::Write as _;

use crate::error::Result;
use crate::flush_policy::FlushPolicy;
use crate::formatter::Formatter;
use crate::level::Level;
use crate::record::LogRecord;
use crate::target::{Target, TargetBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

pub struct ConsoleTarget {
    base: TargetBase,
    stream: ConsoleStream,
    formatter: Formatter,
}

impl ConsoleTarget {
    pub fn new(id: u32, name: impl Into<String>, level: Level, formatter: Formatter, stream: ConsoleStream) -> Self {
        ConsoleTarget {
            base: TargetBase::new(id, name, None, level, None, FlushPolicy::immediate()),
            stream,
            formatter,
        }
    }

    pub fn stderr(id: u32, level: Level, formatter: Formatter) -> Self {
        ConsoleTarget::new(id, "stderr", level, formatter, ConsoleStream::Stderr)
    }

    pub fn stdout(id: u32, level: Level, formatter: Formatter) -> Self {
        ConsoleTarget::new(id, "stdout", level, formatter, ConsoleStream::Stdout)
    }
}

impl Target for ConsoleTarget {
    fn base(&self) -> &TargetBase {
        &self.base
    }

    fn write_log_record(&self, record: &LogRecord) -> usize {
        let mut line = self.formatter.format(record);
        line.push('\n');
        let result = match self.stream {
            ConsoleStream::Stdout => std::io::stdout().lock().write_all(line.as_bytes()),
            ConsoleStream::Stderr => std::io::stderr().lock().write_all(line.as_bytes()),
        };
        match result {
            Ok(()) => line.len(),
            Err(_) => 0,
        }
    }

    fn do_flush(&self) {
        let _ = match self.stream {
            ConsoleStream::Stdout => std::io::stdout().lock().flush(),
            ConsoleStream::Stderr => std::io::stderr().lock().flush(),
        };
    }

    fn do_start(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    #[test]
    fn writes_a_newline_terminated_line() {
        let target = ConsoleTarget::stderr(9, Level::Trace, Formatter::compile("%message%").unwrap());
        let record = LogRecord::new(0, Level::Info, Arc::from("hi"), Weak::new());
        let bytes = target.write_log_record(&record);
        assert_eq!(bytes, "hi\n".len());
    }
}
