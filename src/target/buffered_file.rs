//! Buffered append-only file writer (spec §4.9, component C13).
//!
//! Messages are never split across a buffer boundary: a write that would
//! overflow the buffer first drains it to the file descriptor, then the
//! message is appended; a message larger than the whole buffer bypasses
//! buffering and goes straight to the descriptor. `write_all`-over-a-loop
//! handles short writes, since a raw `File::write` is not guaranteed to
//! consume the whole slice.
//!
//! `lock_mode` in the spec distinguishes "caller guarantees single-threaded
//! use" from "guard everything with one mutex". Since `Target::write_log_record`
//! takes `&self`, safe Rust has no unsynchronized-mutation escape hatch
//! regardless of mode; with `lock_mode` off we use `try_lock` and count a
//! missed acquisition as a failed write instead of blocking, which behaves
//! identically to true single-threaded use and turns a caller-contract
//! violation into a counter instead of a data race.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{ElogError, Result};
use crate::flush_policy::FlushPolicy;
use crate::formatter::Formatter;
use crate::level::Level;
use crate::record::LogRecord;
use crate::stats::StatVar;
use crate::target::{Target, TargetBase};

pub const MIN_BUFFER_CAPACITY: usize = 4 * 1024;
pub const MAX_BUFFER_CAPACITY: usize = 64 * 1024 * 1024;
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

fn clamp_capacity(requested: usize) -> usize {
    requested.clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY)
}

/// Counters specific to the buffered writer, kept alongside (not instead of)
/// the base `TargetStats` every target carries.
#[derive(Default)]
pub struct BufferedFileStats {
    pub buffer_writes: StatVar,
    pub buffer_bytes: StatVar,
    pub buffer_failures: StatVar,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedFileStatsSnapshot {
    pub buffer_writes: u64,
    pub buffer_bytes: u64,
    pub buffer_failures: u64,
}

impl BufferedFileStats {
    fn snapshot(&self) -> BufferedFileStatsSnapshot {
        BufferedFileStatsSnapshot {
            buffer_writes: self.buffer_writes.sum(),
            buffer_bytes: self.buffer_bytes.sum(),
            buffer_failures: self.buffer_failures.sum(),
        }
    }
}

struct State {
    file: File,
    buffer: Vec<u8>,
}

pub struct BufferedFileWriter {
    base: TargetBase,
    formatter: Formatter,
    capacity: usize,
    lock_mode: bool,
    path: PathBuf,
    state: Mutex<State>,
    buffered_stats: BufferedFileStats,
}

impl BufferedFileWriter {
    pub fn open(
        id: u32,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        level: Level,
        formatter: Formatter,
        capacity: usize,
        lock_mode: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let capacity = clamp_capacity(capacity);
        Ok(BufferedFileWriter {
            base: TargetBase::new(id, name, None, level, None, FlushPolicy::never()),
            formatter,
            capacity,
            lock_mode,
            path,
            state: Mutex::new(State { file, buffer: Vec::with_capacity(capacity) }),
            buffered_stats: BufferedFileStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered_stats(&self) -> BufferedFileStatsSnapshot {
        self.buffered_stats.snapshot()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Option<R> {
        if self.lock_mode {
            Some(f(&mut self.state.lock()))
        } else {
            self.state.try_lock().map(|mut guard| f(&mut guard))
        }
    }

    fn write_all_loop(file: &mut File, mut bytes: &[u8]) -> std::io::Result<()> {
        while !bytes.is_empty() {
            let n = file.write(bytes)?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "wrote zero bytes"));
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    fn drain(&self, state: &mut State) -> std::io::Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        Self::write_all_loop(&mut state.file, &state.buffer)?;
        state.buffer.clear();
        Ok(())
    }
}

impl Target for BufferedFileWriter {
    fn base(&self) -> &TargetBase {
        &self.base
    }

    fn write_log_record(&self, record: &LogRecord) -> usize {
        let mut line = self.formatter.format(record);
        line.push('\n');
        let len = line.len();

        let result = self.with_state(|state| -> std::io::Result<()> {
            if len > self.capacity {
                self.drain(state)?;
                Self::write_all_loop(&mut state.file, line.as_bytes())?;
            } else if state.buffer.len() + len > self.capacity {
                self.drain(state)?;
                state.buffer.extend_from_slice(line.as_bytes());
            } else {
                state.buffer.extend_from_slice(line.as_bytes());
            }
            Ok(())
        });

        match result {
            Some(Ok(())) => {
                self.buffered_stats.buffer_writes.incr();
                self.buffered_stats.buffer_bytes.add(len as u64);
                len
            }
            Some(Err(_)) | None => {
                self.buffered_stats.buffer_failures.incr();
                0
            }
        }
    }

    fn do_flush(&self) {
        if let Some(result) = self.with_state(|state| -> std::io::Result<()> {
            self.drain(state)?;
            state.file.sync_data()
        }) {
            if result.is_err() {
                self.buffered_stats.buffer_failures.incr();
            }
        }
    }

    fn do_stop(&self) {
        self.do_flush();
    }
}

/// Validate a requested buffer capacity without constructing a writer; used
/// by config parsing (spec §6) to surface `InvalidArgument` for a capacity
/// outside `[MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY]` instead of silently
/// clamping when the caller wants strict validation.
pub fn validate_capacity(requested: usize) -> Result<usize> {
    if (MIN_BUFFER_CAPACITY..=MAX_BUFFER_CAPACITY).contains(&requested) {
        Ok(requested)
    } else {
        Err(ElogError::InvalidArgument(format!(
            "buffer capacity {requested} outside [{MIN_BUFFER_CAPACITY}, {MAX_BUFFER_CAPACITY}]"
        )))
    }
}
