//! Compiled output template and typed-record encoding (spec §4.6, component C8).
//!
//! A template is parsed once into a sequence of literal chunks and field
//! selectors, then replayed per record without touching the regex engine
//! again. The `Receptor` trait (SPEC_FULL §10, recovered from the original's
//! `elog_type_codec.h`) gives non-text sinks a typed hook alongside the
//! formatted-text path, so a binary-sink integration doesn't have to parse
//! text back out.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::error::{ElogError, Result};
use crate::record::LogRecord;

/// One piece of a compiled template: either literal text or a field selector.
#[derive(Debug, Clone)]
enum Chunk {
    Literal(String),
    Level,
    Message,
    ThreadId,
    SourceId,
    RecordId,
    Timestamp,
    /// Cached per-second date string (`%Y-%m-%d %H:%M:%S`), refreshed lazily.
    DateTime,
}

/// A parsed `%field%`-style template, e.g. `"[%datetime%] %level% %message%"`.
///
/// Field placeholders are `%name%`; an unrecognized name is an error at parse
/// time rather than emitted literally, so a typo in a config file fails fast
/// instead of silently corrupting every line.
pub struct Formatter {
    chunks: Vec<Chunk>,
    date_cache: DateCache,
}

struct DateCache {
    /// Unix second this string was computed for.
    cached_second: AtomicI64,
    cached_text: parking_lot::RwLock<String>,
}

impl DateCache {
    fn new() -> Self {
        DateCache { cached_second: AtomicI64::new(i64::MIN), cached_text: parking_lot::RwLock::new(String::new()) }
    }

    fn render(&self, timestamp: &DateTime<Utc>) -> String {
        let second = timestamp.timestamp();
        if self.cached_second.load(Ordering::Acquire) == second {
            return self.cached_text.read().clone();
        }
        let text = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        *self.cached_text.write() = text.clone();
        self.cached_second.store(second, Ordering::Release);
        text
    }
}

impl Formatter {
    /// Compile a template. Recognized placeholders: `%level%`, `%message%`,
    /// `%thread%`, `%source%`, `%id%`, `%timestamp%` (RFC 3339, full
    /// precision), `%datetime%` (second-resolution, cached per second).
    pub fn compile(template: &str) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('%') {
            if start > 0 {
                chunks.push(Chunk::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 1..];
            let end = after
                .find('%')
                .ok_or_else(|| ElogError::InvalidArgument(format!("unterminated placeholder in template: {template}")))?;
            let name = &after[..end];
            chunks.push(match name {
                "level" => Chunk::Level,
                "message" => Chunk::Message,
                "thread" => Chunk::ThreadId,
                "source" => Chunk::SourceId,
                "id" => Chunk::RecordId,
                "timestamp" => Chunk::Timestamp,
                "datetime" => Chunk::DateTime,
                other => return Err(ElogError::InvalidArgument(format!("unknown template field: {other}"))),
            });
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            chunks.push(Chunk::Literal(rest.to_string()));
        }
        Ok(Formatter { chunks, date_cache: DateCache::new() })
    }

    /// Render `record` as text.
    pub fn format(&self, record: &LogRecord) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(s) => out.push_str(s),
                Chunk::Level => out.push_str(record.level.as_str()),
                Chunk::Message => out.push_str(&record.message),
                Chunk::ThreadId => out.push_str(&record.thread_id.to_string()),
                Chunk::SourceId => out.push_str(&record.source_id.to_string()),
                Chunk::RecordId => out.push_str(&record.id.to_string()),
                Chunk::Timestamp => out.push_str(&record.timestamp.to_rfc3339()),
                Chunk::DateTime => out.push_str(&self.date_cache.render(&record.timestamp)),
            }
        }
        out
    }
}

/// A record encoded for a non-text sink: stable field ids plus raw values, no
/// text formatting applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub id: u64,
    pub timestamp_unix_nanos: i64,
    pub thread_id: u64,
    pub source_id: u32,
    pub level: u8,
    pub message: String,
}

impl From<&LogRecord> for EncodedRecord {
    fn from(record: &LogRecord) -> Self {
        EncodedRecord {
            id: record.id,
            timestamp_unix_nanos: record.timestamp.timestamp_nanos_opt().unwrap_or(0),
            thread_id: record.thread_id,
            source_id: record.source_id,
            level: record.level.ordinal(),
            message: record.message.to_string(),
        }
    }
}

/// Typed hook a sink implements alongside (or instead of) plain text output.
///
/// Grounded on the original's `elog_type_codec.h` binary-encoding boundary;
/// a sink that only wants text never needs to implement `structured`, since
/// the default forwards through `text` plus a field copy.
pub trait Receptor {
    fn text(&mut self, formatter: &Formatter, record: &LogRecord) -> String {
        formatter.format(record)
    }

    fn structured(&mut self, record: &LogRecord) -> EncodedRecord {
        EncodedRecord::from(record)
    }
}

/// Process-wide counter of compiled templates, exposed for diagnostics/tests.
static COMPILED_TEMPLATES: AtomicU64 = AtomicU64::new(0);

/// Compile a template and bump the diagnostic counter.
pub fn compile_tracked(template: &str) -> Result<Formatter> {
    let formatter = Formatter::compile(template)?;
    COMPILED_TEMPLATES.fetch_add(1, Ordering::Relaxed);
    Ok(formatter)
}

pub fn compiled_template_count() -> u64 {
    COMPILED_TEMPLATES.load(Ordering::Relaxed)
}
