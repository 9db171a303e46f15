//! Severity levels (spec §3 "Log Record").
//!
//! Lower ordinal = higher severity. `canLog` admits a record when its ordinal
//! is less than or equal to the source's configured ceiling.

/// Log severity, ordered from most to least severe.
///
/// The discriminants double as the wire ordinal used for level comparisons;
/// do not renumber without checking [`Level::from_ordinal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Fatal = 0,
    Error = 1,
    Warn = 2,
    Notice = 3,
    Info = 4,
    Trace = 5,
    Debug = 6,
    Diag = 7,
}

impl Level {
    /// All levels, most to least severe.
    pub const ALL: [Level; 8] = [
        Level::Fatal,
        Level::Error,
        Level::Warn,
        Level::Notice,
        Level::Info,
        Level::Trace,
        Level::Debug,
        Level::Diag,
    ];

    /// Numeric ordinal used by `canLog` comparisons (lower = more severe).
    #[inline]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Reconstruct a level from its ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Level> {
        Self::ALL.into_iter().find(|l| l.ordinal() == ordinal)
    }

    /// Parse a level from its name, case-insensitive. Accepts common aliases
    /// ("warning" for `Warn`, "critical"/"panic" for `Fatal`).
    pub fn from_name(name: &str) -> Option<Level> {
        match name.to_ascii_lowercase().as_str() {
            "fatal" | "critical" | "panic" => Some(Level::Fatal),
            "error" | "err" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "notice" => Some(Level::Notice),
            "info" => Some(Level::Info),
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "diag" | "diagnostic" => Some(Level::Diag),
            _ => None,
        }
    }

    /// Canonical upper-case name, as used in text formatting.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Notice => "NOTICE",
            Level::Info => "INFO",
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Diag => "DIAG",
        }
    }

    /// True iff a record at `self` is admitted by a source/target ceiling of `ceiling`.
    #[inline]
    pub fn admitted_by(self, ceiling: Level) -> bool {
        self.ordinal() <= ceiling.ordinal()
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = crate::error::ElogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::from_name(s)
            .ok_or_else(|| crate::error::ElogError::InvalidArgument(format!("unknown level: {s}")))
    }
}
