//! Unix-domain-socket syslog target (`addSysLogTarget`, spec §6).
//!
//! A thin adapter over the standard `/dev/log` datagram socket, grounded on
//! the pack's `8f4e757c_nix-rust-nix-rust__src-syslog.rs` — adapted from its
//! libc `openlog`/`syslog` FFI call to a plain `std::os::unix::net::UnixDatagram`
//! send of an RFC 3164-style `<PRI>ident: message` packet, so this stays
//! within the teacher's pure-Rust, no-FFI dependency stack.

use std::os::unix::net::UnixDatagram;
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;
use crate::flush_policy::FlushPolicy;
use crate::formatter::Formatter;
use crate::level::Level;
use crate::record::LogRecord;
use crate::target::{Target, TargetBase};

/// The standard syslog facility codes (RFC 5424 §6.2.1) relevant to an
/// application-level sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Kern,
    User,
    Daemon,
    Local0,
    Local1,
}

impl Facility {
    fn code(self) -> u8 {
        match self {
            Facility::Kern => 0,
            Facility::User => 1,
            Facility::Daemon => 3,
            Facility::Local0 => 16,
            Facility::Local1 => 17,
        }
    }
}

/// Map this crate's severity onto the RFC 5424 severity scale (0 = most
/// severe). `Trace`/`Debug`/`Diag` all collapse to syslog's `Debug`, which
/// has no finer gradations of its own.
fn severity_code(level: Level) -> u8 {
    match level {
        Level::Fatal => 2, // Crit
        Level::Error => 3,
        Level::Warn => 4,
        Level::Notice => 5,
        Level::Info => 6,
        Level::Trace | Level::Debug | Level::Diag => 7,
    }
}

pub struct SyslogTarget {
    base: TargetBase,
    formatter: Formatter,
    ident: String,
    facility: Facility,
    socket: Mutex<UnixDatagram>,
}

impl SyslogTarget {
    /// Connect to the syslog socket at `socket_path` (`/dev/log` in
    /// production; tests pass a `UnixDatagram::pair`-backed path instead).
    pub fn open(
        id: u32,
        name: impl Into<String>,
        socket_path: impl AsRef<Path>,
        ident: impl Into<String>,
        facility: Facility,
        level: Level,
        formatter: Formatter,
    ) -> Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(socket_path.as_ref())?;
        Ok(SyslogTarget {
            base: TargetBase::new(id, name, None, level, None, FlushPolicy::immediate()),
            formatter,
            ident: ident.into(),
            facility,
            socket: Mutex::new(socket),
        })
    }

    /// Build from an already-connected socket, for tests that wire up a
    /// `UnixDatagram::pair()` instead of the real `/dev/log`.
    pub fn from_socket(
        id: u32,
        name: impl Into<String>,
        socket: UnixDatagram,
        ident: impl Into<String>,
        facility: Facility,
        level: Level,
        formatter: Formatter,
    ) -> Self {
        SyslogTarget {
            base: TargetBase::new(id, name, None, level, None, FlushPolicy::immediate()),
            formatter,
            ident: ident.into(),
            facility,
            socket: Mutex::new(socket),
        }
    }

    fn priority(&self, level: Level) -> u16 {
        self.facility.code() as u16 * 8 + severity_code(level) as u16
    }
}

impl Target for SyslogTarget {
    fn base(&self) -> &TargetBase {
        &self.base
    }

    fn write_log_record(&self, record: &LogRecord) -> usize {
        let body = self.formatter.format(record);
        let packet = format!("<{}>{}: {}", self.priority(record.level), self.ident, body);
        match self.socket.lock().send(packet.as_bytes()) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }
}
