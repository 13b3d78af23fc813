//! Recursion-safe logging for a process's own memory allocator.
//!
//! A normal logger is unacceptable here: formatting a message through
//! anything that allocates (a `String`, a buffered writer) would recurse
//! back into this crate's own `malloc` while the heap's locks may already
//! be held, deadlocking the process. Instead this logger formats into a
//! fixed-size stack buffer and writes it out with one raw `write(2)` system
//! call, the same approach as a syscall-only logging sink used by
//! allocator-adjacent instrumentation tooling.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

const BUFFER_LEN: usize = 512;

/// A `log::Log` implementation that never allocates.
pub struct RawLogger {
    level: AtomicUsize,
}

impl RawLogger {
    pub const fn new() -> Self {
        RawLogger { level: AtomicUsize::new(log::LevelFilter::Off as usize) }
    }

    /// Reconfigures the active level. Called once from the heap's lazy boot
    /// path after reading `RUST_MALLOC_LOG`.
    pub fn set_level(&self, level: log::LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }

    fn level(&self) -> log::LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

impl Default for RawLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// A `fmt::Write` sink over a fixed-size stack buffer; truncates silently
/// rather than allocating when the formatted message overflows.
struct StackBuffer {
    buf: [u8; BUFFER_LEN],
    len: usize,
}

impl StackBuffer {
    fn new() -> Self {
        StackBuffer { buf: [0u8; BUFFER_LEN], len: 0 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for StackBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_LEN - self.len;
        let n = bytes.len().min(remaining);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

/// Writes `bytes` to stderr via a single raw syscall, bypassing any
/// buffered stdio that might itself allocate.
fn raw_eprint(bytes: &[u8]) {
    unsafe {
        libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

impl log::Log for RawLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut buffer = StackBuffer::new();
        let _ = fmt::Write::write_fmt(
            &mut buffer,
            format_args!("lmmalloc: {} {}\n", level_tag(record.level()), record.args()),
        );
        raw_eprint(buffer.as_bytes());
    }

    fn flush(&self) {}
}

static LOGGER: RawLogger = RawLogger::new();

/// Parses `RUST_MALLOC_LOG` (`off`/`error`/`warn`/`info`/`debug`/`trace`,
/// case-insensitive) and installs the raw logger at that level. Safe to call
/// more than once; only the first call's `set_logger` takes effect, but the
/// level is refreshed every time.
pub fn init() {
    let level = std::env::var("RUST_MALLOC_LOG")
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "off" => Some(log::LevelFilter::Off),
            "error" => Some(log::LevelFilter::Error),
            "warn" => Some(log::LevelFilter::Warn),
            "info" => Some(log::LevelFilter::Info),
            "debug" => Some(log::LevelFilter::Debug),
            "trace" => Some(log::LevelFilter::Trace),
            _ => None,
        })
        .unwrap_or(log::LevelFilter::Warn);

    LOGGER.set_level(level);
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(level));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_buffer_truncates_instead_of_panicking() {
        let mut buffer = StackBuffer::new();
        let long = "x".repeat(BUFFER_LEN * 2);
        let _ = fmt::Write::write_str(&mut buffer, &long);
        assert_eq!(buffer.as_bytes().len(), BUFFER_LEN);
    }

    #[test]
    fn level_round_trips() {
        let logger = RawLogger::new();
        logger.set_level(log::LevelFilter::Debug);
        assert_eq!(logger.level(), log::LevelFilter::Debug);
    }
}
