//! Error taxonomy and the single abort path every unrecoverable condition
//! funnels through.
//!
//! A user-facing allocation failure (out of memory, alignment not a power of
//! two) is reported through the normal C calling convention: a null return
//! and `errno` set. A condition that indicates heap corruption or backend
//! failure is not recoverable and goes through [`fatal`], which logs and
//! aborts the process rather than returning control with a possibly-corrupt
//! heap.

use std::fmt;

/// Recoverable allocation failures, surfaced to callers via a null return
/// and the matching `errno`, plus the fatal conditions that instead funnel
/// through [`fatal`] and never cross the public boundary at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The backend could not supply more memory (`sbrk`/`mmap` failed).
    OutOfMemory,
    /// A requested alignment was not a power of two, or was smaller than
    /// `ALIGN0`.
    InvalidAlignment,
    /// `calloc`'s `nmemb * size` would overflow `usize`.
    SizeOverflow,
    /// A decoded header carries a class index or other field outside its
    /// valid range. Fatal: debug builds assert on this directly at the
    /// decode site; this variant exists so the condition has a name in the
    /// taxonomy and can still be logged through `fatal` uniformly.
    CorruptedHeader,
    /// A pointer passed to `free`/`realloc`/introspection does not land on
    /// a block this engine recognizes as one it handed out. Fatal.
    WildPointer,
    /// The lazy singleton boot path was re-entered from within itself.
    /// Fatal in debug builds; release builds rely on the boot path doing no
    /// allocation of its own to avoid the recursion in the first place.
    RecursiveBoot,
}

impl HeapError {
    /// The `errno` value this error maps to. Only meaningful for the
    /// recoverable variants; the fatal variants never reach `set_errno`
    /// because they abort via `fatal` instead.
    pub fn errno(self) -> i32 {
        match self {
            HeapError::OutOfMemory => libc::ENOMEM,
            HeapError::InvalidAlignment => libc::EINVAL,
            HeapError::SizeOverflow => libc::ENOMEM,
            HeapError::CorruptedHeader | HeapError::WildPointer | HeapError::RecursiveBoot => libc::EINVAL,
        }
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory => write!(f, "out of memory"),
            HeapError::InvalidAlignment => write!(f, "invalid alignment"),
            HeapError::SizeOverflow => write!(f, "size overflow"),
            HeapError::CorruptedHeader => write!(f, "corrupted header"),
            HeapError::WildPointer => write!(f, "wild pointer"),
            HeapError::RecursiveBoot => write!(f, "recursive boot"),
        }
    }
}

/// Sets the calling thread's `errno` to `err.errno()`.
pub fn set_errno(err: HeapError) {
    unsafe {
        *errno_location() = err.errno();
    }
}

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut i32 {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut i32 {
    unsafe { libc::__error() }
}

/// Logs `message` (with `args` substituted as in [`log::error!`]) and aborts
/// the process immediately. This is the only path any unrecoverable
/// condition in this engine takes: a corrupted header, a backend
/// invariant violation, or a double-boot of the lazy singleton.
///
/// Never returns.
#[cold]
#[inline(never)]
pub fn fatal(context: &str) -> ! {
    log::error!("lmmalloc: fatal: {context}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_stable() {
        assert_eq!(HeapError::OutOfMemory.errno(), libc::ENOMEM);
        assert_eq!(HeapError::InvalidAlignment.errno(), libc::EINVAL);
    }

    #[test]
    fn set_errno_round_trips() {
        set_errno(HeapError::InvalidAlignment);
        let got = unsafe { *errno_location() };
        assert_eq!(got, libc::EINVAL);
    }
}
