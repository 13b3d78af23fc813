//! System backend abstraction: the narrow seam between the allocator engine
//! and the operating system.
//!
//! Everything the engine needs from the OS goes through this trait:
//! growing the program break, mapping/unmapping anonymous memory, and
//! reading the page size. Production code runs against [`SystemBackend`];
//! tests run against [`TestBackend`], an in-memory stand-in that never
//! touches the process's real break or address space, so a `Heap<TestBackend>`
//! can be built and torn down freely inside `#[test]` functions without
//! fighting over global process state.

use std::io;

/// Everything the heap needs from its host environment.
///
/// # Safety
/// Implementors must return addresses that are safe to dereference for the
/// requested length until `unmap`/process exit, and `sbrk` must behave like
/// the POSIX call: advancing a single, monotonically growing break shared
/// across all callers of this backend instance.
pub unsafe trait Backend {
    /// Advances the program break by `increment` bytes (which may be 0 to
    /// query the current break, or negative to release memory back, though
    /// this engine never does the latter). Returns the *previous* break
    /// value, matching `sbrk(2)`.
    fn sbrk(&self, increment: isize) -> io::Result<*mut u8>;

    /// Creates a new anonymous, private mapping of `len` bytes.
    fn map(&self, len: usize) -> io::Result<*mut u8>;

    /// Releases a mapping previously returned by `map`.
    ///
    /// # Safety
    /// `addr`/`len` must exactly match a prior `map` call's return value and
    /// length, and no outstanding references to that memory may remain.
    unsafe fn unmap(&self, addr: *mut u8, len: usize) -> io::Result<()>;

    /// The host's page size, in bytes. Assumed constant for the process
    /// lifetime.
    fn page_size(&self) -> usize;
}

/// The real backend: `sbrk`/`mmap`/`munmap`/`sysconf` via libc.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

unsafe impl Backend for SystemBackend {
    fn sbrk(&self, increment: isize) -> io::Result<*mut u8> {
        let prev = unsafe { libc::sbrk(increment) };
        if prev == usize::MAX as *mut libc::c_void {
            return Err(io::Error::last_os_error());
        }
        Ok(prev as *mut u8)
    }

    fn map(&self, len: usize) -> io::Result<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(ptr as *mut u8)
    }

    unsafe fn unmap(&self, addr: *mut u8, len: usize) -> io::Result<()> {
        let rc = unsafe { libc::munmap(addr as *mut libc::c_void, len) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n <= 0 {
            4096
        } else {
            n as usize
        }
    }
}

/// An in-memory backend for tests: `sbrk` advances a cursor within a single
/// heap-allocated arena buffer; `map` hands out independently owned boxed
/// buffers. Never touches the real process break or address space.
pub struct TestBackend {
    inner: spin::Mutex<TestBackendState>,
    page_size: usize,
}

struct TestBackendState {
    arena: Vec<u8>,
    brk: usize,
}

impl TestBackend {
    /// Creates a backend with `arena_capacity` bytes of pre-reserved,
    /// fixed-address arena space and the given simulated page size.
    pub fn new(arena_capacity: usize, page_size: usize) -> Self {
        TestBackend {
            inner: spin::Mutex::new(TestBackendState { arena: vec![0u8; arena_capacity], brk: 0 }),
            page_size,
        }
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        // 64 MiB is comfortably larger than anything the integration tests exercise.
        TestBackend::new(64 * 1024 * 1024, 4096)
    }
}

unsafe impl Backend for TestBackend {
    fn sbrk(&self, increment: isize) -> io::Result<*mut u8> {
        let mut state = self.inner.lock();
        let base = state.arena.as_mut_ptr();
        let prev = state.brk;

        if increment == 0 {
            return Ok(unsafe { base.add(prev) });
        }

        let next = if increment > 0 {
            prev.checked_add(increment as usize)
        } else {
            prev.checked_sub((-increment) as usize)
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sbrk overflow"))?;

        if next > state.arena.len() {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "test arena exhausted"));
        }

        state.brk = next;
        Ok(unsafe { base.add(prev) })
    }

    fn map(&self, len: usize) -> io::Result<*mut u8> {
        let mut buf = vec![0u8; len].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        Box::leak(buf);
        Ok(ptr)
    }

    unsafe fn unmap(&self, addr: *mut u8, len: usize) -> io::Result<()> {
        // Reconstitute and drop the boxed slice leaked by `map`.
        unsafe {
            drop(Box::from_raw(core::slice::from_raw_parts_mut(addr, len)));
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sbrk_advances_monotonically_and_returns_previous_break() {
        let backend = TestBackend::new(4096, 64);
        let a = backend.sbrk(100).unwrap();
        let b = backend.sbrk(100).unwrap();
        assert_eq!(unsafe { b.offset_from(a) }, 100);
    }

    #[test]
    fn sbrk_zero_increment_queries_without_advancing() {
        let backend = TestBackend::new(4096, 64);
        let a = backend.sbrk(50).unwrap();
        let q = backend.sbrk(0).unwrap();
        assert_eq!(unsafe { q.offset_from(a) }, 50);
    }

    #[test]
    fn sbrk_rejects_growth_past_capacity() {
        let backend = TestBackend::new(16, 64);
        assert!(backend.sbrk(17).is_err());
    }

    #[test]
    fn map_and_unmap_round_trip() {
        let backend = TestBackend::new(16, 64);
        let ptr = backend.map(4096).unwrap();
        unsafe {
            core::ptr::write_bytes(ptr, 0xAB, 4096);
            backend.unmap(ptr, 4096).unwrap();
        }
    }
}
