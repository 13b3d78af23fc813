//! The C ABI surface: `extern "C"` exports bound to a single process-wide
//! [`Heap<SystemBackend>`] singleton, under the conventional libc symbol
//! names so this crate can be linked in place of the platform's allocator.

use std::ffi::{c_int, c_void};

use crate::backend::{Backend, SystemBackend};
use crate::heap::Heap;

/// The process-wide allocator instance backing every exported symbol.
pub static HEAP: Heap<SystemBackend> = Heap::new(SystemBackend);

/// # Safety
/// Standard `malloc(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    HEAP.malloc(size) as *mut c_void
}

/// # Safety
/// Standard `calloc(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    HEAP.calloc(nmemb, size) as *mut c_void
}

/// # Safety
/// `ptr` must be null or a pointer previously returned by one of this
/// crate's allocation functions and not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    HEAP.free(ptr as *mut u8)
}

/// # Safety
/// Standard `realloc(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    HEAP.realloc(ptr as *mut u8, size) as *mut c_void
}

/// Non-standard 3-argument realloc: updates (or imposes) an alignment
/// constraint while resizing. Exported for callers that track alignment
/// separately from size, as `cmemalign` callers typically must.
///
/// # Safety
/// As `realloc`, plus `alignment` must be a power of two.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc_aligned(ptr: *mut c_void, alignment: usize, size: usize) -> *mut c_void {
    HEAP.realloc_aligned(ptr as *mut u8, alignment, size) as *mut c_void
}

/// # Safety
/// `alignment` must be a power of two at least as large as `ALIGN0`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    HEAP.memalign(alignment, size) as *mut c_void
}

/// # Safety
/// As `memalign`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cmemalign(alignment: usize, nmemb: usize, size: usize) -> *mut c_void {
    HEAP.cmemalign(alignment, nmemb, size) as *mut c_void
}

/// # Safety
/// `size` must be a multiple of `alignment`, per the `aligned_alloc(3)`
/// contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    HEAP.memalign(alignment, size) as *mut c_void
}

/// # Safety
/// Standard `posix_memalign(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    if alignment < core::mem::size_of::<usize>() || !alignment.is_power_of_two() {
        return libc::EINVAL;
    }
    let ptr = HEAP.memalign(alignment, size);
    if ptr.is_null() {
        return libc::ENOMEM;
    }
    unsafe {
        *memptr = ptr as *mut c_void;
    }
    0
}

/// # Safety
/// Standard `valloc(3)` contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    HEAP.memalign(SystemBackend.page_size(), size) as *mut c_void
}

/// # Safety
/// `ptr` must be null or a live pointer returned by this crate.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    HEAP.usable_size(ptr as *mut u8)
}

/// # Safety
/// As `malloc_usable_size`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_alignment(ptr: *mut c_void) -> usize {
    HEAP.alignment(ptr as *mut u8)
}

/// # Safety
/// As `malloc_usable_size`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_zero_fill(ptr: *mut c_void) -> c_int {
    HEAP.zero_fill(ptr as *mut u8) as c_int
}

/// `mallopt(3)`. Nonzero means success, matching glibc; see DESIGN.md for
/// why no inversion is needed anywhere in this call chain.
#[unsafe(no_mangle)]
pub extern "C" fn mallopt(option: c_int, value: c_int) -> c_int {
    HEAP.mallopt(option, value) as c_int
}

/// `malloc_trim(3)`.
#[unsafe(no_mangle)]
pub extern "C" fn malloc_trim(pad: usize) -> c_int {
    HEAP.malloc_trim(pad) as c_int
}

/// `malloc_stats(3)`: writes the plaintext report to stderr.
#[unsafe(no_mangle)]
pub extern "C" fn malloc_stats() {
    eprint!("{}", HEAP.stats_text());
}

/// Writes the plaintext report to an arbitrary file descriptor instead of
/// always stderr. Not part of glibc's surface but useful for embedders that
/// want the report routed elsewhere without parsing `malloc_stats`'s stderr
/// output.
///
/// # Safety
/// `fd` must be a valid, writable file descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_stats_fd(fd: c_int) {
    let report = HEAP.stats_text();
    unsafe {
        libc::write(fd, report.as_ptr() as *const c_void, report.len());
    }
}

/// `malloc_info(3)`: writes the XML report to `fd`.
///
/// # Safety
/// `fd` must be a valid, writable file descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_info(_options: c_int, fd: *mut libc::FILE) -> c_int {
    let report = HEAP.stats_xml();
    let written = unsafe { libc::fwrite(report.as_ptr() as *const c_void, 1, report.len(), fd) };
    if written == report.len() {
        0
    } else {
        -1
    }
}

/// # Safety
/// Matches glibc's documented (unsupported-by-many-allocators) contract.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_get_state() -> *mut c_void {
    HEAP.get_state() as *mut c_void
}

/// # Safety
/// As `malloc_get_state`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_set_state(state: *mut c_void) -> c_int {
    HEAP.set_state(state as *mut u8)
}
