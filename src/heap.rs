//! The allocator engine: size-classed arena carving, a standalone-mapping
//! path for large requests, and the malloc-family operations built on top
//! of both.
//!
//! `Heap<B>` is generic over [`Backend`] so the exact same logic runs
//! against the real OS in production and against an in-memory stand-in in
//! tests. A single process-wide instance (`Heap<SystemBackend>`) is boot-
//! strapped lazily: the first call into any entry point pays the cost of
//! reading environment tunables and installing the logger; every call after
//! that just checks an already-true atomic flag.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

use crate::backend::Backend;
use crate::config::Config;
use crate::error::HeapError;
use crate::freelist::FreeLists;
use crate::header::{self, Header};
use crate::logger;
use crate::size_class::{self, BUCKET_SIZES, NUM_CLASSES};
use crate::stats::Stats;

const BOOT_COLD: u8 = 0;
const BOOT_IN_PROGRESS: u8 = 1;
const BOOT_DONE: u8 = 2;

thread_local! {
    /// Detects a thread re-entering the boot path from within the boot path
    /// itself (e.g. the logger's first `log::set_logger` call triggering an
    /// allocation that loops back into `ensure_booted`). Any such re-entrant
    /// call must fall through to a minimal, allocation-free path rather than
    /// spin waiting on itself forever.
    static BOOTING_THIS_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// State protected by the single "extend lock": the bump cursor into the
/// most recent `sbrk` chunk, and how many bytes remain in it.
struct ExtendState {
    cursor: usize,
    remaining: usize,
}

/// A complete allocator engine over backend `B`.
pub struct Heap<B: Backend> {
    backend: B,
    boot_state: AtomicU8,
    /// Address of the program break at boot time; the lower bound of the
    /// arena. Valid only once `boot_state == BOOT_DONE`.
    arena_begin: AtomicUsize,
    /// Current upper bound of the arena (exclusive), updated with Release
    /// ordering by `extend` and read with Acquire ordering by `free`'s
    /// lock-free mapped-vs-arena classification.
    arena_end: AtomicUsize,
    extend_lock: Mutex<ExtendState>,
    free_lists: FreeLists,
    stats: Stats,
    config: Config,
}

/// Outcome of carving a block for a size class: whether its bytes are known
/// to already be zero (fresh from the backend) or not (recycled from a
/// freelist), so callers like `calloc` can skip redundant zeroing.
struct Carved {
    header: *mut Header,
    fresh: bool,
}

impl<B: Backend> Heap<B> {
    /// Builds a heap over `backend`. Does not touch the backend at all;
    /// safe to call from a `static` initializer.
    pub const fn new(backend: B) -> Self {
        Heap {
            backend,
            boot_state: AtomicU8::new(BOOT_COLD),
            arena_begin: AtomicUsize::new(0),
            arena_end: AtomicUsize::new(0),
            extend_lock: Mutex::new(ExtendState { cursor: 0, remaining: 0 }),
            free_lists: FreeLists::new(),
            stats: Stats::new(),
            config: Config::new(),
        }
    }

    /// Lazily performs one-time setup: seeds tunables from the environment,
    /// installs the logger, and snapshots the initial program break as the
    /// arena's lower bound. Idempotent and safe to call from every entry
    /// point; cheap (a single atomic load) once booted.
    fn ensure_booted(&self) {
        if self.boot_state.load(Ordering::Acquire) == BOOT_DONE {
            return;
        }
        self.boot_slow();
    }

    #[cold]
    fn boot_slow(&self) {
        if BOOTING_THIS_THREAD.with(|b| b.get()) {
            // Re-entered boot from within boot itself (e.g. the logger's
            // first allocation triggering another `malloc` before the boot
            // sequence it's part of has finished). Boot does no allocation
            // of its own today, so this should be unreachable; catch a
            // regression that makes it reachable with a debug-build
            // assertion rather than silently limping on with a half-booted
            // heap. Release builds fall through since there is nothing
            // safe to do but let the caller's allocation fail through the
            // normal out-of-memory path.
            if cfg!(debug_assertions) {
                crate::error::fatal("recursive boot");
            }
            return;
        }

        match self.boot_state.compare_exchange(
            BOOT_COLD,
            BOOT_IN_PROGRESS,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                BOOTING_THIS_THREAD.with(|b| b.set(true));
                self.config.seed_from_env();
                logger::init();
                match self.backend.sbrk(0) {
                    Ok(brk) => {
                        self.arena_begin.store(brk as usize, Ordering::Relaxed);
                        self.arena_end.store(brk as usize, Ordering::Release);
                    }
                    Err(_) => crate::error::fatal("could not read initial program break"),
                }
                BOOTING_THIS_THREAD.with(|b| b.set(false));
                self.boot_state.store(BOOT_DONE, Ordering::Release);
            }
            Err(BOOT_IN_PROGRESS) => {
                // Another thread is booting; spin until it finishes. Boot
                // does no allocation of its own, so this is bounded.
                while self.boot_state.load(Ordering::Acquire) != BOOT_DONE {
                    std::hint::spin_loop();
                }
            }
            Err(_) => {}
        }
    }

    fn max_class_in_use(&self) -> usize {
        size_class::max_class_in_use(self.config.mapping_threshold.load(Ordering::Relaxed))
    }

    /// Grows the arena (if needed) and returns a fresh or recycled block for
    /// `class`, along with whether its payload bytes are known-zero.
    fn carve(&self, class: usize) -> Result<Carved, HeapError> {
        if let Some(header) = unsafe { self.free_lists.pop(class) } {
            return Ok(Carved { header, fresh: false });
        }
        self.extend(class).map(|header| Carved { header, fresh: true })
    }

    fn extend(&self, class: usize) -> Result<*mut Header, HeapError> {
        let bucket = BUCKET_SIZES[class];
        let mut state = self.extend_lock.lock();

        if state.remaining >= bucket {
            let addr = state.cursor;
            state.cursor += bucket;
            state.remaining -= bucket;
            return Ok(addr as *mut Header);
        }

        let top_pad = self.config.top_pad.load(Ordering::Relaxed);
        let request = bucket.checked_add(top_pad).ok_or(HeapError::OutOfMemory)?;
        let prev_brk = self.backend.sbrk(request as isize).map_err(|_| HeapError::OutOfMemory)?;
        self.stats.record_sbrk(request);

        let addr = prev_brk as usize;
        if cfg!(debug_assertions) {
            // Surface uninitialized-read bugs: freshly sbrk'd pages are not
            // left zero, so `calloc` cannot skip zeroing them on the
            // assumption that OS-fresh memory already reads as zero.
            unsafe { core::ptr::write_bytes(addr as *mut u8, 0xFF, request) };
        }
        state.cursor = addr + bucket;
        state.remaining = request - bucket;
        self.arena_end.store(addr + request, Ordering::Release);

        Ok(addr as *mut Header)
    }

    fn map_block(&self, payload_len: usize, align: usize) -> Result<(*mut Header, usize), HeapError> {
        let page = self.backend.page_size();
        let worst_case = payload_len
            .checked_add(header::HEADER_SIZE)
            .and_then(|n| n.checked_add(align))
            .ok_or(HeapError::OutOfMemory)?;
        let len = round_up(worst_case, page);
        let base = self.backend.map(len).map_err(|_| HeapError::OutOfMemory)?;
        self.stats.record_mmap(len);
        Ok((base as *mut Header, len))
    }

    fn payload_of(header: *mut Header) -> *mut u8 {
        unsafe { (header as *mut u8).add(header::HEADER_SIZE) }
    }

    fn usable_payload_bytes(class: usize) -> usize {
        BUCKET_SIZES[class] - header::HEADER_SIZE
    }

    /// Decodes `ptr`'s header and validates it before handing it back to a
    /// caller, rather than trusting a decoded class index or header address
    /// that could only be the product of heap corruption or a pointer this
    /// engine never handed out. Detectable only in debug builds, same as
    /// the rest of this engine's corruption checks: a release build cannot
    /// tell a corrupted header apart from a valid one without the extra
    /// bookkeeping this would cost on every free/realloc.
    ///
    /// # Safety
    /// Same precondition as [`header::decode`]: `ptr` must be a pointer this
    /// engine previously returned.
    unsafe fn decode_checked(&self, ptr: *mut u8) -> header::Decoded {
        let arena_begin = self.arena_begin.load(Ordering::Relaxed);
        let arena_end = self.arena_end.load(Ordering::Acquire);
        let decoded = unsafe { header::decode(ptr, arena_begin, arena_end) };

        if cfg!(debug_assertions) {
            if (decoded.real_header as usize) % header::ALIGN0 != 0 {
                crate::error::fatal("wild pointer: header is not block-aligned");
            }
            if let header::Location::Class(class) = decoded.location {
                if class >= NUM_CLASSES {
                    crate::error::fatal("corrupted header: class index out of range");
                }
            }
        }
        decoded
    }

    /// `malloc(size)`. Returns null (no errno set beyond what the backend
    /// already set) only when the backend itself is exhausted.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.ensure_booted();
        match self.malloc_internal(size) {
            Ok((header, _fresh, _usable)) => Self::payload_of(header),
            Err(e) => {
                crate::error::set_errno(e);
                core::ptr::null_mut()
            }
        }
    }

    /// Returns the carved/mapped header, whether its bytes are known-fresh,
    /// and the block's total usable payload length (header excluded).
    fn malloc_internal(&self, size: usize) -> Result<(*mut Header, bool, usize), HeapError> {
        let total = size.checked_add(header::HEADER_SIZE).ok_or(HeapError::OutOfMemory)?;
        let max_class = self.max_class_in_use();

        if let Some(class) = size_class::class_for(total, max_class) {
            let carved = self.carve(class)?;
            unsafe { header::write_real(carved.header, class, false) };
            self.stats.record_alloc(BUCKET_SIZES[class]);
            return Ok((carved.header, carved.fresh, Self::usable_payload_bytes(class)));
        }

        let (header, len) = self.map_block(size, header::ALIGN0)?;
        unsafe { header::write_mapped(header, len, false) };
        self.stats.record_alloc(len);
        Ok((header, true, len - header::HEADER_SIZE))
    }

    /// `calloc(nmemb, size)`: overflow-checked multiply, then a zeroed
    /// allocation.
    pub fn calloc(&self, nmemb: usize, size: usize) -> *mut u8 {
        self.ensure_booted();
        self.stats.calloc_calls.fetch_add(1, Ordering::Relaxed);

        let total = match nmemb.checked_mul(size) {
            Some(t) => t,
            None => {
                crate::error::set_errno(HeapError::SizeOverflow);
                return core::ptr::null_mut();
            }
        };

        match self.malloc_internal(total) {
            Ok((header, fresh, usable)) => {
                let payload = Self::payload_of(header);
                // Zero the whole bucket payload, not just `total`: the tail
                // between `total` and the bucket's usable size is still
                // reachable through the zero-fill bit (e.g. by `realloc`),
                // so it must actually be zero, not merely unrequested.
                // Debug builds scrub fresh arena pages with 0xFF (see
                // `extend`), so "fresh" no longer implies "already zero"
                // there; only a genuinely fresh OS mapping can skip zeroing.
                if !fresh || cfg!(debug_assertions) {
                    unsafe { core::ptr::write_bytes(payload, 0, usable) };
                }
                unsafe { header::set_zero_fill(header, true) };
                payload
            }
            Err(e) => {
                crate::error::set_errno(e);
                core::ptr::null_mut()
            }
        }
    }

    /// `memalign(alignment, size)`: an allocation whose payload address is a
    /// multiple of `alignment`. Plants a fake header immediately before the
    /// aligned payload when the natural allocation does not already land on
    /// the requested boundary.
    pub fn memalign(&self, alignment: usize, size: usize) -> *mut u8 {
        self.ensure_booted();
        self.stats.memalign_calls.fetch_add(1, Ordering::Relaxed);

        if !alignment.is_power_of_two() || alignment < header::ALIGN0 {
            crate::error::set_errno(HeapError::InvalidAlignment);
            return core::ptr::null_mut();
        }

        match self.memalign_internal(alignment, size, false) {
            Ok(ptr) => ptr,
            Err(e) => {
                crate::error::set_errno(e);
                core::ptr::null_mut()
            }
        }
    }

    fn memalign_internal(&self, alignment: usize, size: usize, zero: bool) -> Result<*mut u8, HeapError> {
        // Two `HEADER_SIZE`s are required, not one: the first is the real
        // header itself; the second is reserved for a fake header that may
        // need to sit just before the aligned payload, since rounding
        // `real_payload + HEADER_SIZE` up to `alignment` can itself land up
        // to `alignment - 1` bytes past `real_payload`. Budgeting only
        // `size + alignment + HEADER_SIZE` (as `uHeapLmmm`'s literal
        // derivation does) is not enough room in the worst case here and
        // would trip the `debug_assert!` below.
        let total = size
            .checked_add(header::HEADER_SIZE * 2)
            .and_then(|n| n.checked_add(alignment))
            .ok_or(HeapError::OutOfMemory)?;
        let max_class = self.max_class_in_use();

        let (real_header, fresh, class_len) = if let Some(class) = size_class::class_for(total, max_class) {
            let carved = self.carve(class)?;
            unsafe { header::write_real(carved.header, class, false) };
            self.stats.record_alloc(BUCKET_SIZES[class]);
            (carved.header, carved.fresh, BUCKET_SIZES[class])
        } else {
            let (header, len) = self.map_block(size, alignment)?;
            unsafe { header::write_mapped(header, len, false) };
            self.stats.record_alloc(len);
            (header, true, len)
        };

        let real_payload = Self::payload_of(real_header) as usize;
        let aligned = round_up(real_payload + header::HEADER_SIZE, alignment);
        let payload = if aligned == real_payload {
            real_payload as *mut u8
        } else {
            let fake = (aligned - header::HEADER_SIZE) as *mut Header;
            unsafe { header::write_fake(fake, real_header, alignment) };
            aligned as *mut u8
        };

        debug_assert!(payload as usize + size <= real_header as usize + class_len);

        if zero {
            // Zero through the end of the real block's usable region, not
            // just `size` bytes: the tail beyond the requested size is still
            // reachable through the zero-fill bit (e.g. by `realloc`), so it
            // must actually be zero rather than merely unrequested.
            let usable_from_payload = (real_header as usize + class_len) - payload as usize;
            unsafe { core::ptr::write_bytes(payload, 0, usable_from_payload) };
            unsafe { header::set_zero_fill(real_header, true) };
        } else if !fresh {
            // Recycled memory is not guaranteed zero; only claim the
            // zero-fill bit when we know it to be true.
            unsafe { header::set_zero_fill(real_header, false) };
        }

        Ok(payload)
    }

    /// `cmemalign(alignment, nmemb, size)`: `memalign` plus zero-fill, with
    /// the same overflow checking as `calloc`.
    pub fn cmemalign(&self, alignment: usize, nmemb: usize, size: usize) -> *mut u8 {
        self.ensure_booted();
        self.stats.cmemalign_calls.fetch_add(1, Ordering::Relaxed);

        if !alignment.is_power_of_two() || alignment < header::ALIGN0 {
            crate::error::set_errno(HeapError::InvalidAlignment);
            return core::ptr::null_mut();
        }

        let total = match nmemb.checked_mul(size) {
            Some(t) => t,
            None => {
                crate::error::set_errno(HeapError::SizeOverflow);
                return core::ptr::null_mut();
            }
        };

        match self.memalign_internal(alignment, total, true) {
            Ok(ptr) => ptr,
            Err(e) => {
                crate::error::set_errno(e);
                core::ptr::null_mut()
            }
        }
    }

    /// `free(ptr)`. A null pointer is a no-op, as required by the C ABI.
    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.ensure_booted();
        self.stats.free_calls.fetch_add(1, Ordering::Relaxed);

        let decoded = unsafe { self.decode_checked(ptr) };

        match decoded.location {
            header::Location::Class(class) => {
                self.stats.record_free(BUCKET_SIZES[class]);
                unsafe { self.free_lists.push(class, decoded.real_header) };
            }
            header::Location::Mapped(len) => {
                self.stats.record_free(len);
                self.stats.record_munmap(len);
                unsafe {
                    let _ = self.backend.unmap(decoded.real_header as *mut u8, len);
                }
            }
        }
    }

    /// `realloc(ptr, new_size)`. `ptr == null` behaves like `malloc`;
    /// `new_size == 0` frees `ptr` and returns null.
    pub fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(new_size);
        }
        if new_size == 0 {
            self.free(ptr);
            return core::ptr::null_mut();
        }

        self.ensure_booted();
        self.stats.realloc_calls.fetch_add(1, Ordering::Relaxed);

        let decoded = unsafe { self.decode_checked(ptr) };

        self.realloc_decoded(ptr, decoded, decoded.alignment, new_size)
    }

    /// The 3-argument `realloc(ptr, alignment, new_size)`: like `realloc`
    /// but additionally guarantees the returned payload satisfies
    /// `alignment`, updating an existing fake header in place when the
    /// current block already satisfies the new constraint.
    pub fn realloc_aligned(&self, ptr: *mut u8, alignment: usize, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.memalign(alignment, new_size);
        }
        if !alignment.is_power_of_two() || alignment < header::ALIGN0 {
            crate::error::set_errno(HeapError::InvalidAlignment);
            return core::ptr::null_mut();
        }
        if new_size == 0 {
            self.free(ptr);
            return core::ptr::null_mut();
        }

        self.ensure_booted();
        self.stats.realloc_calls.fetch_add(1, Ordering::Relaxed);

        let decoded = unsafe { self.decode_checked(ptr) };

        if decoded.alignment >= alignment && (ptr as usize) % alignment == 0 {
            if decoded.alignment != alignment {
                // Fake header already exists (over-aligned from a previous
                // call); just relabel it with the weaker constraint.
                let fake = (ptr as usize - header::HEADER_SIZE) as *mut Header;
                unsafe { header::set_fake_alignment(fake, alignment) };
            }
            return self.realloc_decoded(ptr, decoded, alignment, new_size);
        }

        // Current placement cannot satisfy the new alignment in place:
        // allocate fresh, copy, free old.
        let new_ptr = self.memalign(alignment, new_size);
        if new_ptr.is_null() {
            return core::ptr::null_mut();
        }
        let old_usable = self.decoded_usable_bytes(&decoded);
        unsafe { core::ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size)) };
        self.free(ptr);
        new_ptr
    }

    fn decoded_usable_bytes(&self, decoded: &header::Decoded) -> usize {
        match decoded.location {
            header::Location::Class(class) => Self::usable_payload_bytes(class),
            header::Location::Mapped(len) => len - header::HEADER_SIZE,
        }
    }

    /// Shared tail of both `realloc` entry points, once the old block has
    /// been decoded and the target alignment settled. Implements the
    /// "reuse in place when waste is at most 50%" rule: `old_usable` is the
    /// capacity already available at `ptr`, and the block is kept unchanged
    /// whenever `new_size <= old_usable <= 2 * new_size`.
    fn realloc_decoded(&self, ptr: *mut u8, decoded: header::Decoded, alignment: usize, new_size: usize) -> *mut u8 {
        let old_usable = self.decoded_usable_bytes(&decoded);

        if new_size <= old_usable && old_usable <= new_size.saturating_mul(2) {
            return ptr;
        }

        let new_ptr = match (decoded.zero_fill, alignment == header::ALIGN0) {
            (true, true) => self.calloc(1, new_size),
            (true, false) => self.cmemalign(alignment, 1, new_size),
            (false, true) => self.malloc(new_size),
            (false, false) => self.memalign(alignment, new_size),
        };
        if new_ptr.is_null() {
            return core::ptr::null_mut();
        }

        // The new block is already correctly zero-filled (if applicable) by
        // the call above; copying the overlapping prefix on top leaves any
        // tail beyond `old_usable` untouched and therefore still zero.
        unsafe { core::ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size)) };

        self.free(ptr);
        new_ptr
    }

    /// `malloc_usable_size(ptr)`.
    pub fn usable_size(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return 0;
        }
        let decoded = unsafe { self.decode_checked(ptr) };
        self.decoded_usable_bytes(&decoded)
    }

    /// `malloc_alignment(ptr)`.
    pub fn alignment(&self, ptr: *mut u8) -> usize {
        if ptr.is_null() {
            return header::ALIGN0;
        }
        unsafe { self.decode_checked(ptr).alignment }
    }

    /// `malloc_zero_fill(ptr)`: whether the block is known to currently
    /// hold only zero bytes.
    pub fn zero_fill(&self, ptr: *mut u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        unsafe { self.decode_checked(ptr).zero_fill }
    }

    /// `mallopt(option, value)`.
    pub fn mallopt(&self, option: i32, value: i32) -> bool {
        self.ensure_booted();
        self.config.mallopt(option, value, self.backend.page_size())
    }

    /// `malloc_trim(pad)`: this engine never returns arena memory to the OS
    /// (no coalescing, no munmap-of-arena-tail), so there is nothing to
    /// trim; always reports no memory released.
    pub fn malloc_trim(&self, _pad: usize) -> bool {
        false
    }

    /// `malloc_stats()`-equivalent plaintext report.
    pub fn stats_text(&self) -> String {
        self.stats.render_text()
    }

    /// `malloc_info()`-equivalent XML report.
    pub fn stats_xml(&self) -> String {
        self.stats.render_xml()
    }

    /// `malloc_get_state()`: unsupported by this engine (no opaque
    /// checkpoint format is defined); always returns null, matching glibc's
    /// documented behavior when the feature is unavailable.
    pub fn get_state(&self) -> *mut u8 {
        core::ptr::null_mut()
    }

    /// `malloc_set_state()`: unsupported; always reports failure.
    pub fn set_state(&self, _state: *mut u8) -> i32 {
        -1
    }
}

fn round_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestBackend;

    fn fresh_heap() -> Heap<TestBackend> {
        Heap::new(TestBackend::default())
    }

    #[test]
    fn malloc_then_free_then_malloc_reuses_block() {
        let heap = fresh_heap();
        let a = heap.malloc(64);
        assert!(!a.is_null());
        heap.free(a);
        let b = heap.malloc(64);
        assert_eq!(a, b);
    }

    #[test]
    fn malloc_zero_is_a_valid_freeable_pointer() {
        let heap = fresh_heap();
        let p = heap.malloc(0);
        assert!(!p.is_null());
        heap.free(p);
    }

    #[test]
    fn calloc_zeroes_payload() {
        let heap = fresh_heap();
        let p = heap.calloc(16, 8);
        assert!(!p.is_null());
        unsafe {
            for i in 0..128 {
                assert_eq!(*p.add(i), 0);
            }
            core::ptr::write_bytes(p, 0xAB, 128);
        }
        heap.free(p);
        let q = heap.calloc(16, 8);
        unsafe {
            for i in 0..128 {
                assert_eq!(*q.add(i), 0, "recycled calloc block must be re-zeroed");
            }
        }
    }

    #[test]
    fn calloc_rejects_multiplication_overflow() {
        let heap = fresh_heap();
        let p = heap.calloc(usize::MAX, 2);
        assert!(p.is_null());
    }

    #[test]
    fn calloc_zeroes_the_whole_bucket_not_just_the_requested_bytes() {
        let heap = fresh_heap();
        // 50 requested bytes lands in a bucket bigger than 50 (e.g. the
        // 64-byte usable-payload bucket), leaving an unrequested tail that
        // must still read as zero since it stays reachable through the
        // zero-fill bit.
        let p = heap.calloc(1, 50);
        assert!(!p.is_null());
        let usable = heap.usable_size(p);
        assert!(usable > 50, "test needs a bucket with slack beyond the request");
        unsafe {
            for i in 0..usable {
                assert_eq!(*p.add(i), 0, "byte {i} of the bucket tail was not zeroed");
            }
            core::ptr::write_bytes(p, 0xAB, usable);
        }
        heap.free(p);

        let q = heap.calloc(1, 50);
        unsafe {
            for i in 0..usable {
                assert_eq!(*q.add(i), 0, "recycled bucket tail must be re-zeroed, not just the requested prefix");
            }
        }
    }

    #[test]
    fn memalign_returns_aligned_pointer() {
        let heap = fresh_heap();
        let p = heap.memalign(4096, 100);
        assert!(!p.is_null());
        assert_eq!(p as usize % 4096, 0);
        unsafe {
            core::ptr::write_bytes(p, 0x11, 100);
        }
        heap.free(p);
    }

    #[test]
    fn cmemalign_zeroes_the_whole_reachable_tail() {
        let heap = fresh_heap();
        let p = heap.cmemalign(64, 1, 50);
        assert!(!p.is_null());
        let usable = heap.usable_size(p);
        assert!(usable >= 50);
        unsafe {
            for i in 0..usable {
                assert_eq!(*p.add(i), 0, "byte {i} of the aligned block's tail was not zeroed");
            }
        }
        heap.free(p);
    }

    #[test]
    fn realloc_grow_preserves_contents() {
        let heap = fresh_heap();
        let p = heap.malloc(32);
        unsafe {
            for i in 0..32 {
                *p.add(i) = i as u8;
            }
        }
        let q = heap.realloc(p, 256);
        assert!(!q.is_null());
        unsafe {
            for i in 0..32 {
                assert_eq!(*q.add(i), i as u8);
            }
        }
        heap.free(q);
    }

    #[test]
    fn realloc_null_behaves_like_malloc() {
        let heap = fresh_heap();
        let p = heap.realloc(core::ptr::null_mut(), 64);
        assert!(!p.is_null());
        heap.free(p);
    }

    #[test]
    fn realloc_zero_frees_and_returns_null() {
        let heap = fresh_heap();
        let p = heap.malloc(64);
        let q = heap.realloc(p, 0);
        assert!(q.is_null());
    }

    #[test]
    fn large_allocation_uses_mapped_path_and_frees_cleanly() {
        let heap = fresh_heap();
        let big = heap.config.mapping_threshold.load(Ordering::Relaxed) + 1;
        let p = heap.malloc(big);
        assert!(!p.is_null());
        assert!(heap.usable_size(p) >= big);
        heap.free(p);
    }

    #[test]
    fn mallopt_changes_mapping_threshold() {
        let heap = fresh_heap();
        assert!(heap.mallopt(crate::config::M_MMAP_THRESHOLD, 8192));
        assert_eq!(heap.config.mapping_threshold.load(Ordering::Relaxed), 8192);
    }

    #[test]
    fn concurrent_alloc_free_stress() {
        use std::sync::Arc;
        use std::thread;

        let heap = Arc::new(fresh_heap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let heap = Arc::clone(&heap);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let p = heap.malloc(48);
                    assert!(!p.is_null());
                    unsafe { core::ptr::write_bytes(p, 0x5A, 48) };
                    heap.free(p);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
