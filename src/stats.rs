//! Allocation counters and the `malloc_stats`/`malloc_info` report renderers.
//!
//! Every counter is a plain atomic bumped with `Relaxed` ordering: these
//! numbers are diagnostic, not synchronization points, so the cost of a
//! stronger ordering buys nothing. `live_bytes` is signed because `free` on
//! a mapped block can momentarily race a concurrent `sbrk`-extend's stat
//! update; a transient negative reading is harmless for a counter nobody
//! synchronizes on.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide allocation counters, one instance per [`crate::heap::Heap`].
#[derive(Default)]
pub struct Stats {
    pub malloc_calls: AtomicU64,
    pub calloc_calls: AtomicU64,
    pub memalign_calls: AtomicU64,
    pub cmemalign_calls: AtomicU64,
    pub realloc_calls: AtomicU64,
    pub free_calls: AtomicU64,
    pub sbrk_calls: AtomicU64,
    pub sbrk_bytes: AtomicU64,
    pub mmap_calls: AtomicU64,
    pub mmap_bytes: AtomicU64,
    pub munmap_calls: AtomicU64,
    pub munmap_bytes: AtomicU64,
    /// Bytes currently handed out to callers (arena + mapped), net of frees.
    pub live_bytes: AtomicI64,
    /// High-water mark of `live_bytes`.
    pub live_bytes_max: AtomicI64,
}

impl Stats {
    pub const fn new() -> Self {
        Stats {
            malloc_calls: AtomicU64::new(0),
            calloc_calls: AtomicU64::new(0),
            memalign_calls: AtomicU64::new(0),
            cmemalign_calls: AtomicU64::new(0),
            realloc_calls: AtomicU64::new(0),
            free_calls: AtomicU64::new(0),
            sbrk_calls: AtomicU64::new(0),
            sbrk_bytes: AtomicU64::new(0),
            mmap_calls: AtomicU64::new(0),
            mmap_bytes: AtomicU64::new(0),
            munmap_calls: AtomicU64::new(0),
            munmap_bytes: AtomicU64::new(0),
            live_bytes: AtomicI64::new(0),
            live_bytes_max: AtomicI64::new(0),
        }
    }

    pub fn record_alloc(&self, bytes: usize) {
        let now = self.live_bytes.fetch_add(bytes as i64, Ordering::Relaxed) + bytes as i64;
        self.live_bytes_max.fetch_max(now, Ordering::Relaxed);
    }

    pub fn record_free(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes as i64, Ordering::Relaxed);
    }

    pub fn record_sbrk(&self, bytes: usize) {
        self.sbrk_calls.fetch_add(1, Ordering::Relaxed);
        self.sbrk_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_mmap(&self, bytes: usize) {
        self.mmap_calls.fetch_add(1, Ordering::Relaxed);
        self.mmap_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_munmap(&self, bytes: usize) {
        self.munmap_calls.fetch_add(1, Ordering::Relaxed);
        self.munmap_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Renders the `malloc_stats`-style plaintext report.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "lmmalloc heap statistics:");
        let _ = writeln!(
            out,
            "  calls:   malloc={} calloc={} memalign={} cmemalign={} realloc={} free={}",
            self.malloc_calls.load(Ordering::Relaxed),
            self.calloc_calls.load(Ordering::Relaxed),
            self.memalign_calls.load(Ordering::Relaxed),
            self.cmemalign_calls.load(Ordering::Relaxed),
            self.realloc_calls.load(Ordering::Relaxed),
            self.free_calls.load(Ordering::Relaxed),
        );
        let _ = writeln!(
            out,
            "  sbrk:    calls={} bytes={}",
            self.sbrk_calls.load(Ordering::Relaxed),
            self.sbrk_bytes.load(Ordering::Relaxed),
        );
        let _ = writeln!(
            out,
            "  mmap:    calls={} bytes={} munmap_calls={} munmap_bytes={}",
            self.mmap_calls.load(Ordering::Relaxed),
            self.mmap_bytes.load(Ordering::Relaxed),
            self.munmap_calls.load(Ordering::Relaxed),
            self.munmap_bytes.load(Ordering::Relaxed),
        );
        let _ = writeln!(
            out,
            "  live:    bytes={} max={}",
            self.live_bytes.load(Ordering::Relaxed),
            self.live_bytes_max.load(Ordering::Relaxed),
        );
        out
    }

    /// Renders a `malloc_info`-style XML report (the same envelope glibc's
    /// `malloc_info(3)` produces, trimmed to the fields this engine tracks).
    pub fn render_xml(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "<?xml version=\"1.0\"?>");
        let _ = writeln!(out, "<malloc version=\"1\">");
        let _ = writeln!(out, "<heap nr=\"0\">");
        let _ = writeln!(
            out,
            "  <total type=\"fast\" count=\"{}\" size=\"{}\"/>",
            self.malloc_calls.load(Ordering::Relaxed),
            self.live_bytes.load(Ordering::Relaxed).max(0),
        );
        let _ = writeln!(
            out,
            "  <total type=\"mmap\" count=\"{}\" size=\"{}\"/>",
            self.mmap_calls.load(Ordering::Relaxed),
            self.mmap_bytes.load(Ordering::Relaxed),
        );
        let _ = writeln!(out, "  <system type=\"current\" size=\"{}\"/>", self.sbrk_bytes.load(Ordering::Relaxed));
        let _ = writeln!(out, "  <max size=\"{}\"/>", self.live_bytes_max.load(Ordering::Relaxed).max(0));
        let _ = writeln!(out, "</heap>");
        let _ = writeln!(out, "</malloc>");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_bytes_tracks_alloc_and_free() {
        let s = Stats::new();
        s.record_alloc(100);
        s.record_alloc(50);
        s.record_free(30);
        assert_eq!(s.live_bytes.load(Ordering::Relaxed), 120);
        assert_eq!(s.live_bytes_max.load(Ordering::Relaxed), 150);
    }

    #[test]
    fn text_report_mentions_every_counter_family() {
        let s = Stats::new();
        s.malloc_calls.fetch_add(1, Ordering::Relaxed);
        let report = s.render_text();
        assert!(report.contains("malloc=1"));
        assert!(report.contains("sbrk:"));
        assert!(report.contains("mmap:"));
    }

    #[test]
    fn xml_report_is_well_formed_enough() {
        let s = Stats::new();
        let xml = s.render_xml();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.trim_end().ends_with("</malloc>"));
    }
}
