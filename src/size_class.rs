//! Static size-class table and the fast byte-count-to-class lookup.
//!
//! The bucket list below is ported from `uHeapLmmm`'s `bucketSizes` table: dense
//! multiples of 16 at the small end, widening geometrically, with every entry
//! that lands on a power of two bumped up by [`HEADER_SIZE`] so the *net*
//! payload delivered for that request is exactly the power of two.

use crate::header::HEADER_SIZE;

/// The bucket sizes, in ascending order. Every value is a *total* block size
/// (header + payload).
pub const BUCKET_SIZES: [usize; 91] = [
    16, 32, 48, 64 + HEADER_SIZE, // 4
    96, 112, 128 + HEADER_SIZE, // 3
    160, 192, 224, 256 + HEADER_SIZE, // 4
    320, 384, 448, 512 + HEADER_SIZE, // 4
    640, 768, 896, 1024 + HEADER_SIZE, // 4
    1536, 2048 + HEADER_SIZE, // 2
    2560, 3072, 3584, 4096 + HEADER_SIZE, // 4
    6144, 8192 + HEADER_SIZE, // 2
    9216, 10240, 11264, 12288, 13312, 14336, 15360, 16384 + HEADER_SIZE, // 8
    18432, 20480, 22528, 24576, 26624, 28672, 30720, 32768 + HEADER_SIZE, // 8
    36864, 40960, 45056, 49152, 53248, 57344, 61440, 65536 + HEADER_SIZE, // 8
    73728, 81920, 90112, 98304, 106496, 114688, 122880, 131072 + HEADER_SIZE, // 8
    147456, 163840, 180224, 196608, 212992, 229376, 245760, 262144 + HEADER_SIZE, // 8
    294912, 327680, 360448, 393216, 425984, 458752, 491520, 524288 + HEADER_SIZE, // 8
    655360, 786432, 917504, 1048576 + HEADER_SIZE, // 4
    1179648, 1310720, 1441792, 1572864, 1703936, 1835008, 1966080, 2097152 + HEADER_SIZE, // 8
    2621440, 3145728, 3670016, 4194304 + HEADER_SIZE, // 4
];

pub const NUM_CLASSES: usize = BUCKET_SIZES.len();

/// Upper bound (exclusive) of the fast lookup table; requests at or above this
/// byte count always fall back to binary search.
pub const FAST_BOUND: usize = 4096 + 1;

const _: () = assert!(NUM_CLASSES <= u8::MAX as usize, "class index must fit in a u8");
const _: () = assert!(BUCKET_SIZES[NUM_CLASSES - 1] >= FAST_BOUND - 1, "fast lookup must stay inside the table");

/// Builds the direct-mapped lookup table at compile time: `LOOKUP[n]` is the
/// index of the smallest bucket whose size is `>= n`.
const fn build_lookup() -> [u8; FAST_BOUND] {
    let mut table = [0u8; FAST_BOUND];
    let mut idx = 0usize;
    let mut n = 0usize;
    while n < FAST_BOUND {
        while BUCKET_SIZES[idx] < n && idx + 1 < NUM_CLASSES {
            idx += 1;
        }
        table[n] = idx as u8;
        n += 1;
    }
    table
}

static LOOKUP: [u8; FAST_BOUND] = build_lookup();

/// Largest class index with bucket size `<= mappingThreshold`. Recomputed
/// whenever the mapping threshold tunable changes.
pub fn max_class_in_use(mapping_threshold: usize) -> usize {
    match BUCKET_SIZES.binary_search(&mapping_threshold) {
        Ok(i) => i,
        Err(i) => i.min(NUM_CLASSES - 1),
    }
}

/// Maps a total byte count (user bytes + header) to the smallest class whose
/// bucket is large enough, restricted to the active prefix
/// `[0, max_class_in_use]`. Returns `None` when no class in the active prefix
/// is large enough (the caller should take the mapped path instead).
pub fn class_for(total_bytes: usize, max_class_in_use: usize) -> Option<usize> {
    if total_bytes < FAST_BOUND {
        let idx = LOOKUP[total_bytes] as usize;
        return if idx <= max_class_in_use { Some(idx) } else { None };
    }

    let active = &BUCKET_SIZES[..=max_class_in_use];
    match active.binary_search(&total_bytes) {
        Ok(i) => Some(i),
        Err(i) if i <= max_class_in_use => Some(i),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_multiple_of_16() {
        for w in BUCKET_SIZES.windows(2) {
            assert!(w[0] < w[1], "table must be strictly increasing");
        }
        for &size in BUCKET_SIZES.iter() {
            assert_eq!(size % 16, 0, "bucket {size} must be a multiple of 16");
        }
    }

    #[test]
    fn power_of_two_buckets_net_exact_payload() {
        // 64 + HEADER_SIZE must be in the table so a 64-byte request nets exactly 64 usable bytes.
        assert!(BUCKET_SIZES.contains(&(64 + HEADER_SIZE)));
        assert!(BUCKET_SIZES.contains(&(4096 + HEADER_SIZE)));
    }

    #[test]
    fn fast_lookup_matches_binary_search() {
        let max_class = NUM_CLASSES - 1;
        for n in 0..FAST_BOUND {
            let fast = class_for(n, max_class).unwrap();
            let slow = BUCKET_SIZES.binary_search(&n).unwrap_or_else(|i| i);
            assert_eq!(BUCKET_SIZES[fast], BUCKET_SIZES[slow], "mismatch at n={n}");
        }
    }

    #[test]
    fn class_for_respects_max_class_in_use() {
        let small_max = 3;
        assert_eq!(class_for(16, small_max), Some(0));
        assert!(class_for(BUCKET_SIZES[10], small_max).is_none());
    }

    #[test]
    fn max_class_in_use_is_lower_bound() {
        assert_eq!(max_class_in_use(BUCKET_SIZES[5]), 5);
        assert_eq!(max_class_in_use(BUCKET_SIZES[5] - 1), 5);
        assert_eq!(max_class_in_use(BUCKET_SIZES[5] + 1), 6);
    }
}
