//! Slice planning for buffer pulls.

use std::ops::Range;

/// Partition `[0, size)` into consecutive ranges of `slice_size` bytes.
///
/// Every range is full except possibly the last, which holds the
/// `size % slice_size` remaining bytes. A zero-sized buffer yields nothing.
pub fn slice_ranges(size: u64, slice_size: u64) -> impl Iterator<Item = Range<u64>> {
    let slice_size = slice_size.max(1);
    let full = size / slice_size;
    let remainder = size % slice_size;

    (0..full)
        .map(move |i| i * slice_size..(i + 1) * slice_size)
        .chain((remainder > 0).then(|| full * slice_size..size))
}

/// Number of ranges [`slice_ranges`] produces.
pub fn slice_count(size: u64, slice_size: u64) -> u64 {
    size.div_ceil(slice_size.max(1))
}
