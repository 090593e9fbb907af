//! Alignment and size arithmetic
//!
//! Every fit check, split and block sizing decision goes through these
//! helpers, so a candidate region is judged with exactly the same footprint
//! that a split would later carve out of it.

/// Normalize an alignment: 0 means "no constraint", i.e. 1
#[inline]
pub fn normalize_alignment(alignment: usize) -> usize {
    alignment.max(1)
}

/// Round `offset` up to the next multiple of `alignment`
///
/// `alignment` must be a power of two (0 is treated as 1).
#[inline]
pub fn aligned_offset(offset: usize, alignment: usize) -> usize {
    let alignment = normalize_alignment(alignment);
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}

/// Bytes occupied by `size` bytes placed at `offset` with `alignment`
///
/// This is the leading padding needed to reach the aligned start plus `size`.
#[inline]
pub fn aligned_size(offset: usize, size: usize, alignment: usize) -> usize {
    let padding = aligned_offset(offset, alignment) - offset;
    padding.saturating_add(size)
}

/// Alignment actually used for a request placed in a block
///
/// The larger of the requested and the block-required alignment.
#[inline]
pub fn conform_alignment(requested: usize, required: usize) -> usize {
    normalize_alignment(requested.max(required))
}

/// Round `size` up to a multiple of `nearest_multiple` (0 leaves it unchanged)
///
/// Returns `None` when the rounded size does not fit in a `usize`.
#[inline]
pub fn conform_size(size: usize, nearest_multiple: usize) -> Option<usize> {
    if nearest_multiple == 0 {
        return Some(size);
    }
    size.div_ceil(nearest_multiple).checked_mul(nearest_multiple)
}

/// Check that an alignment value is usable (0 or a power of two)
#[inline]
pub fn is_valid_alignment(alignment: usize) -> bool {
    alignment == 0 || alignment.is_power_of_two()
}
