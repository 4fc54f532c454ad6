//! Lane-width selection for vectorized row copies.
//!
//! The layout transforms move contiguous runs of `head_size` elements. When
//! the head size divides evenly, copies can be issued in packed groups of 2
//! or 4 elements; the choice is purely a throughput knob and never changes
//! results, so it lives here as a standalone decision function the
//! transforms consume as a chunk size.

/// Widest packed copy we issue, in bytes (one 16-byte vector register).
const MAX_LANE_BYTES: usize = 16;

/// Number of elements copied per lane for the given element size and head
/// size. Returns 4, 2, or 1; always divides `head_size` when nonzero-sized.
pub fn lane_width(elem_size: usize, head_size: usize) -> usize {
    let max = (MAX_LANE_BYTES / elem_size).max(1);
    let width = if head_size % 4 == 0 {
        4
    } else if head_size % 2 == 0 {
        2
    } else {
        1
    };
    width.min(max)
}
