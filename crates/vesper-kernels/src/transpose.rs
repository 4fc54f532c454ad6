//! Layout transforms between the pipeline's physical tensor orderings.
//!
//! Both transforms are bijective permutations: every output element is read
//! from a computed input offset, no element depends on any other, so rows are
//! distributed across threads with no coordination. The innermost `head_size`
//! run is contiguous in source and destination for both transforms, so each
//! row moves as packed lane-width chunks (see `lane`).

use rayon::prelude::*;

use vesper_core::{AttnDims, Element, Layout};

use crate::lane::lane_width;

/// Below this element count the rayon fan-out costs more than it saves.
const PAR_THRESHOLD: usize = 16384;

/// Split-transpose: packed QKV `B×S×3×N×H` → split QKV `3×B×N×S×H`.
///
/// The three output thirds are Q, K, V in order, each `B×N×S×H`.
pub fn split_transpose<T: Element>(input: &[T], output: &mut [T], d: &AttnDims) {
    let packed = Layout::packed_qkv(d);
    debug_assert_eq!(input.len(), packed.numel());
    debug_assert_eq!(output.len(), packed.numel());
    let h = d.head_size;
    let width = lane_width(T::DTYPE.element_size(), h);

    // Output row order: m, then b, then n, then s
    fn one_row<T: Element>(
        input: &[T],
        packed: &Layout,
        d: &AttnDims,
        width: usize,
        row: usize,
        dst: &mut [T],
    ) {
        let h = d.head_size;
        let s = row % d.seq_len;
        let n = (row / d.seq_len) % d.heads;
        let b = (row / (d.seq_len * d.heads)) % d.batch;
        let m = row / (d.seq_len * d.heads * d.batch);
        let src = &input[packed.offset(&[b, s, m, n, 0])..][..h];
        for (dc, sc) in dst.chunks_mut(width).zip(src.chunks(width)) {
            dc.copy_from_slice(sc);
        }
    }

    if output.len() >= PAR_THRESHOLD {
        output
            .par_chunks_mut(h)
            .enumerate()
            .for_each(|(row, dst)| one_row(input, &packed, d, width, row, dst));
    } else {
        output
            .chunks_mut(h)
            .enumerate()
            .for_each(|(row, dst)| one_row(input, &packed, d, width, row, dst));
    }
}

/// Context-transpose: `B×N×S×H` → `B×S×N×H` (N and S swapped).
pub fn context_transpose<T: Element>(input: &[T], output: &mut [T], d: &AttnDims) {
    let h = d.head_size;
    // The input here is one head-major Q-shaped third, B×N×S×H
    let head_major = Layout::new(&[d.batch, d.heads, d.seq_len, h]);
    debug_assert_eq!(input.len(), head_major.numel());
    debug_assert_eq!(output.len(), head_major.numel());
    let width = lane_width(T::DTYPE.element_size(), h);

    // Output row order: b, then s, then n
    fn one_row<T: Element>(
        input: &[T],
        head_major: &Layout,
        d: &AttnDims,
        width: usize,
        row: usize,
        dst: &mut [T],
    ) {
        let h = d.head_size;
        let n = row % d.heads;
        let s = (row / d.heads) % d.seq_len;
        let b = row / (d.heads * d.seq_len);
        let src = &input[head_major.offset(&[b, n, s, 0])..][..h];
        for (dc, sc) in dst.chunks_mut(width).zip(src.chunks(width)) {
            dc.copy_from_slice(sc);
        }
    }

    if output.len() >= PAR_THRESHOLD {
        output
            .par_chunks_mut(h)
            .enumerate()
            .for_each(|(row, dst)| one_row(input, &head_major, d, width, row, dst));
    } else {
        output
            .chunks_mut(h)
            .enumerate()
            .for_each(|(row, dst)| one_row(input, &head_major, d, width, row, dst));
    }
}
