//! KV-cache concatenation.
//!
//! Merges the cached past K/V (`2×B×N×P×H`) with the freshly split K/V
//! (`2×B×N×S×H`, the K and V thirds of the split buffer) into one contiguous
//! present buffer (`2×B×N×A×H`). A pure copy: for every (kv, batch, head)
//! triple the first `P` positions come verbatim from past and the remaining
//! `S` positions verbatim from the new state. Correctness is entirely offset
//! arithmetic across the three stride families (past, new, present), each of
//! which reduces to a per-(kv, batch, head) row length here. With `P = 0`
//! this degenerates to a straight copy of the new K/V.

use rayon::prelude::*;

use vesper_core::{AttnDims, Element};

/// Below this element count the rayon fan-out costs more than it saves.
const PAR_THRESHOLD: usize = 16384;

/// Build the present cache from past plus new K/V.
///
/// `new_kv` is the K and V thirds of the split QKV buffer, `2·B·N·S·H`
/// elements. `past` must be `Some` whenever `d.past_len > 0`.
pub fn concat_past_kv<T: Element>(
    past: Option<&[T]>,
    new_kv: &[T],
    present: &mut [T],
    d: &AttnDims,
) {
    let h = d.head_size;
    let past_row = d.past_len * h; // per-(kv, b, n) elements from past
    let new_row = d.seq_len * h; // per-(kv, b, n) elements from new K/V
    let present_row = past_row + new_row;

    debug_assert_eq!(new_kv.len(), 2 * d.batch * d.heads * new_row);
    debug_assert_eq!(present.len(), 2 * d.batch * d.heads * present_row);
    debug_assert_eq!(past.map_or(0, <[T]>::len), 2 * d.batch * d.heads * past_row);

    fn one_row<T: Element>(
        past: Option<&[T]>,
        new_kv: &[T],
        past_row: usize,
        new_row: usize,
        row: usize,
        dst: &mut [T],
    ) {
        if let Some(past) = past {
            dst[..past_row].copy_from_slice(&past[row * past_row..][..past_row]);
        }
        dst[past_row..].copy_from_slice(&new_kv[row * new_row..][..new_row]);
    }

    if present.len() >= PAR_THRESHOLD {
        present
            .par_chunks_mut(present_row)
            .enumerate()
            .for_each(|(row, dst)| one_row(past, new_kv, past_row, new_row, row, dst));
    } else {
        present
            .chunks_mut(present_row)
            .enumerate()
            .for_each(|(row, dst)| one_row(past, new_kv, past_row, new_row, row, dst));
    }
}
