//! Masked, numerically stable row softmax over the score matrix.
//!
//! One independent row per (batch, head, query position). Values beyond a
//! row's valid column count are excluded from every reduction and written as
//! exact zeros, so a fully masked row comes out all-zero instead of NaN.
//! Accumulation is f32 regardless of storage precision.

use rayon::prelude::*;

use vesper_core::{AttnDims, Element};

use crate::reduce::RowReducer;

/// Cooperating-group width for the row reductions. A throughput knob;
/// results are deterministic for a fixed width (see `reduce`).
const GROUP_WIDTH: usize = 32;

/// Below this element count the rayon fan-out costs more than it saves.
const PAR_THRESHOLD: usize = 4096;

/// How many leading columns of each row participate in the softmax.
///
/// The two masking policies are mutually exclusive by construction.
#[derive(Debug, Clone, Copy)]
pub enum SoftmaxPolicy<'a> {
    /// Every column is valid.
    Full,
    /// Row at query position `i` attends to the cached past plus all current
    /// positions up to and including itself: `past_len + i + 1` columns.
    Causal { past_len: usize },
    /// Per-batch count of valid (non-padding) leading positions, capped at
    /// the row width. The valid positions are assumed to form a contiguous
    /// prefix; that contract is the caller's and is not verified here.
    Padding { lens: &'a [usize] },
}

impl SoftmaxPolicy<'_> {
    #[inline]
    fn valid_len(&self, batch_idx: usize, query_idx: usize, all_len: usize) -> usize {
        match self {
            SoftmaxPolicy::Full => all_len,
            SoftmaxPolicy::Causal { past_len } => (past_len + query_idx + 1).min(all_len),
            SoftmaxPolicy::Padding { lens } => lens[batch_idx].min(all_len),
        }
    }
}

/// Normalize every row of the `B×N×S×A` score buffer into `probs`.
///
/// `scores` and `probs` are distinct workspace regions of `B·N·S·A` elements.
pub fn masked_softmax<T: Element>(
    scores: &[T],
    probs: &mut [T],
    d: &AttnDims,
    policy: SoftmaxPolicy<'_>,
) {
    let all_len = d.all_len();
    debug_assert_eq!(scores.len(), d.batch * d.heads * d.seq_len * all_len);
    debug_assert_eq!(probs.len(), scores.len());

    let rows_per_batch = d.heads * d.seq_len;
    let reducer = RowReducer::new(GROUP_WIDTH);

    let row_valid = |row: usize| {
        let batch_idx = row / rows_per_batch;
        let query_idx = row % d.seq_len;
        policy.valid_len(batch_idx, query_idx, all_len)
    };

    if probs.len() >= PAR_THRESHOLD {
        probs
            .par_chunks_mut(all_len)
            .zip(scores.par_chunks(all_len))
            .enumerate()
            .for_each(|(row, (dst, src))| softmax_row(src, dst, row_valid(row), &reducer));
    } else {
        probs
            .chunks_mut(all_len)
            .zip(scores.chunks(all_len))
            .enumerate()
            .for_each(|(row, (dst, src))| softmax_row(src, dst, row_valid(row), &reducer));
    }
}

/// Three-pass reduce-then-broadcast softmax for a single row.
fn softmax_row<T: Element>(src: &[T], dst: &mut [T], valid: usize, reducer: &RowReducer) {
    if valid == 0 {
        // Degenerate row: all columns masked. Zero, never NaN.
        dst.fill(T::zero());
        return;
    }

    // Widen the valid prefix once; reductions and the broadcast read f32.
    let row: Vec<f32> = src[..valid].iter().map(|&x| x.to_f32()).collect();

    let max = reducer.max(&row);
    let sum = reducer.sum_map(&row, |x| (x - max).exp());
    let inv_sum = 1.0 / sum;

    for (out, &x) in dst[..valid].iter_mut().zip(&row) {
        *out = T::from_f32((x - max).exp() * inv_sum);
    }
    dst[valid..].fill(T::zero());
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn dims(batch: usize, heads: usize, seq_len: usize, past_len: usize) -> AttnDims {
        AttnDims {
            batch,
            heads,
            head_size: 1,
            seq_len,
            past_len,
        }
    }

    fn fixture(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.3 - 1.8).collect()
    }

    fn row_sums(probs: &[f32], all_len: usize) -> Vec<f32> {
        probs.chunks(all_len).map(|r| r.iter().sum()).collect()
    }

    #[test]
    fn test_full_rows_sum_to_one() {
        let d = dims(2, 3, 4, 0);
        let scores = fixture(2 * 3 * 4 * 4);
        let mut probs = vec![0.0f32; scores.len()];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Full);
        for sum in row_sums(&probs, 4) {
            assert!((sum - 1.0).abs() < 1e-6, "row sum {sum}");
        }
    }

    #[test]
    fn test_causal_zero_pattern() {
        // B=1, N=1, S=4, P=0: row i has exactly i+1 nonzero columns
        let d = dims(1, 1, 4, 0);
        let scores = fixture(16);
        let mut probs = vec![0.0f32; 16];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Causal { past_len: 0 });
        for i in 0..4 {
            let row = &probs[i * 4..(i + 1) * 4];
            assert!(row[..=i].iter().all(|&p| p > 0.0), "row {i}: {row:?}");
            assert!(row[i + 1..].iter().all(|&p| p == 0.0), "row {i}: {row:?}");
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_causal_with_past_sees_whole_cache() {
        let d = dims(1, 1, 2, 3);
        let all = d.all_len(); // 5
        let scores = fixture(2 * all);
        let mut probs = vec![0.0f32; scores.len()];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Causal { past_len: 3 });
        // Row 0 attends to P + 1 = 4 columns, row 1 to all 5
        assert!(probs[..4].iter().all(|&p| p > 0.0));
        assert_eq!(probs[4], 0.0);
        assert!(probs[all..].iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_padding_mask_prefix() {
        // Width-5 row with 2 valid columns
        let d = dims(1, 1, 1, 4);
        let scores = fixture(5);
        let mut probs = vec![0.0f32; 5];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Padding { lens: &[2] });
        assert!(probs[0] > 0.0 && probs[1] > 0.0);
        assert_eq!(&probs[2..], &[0.0, 0.0, 0.0]);
        assert!((probs[0] + probs[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_padding_len_capped_at_row_width() {
        let d = dims(1, 1, 1, 2);
        let scores = fixture(3);
        let mut probs = vec![0.0f32; 3];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Padding { lens: &[10] });
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_valid_length_is_all_zero() {
        let d = dims(1, 1, 1, 3);
        let scores = fixture(4);
        let mut probs = vec![f32::NAN; 4];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Padding { lens: &[0] });
        assert_eq!(&probs, &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shift_invariance() {
        let d = dims(1, 2, 3, 1);
        let all = d.all_len();
        let scores = fixture(2 * 3 * all);
        let shifted: Vec<f32> = scores.iter().map(|&x| x + 1e4).collect();

        let mut a = vec![0.0f32; scores.len()];
        let mut b = vec![0.0f32; scores.len()];
        masked_softmax(&scores, &mut a, &d, SoftmaxPolicy::Causal { past_len: 1 });
        masked_softmax(&shifted, &mut b, &d, SoftmaxPolicy::Causal { past_len: 1 });

        // Adding 1e4 already rounds the f32 inputs by ~5e-4 relative, so the
        // comparison tolerance must absorb that input perturbation.
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
    }

    #[test]
    fn test_f16_storage_f32_accumulation() {
        let d = dims(1, 1, 1, 3);
        let scores_f32 = fixture(4);
        let scores: Vec<f16> = scores_f32.iter().map(|&x| f16::from_f32(x)).collect();
        let mut probs = vec![f16::from_f32(0.0); 4];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Full);
        let sum: f32 = probs.iter().map(|&p| p.to_f32()).sum();
        assert!((sum - 1.0).abs() < 2e-3, "sum {sum}");
    }

    #[test]
    fn test_large_buffer_parallel_path() {
        let d = dims(4, 4, 16, 16);
        let all = d.all_len();
        let scores = fixture(4 * 4 * 16 * all);
        let mut probs = vec![0.0f32; scores.len()];
        masked_softmax(&scores, &mut probs, &d, SoftmaxPolicy::Full);
        for sum in row_sums(&probs, all) {
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
