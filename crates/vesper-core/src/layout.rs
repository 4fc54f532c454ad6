//! Physical tensor layouts used by the attention pipeline.
//!
//! The pipeline moves data between several dense row-major orderings:
//!
//! - packed QKV input:  `B × S × 3 × N × H`
//! - split QKV scratch: `3 × B × N × S × H` (thirds ordered Q, K, V)
//! - KV cache:          `2 × B × N × len × H` (K then V)
//! - score matrix:      `B × N × S × A`
//! - context output:    `B × S × N × H`
//!
//! Every offset computation goes through a `Layout` so stride arithmetic is
//! defined in exactly one place rather than re-derived at each call site.

use smallvec::SmallVec;

/// Problem dimensions shared by every stage of the attention pipeline.
///
/// `B` batch, `N` heads, `H` per-head size, `S` current sequence length,
/// `P` past (cached) length, `A = P + S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttnDims {
    pub batch: usize,
    pub heads: usize,
    pub head_size: usize,
    pub seq_len: usize,
    pub past_len: usize,
}

impl AttnDims {
    /// Total attended length `A = P + S`.
    pub fn all_len(&self) -> usize {
        self.past_len + self.seq_len
    }

    /// Elements in one of the Q/K/V thirds of the split buffer: `B·N·S·H`.
    pub fn matrix_len(&self) -> usize {
        self.batch * self.heads * self.seq_len * self.head_size
    }
}

/// A dense row-major layout: dimension sizes plus derived strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    dims: SmallVec<[usize; 5]>,
    strides: SmallVec<[usize; 5]>,
}

impl Layout {
    /// Create a contiguous row-major layout from dimension sizes.
    pub fn new(dims: &[usize]) -> Self {
        let ndim = dims.len();
        let mut strides = SmallVec::from_elem(1usize, ndim);
        for i in (0..ndim.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        Self {
            dims: SmallVec::from_slice(dims),
            strides,
        }
    }

    /// Packed QKV input, `B × S × 3 × N × H`, as produced by the fused
    /// QKV projection.
    pub fn packed_qkv(d: &AttnDims) -> Self {
        Self::new(&[d.batch, d.seq_len, 3, d.heads, d.head_size])
    }

    /// Split / head-major QKV, `3 × B × N × S × H`, thirds ordered Q, K, V.
    pub fn split_qkv(d: &AttnDims) -> Self {
        Self::new(&[3, d.batch, d.heads, d.seq_len, d.head_size])
    }

    /// KV cache, `2 × B × N × len × H`, K half then V half. Used with
    /// `len = P` for past and `len = A` for present.
    pub fn kv_cache(d: &AttnDims, len: usize) -> Self {
        Self::new(&[2, d.batch, d.heads, len, d.head_size])
    }

    /// Score / probability matrix, `B × N × S × A`.
    pub fn scores(d: &AttnDims) -> Self {
        Self::new(&[d.batch, d.heads, d.seq_len, d.all_len()])
    }

    /// Context output, `B × S × N × H`.
    pub fn context(d: &AttnDims) -> Self {
        Self::new(&[d.batch, d.seq_len, d.heads, d.head_size])
    }

    /// Dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Row-major strides.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Linear offset of a multi-dimensional index.
    #[inline]
    pub fn offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.dims.len());
        debug_assert!(index.iter().zip(&self.dims).all(|(i, d)| i < d));
        index
            .iter()
            .zip(&self.strides)
            .map(|(i, s)| i * s)
            .sum()
    }
}
