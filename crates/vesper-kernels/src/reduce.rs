//! Cooperative row reduction.
//!
//! The softmax engine needs per-row max and exp-sum reductions that are
//! independent of the parallel substrate underneath. This module expresses
//! the reduction as an explicit two-phase scheme: the row is cut into
//! fixed-width groups, each group produces a partial result (reduce phase),
//! and the partials combine in group order (the barrier point before the
//! broadcast phase rewrites the row). The group width is a tuning parameter:
//! every width yields the identical max, and sums are deterministic for a
//! given width because partials always combine in group order.

/// Two-phase row reducer with a fixed cooperating-group width.
#[derive(Debug, Clone, Copy)]
pub struct RowReducer {
    group_width: usize,
}

impl RowReducer {
    pub fn new(group_width: usize) -> Self {
        assert!(group_width > 0, "group width must be nonzero");
        Self { group_width }
    }

    pub fn group_width(&self) -> usize {
        self.group_width
    }

    /// Maximum over the row; `NEG_INFINITY` for an empty row.
    pub fn max(&self, row: &[f32]) -> f32 {
        row.chunks(self.group_width)
            .map(|group| group.iter().copied().fold(f32::NEG_INFINITY, f32::max))
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Sum of `f(x)` over the row, accumulated per group and combined in
    /// group order.
    pub fn sum_map(&self, row: &[f32], f: impl Fn(f32) -> f32) -> f32 {
        row.chunks(self.group_width)
            .map(|group| group.iter().map(|&x| f(x)).sum::<f32>())
            .sum()
    }
}
