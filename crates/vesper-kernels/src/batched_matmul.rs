//! Batched matrix multiplication with per-operand batch strides.
//!
//! `C[i] = alpha · A[i] · op(B[i])` for `batch` independent entries; entries
//! never share data, so they distribute across threads freely. Row-major
//! operands, f32 accumulation, tiled inner loops for the non-transposed
//! case (transposed B reduces to contiguous dot products and needs none).

use rayon::prelude::*;

use vesper_core::Element;

/// Tile sizes for cache-friendly blocking, matched to ~32KB L1 for f32.
const TILE_M: usize = 64;
const TILE_N: usize = 64;
const TILE_K: usize = 64;

/// Below this output element count the rayon fan-out costs more than it saves.
const PAR_THRESHOLD: usize = 4096;

/// Arguments for one batched multiplication.
///
/// `A[i]` is `m×k` starting at `a[i · stride_a]`; `B[i]` is `k×n` (or `n×k`
/// when `transpose_b`) starting at `b[i · stride_b]`; `C[i]` is `m×n`
/// starting at `c[i · stride_c]`, with `stride_c · batch == c.len()`.
#[derive(Debug, Clone, Copy)]
pub struct BatchedGemm {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub transpose_b: bool,
    pub stride_a: usize,
    pub stride_b: usize,
    pub stride_c: usize,
}

/// Run the batched multiplication described by `g`.
pub fn batched_gemm<T: Element>(g: &BatchedGemm, a: &[T], b: &[T], c: &mut [T]) {
    debug_assert_eq!(c.len(), g.batch * g.stride_c);
    debug_assert!(a.len() >= g.batch.saturating_sub(1) * g.stride_a + g.m * g.k);
    debug_assert!(b.len() >= g.batch.saturating_sub(1) * g.stride_b + g.k * g.n);

    fn one_entry<T: Element>(g: &BatchedGemm, a: &[T], b: &[T], i: usize, c_entry: &mut [T]) {
        let a_entry = &a[i * g.stride_a..][..g.m * g.k];
        let b_entry = &b[i * g.stride_b..][..g.k * g.n];
        if g.transpose_b {
            gemm_bt(g, a_entry, b_entry, c_entry);
        } else {
            gemm_tiled(g, a_entry, b_entry, c_entry);
        }
    }

    if c.len() >= PAR_THRESHOLD {
        c.par_chunks_mut(g.stride_c)
            .enumerate()
            .for_each(|(i, c_entry)| one_entry(g, a, b, i, c_entry));
    } else {
        c.chunks_mut(g.stride_c)
            .enumerate()
            .for_each(|(i, c_entry)| one_entry(g, a, b, i, c_entry));
    }
}

/// C = alpha · A · Bᵗ. Both A rows and B rows are contiguous length-k runs,
/// so each output element is a straight dot product.
fn gemm_bt<T: Element>(g: &BatchedGemm, a: &[T], b: &[T], c: &mut [T]) {
    let (m, n, k) = (g.m, g.n, g.k);
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            let mut acc = 0.0f32;
            for p in 0..k {
                acc += a_row[p].to_f32() * b_row[p].to_f32();
            }
            c[i * n + j] = T::from_f32(g.alpha * acc);
        }
    }
}

/// C = alpha · A · B with cache tiling.
fn gemm_tiled<T: Element>(g: &BatchedGemm, a: &[T], b: &[T], c: &mut [T]) {
    let (m, n, k) = (g.m, g.n, g.k);
    let mut acc = vec![0.0f32; m * n];

    for i0 in (0..m).step_by(TILE_M) {
        let i_end = (i0 + TILE_M).min(m);
        for p0 in (0..k).step_by(TILE_K) {
            let p_end = (p0 + TILE_K).min(k);
            for j0 in (0..n).step_by(TILE_N) {
                let j_end = (j0 + TILE_N).min(n);

                for i in i0..i_end {
                    for p in p0..p_end {
                        let a_val = a[i * k + p].to_f32();
                        for j in j0..j_end {
                            acc[i * n + j] += a_val * b[p * n + j].to_f32();
                        }
                    }
                }
            }
        }
    }

    for (out, &v) in c[..m * n].iter_mut().zip(&acc) {
        *out = T::from_f32(g.alpha * v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.25 - 1.5).collect()
    }

    fn naive(
        g: &BatchedGemm,
        a: &[f32],
        b: &[f32],
    ) -> Vec<f32> {
        let mut c = vec![0.0f32; g.batch * g.stride_c];
        for i in 0..g.batch {
            for r in 0..g.m {
                for col in 0..g.n {
                    let mut acc = 0.0f32;
                    for p in 0..g.k {
                        let av = a[i * g.stride_a + r * g.k + p];
                        let bv = if g.transpose_b {
                            b[i * g.stride_b + col * g.k + p]
                        } else {
                            b[i * g.stride_b + p * g.n + col]
                        };
                        acc += av * bv;
                    }
                    c[i * g.stride_c + r * g.n + col] = g.alpha * acc;
                }
            }
        }
        c
    }

    fn check(g: &BatchedGemm) {
        let a = fixture(g.batch * g.stride_a);
        let b = fixture(g.batch * g.stride_b);
        let mut c = vec![0.0f32; g.batch * g.stride_c];
        batched_gemm(g, &a, &b, &mut c);
        let expected = naive(g, &a, &b);
        for (i, (x, y)) in c.iter().zip(&expected).enumerate() {
            assert!((x - y).abs() < 1e-4, "index {i}: {x} vs {y}");
        }
    }

    #[test]
    fn test_plain_matches_naive() {
        check(&BatchedGemm {
            batch: 3,
            m: 5,
            n: 7,
            k: 4,
            alpha: 1.0,
            transpose_b: false,
            stride_a: 20,
            stride_b: 28,
            stride_c: 35,
        });
    }

    #[test]
    fn test_transposed_b_matches_naive() {
        check(&BatchedGemm {
            batch: 4,
            m: 3,
            n: 6,
            k: 5,
            alpha: 1.0,
            transpose_b: true,
            stride_a: 15,
            stride_b: 30,
            stride_c: 18,
        });
    }

    #[test]
    fn test_alpha_scaling() {
        check(&BatchedGemm {
            batch: 2,
            m: 2,
            n: 2,
            k: 3,
            alpha: 0.5,
            transpose_b: true,
            stride_a: 6,
            stride_b: 6,
            stride_c: 4,
        });
    }

    #[test]
    fn test_larger_than_tile() {
        // Crosses TILE boundaries and the parallel threshold
        check(&BatchedGemm {
            batch: 2,
            m: 70,
            n: 65,
            k: 80,
            alpha: 1.0,
            transpose_b: false,
            stride_a: 70 * 80,
            stride_b: 80 * 65,
            stride_c: 70 * 65,
        });
    }

    #[test]
    fn test_identity_multiply() {
        // A @ I = A
        let m = 3;
        let mut ident = vec![0.0f32; m * m];
        for i in 0..m {
            ident[i * m + i] = 1.0;
        }
        let a = fixture(m * m);
        let mut c = vec![0.0f32; m * m];
        let g = BatchedGemm {
            batch: 1,
            m,
            n: m,
            k: m,
            alpha: 1.0,
            transpose_b: false,
            stride_a: m * m,
            stride_b: m * m,
            stride_c: m * m,
        };
        batched_gemm(&g, &a, &ident, &mut c);
        assert_eq!(c, a);
    }
}
