//! The attention orchestrator.
//!
//! Sequences the full fused forward pass over caller-owned buffers:
//!
//! 1. split-transpose the packed QKV input into workspace Q/K/V
//! 2. optionally concatenate past K/V with the new K/V into `present` and
//!    redirect the K/V operands there
//! 3. batched matmul: scores = `1/sqrt(H) · Q·Kᵗ` per (batch, head)
//! 4. masked softmax (causal or padding policy)
//! 5. batched matmul: context = probs · V per (batch, head), written over the
//!    no-longer-needed Q region
//! 6. context-transpose into the caller's `B×S×N×H` output
//!
//! Steps run in strict order; the first failure aborts the call and the
//! output buffer contents are unspecified. The orchestrator owns no memory:
//! input, output, cache, and workspace all belong to the caller.

use tracing::trace;

use vesper_core::{AttnDims, Element, Layout, Result, VesperError};
use vesper_kernels::batched_matmul::{batched_gemm, BatchedGemm};
use vesper_kernels::softmax::{masked_softmax, SoftmaxPolicy};
use vesper_kernels::transpose::{context_transpose, split_transpose};

use crate::cache::concat_past_kv;
use crate::workspace;

/// Shape and policy configuration for one attention call.
#[derive(Debug, Clone, Copy)]
pub struct AttentionParams {
    pub batch_size: usize,
    pub seq_len: usize,
    pub num_heads: usize,
    pub head_size: usize,
    /// Length of the cached past; 0 when no cache is in use.
    pub past_seq_len: usize,
    /// Causal masking when no padding mask is supplied.
    pub unidirectional: bool,
}

impl AttentionParams {
    /// Total attended length `A = past + current`.
    pub fn all_seq_len(&self) -> usize {
        self.past_seq_len + self.seq_len
    }

    /// The dimension bundle shared with the kernel crates.
    pub fn dims(&self) -> AttnDims {
        AttnDims {
            batch: self.batch_size,
            heads: self.num_heads,
            head_size: self.head_size,
            seq_len: self.seq_len,
            past_len: self.past_seq_len,
        }
    }
}

/// Fused multi-head attention forward pass.
///
/// * `input` — packed QKV, `B×S×3×N×H`
/// * `mask_lens` — optional per-batch count of valid (non-padding) leading
///   positions; mutually exclusive with a KV cache
/// * `past` — optional cached K/V, `2×B×N×P×H`; required when `P > 0`
/// * `present` — optional concatenated K/V output, `2×B×N×A×H`; required
///   whenever `past` is supplied, and when present it replaces the
///   current-step K/V as the matmul operands
/// * `output` — attention context, `B×S×N×H`
/// * `workspace_buf` — scratch of at least [`workspace::workspace_len`] elements
pub fn compute_attention<T: Element>(
    input: &[T],
    mask_lens: Option<&[usize]>,
    past: Option<&[T]>,
    present: Option<&mut [T]>,
    output: &mut [T],
    workspace_buf: &mut [T],
    params: &AttentionParams,
) -> Result<()> {
    let d = params.dims();
    validate(input, mask_lens, past.as_deref(), present.as_deref(), output, params, &d)?;

    let all = d.all_len();
    let bn = d.batch * d.heads;
    let ml = d.matrix_len();
    let score_elems = bn * d.seq_len * all;

    let regions = workspace::partition(workspace_buf, &d)?;
    // Regions carry alignment padding; the kernels get exactly-sized slices.
    let (scores, probs) = (regions.scores, regions.probs);
    let qkv = &mut regions.qkv[..3 * ml];

    // 1. Packed B×S×3×N×H → split 3×B×N×S×H. The only step that reads the
    // caller's input.
    split_transpose(input, qkv, &d);
    trace!(batch = d.batch, heads = d.heads, seq = d.seq_len, past = d.past_len, "qkv split");

    let (q_third, kv_new) = qkv.split_at_mut(ml);

    // 2. With a present buffer, downstream operands come from the
    // concatenated cache instead of the freshly split K/V.
    let (k_op, v_op): (&[T], &[T]) = match present {
        Some(pres) => {
            concat_past_kv(past, kv_new, pres, &d);
            trace!(all_len = all, "kv cache concatenated");
            let pres: &[T] = pres;
            pres.split_at(pres.len() / 2)
        }
        None => kv_new.split_at(ml),
    };
    let kv_rows = all; // = seq_len when no cache is in use

    // 3. scores = scale · Q·Kᵗ, one S×A block per (batch, head).
    let scale = 1.0 / (d.head_size as f32).sqrt();
    let g1 = BatchedGemm {
        batch: bn,
        m: d.seq_len,
        n: kv_rows,
        k: d.head_size,
        alpha: scale,
        transpose_b: true,
        stride_a: d.seq_len * d.head_size,
        stride_b: kv_rows * d.head_size,
        stride_c: d.seq_len * kv_rows,
    };
    batched_gemm(&g1, &*q_third, k_op, &mut scores[..score_elems]);
    trace!("score gemm done");

    // 4. Row-wise normalization with the configured masking policy.
    let policy = match mask_lens {
        Some(lens) => SoftmaxPolicy::Padding { lens },
        None if params.unidirectional => SoftmaxPolicy::Causal { past_len: d.past_len },
        None => SoftmaxPolicy::Full,
    };
    masked_softmax(&scores[..score_elems], &mut probs[..score_elems], &d, policy);
    trace!("softmax done");

    // 5. context = probs · V, written over the Q region (dead after step 3).
    let g2 = BatchedGemm {
        batch: bn,
        m: d.seq_len,
        n: d.head_size,
        k: kv_rows,
        alpha: 1.0,
        transpose_b: false,
        stride_a: d.seq_len * kv_rows,
        stride_b: kv_rows * d.head_size,
        stride_c: d.seq_len * d.head_size,
    };
    batched_gemm(&g2, &probs[..score_elems], v_op, q_third);
    trace!("context gemm done");

    // 6. B×N×S×H → the externally expected B×S×N×H.
    context_transpose(q_third, output, &d);
    trace!("context transposed");

    Ok(())
}

fn validate<T: Element>(
    input: &[T],
    mask_lens: Option<&[usize]>,
    past: Option<&[T]>,
    present: Option<&[T]>,
    output: &[T],
    params: &AttentionParams,
    d: &AttnDims,
) -> Result<()> {
    if d.batch == 0 || d.heads == 0 || d.head_size == 0 || d.seq_len == 0 {
        return Err(VesperError::InvalidConfig(
            "batch, heads, head_size, and seq_len must all be nonzero".into(),
        ));
    }
    let packed = Layout::packed_qkv(d).numel();
    if input.len() != packed {
        return Err(VesperError::BufferSize {
            name: "input",
            expected: packed,
            got: input.len(),
        });
    }
    if output.len() != d.matrix_len() {
        return Err(VesperError::BufferSize {
            name: "output",
            expected: d.matrix_len(),
            got: output.len(),
        });
    }
    if let Some(lens) = mask_lens {
        if lens.len() != d.batch {
            return Err(VesperError::BufferSize {
                name: "mask_lens",
                expected: d.batch,
                got: lens.len(),
            });
        }
        if params.past_seq_len > 0 {
            return Err(VesperError::InvalidConfig(
                "padding mask cannot be combined with a KV cache".into(),
            ));
        }
    }
    if params.past_seq_len > 0 && past.is_none() {
        return Err(VesperError::InvalidConfig(
            "past_seq_len > 0 requires a past buffer".into(),
        ));
    }
    if past.is_some() && present.is_none() {
        return Err(VesperError::InvalidConfig(
            "a past buffer requires a present buffer".into(),
        ));
    }
    if let Some(past) = past {
        let expected = Layout::kv_cache(d, d.past_len).numel();
        if past.len() != expected {
            return Err(VesperError::BufferSize {
                name: "past",
                expected,
                got: past.len(),
            });
        }
    }
    if let Some(present) = present {
        let expected = Layout::kv_cache(d, d.all_len()).numel();
        if present.len() != expected {
            return Err(VesperError::BufferSize {
                name: "present",
                expected,
                got: present.len(),
            });
        }
    }
    Ok(())
}
