//! Workspace planning: scratch sizing and partitioning.
//!
//! The orchestrator needs three scratch regions: raw scores, normalized
//! probabilities (each `B·N·S·A`), and the split QKV buffer (`3·B·S·N·H`).
//! Callers allocate one flat buffer of at least `workspace_bytes(..)` and the
//! planner carves it into 256-byte-aligned typed sub-slices. Pure size math;
//! nothing here allocates.

use vesper_core::{AttnDims, Element, Result, VesperError};

/// Alignment of each workspace region, in bytes.
pub const WORKSPACE_ALIGN: usize = 256;

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Bytes of one score-matrix-shaped scratch region (`B·N·S·A` elements),
/// rounded up to [`WORKSPACE_ALIGN`].
pub fn scratch_bytes(elem_size: usize, d: &AttnDims) -> usize {
    let elems = d.batch * d.heads * d.seq_len * d.all_len();
    align_up(elems * elem_size, WORKSPACE_ALIGN)
}

/// Total workspace the orchestrator requires: the split QKV buffer plus two
/// score-shaped scratch regions.
///
/// Overflow on pathological dimension products is unguarded; shapes whose
/// byte counts approach `usize::MAX` are outside the supported envelope.
pub fn workspace_bytes(elem_size: usize, d: &AttnDims) -> usize {
    let qkv = align_up(3 * d.matrix_len() * elem_size, WORKSPACE_ALIGN);
    qkv + 2 * scratch_bytes(elem_size, d)
}

/// Workspace element count for a concrete element type, for sizing a
/// caller-side `Vec<T>`.
pub fn workspace_len<T: Element>(d: &AttnDims) -> usize {
    workspace_bytes(T::DTYPE.element_size(), d) / T::DTYPE.element_size()
}

/// The three disjoint regions carved from the caller's workspace.
pub struct WorkspaceRegions<'a, T> {
    /// Raw attention scores, `B×N×S×A`.
    pub scores: &'a mut [T],
    /// Post-softmax probabilities, `B×N×S×A`.
    pub probs: &'a mut [T],
    /// Split QKV, `3×B×N×S×H`.
    pub qkv: &'a mut [T],
}

/// Bump-carve the caller's workspace into the three regions. Region
/// boundaries fall on [`WORKSPACE_ALIGN`]-byte multiples relative to the
/// buffer start, so exclusivity is static: no two pipeline steps ever hold
/// overlapping slices.
pub fn partition<'a, T: Element>(ws: &'a mut [T], d: &AttnDims) -> Result<WorkspaceRegions<'a, T>> {
    let elem = T::DTYPE.element_size();
    let needed = workspace_bytes(elem, d);
    if ws.len() * elem < needed {
        return Err(VesperError::WorkspaceTooSmall {
            needed,
            got: ws.len() * elem,
        });
    }

    // WORKSPACE_ALIGN is a multiple of every element size, so the aligned
    // byte counts divide exactly.
    let scratch_elems = scratch_bytes(elem, d) / elem;
    let (scores, rest) = ws.split_at_mut(scratch_elems);
    let (probs, rest) = rest.split_at_mut(scratch_elems);
    let qkv_elems = align_up(3 * d.matrix_len() * elem, WORKSPACE_ALIGN) / elem;
    let (qkv, _) = rest.split_at_mut(qkv_elems);

    Ok(WorkspaceRegions { scores, probs, qkv })
}
