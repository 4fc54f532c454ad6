//! # vesper-attention
//!
//! Fused scaled dot-product multi-head attention for transformer inference.
//!
//! Takes packed QKV activations and produces the attention context output,
//! optionally applying a padding mask or causal restriction, and optionally
//! maintaining a growing past/present KV cache across incremental decoding
//! steps. Operates entirely on caller-owned buffers; callers query
//! [`workspace_bytes`] (or [`workspace_len`]) up front and hand the
//! orchestrator one flat scratch allocation.
//!
//! ```
//! use vesper_attention::{compute_attention, workspace_len, AttentionParams};
//!
//! let params = AttentionParams {
//!     batch_size: 1,
//!     seq_len: 1,
//!     num_heads: 1,
//!     head_size: 2,
//!     past_seq_len: 0,
//!     unidirectional: true,
//! };
//! let input = [0.3f32, -0.7, 1.1, 0.2, 5.0, -3.0]; // packed q, k, v
//! let mut output = [0.0f32; 2];
//! let mut ws = vec![0.0f32; workspace_len::<f32>(&params.dims())];
//! compute_attention(&input, None, None, None, &mut output, &mut ws, &params).unwrap();
//! assert_eq!(output, [5.0, -3.0]);
//! ```

pub mod cache;
pub mod fused;
pub mod workspace;

pub use fused::{compute_attention, AttentionParams};
pub use workspace::{workspace_bytes, workspace_len, WORKSPACE_ALIGN};

pub use vesper_core::{AttnDims, DType, Element, Result, VesperError};
