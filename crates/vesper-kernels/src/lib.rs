//! # vesper-kernels
//!
//! Data-parallel CPU kernels for the Vesper attention pipeline.
//!
//! Provides:
//! - Lane-width selection for vectorized row copies
//! - Cooperative row reduction (two-phase reduce-then-broadcast)
//! - The two layout transforms (split-transpose, context-transpose)
//! - Masked, numerically stable row softmax (causal and padding policies)
//! - Tiled batched matmul with per-operand strides

pub mod batched_matmul;
pub mod lane;
pub mod reduce;
pub mod softmax;
pub mod transpose;

pub use lane::lane_width;
pub use reduce::RowReducer;
pub use softmax::SoftmaxPolicy;
