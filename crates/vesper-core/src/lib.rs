//! # vesper-core
//!
//! Core types for the Vesper fused-attention kernels.
//!
//! Provides:
//! - `DType` / `Element`: the two supported storage precisions (F32, F16)
//!   with f32 accumulation
//! - `VesperError`: the shared error type
//! - Layout descriptors for the physical tensor orderings the attention
//!   pipeline moves data between

pub mod dtype;
pub mod error;
pub mod layout;

pub use dtype::{DType, Element};
pub use error::VesperError;
pub use layout::{AttnDims, Layout};

pub type Result<T> = std::result::Result<T, VesperError>;
