//! Error types for Vesper.

use thiserror::Error;

/// Main error type for Vesper operations.
#[derive(Error, Debug)]
pub enum VesperError {
    #[error("Buffer `{name}` has wrong length: expected {expected} elements, got {got}")]
    BufferSize {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Workspace too small: need {needed} bytes, got {got}")]
    WorkspaceTooSmall { needed: usize, got: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
