//! Slide-related types and error definitions

use thiserror::Error;

/// Errors that can occur when working with slides
#[derive(Debug, Error)]
pub enum SlideError {
    #[error("slide not found: {0}")]
    NotFound(String),

    #[error("failed to open slide: {0}")]
    OpenFailed(String),

    #[error("failed to read from slide: {0}")]
    ReadFailed(String),
}
