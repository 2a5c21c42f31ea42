//! Error type shared by the imaging, history and pipeline modules.
//!
//! Structural failures (bad uploads, mismatched layers) surface immediately.
//! Decode failures are recoverable: the caller keeps the composite and may
//! force-save it instead.

use thiserror::Error;

use crate::pipeline::Slot;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The upload could not be decoded as a raster.
    #[error("Invalid image format: {reason}")]
    InvalidImageFormat { reason: String },

    /// Normalized layers disagree in size; reconstruction is aborted.
    #[error("Layer size mismatch: {a_width}x{a_height} vs {b_width}x{b_height}")]
    DimensionMismatch {
        a_width: u32,
        a_height: u32,
        b_width: u32,
        b_height: u32,
    },

    /// Network/service failure (or no answer within the bound) while decoding.
    #[error("Decode service unavailable: {reason}")]
    DecodeServiceUnavailable { reason: String },

    /// Decoding ran but found nothing readable.
    #[error("No pattern recognized in composite")]
    NoPatternRecognized,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A newer upload replaced this one while it was in flight.
    #[error("Upload for layer {slot} superseded (generation {generation})")]
    Superseded { slot: Slot, generation: u64 },

    #[error("Missing layer {slot}")]
    MissingLayer { slot: Slot },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Decode failures leave the composite usable and offer a force-save.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::DecodeServiceUnavailable { .. } | PipelineError::NoPatternRecognized
        )
    }

    pub(crate) fn invalid_image(reason: impl ToString) -> Self {
        PipelineError::InvalidImageFormat {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn storage(reason: impl ToString) -> Self {
        PipelineError::Storage {
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        PipelineError::invalid_image(e)
    }
}
