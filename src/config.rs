//! Pipeline tuning knobs.
//!
//! Every value has a default matching the reference UI; hosts may override
//! any subset by posting JSON (`{"threshold": 72}`) to `/api/config` or by
//! calling [`PipelineConfig::from_json`] directly.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Width every uploaded layer is resampled to before compositing.
pub const DEFAULT_CANONICAL_WIDTH: u32 = 1000;
/// Gaussian standard deviation used before binarization.
pub const DEFAULT_BLUR_RADIUS: f32 = 1.5;
/// Average luminance below which an enhanced pixel becomes black.
pub const DEFAULT_THRESHOLD: u8 = 60;
/// Records kept per history category.
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
/// Upper bound on one decoder call.
pub const DEFAULT_DECODE_TIMEOUT_MS: u64 = 10_000;

/// Largest accepted `canonical_width`. Normalized layers are also capped at
/// this many rows.
pub const MAX_CANONICAL_WIDTH: u32 = 8192;
/// Largest accepted `blur_radius`; the kernel spans ±3σ.
pub const MAX_BLUR_RADIUS: f32 = 32.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub canonical_width: u32,
    pub blur_radius: f32,
    pub threshold: u8,
    pub history_capacity: usize,
    pub decode_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonical_width: DEFAULT_CANONICAL_WIDTH,
            blur_radius: DEFAULT_BLUR_RADIUS,
            threshold: DEFAULT_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            decode_timeout_ms: DEFAULT_DECODE_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON override and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.canonical_width == 0 {
            return Err(invalid("canonical_width must be positive"));
        }
        if self.canonical_width > MAX_CANONICAL_WIDTH {
            return Err(invalid(&format!("canonical_width must be at most {}", MAX_CANONICAL_WIDTH)));
        }
        if !self.blur_radius.is_finite() || self.blur_radius < 0.0 {
            return Err(invalid("blur_radius must be a non-negative number"));
        }
        if self.blur_radius > MAX_BLUR_RADIUS {
            return Err(invalid(&format!("blur_radius must be at most {}", MAX_BLUR_RADIUS)));
        }
        if self.history_capacity == 0 {
            return Err(invalid("history_capacity must be at least 1"));
        }
        if self.decode_timeout_ms == 0 {
            return Err(invalid("decode_timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> PipelineError {
    PipelineError::InvalidConfig {
        reason: reason.to_string(),
    }
}
