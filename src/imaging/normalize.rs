//! Upload decoding and nearest-neighbor resampling to the canonical width.
//!
//! Shares carry their secret in hard black/white sub-pixel patterns. Any
//! interpolation would invent grey values and break the multiply blend, so
//! resampling only ever copies existing source pixels.

use crate::config::MAX_CANONICAL_WIDTH;
use crate::error::{PipelineError, Result};
use crate::imaging::PixelBuffer;

/// Decode PNG/JPEG bytes into an RGBA buffer.
pub fn decode_upload(bytes: &[u8]) -> Result<PixelBuffer> {
    if bytes.is_empty() {
        return Err(PipelineError::invalid_image("upload is empty"));
    }
    let img = image::load_from_memory(bytes)?.to_rgba8();
    PixelBuffer::from_rgba_image(img)
}

/// Resample `source` to exactly `target_width` columns, keeping aspect ratio.
///
/// Output height is `round(source_height * target_width / source_width)`,
/// never less than one row. Each output pixel copies the source pixel under
/// its center. Both output sides are bounded by [`MAX_CANONICAL_WIDTH`].
pub fn normalize(source: &PixelBuffer, target_width: u32) -> Result<PixelBuffer> {
    if target_width == 0 || target_width > MAX_CANONICAL_WIDTH {
        return Err(PipelineError::InvalidConfig {
            reason: format!("target width must be between 1 and {}", MAX_CANONICAL_WIDTH),
        });
    }

    let (sw, sh) = source.dimensions();
    let scale = target_width as f64 / sw as f64;
    let target_height = (sh as f64 * scale).round().max(1.0);
    if target_height > MAX_CANONICAL_WIDTH as f64 {
        return Err(PipelineError::invalid_image(format!(
            "{}x{} layer would normalize to more than {} rows",
            sw, sh, MAX_CANONICAL_WIDTH
        )));
    }
    let target_height = target_height as u32;

    if (target_width, target_height) == (sw, sh) {
        return Ok(source.clone());
    }

    let src = source.data();
    let row_bytes = sw as usize * 4;
    let mut out = Vec::with_capacity(target_width as usize * target_height as usize * 4);

    // Column lookup is shared by every row.
    let columns: Vec<usize> = (0..target_width)
        .map(|x| nearest_index(x, target_width, sw) * 4)
        .collect();

    for y in 0..target_height {
        let sy = nearest_index(y, target_height, sh);
        let row = &src[sy * row_bytes..(sy + 1) * row_bytes];
        for &sx in &columns {
            out.extend_from_slice(&row[sx..sx + 4]);
        }
    }

    PixelBuffer::new(target_width, target_height, out)
}

/// Decode and normalize in one step.
pub fn normalize_upload(bytes: &[u8], target_width: u32) -> Result<PixelBuffer> {
    normalize(&decode_upload(bytes)?, target_width)
}

/// Source index whose span contains the center of destination cell `i`.
fn nearest_index(i: u32, dst_len: u32, src_len: u32) -> usize {
    let idx = ((2 * i as u64 + 1) * src_len as u64) / (2 * dst_len as u64);
    idx.min(src_len as u64 - 1) as usize
}
