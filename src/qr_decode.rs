/// Local QR recognition for reconstructed composites via an rqrr cascade.
///
/// A stacked share pair is noisy: every secret pixel is a block of
/// sub-pixels, and white areas come out as a half-tone of black and white.
/// Each strategy below cleans that up differently; the cascade returns on
/// the first one that yields a readable grid.
///
/// - **Enhanced** → blur + fixed threshold, the same view shown to the user
/// - **Raw greyscale** → lets rqrr binarize on its own
/// - **Otsu** → global threshold from the composite's own histogram
/// - **Downscale 2×** → averages away the sub-pixel texture
/// - **Quiet zone** → white border for codes that touch the layer edge
use async_trait::async_trait;
use rqrr::PreparedImage;
use tracing::debug;
use wasm_bindgen::prelude::*;

use crate::config::{DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD};
use crate::error::{PipelineError, Result};
use crate::imaging::{PixelBuffer, enhance};
use crate::pipeline::Decoder;

/// Decodes composites in-process. Never needs a deadline.
#[derive(Debug, Clone, Copy)]
pub struct LocalQrDecoder {
    blur_radius: f32,
    threshold: u8,
}

impl LocalQrDecoder {
    pub fn new(blur_radius: f32, threshold: u8) -> Self {
        Self {
            blur_radius,
            threshold,
        }
    }
}

impl Default for LocalQrDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD)
    }
}

#[async_trait(?Send)]
impl Decoder for LocalQrDecoder {
    async fn decode(&self, composite: &PixelBuffer, _encoded: &str) -> Result<String> {
        decode_composite(composite, self.blur_radius, self.threshold)
            .ok_or(PipelineError::NoPatternRecognized)
    }
}

// ── Public WASM API ────────────────────────────────────────────────

/// Decode a composite handed over as raw RGBA, using default enhancement.
/// Returns decoded text or empty string if no code was found.
#[wasm_bindgen]
pub fn decode_share_composite(rgba: &[u8], width: u32, height: u32) -> String {
    match PixelBuffer::new(width, height, rgba.to_vec()) {
        Ok(buf) => decode_composite(&buf, DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Run every strategy until one decodes.
pub fn decode_composite(composite: &PixelBuffer, blur_radius: f32, threshold: u8) -> Option<String> {
    let w = composite.width() as usize;
    let h = composite.height() as usize;

    // 1: Enhanced view (already binary)
    let enhanced = enhance(composite, blur_radius, threshold).to_greyscale();
    if let Some(text) = try_decode_greyscale(&enhanced, w, h) {
        debug!(strategy = "enhanced", "code found");
        return Some(text);
    }

    // 2: Raw greyscale
    let grey = composite.to_greyscale();
    if let Some(text) = try_decode_greyscale(&grey, w, h) {
        debug!(strategy = "raw", "code found");
        return Some(text);
    }

    // 3: Otsu bitmap
    let t = otsu_threshold(&grey).saturating_add(1);
    if let Some(text) = try_decode_bitmap(&grey, w, h, t) {
        debug!(strategy = "otsu", threshold = t, "code found");
        return Some(text);
    }

    // 4: Downscale 2× then Otsu
    if w >= 4 && h >= 4 {
        let (small, sw, sh) = downscale_2x(&grey, w, h);
        let t = otsu_threshold(&small).saturating_add(1);
        if let Some(text) = try_decode_bitmap(&small, sw, sh, t) {
            debug!(strategy = "downscale", threshold = t, "code found");
            return Some(text);
        }
    }

    // 5: Enhanced view with a quiet zone
    let pad = (w.min(h) / 10).max(8);
    let (padded, pw, ph) = add_quiet_zone(&enhanced, w, h, pad);
    if let Some(text) = try_decode_greyscale(&padded, pw, ph) {
        debug!(strategy = "quiet_zone", "code found");
        return Some(text);
    }

    None
}

// ── rqrr decode wrappers ──────────────────────────────────────────

fn try_decode_greyscale(grey: &[u8], w: usize, h: usize) -> Option<String> {
    let mut img = PreparedImage::prepare_from_greyscale(w, h, |x, y| grey[y * w + x]);
    img.detect_grids()
        .iter()
        .find_map(|g| g.decode().ok())
        .map(|(_, content)| content)
        .filter(|text| !text.is_empty())
}

/// Dark means below `threshold`.
fn try_decode_bitmap(grey: &[u8], w: usize, h: usize, threshold: u8) -> Option<String> {
    let mut img = PreparedImage::prepare_from_bitmap(w, h, |x, y| grey[y * w + x] < threshold);
    img.detect_grids()
        .iter()
        .find_map(|g| g.decode().ok())
        .map(|(_, content)| content)
        .filter(|text| !text.is_empty())
}

// ── Preprocessing ─────────────────────────────────────────────────

/// Area-average each 2×2 block. Odd trailing rows/columns are dropped.
fn downscale_2x(grey: &[u8], width: usize, height: usize) -> (Vec<u8>, usize, usize) {
    let dw = width / 2;
    let dh = height / 2;
    let mut out = Vec::with_capacity(dw * dh);

    for dy in 0..dh {
        for dx in 0..dw {
            let (sx, sy) = (dx * 2, dy * 2);
            let tl = grey[sy * width + sx] as u32;
            let tr = grey[sy * width + sx + 1] as u32;
            let bl = grey[(sy + 1) * width + sx] as u32;
            let br = grey[(sy + 1) * width + sx + 1] as u32;
            out.push(((tl + tr + bl + br + 2) / 4) as u8);
        }
    }

    (out, dw, dh)
}

fn add_quiet_zone(grey: &[u8], width: usize, height: usize, pad: usize) -> (Vec<u8>, usize, usize) {
    let nw = width + 2 * pad;
    let nh = height + 2 * pad;
    let mut out = vec![255u8; nw * nh];
    for y in 0..height {
        let src = &grey[y * width..(y + 1) * width];
        let start = (y + pad) * nw + pad;
        out[start..start + width].copy_from_slice(src);
    }
    (out, nw, nh)
}

/// Otsu's threshold: the split maximizing between-class variance. The
/// returned level is the top of the dark class.
fn otsu_threshold(grey: &[u8]) -> u8 {
    let mut hist = [0u32; 256];
    for &p in grey {
        hist[p as usize] += 1;
    }

    let total = grey.len() as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut best_threshold = 0u8;
    let mut best_variance = 0.0f64;
    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;

    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }

        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;

        let between = weight_bg * weight_fg * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        if between > best_variance {
            best_variance = between;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

// ── Tests ──────────────────────────────────────────────────────────
