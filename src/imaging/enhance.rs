//! Blur-then-threshold cleanup of a composite for machine reading.
//!
//! Stacked shares show secret modules as solid black and background modules
//! as a half-black sub-pixel mesh. A small Gaussian blur melts the mesh into
//! mid grey; a low luminance cut then keeps only the solid modules black.
//! Best-effort: the output may still be unreadable.

use crate::config::MAX_BLUR_RADIUS;
use crate::imaging::{BLACK, PixelBuffer, WHITE};

/// Blur with standard deviation `blur_radius`, then binarize on average
/// RGB luminance: `avg < threshold` becomes black, everything else white.
pub fn enhance(buffer: &PixelBuffer, blur_radius: f32, threshold: u8) -> PixelBuffer {
    let blurred = if blur_radius > 0.0 && blur_radius.is_finite() {
        gaussian_blur(buffer, blur_radius)
    } else {
        buffer.clone()
    };

    let mut out = Vec::with_capacity(blurred.data().len());
    for px in blurred.data().chunks_exact(4) {
        let avg = (px[0] as u32 + px[1] as u32 + px[2] as u32) / 3;
        out.extend_from_slice(if avg < threshold as u32 { &BLACK } else { &WHITE });
    }

    buffer.with_data(out)
}

/// Separable Gaussian over the colour channels, edges clamped. Alpha is
/// carried through unchanged.
pub fn gaussian_blur(buffer: &PixelBuffer, sigma: f32) -> PixelBuffer {
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (w, h) = (buffer.width() as i64, buffer.height() as i64);
    let src = buffer.data();
    let at = |x: i64, y: i64| ((y * w + x) * 4) as usize;

    // Horizontal pass into f32 scratch.
    let mut temp = vec![0f32; src.len()];
    for y in 0..h {
        for x in 0..w {
            let dst = at(x, y);
            for c in 0..3 {
                let mut sum = 0.0f32;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = (x + k as i64 - radius).clamp(0, w - 1);
                    sum += weight * src[at(sx, y) + c] as f32;
                }
                temp[dst + c] = sum;
            }
            temp[dst + 3] = src[dst + 3] as f32;
        }
    }

    // Vertical pass back to u8.
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let dst = at(x, y);
            for c in 0..3 {
                let mut sum = 0.0f32;
                for (k, weight) in kernel.iter().enumerate() {
                    let sy = (y + k as i64 - radius).clamp(0, h - 1);
                    sum += weight * temp[at(x, sy) + c];
                }
                out[dst + c] = sum.round().clamp(0.0, 255.0) as u8;
            }
            out[dst + 3] = src[dst + 3];
        }
    }

    buffer.with_data(out)
}

/// Normalized 1-D Gaussian covering ±3σ, with σ capped at
/// [`MAX_BLUR_RADIUS`].
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let sigma = sigma.min(MAX_BLUR_RADIUS);
    let radius = (sigma * 3.0).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= total;
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD};
    use crate::imaging::{AlignmentOffset, composite};

    fn grey(w: u32, h: u32, v: u8) -> PixelBuffer {
        PixelBuffer::filled(w, h, [v, v, v, 255]).unwrap()
    }

    #[test]
    fn white_layers_stay_white() {
        let a = grey(20, 20, 255);
        let comp = composite(&a, &a, AlignmentOffset::default()).unwrap();
        let out = enhance(&comp, DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD);
        assert!(out.data().chunks_exact(4).all(|p| p == WHITE));
    }

    #[test]
    fn dark_information_region_turns_black() {
        // Two semi-transparent greys multiply to 120*120/255 = 56.
        let a = grey(20, 20, 120);
        let comp = composite(&a, &a, AlignmentOffset::default()).unwrap();
        assert_eq!(comp.pixel(0, 0)[0], 56);
        let out = enhance(&comp, DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD);
        assert!(out.data().chunks_exact(4).all(|p| p == BLACK));
    }

    #[test]
    fn threshold_is_strict() {
        let out = enhance(&grey(3, 3, 60), 0.0, 60);
        assert_eq!(out.pixel(1, 1), WHITE);
        let out = enhance(&grey(3, 3, 59), 0.0, 60);
        assert_eq!(out.pixel(1, 1), BLACK);
    }

    #[test]
    fn output_is_two_level() {
        let pixels: Vec<[u8; 3]> = (0..64u32).map(|i| { let v = (i * 4) as u8; [v, v / 2, 255 - v] }).collect();
        let buf = PixelBuffer::from_rgb(8, 8, &pixels).unwrap();
        let out = enhance(&buf, 1.5, 60);
        assert_eq!(out.dimensions(), (8, 8));
        assert!(out.data().chunks_exact(4).all(|p| p == BLACK || p == WHITE));
    }

    #[test]
    fn blur_merges_subpixel_mesh_into_background() {
        // Alternating black/white columns average to ~127, well above the cut,
        // while a solid black block stays black.
        let mut pixels = Vec::new();
        for _y in 0..16 {
            for x in 0..32u32 {
                let v = if x >= 24 || x % 2 == 0 { 0 } else { 255 };
                pixels.push([v, v, v]);
            }
        }
        let buf = PixelBuffer::from_rgb(32, 16, &pixels).unwrap();
        let out = enhance(&buf, DEFAULT_BLUR_RADIUS, DEFAULT_THRESHOLD);
        assert_eq!(out.pixel(8, 8), WHITE);
        assert_eq!(out.pixel(9, 8), WHITE);
        assert_eq!(out.pixel(30, 8), BLACK);
    }

    #[test]
    fn blur_preserves_uniform_regions() {
        let buf = grey(10, 10, 77);
        assert_eq!(gaussian_blur(&buf, 1.5), buf);
    }

    #[test]
    fn blur_smooths_spike() {
        let mut data = grey(5, 5, 0).data().to_vec();
        data[12 * 4..12 * 4 + 3].copy_from_slice(&[255, 255, 255]);
        let buf = PixelBuffer::new(5, 5, data).unwrap();
        let blurred = gaussian_blur(&buf, 1.0);
        assert!(blurred.pixel(2, 2)[0] < 255, "center should be dimmed");
        assert!(blurred.pixel(1, 2)[0] > 0, "neighbor should pick up brightness");
    }

    #[test]
    fn huge_sigma_is_capped() {
        let kernel = gaussian_kernel(1e30);
        assert_eq!(kernel, gaussian_kernel(MAX_BLUR_RADIUS));
        assert_eq!(kernel.len(), 2 * 96 + 1);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 11);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
    }
}
