//! Raster types and the pure image stages of the reconstruction pipeline.
//!
//! All stages operate on [`PixelBuffer`], a flat row-major RGBA raster.
//! Nothing here allocates beyond its output buffer or touches shared state.

pub mod composite;
pub mod encoding;
pub mod enhance;
pub mod normalize;

pub use composite::{AlignmentOffset, Nudge, composite};
pub use encoding::{decode_data_url, encode_png, to_portable_encoding};
pub use enhance::enhance;
pub use normalize::{decode_upload, normalize, normalize_upload};

use image::RgbaImage;

use crate::error::{PipelineError, Result};

pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Dense RGBA raster. Width and height are always positive and
/// `data.len() == width * height * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::invalid_image(format!(
                "empty raster ({}x{})",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(PipelineError::invalid_image(format!(
                "raster holds {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer where every pixel is `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let len = width as usize * height as usize;
        let mut data = Vec::with_capacity(len * 4);
        for _ in 0..len {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, data)
    }

    /// Build an opaque buffer from row-major RGB triples.
    pub fn from_rgb(width: u32, height: u32, pixels: &[[u8; 3]]) -> Result<Self> {
        let data = pixels
            .iter()
            .flat_map(|&[r, g, b]| [r, g, b, 255])
            .collect();
        Self::new(width, height, data)
    }

    pub fn from_rgba_image(img: RgbaImage) -> Result<Self> {
        let (w, h) = img.dimensions();
        Self::new(w, h, img.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGBA at (x, y). Callers must stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// RGBA at signed coordinates, or `None` outside the raster.
    pub fn get(&self, x: i64, y: i64) -> Option<[u8; 4]> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.pixel(x as u32, y as u32))
    }

    /// Greyscale using BT.601 weights in integer form: (77R + 150G + 29B) >> 8.
    pub fn to_greyscale(&self) -> Vec<u8> {
        self.data
            .chunks_exact(4)
            .map(|px| {
                let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                ((77 * r + 150 * g + 29 * b) >> 8) as u8
            })
            .collect()
    }

    /// A buffer of the same size holding `data`, which must be the same length.
    pub(crate) fn with_data(&self, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(PixelBuffer::new(0, 4, Vec::new()).is_err());
        assert!(PixelBuffer::filled(3, 0, WHITE).is_err());
    }

    #[test]
    fn rejects_short_raster() {
        let err = PixelBuffer::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImageFormat { .. }));
    }

    #[test]
    fn from_rgb_is_opaque() {
        let buf = PixelBuffer::from_rgb(2, 1, &[[1, 2, 3], [4, 5, 6]]).unwrap();
        assert_eq!(buf.pixel(0, 0), [1, 2, 3, 255]);
        assert_eq!(buf.pixel(1, 0), [4, 5, 6, 255]);
    }

    #[test]
    fn get_outside_is_none() {
        let buf = PixelBuffer::filled(2, 2, WHITE).unwrap();
        assert_eq!(buf.get(-1, 0), None);
        assert_eq!(buf.get(0, 2), None);
        assert_eq!(buf.get(1, 1), Some(WHITE));
    }

    #[test]
    fn greyscale_weights() {
        let buf = PixelBuffer::from_rgb(3, 1, &[[128, 128, 128], [0, 0, 0], [255, 255, 0]]).unwrap();
        let grey = buf.to_greyscale();
        assert_eq!(grey[0], 128);
        assert_eq!(grey[1], 0);
        assert!(grey[2] > 220 && grey[2] < 230, "yellow luminance was {}", grey[2]);
    }
}
