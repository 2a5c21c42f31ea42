//! Multiply-blend two canonical layers at an integer alignment offset.
//!
//! `out = floor(A * B / 255)` per colour channel models two transparencies
//! stacked on a light box. Where the shifted B layer does not cover A, B is
//! read as white, the identity of the blend, so edges never darken.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::imaging::{PixelBuffer, WHITE};

/// Translation applied to layer B before blending. Unbounded; large values
/// simply leave no overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignmentOffset {
    pub dx: i32,
    pub dy: i32,
}

/// One-pixel nudge direction for alignment controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    Up,
    Down,
    Left,
    Right,
}

impl Nudge {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Nudge::Up),
            "down" => Some(Nudge::Down),
            "left" => Some(Nudge::Left),
            "right" => Some(Nudge::Right),
            _ => None,
        }
    }
}

impl AlignmentOffset {
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    pub fn inverse(self) -> Self {
        Self::new(self.dx.saturating_neg(), self.dy.saturating_neg())
    }

    pub fn nudged(self, dir: Nudge) -> Self {
        match dir {
            Nudge::Up => Self::new(self.dx, self.dy.saturating_sub(1)),
            Nudge::Down => Self::new(self.dx, self.dy.saturating_add(1)),
            Nudge::Left => Self::new(self.dx.saturating_sub(1), self.dy),
            Nudge::Right => Self::new(self.dx.saturating_add(1), self.dy),
        }
    }
}

/// Blend `a` with `b` shifted by `offset`. Both buffers must have identical
/// dimensions; a mismatch is reported, never cropped.
pub fn composite(a: &PixelBuffer, b: &PixelBuffer, offset: AlignmentOffset) -> Result<PixelBuffer> {
    if a.dimensions() != b.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            a_width: a.width(),
            a_height: a.height(),
            b_width: b.width(),
            b_height: b.height(),
        });
    }

    let (w, h) = a.dimensions();
    let (dx, dy) = (offset.dx as i64, offset.dy as i64);
    let mut out = Vec::with_capacity(a.data().len());

    for y in 0..h {
        for x in 0..w {
            let pa = a.pixel(x, y);
            let pb = b.get(x as i64 - dx, y as i64 - dy).unwrap_or(WHITE);
            out.push(multiply(pa[0], pb[0]));
            out.push(multiply(pa[1], pb[1]));
            out.push(multiply(pa[2], pb[2]));
            out.push(255);
        }
    }

    Ok(a.with_data(out))
}

#[inline]
fn multiply(a: u8, b: u8) -> u8 {
    ((a as u32 * b as u32) / 255) as u8
}
