//! Composite surface - the single output canvas.
//!
//! All visible layers are drawn onto one RGBA8 buffer, back to front,
//! with per-layer opacity and transform. Sampling is reverse-mapped:
//! for every destination pixel the inverse transform gives the source
//! pixel, rows are processed in parallel.

use glam::Vec2;
use rayon::prelude::*;

use super::frame::{Frame, PixelBuffer};
use super::transform::Transform;

/// The composite output canvas (RGBA8).
#[derive(Debug, Clone)]
pub struct Surface {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width * height * 4],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Raw RGBA8 pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Fill with opaque black (the designated empty-timeline state).
    pub fn clear_black(&mut self) {
        self.fill([0, 0, 0, 255]);
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Snapshot the current composite as an immutable frame.
    pub fn snapshot(&self) -> Frame {
        Frame::from_u8_buffer(self.pixels.clone(), self.width, self.height)
    }

    /// Restore a previously taken snapshot (whole-composite fallback).
    /// Mismatched sizes fall back to a transformed draw over black.
    pub fn restore(&mut self, snapshot: &Frame) {
        if snapshot.resolution() == (self.width, self.height) {
            if let PixelBuffer::U8(data) = snapshot.buffer() {
                self.pixels.copy_from_slice(data);
                return;
            }
        }
        self.clear_black();
        self.draw_frame(snapshot, &Transform::IDENTITY, 1.0);
    }

    /// Draw one layer with opacity and transform, alpha-over.
    ///
    /// Opacity outside 0..1 is clamped, non-finite transforms must be
    /// sanitized by the caller (the compositor does). A degenerate
    /// transform draws nothing rather than failing.
    pub fn draw_frame(&mut self, frame: &Frame, transform: &Transform, opacity: f32) {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity == 0.0 || self.width == 0 || self.height == 0 {
            return;
        }

        if transform.is_identity() && frame.resolution() == (self.width, self.height) {
            self.draw_aligned(frame, opacity);
            return;
        }

        let layer_size = Vec2::new(frame.width() as f32, frame.height() as f32);
        let surface_size = Vec2::new(self.width as f32, self.height as f32);
        let Some(inv) = transform.inverse_matrix(layer_size, surface_size) else {
            log::debug!("Degenerate transform, skipping layer draw");
            return;
        };

        let width = self.width;
        self.pixels
            .par_chunks_exact_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    // Sample at the pixel center for stable rounding.
                    let src = inv.transform_point2(Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
                    let px = frame.sample(src.x.floor() as i64, src.y.floor() as i64);
                    blend_over(&mut row[x * 4..x * 4 + 4], px, opacity);
                }
            });
    }

    /// Fast path: same-size layer, no transform.
    fn draw_aligned(&mut self, frame: &Frame, opacity: f32) {
        let width = self.width;
        self.pixels
            .par_chunks_exact_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    let px = frame.sample(x as i64, y as i64);
                    blend_over(&mut row[x * 4..x * 4 + 4], px, opacity);
                }
            });
    }
}

/// Alpha-over blend of one source pixel (0..1 RGBA) onto a dst RGBA8 pixel.
#[inline]
fn blend_over(dst: &mut [u8], src: [f32; 4], opacity: f32) {
    let a = (src[3] * opacity).clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }
    let inv = 1.0 - a;
    for c in 0..3 {
        let d = dst[c] as f32 / 255.0;
        dst[c] = ((src[c].clamp(0.0, 1.0) * a + d * inv) * 255.0).round() as u8;
    }
    let da = dst[3] as f32 / 255.0;
    dst[3] = ((a + da * inv) * 255.0).round() as u8;
}
