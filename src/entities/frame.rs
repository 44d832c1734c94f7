//! Immutable decoded frames with multi-format pixel buffers (U8, F32)
//!
//! **Why**: Decoded frames are shared between the per-source cache, the
//! per-layer fallback store and the compositor, often simultaneously.
//! Making the pixel data immutable behind an Arc turns every one of
//! those hand-offs into a pointer copy and removes any need for locks.
//!
//! **Used by**: Source Registry (cache entries, last-valid fallback),
//! Compositor (layer input + fallback snapshots), decoder backends
//! (decode output).
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: LDR sources (video, PNG, JPEG), 4 bytes/pixel
//! - `PixelBuffer::F32`: HDR stills (EXR, HDR), 16 bytes/pixel

use std::fmt;
use std::sync::Arc;

/// Pixel buffer - stores different precision levels
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // LDR formats - 8-bit RGBA per channel
    F32(Vec<f32>), // HDR formats - 32-bit float RGBA per channel
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,   // 8-bit RGBA (LDR)
    RgbaF32, // 32-bit float RGBA (HDR)
}

#[derive(Debug)]
struct FrameData {
    buffer: PixelBuffer,
    format: PixelFormat,
    width: usize,
    height: usize,
}

/// One decoded frame. Cheap to clone (Arc), impossible to mutate.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<FrameData>,
}

/// Frame/decode errors
#[derive(Debug)]
pub enum FrameError {
    Decode(String),
    UnsupportedFormat(String),
    BadDimensions { expected: usize, got: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Decode(e) => write!(f, "Decode error: {}", e),
            FrameError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
            FrameError::BadDimensions { expected, got } => {
                write!(f, "Buffer size mismatch: expected {} values, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Create frame from an RGBA8 buffer. Length must be `w * h * 4`.
    pub fn from_u8_buffer(buffer: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(buffer.len(), width * height * 4);
        Self {
            data: Arc::new(FrameData {
                buffer: PixelBuffer::U8(buffer),
                format: PixelFormat::Rgba8,
                width,
                height,
            }),
        }
    }

    /// Create frame from an RGBA f32 buffer. Length must be `w * h * 4`.
    pub fn from_f32_buffer(buffer: Vec<f32>, width: usize, height: usize) -> Self {
        debug_assert_eq!(buffer.len(), width * height * 4);
        Self {
            data: Arc::new(FrameData {
                buffer: PixelBuffer::F32(buffer),
                format: PixelFormat::RgbaF32,
                width,
                height,
            }),
        }
    }

    /// Solid-color frame (placeholders, tests).
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let mut buffer = vec![0u8; width * height * 4];
        for px in buffer.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self::from_u8_buffer(buffer, width, height)
    }

    pub fn width(&self) -> usize {
        self.data.width
    }

    pub fn height(&self) -> usize {
        self.data.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.data.width, self.data.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.data.format
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.data.buffer
    }

    /// Memory size in bytes
    pub fn mem(&self) -> usize {
        match &self.data.buffer {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Two frames sharing the same allocation are trivially identical.
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Sample one pixel as linear-ish RGBA in 0..1. Out of bounds reads
    /// are transparent black, so callers can sample freely after an
    /// inverse transform.
    #[inline]
    pub fn sample(&self, x: i64, y: i64) -> [f32; 4] {
        if x < 0 || y < 0 || x >= self.data.width as i64 || y >= self.data.height as i64 {
            return [0.0; 4];
        }
        let idx = (y as usize * self.data.width + x as usize) * 4;
        match &self.data.buffer {
            PixelBuffer::U8(v) => [
                v[idx] as f32 / 255.0,
                v[idx + 1] as f32 / 255.0,
                v[idx + 2] as f32 / 255.0,
                v[idx + 3] as f32 / 255.0,
            ],
            PixelBuffer::F32(v) => [v[idx], v[idx + 1], v[idx + 2], v[idx + 3]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: frame creation and accessors
    /// Validates: dimensions, format and memory size are consistent
    #[test]
    fn test_frame_creation() {
        let frame = Frame::solid(64, 32, [255, 0, 0, 255]);
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 32);
        assert_eq!(frame.format(), PixelFormat::Rgba8);
        assert_eq!(frame.mem(), 64 * 32 * 4);
    }

    /// Test: clone shares pixel data
    /// Validates: Frame clone is an Arc bump, not a buffer copy
    #[test]
    fn test_clone_is_shared() {
        let a = Frame::solid(8, 8, [1, 2, 3, 4]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
    }

    /// Test: sampling
    /// Validates: in-bounds reads return pixel values, out-of-bounds
    /// reads are transparent
    #[test]
    fn test_sample() {
        let frame = Frame::solid(4, 4, [255, 128, 0, 255]);
        let px = frame.sample(1, 1);
        assert!((px[0] - 1.0).abs() < 1e-6);
        assert!((px[1] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(frame.sample(-1, 0), [0.0; 4]);
        assert_eq!(frame.sample(4, 0), [0.0; 4]);
    }

    /// Test: f32 buffer size accounting
    /// Validates: HDR frames report 4 bytes per value
    #[test]
    fn test_f32_mem() {
        let frame = Frame::from_f32_buffer(vec![0.0; 8 * 8 * 4], 8, 8);
        assert_eq!(frame.format(), PixelFormat::RgbaF32);
        assert_eq!(frame.mem(), 8 * 8 * 4 * 4);
    }
}
