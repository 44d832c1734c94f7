//! 2D layer transform for compositing.
//!
//! Fully-specified value type: every field is mandatory, defaults come
//! from `Transform::IDENTITY`. Malformed values coming in from the
//! editing UI are repaired with `sanitized()` before any drawing.
//!
//! Forward transform (layer -> surface):
//! surface = center + position + R * S * (pixel - layer_center)

use glam::{Mat3, Vec2};
use serde::{Deserialize, Serialize};

/// Placement of one layer on the composite surface.
///
/// `x`/`y` offset the layer from the surface center, in surface pixels.
/// `rotation` is radians, clockwise-positive (user convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default = "one")]
    pub scale_x: f32,
    #[serde(default = "one")]
    pub scale_y: f32,
    #[serde(default)]
    pub rotation: f32,
}

fn one() -> f32 {
    1.0
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        x: 0.0,
        y: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
        rotation: 0.0,
    };

    /// True if drawing with this transform is a plain centered blit.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.x == 0.0
            && self.y == 0.0
            && self.scale_x == 1.0
            && self.scale_y == 1.0
            && self.rotation == 0.0
    }

    /// Replace every non-finite field with its identity default.
    ///
    /// A malformed transform must never abort compositing of other
    /// layers, so repair happens here instead of erroring upstream.
    pub fn sanitized(self) -> Transform {
        let fix = |v: f32, def: f32| if v.is_finite() { v } else { def };
        let out = Transform {
            x: fix(self.x, 0.0),
            y: fix(self.y, 0.0),
            scale_x: fix(self.scale_x, 1.0),
            scale_y: fix(self.scale_y, 1.0),
            rotation: fix(self.rotation, 0.0),
        };
        if out != self {
            log::debug!("Sanitized non-finite transform: {:?} -> {:?}", self, out);
        }
        out
    }

    /// Forward matrix: layer pixel coords -> surface pixel coords.
    ///
    /// The layer is centered on the surface center plus the position
    /// offset, scaled and rotated about its own center.
    pub fn model_matrix(&self, layer_size: Vec2, surface_size: Vec2) -> Mat3 {
        let center = surface_size * 0.5 + Vec2::new(self.x, self.y);
        // Our rotation is CW+, glam angles are CCW+ in Y-up. With Y-down
        // pixel coordinates the signs cancel, so the angle passes through.
        Mat3::from_scale_angle_translation(
            Vec2::new(self.scale_x, self.scale_y),
            self.rotation,
            center,
        ) * Mat3::from_translation(-layer_size * 0.5)
    }

    /// Inverse matrix for reverse-mapping: surface coords -> layer coords.
    ///
    /// Returns None when the transform is degenerate (zero scale).
    pub fn inverse_matrix(&self, layer_size: Vec2, surface_size: Vec2) -> Option<Mat3> {
        if self.scale_x.abs() <= f32::EPSILON || self.scale_y.abs() <= f32::EPSILON {
            return None;
        }
        Some(self.model_matrix(layer_size, surface_size).inverse())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
