//! Entities - the data model and leaf types of the engine.
//!
//! Everything here is either a plain value type (Clip, Transform,
//! Frame) or the decoder seam the engine talks to media backends
//! through. No engine logic lives in this module.

pub mod clip;
pub mod decoder;
pub mod frame;
pub mod sequence;
pub mod surface;
pub mod transform;

pub use clip::{Clip, MediaKind};
pub use decoder::{Decoder, DecoderError, DecoderFactory, DecoderLane, Readiness};
pub use frame::{Frame, FrameError, PixelBuffer, PixelFormat};
pub use sequence::{SequenceDecoder, SequenceDecoderFactory};
pub use surface::Surface;
pub use transform::Transform;
