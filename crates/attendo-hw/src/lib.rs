//! attendo-hw: camera capture and frame conversion.
//!
//! Provides a V4L2-based frame source and conversion of raw camera
//! frames into RGB images for face detection.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource};
pub use frame::{Frame, FrameError, PixelFormat};
