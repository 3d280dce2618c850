//! Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access implementing the core `FrameSource`
//! seam, plus buffer conversion helpers.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
