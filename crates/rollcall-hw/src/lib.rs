//! rollcall-hw — V4L2 camera capture for the attendance engine.
//!
//! Streams frames from a V4L2 device, converts them to RGB and exposes the
//! camera as a `rollcall_core::FrameSource`.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraOptions, DeviceInfo, PixelFormat};
pub use frame::FrameError;
