//! rollcall-hw — Camera capture for attendance sessions.
//!
//! Provides V4L2-based camera access with frame conversion to RGB, and
//! implements [`rollcall_core::FrameSource`] for the camera.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::FrameError;
