//! facekiosk-hw: Camera capture and the landmark provider boundary.
//!
//! Provides V4L2-based colour camera access, RGB frame helpers with JPEG
//! still encoding, and the adapter that turns external face-mesh output
//! into typed landmark snapshots.

pub mod camera;
pub mod frame;
pub mod landmarks;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError, CHANNELS};
pub use landmarks::{LandmarkProvider, ProviderError, ReplayProvider, SidecarProvider};
