//! facekiosk-core: Face position evaluation and capture sequencing.
//!
//! Classifies landmark snapshots from an external face-mesh model into
//! validity flags and pose buckets, and drives a small state machine that
//! decides when to freeze a still and when a capture session is complete.
//! No I/O happens here; camera, model and backend live in sibling crates.

pub mod config;
pub mod evaluator;
pub mod naming;
pub mod sequencer;
pub mod strategy;
pub mod types;

pub use config::{
    env_or, CaptureConfig, CaptureFailurePolicy, CaptureMode, ConfigError, EvaluatorConfig,
};
pub use evaluator::evaluate;
pub use sequencer::{
    CaptureError, CaptureSequencer, CompletedSession, GrabError, StillSource, TickOutcome,
};
pub use strategy::{CaptureStrategy, GatePolicy, PoseGatedStrategy, Tick, TimedStrategy};
pub use types::{
    CaptureSet, CaptureSlot, CapturedImage, FaceBox, FrameGeometry, LandmarkName,
    LandmarkSnapshot, Point2D, Point3D, PoseBucket, PositionResult,
};
