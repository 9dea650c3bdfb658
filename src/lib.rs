//! Depthcam Tools Library
//!
//! A Rust library for streaming depth-camera frames into a volumetric 3-D
//! reconstruction pipeline. This library provides:
//! - Camera models for the raw lens (extended radial-tangential distortion)
//!   and the derived virtual pinhole camera
//! - A pinhole range estimator and a precomputed per-pixel undistortion
//!   lookup table
//! - A remap engine with depth-aware invalidation of missing-return samples
//! - A capture/fusion session state machine over pluggable camera-source and
//!   fusion-engine backends
//!
//! The camera driver and the dense fusion algorithm themselves stay behind
//! the [`source::CameraSource`] and [`fusion::FusionBackend`] traits.

pub mod camera;
pub mod frame;
pub mod fusion;
pub mod session;
pub mod source;
pub mod undistort;

// Re-export commonly used types
pub use camera::{
    CameraModel, CameraModelError, Intrinsics, PinholeModel, RadTanModel, Resolution,
};

pub use frame::{ColorFrame, DepthFrame, NO_DEPTH};

pub use fusion::{CloudOverflow, FusionBackend, FusionEngine, FusionError, PointCloud};

pub use session::{
    CaptureOutcome, EventSink, FrameResult, LogLevel, LogSink, Session, SessionConfig,
    SessionError, SessionState,
};

pub use source::{CameraSource, SourceError, WaitOutcome};

pub use undistort::{
    compute_xy_range, create_pinhole_from_xy_range, remap_color, remap_depth, Interpolation,
    LutEntry, UndistortError, UndistortionTable, XyRange,
};
