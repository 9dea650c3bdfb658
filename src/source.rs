//! The camera-source boundary.
//!
//! The physical device driver lives behind [`CameraSource`]; the session
//! only ever talks to this trait. Captures are owned values whose associated
//! type's `Drop` releases the underlying device buffers, so every exit path
//! of a capture cycle releases the frame.

use crate::camera::RadTanModel;
use crate::frame::{ColorFrame, DepthFrame};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),
    #[error("Failed to get calibration: {0}")]
    CalibrationUnavailable(String),
    #[error("Failed to start device: {0}")]
    StartFailed(String),
}

/// Outcome of a bounded wait for the next capture.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// A capture arrived within the timeout.
    Capture(T),
    /// No frame arrived within the timeout. Expected under normal operation;
    /// not an error.
    Timeout,
    /// The transport failed; the stream is unusable.
    Failed,
}

/// A depth camera as the session consumes it.
///
/// Implementations wrap a device SDK or a recording. All calls are
/// synchronous; `wait_for_capture` blocks for at most `timeout_ms`.
pub trait CameraSource {
    /// An owned capture; dropping it releases the device buffers.
    type Capture;

    /// Number of connected devices.
    fn device_count(&self) -> usize;

    /// Opens a handle on the device at `index`.
    fn open(&mut self, index: usize) -> Result<(), SourceError>;

    /// Fetches the factory lens calibration of the opened device.
    fn calibration(&self) -> Result<RadTanModel, SourceError>;

    /// Starts the capture stream.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Stops the capture stream. Safe to call when not streaming.
    fn stop(&mut self);

    /// Closes the device handle. Safe to call when not open.
    fn close(&mut self);

    /// Waits up to `timeout_ms` for the next capture.
    fn wait_for_capture(&mut self, timeout_ms: u32) -> WaitOutcome<Self::Capture>;

    /// Extracts the depth frame from a capture, if the capture holds one.
    fn depth_frame(&self, capture: &Self::Capture) -> Option<DepthFrame>;

    /// Extracts the color frame from a capture, if the capture holds one.
    fn color_frame(&self, capture: &Self::Capture) -> Option<ColorFrame>;
}
