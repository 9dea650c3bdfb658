//! The capture/fusion session state machine.
//!
//! A [`Session`] owns one camera source and one fusion backend and sequences
//! them around the undistortion pipeline: connect, fetch calibration, derive
//! the virtual pinhole and its lookup table, stream captures, remap each
//! depth frame, and feed the fusion engine. The caller drives the machine
//! one step at a time; nothing here spawns threads or retains frames across
//! cycles.
//!
//! Recoverable conditions (a wait timeout, a frame the fusion engine cannot
//! track) are ordinary [`CaptureOutcome`] values. Fatal conditions release
//! the device resources and move the session toward
//! [`SessionState::Disconnected`] or [`SessionState::Faulted`].

use crate::camera::{PinholeModel, RadTanModel, Resolution};
use crate::frame::ColorFrame;
use crate::fusion::{FusionBackend, FusionEngine, PointCloud};
use crate::source::{CameraSource, SourceError, WaitOutcome};
use crate::undistort::{
    compute_xy_range, create_pinhole_from_xy_range, remap_depth, Interpolation, UndistortionTable,
};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Configured,
    Streaming,
    Faulted,
}

/// Severity attached to sink notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error | LogLevel::Critical => log::Level::Error,
        }
    }
}

/// Receives session diagnostics and per-cycle frame results.
///
/// Both methods default to no-ops so a sink may subscribe to either side
/// alone.
pub trait EventSink {
    fn log(&mut self, _level: LogLevel, _message: &str) {}

    fn frame(&mut self, _result: &FrameResult) {}
}

/// Default sink: forwards diagnostics to the `log` facade, drops frames.
pub struct LogSink;

impl EventSink for LogSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        let level: log::Level = level.into();
        log::log!(level, "{message}");
    }
}

/// Session parameters, serde-compatible for host-side configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Which connected device to open.
    pub device_index: usize,
    /// Bounded wait for one capture, in milliseconds.
    pub timeout_ms: u32,
    /// Interpolation policy for the undistortion table.
    pub interpolation: Interpolation,
    /// Output resolution of the undistorted image; defaults to the source
    /// resolution.
    pub output_resolution: Option<Resolution>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device_index: 0,
            timeout_ms: 1000,
            interpolation: Interpolation::BilinearDepth,
            output_resolution: None,
        }
    }
}

/// Everything one accepted capture cycle produces.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Raw color frame, when the capture carried one.
    pub color: Option<ColorFrame>,
    /// Reconstructed surface cloud after integrating the frame.
    pub cloud: PointCloud,
    /// Camera pose after integrating the frame.
    pub pose: Matrix4<f32>,
}

impl FrameResult {
    /// The pose as 16 floats in row-major order, for flat host-side
    /// marshalling.
    pub fn pose_row_major(&self) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = self.pose[(row, col)];
            }
        }
        out
    }
}

/// Outcome of one capture cycle. Only transport failures are errors; these
/// are all normal operation.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The frame was integrated; pose and cloud are current.
    Frame(FrameResult),
    /// Nothing to integrate this cycle (wait timeout or a capture without
    /// depth).
    NoFrame,
    /// The fusion engine could not track the frame; its model was reset and
    /// streaming continues.
    FusionReset,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Failed to open device: {0}")]
    Connection(#[source] SourceError),
    #[error("Failed to configure session: {0}")]
    Configuration(String),
    #[error("Failed to start streaming: {0}")]
    Start(String),
    #[error("Failed to read a capture; session faulted")]
    Capture,
    #[error("Operation '{operation}' is not valid in state {state:?}")]
    WrongState {
        operation: &'static str,
        state: SessionState,
    },
}

/// A reconstruction session over one camera.
///
/// Multiple sessions over multiple cameras are independent values; there is
/// no process-wide device state.
pub struct Session<C: CameraSource, B: FusionBackend> {
    source: C,
    backend: B,
    config: SessionConfig,
    sink: Box<dyn EventSink>,
    state: SessionState,
    calibration: Option<RadTanModel>,
    pinhole: Option<PinholeModel>,
    table: Option<UndistortionTable>,
    fusion: Option<B::Engine>,
}

impl<C: CameraSource, B: FusionBackend> Session<C, B> {
    /// Creates a disconnected session with the default [`LogSink`].
    pub fn new(source: C, backend: B, config: SessionConfig) -> Self {
        Session::with_sink(source, backend, config, Box::new(LogSink))
    }

    /// Creates a disconnected session delivering diagnostics and frame
    /// results to `sink`.
    pub fn with_sink(
        source: C,
        backend: B,
        config: SessionConfig,
        sink: Box<dyn EventSink>,
    ) -> Self {
        Session {
            source,
            backend,
            config,
            sink,
            state: SessionState::Disconnected,
            calibration: None,
            pinhole: None,
            table: None,
            fusion: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of devices the source can enumerate.
    pub fn device_count(&self) -> usize {
        self.source.device_count()
    }

    /// The virtual pinhole camera, available from `Configured` onward.
    pub fn pinhole(&self) -> Option<&PinholeModel> {
        self.pinhole.as_ref()
    }

    /// The undistortion table, available from `Configured` onward.
    pub fn table(&self) -> Option<&UndistortionTable> {
        self.table.as_ref()
    }

    /// The factory calibration, available from `Configured` onward.
    pub fn calibration(&self) -> Option<&RadTanModel> {
        self.calibration.as_ref()
    }

    /// Opens the device handle. `Disconnected` -> `Connected`.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::WrongState {
                operation: "connect",
                state: self.state,
            });
        }

        if let Err(err) = self.source.open(self.config.device_index) {
            self.sink.log(LogLevel::Critical, "Failed to open device");
            self.source.close();
            return Err(SessionError::Connection(err));
        }

        self.state = SessionState::Connected;
        Ok(())
    }

    /// Fetches calibration and builds the undistortion pipeline.
    /// `Connected` -> `Configured`.
    ///
    /// The range sweep, pinhole derivation, table build and fusion-engine
    /// creation all happen here, once; streaming never rebuilds them.
    pub fn configure(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::WrongState {
                operation: "configure",
                state: self.state,
            });
        }

        let calibration = match self.source.calibration() {
            Ok(calibration) => calibration,
            Err(err) => {
                return self.fail_configuration(format!("calibration fetch failed: {err}"));
            }
        };

        let output = self
            .config
            .output_resolution
            .unwrap_or(calibration.resolution);

        let range = match compute_xy_range(&calibration) {
            Ok(range) => range,
            Err(err) => {
                return self.fail_configuration(format!("range estimation failed: {err}"));
            }
        };

        let pinhole = match create_pinhole_from_xy_range(&range, output.width, output.height) {
            Ok(pinhole) => pinhole,
            Err(err) => {
                return self.fail_configuration(format!("pinhole derivation failed: {err}"));
            }
        };

        let table = UndistortionTable::build(&calibration, &pinhole, self.config.interpolation);

        let fusion = match self.backend.create(&pinhole) {
            Ok(fusion) => fusion,
            Err(err) => {
                return self.fail_configuration(format!("fusion engine creation failed: {err}"));
            }
        };

        log::info!(
            "Configured {}x{} pinhole (fx: {:.3}, fy: {:.3}, cx: {:.3}, cy: {:.3})",
            pinhole.resolution.width,
            pinhole.resolution.height,
            pinhole.intrinsics.fx,
            pinhole.intrinsics.fy,
            pinhole.intrinsics.cx,
            pinhole.intrinsics.cy,
        );

        self.calibration = Some(calibration);
        self.pinhole = Some(pinhole);
        self.table = Some(table);
        self.fusion = Some(fusion);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Starts the capture stream. `Configured` -> `Streaming`.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Configured {
            return Err(SessionError::Start(format!(
                "session is {:?}, not Configured",
                self.state
            )));
        }

        if let Err(err) = self.source.start() {
            self.sink.log(LogLevel::Critical, "Failed to start device");
            self.source.close();
            self.release_pipeline();
            self.state = SessionState::Disconnected;
            return Err(SessionError::Start(err.to_string()));
        }

        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Convenience bring-up: connect, configure and start in one call, with
    /// the failing stage reported through its own error variant.
    pub fn connect_and_start(&mut self) -> Result<(), SessionError> {
        self.connect()?;
        self.configure()?;
        self.start()?;
        Ok(())
    }

    /// Runs one capture cycle. Only valid while `Streaming`.
    ///
    /// A wait timeout and a depth-less capture are reported as
    /// [`CaptureOutcome::NoFrame`]; a frame the fusion engine rejects resets
    /// the engine and reports [`CaptureOutcome::FusionReset`]. Both leave
    /// the session `Streaming`. A transport failure faults the session and
    /// releases the device.
    pub fn capture(&mut self) -> Result<CaptureOutcome, SessionError> {
        if self.state != SessionState::Streaming {
            return Err(SessionError::WrongState {
                operation: "capture",
                state: self.state,
            });
        }

        match self.source.wait_for_capture(self.config.timeout_ms) {
            WaitOutcome::Timeout => {
                self.sink
                    .log(LogLevel::Info, "Timed out waiting for a capture");
                Ok(CaptureOutcome::NoFrame)
            }
            WaitOutcome::Failed => {
                self.sink.log(LogLevel::Critical, "Failed to read a capture");
                self.fault();
                Err(SessionError::Capture)
            }
            WaitOutcome::Capture(capture) => self.integrate(capture),
        }
    }

    fn integrate(&mut self, capture: C::Capture) -> Result<CaptureOutcome, SessionError> {
        let Some(depth) = self.source.depth_frame(&capture) else {
            self.sink
                .log(LogLevel::Warning, "Capture carried no depth frame");
            return Ok(CaptureOutcome::NoFrame);
        };

        let remapped = match &self.table {
            Some(table) => remap_depth(&depth, table),
            None => {
                return Err(SessionError::WrongState {
                    operation: "capture",
                    state: self.state,
                })
            }
        };
        let undistorted = match remapped {
            Ok(undistorted) => undistorted,
            Err(err) => {
                self.sink.log(
                    LogLevel::Critical,
                    &format!("Capture does not match calibration: {err}"),
                );
                self.fault();
                return Err(SessionError::Capture);
            }
        };

        let accepted = match &mut self.fusion {
            Some(engine) => engine.update(&undistorted),
            None => {
                return Err(SessionError::WrongState {
                    operation: "capture",
                    state: self.state,
                })
            }
        };

        if !accepted {
            self.sink
                .log(LogLevel::Info, "Fusion rejected the frame, model reset");
            if let Some(engine) = &mut self.fusion {
                engine.reset();
            }
            return Ok(CaptureOutcome::FusionReset);
        }

        let (pose, cloud) = match &self.fusion {
            Some(engine) => (engine.pose(), engine.cloud()),
            None => {
                return Err(SessionError::WrongState {
                    operation: "capture",
                    state: self.state,
                })
            }
        };

        let result = FrameResult {
            color: self.source.color_frame(&capture),
            cloud,
            pose,
        };
        self.sink.frame(&result);
        Ok(CaptureOutcome::Frame(result))
    }

    /// Stops the capture stream. `Streaming` -> `Configured`.
    ///
    /// The calibration and the undistortion table are retained, so a later
    /// [`Session::start`] resumes without a rebuild. A no-op in any other
    /// state.
    pub fn stop(&mut self) {
        if self.state == SessionState::Streaming {
            self.source.stop();
            self.state = SessionState::Configured;
        }
    }

    /// Discards the fusion engine's accumulated model, keeping the session
    /// state unchanged.
    pub fn reset_fusion(&mut self) {
        if let Some(engine) = &mut self.fusion {
            engine.reset();
            self.sink.log(LogLevel::Info, "Fusion model reset");
        }
    }

    /// Polls the current camera pose without running a capture cycle.
    /// Available from `Configured` onward.
    pub fn current_pose(&self) -> Option<Matrix4<f32>> {
        let pose = self.fusion.as_ref()?.pose();
        for row in 0..4 {
            log::debug!(
                "[ {:.6}, {:.6}, {:.6}, {:.6} ]",
                pose[(row, 0)],
                pose[(row, 1)],
                pose[(row, 2)],
                pose[(row, 3)],
            );
        }
        Some(pose)
    }

    /// Releases everything and returns to `Disconnected`.
    ///
    /// Safe from every state including `Disconnected` and `Faulted`;
    /// calling it twice is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if self.state == SessionState::Streaming {
            self.source.stop();
        }
        self.source.close();
        self.release_pipeline();
        self.state = SessionState::Disconnected;
    }

    fn fail_configuration(&mut self, message: String) -> Result<(), SessionError> {
        self.sink.log(LogLevel::Critical, &message);
        self.source.close();
        self.release_pipeline();
        self.state = SessionState::Disconnected;
        Err(SessionError::Configuration(message))
    }

    fn fault(&mut self) {
        self.source.close();
        self.release_pipeline();
        self.state = SessionState::Faulted;
    }

    fn release_pipeline(&mut self) {
        self.calibration = None;
        self.pinhole = None;
        self.table = None;
        self.fusion = None;
    }
}
