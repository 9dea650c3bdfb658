//! Undistortion of raw depth-camera frames into a virtual pinhole view.
//!
//! The pipeline has three stages, run in order once per camera
//! (re)configuration:
//! 1. [`range::compute_xy_range`] measures the region of the unit projection
//!    plane reachable from the raw image.
//! 2. [`range::create_pinhole_from_xy_range`] derives the virtual pinhole
//!    camera spanning that region.
//! 3. [`UndistortionTable::build`] precomputes, per destination pixel, which
//!    source pixel(s) and weights produce the undistorted value.
//!
//! Per frame, only [`remap::remap_depth`] / [`remap::remap_color`] run; they
//! are plain table lookups with no distortion-model evaluation.

use serde::{Deserialize, Serialize};

pub mod lut;
pub mod range;
pub mod remap;

pub use range::{compute_xy_range, create_pinhole_from_xy_range, XyRange};
pub use remap::{remap_color, remap_depth};

/// Interpolation policy for table construction and remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Nearest neighbor interpolation
    NearestNeighbor,
    /// Bilinear interpolation
    Bilinear,
    /// Bilinear interpolation with invalidation when any contributing
    /// neighbor holds the "no valid return" depth sentinel
    BilinearDepth,
}

/// One precomputed source correspondence for a destination pixel.
///
/// Bilinear entries keep their four neighbor indices clamped in-bounds at
/// build time; a border neighbor repeats the edge pixel rather than
/// manufacturing an invalid hole.
#[derive(Debug, Clone, PartialEq)]
pub enum LutEntry {
    /// The destination ray has no valid source correspondence.
    Invalid,
    /// Single nearest source sample, stored as a linear index.
    Nearest { index: u32 },
    /// 2x2 source neighborhood with bilinear weights. Weights are
    /// non-negative and sum to 1.
    Bilinear {
        indices: [u32; 4],
        weights: [f32; 4],
    },
}

/// A per-destination-pixel lookup table mapping the virtual pinhole image
/// back into the raw source image.
///
/// Immutable after construction; built once per calibration or resolution
/// change and reused for every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct UndistortionTable {
    pub(crate) entries: Vec<LutEntry>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) src_width: u32,
    pub(crate) src_height: u32,
    pub(crate) interpolation: Interpolation,
}

impl UndistortionTable {
    /// Destination (output) width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Destination (output) height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source image width the table was built against.
    pub fn src_width(&self) -> u32 {
        self.src_width
    }

    /// Source image height the table was built against.
    pub fn src_height(&self) -> u32 {
        self.src_height
    }

    /// The interpolation policy the table was built for.
    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// The entry for destination pixel `(x, y)`.
    pub fn entry(&self, x: u32, y: u32) -> &LutEntry {
        &self.entries[y as usize * self.width as usize + x as usize]
    }

    /// All entries in row-major destination order.
    pub fn entries(&self) -> &[LutEntry] {
        &self.entries
    }
}

#[derive(thiserror::Error, Debug)]
pub enum UndistortError {
    #[error("No raw pixel produced a valid unprojection; cannot estimate a pinhole range")]
    EmptyRange,
    #[error(
        "Source frame is {actual_width}x{actual_height} but the table was built for \
         {expected_width}x{expected_height}"
    )]
    SourceSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}
