//! The volumetric fusion boundary.
//!
//! The dense reconstruction engine is an external collaborator; this module
//! defines the trait surface the session drives and the point-cloud value it
//! hands back to the caller.

use crate::camera::PinholeModel;
use crate::frame::DepthFrame;
use nalgebra::{Matrix4, Vector3};

#[derive(thiserror::Error, Debug)]
pub enum FusionError {
    #[error("Failed to create fusion engine: {0}")]
    CreateFailed(String),
}

/// Caller-provided flat output slices are too small for the cloud.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Cloud of {points} points needs {required} floats, buffer holds {capacity}")]
pub struct CloudOverflow {
    pub points: usize,
    pub required: usize,
    pub capacity: usize,
}

/// A reconstructed surface sample set: one normal per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Marshals the cloud into caller-provided flat `[x, y, z]` triples,
    /// returning the number of points written.
    ///
    /// Both slices must hold at least `3 * len()` floats; otherwise nothing
    /// is written and the required size is reported via [`CloudOverflow`].
    pub fn write_flat(
        &self,
        points_out: &mut [f32],
        normals_out: &mut [f32],
    ) -> Result<usize, CloudOverflow> {
        let required = self.points.len() * 3;
        let capacity = points_out.len().min(normals_out.len());
        if capacity < required {
            return Err(CloudOverflow {
                points: self.points.len(),
                required,
                capacity,
            });
        }

        for (i, (point, normal)) in self.points.iter().zip(self.normals.iter()).enumerate() {
            points_out[i * 3] = point.x;
            points_out[i * 3 + 1] = point.y;
            points_out[i * 3 + 2] = point.z;
            normals_out[i * 3] = normal.x;
            normals_out[i * 3 + 1] = normal.y;
            normals_out[i * 3 + 2] = normal.z;
        }

        Ok(self.points.len())
    }
}

/// A running volumetric reconstruction.
///
/// Consumes undistorted depth frames matching the virtual pinhole camera it
/// was created for.
pub trait FusionEngine {
    /// Integrates one undistorted depth frame. Returns `false` when the
    /// frame could not be tracked against the accumulated model.
    fn update(&mut self, depth: &DepthFrame) -> bool;

    /// Discards the accumulated model and restarts tracking.
    fn reset(&mut self);

    /// Current camera pose as a row-major 4x4 transform.
    fn pose(&self) -> Matrix4<f32>;

    /// Current reconstructed surface cloud.
    fn cloud(&self) -> PointCloud;
}

/// Creates fusion engines for a given virtual camera.
pub trait FusionBackend {
    type Engine: FusionEngine;

    /// Creates an engine configured for the undistorted camera geometry.
    fn create(&mut self, camera: &PinholeModel) -> Result<Self::Engine, FusionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud() -> PointCloud {
        PointCloud {
            points: vec![
                Vector3::new(1.0, 2.0, 3.0),
                Vector3::new(4.0, 5.0, 6.0),
            ],
            normals: vec![
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
        }
    }

    #[test]
    fn test_write_flat_packs_triples() {
        let cloud = sample_cloud();
        let mut points = [0.0f32; 6];
        let mut normals = [0.0f32; 6];

        let written = cloud.write_flat(&mut points, &mut normals).unwrap();

        assert_eq!(written, 2);
        assert_eq!(points, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(normals, [0.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_write_flat_reports_required_size_on_overflow() {
        let cloud = sample_cloud();
        let mut points = [0.0f32; 3];
        let mut normals = [0.0f32; 6];

        let err = cloud.write_flat(&mut points, &mut normals).unwrap_err();

        assert_eq!(
            err,
            CloudOverflow {
                points: 2,
                required: 6,
                capacity: 3,
            }
        );
        // Nothing was written
        assert_eq!(points, [0.0; 3]);
    }
}
