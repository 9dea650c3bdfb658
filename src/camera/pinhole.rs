//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct for the ideal, lens-free
//! projection model. It adheres to the [`CameraModel`] trait defined in the
//! parent `camera` module ([`crate::camera`]). Within this crate the pinhole
//! model is primarily the *virtual* camera derived by the range estimator:
//! undistorted output pixels are defined against it, and its closed-form
//! `unproject` is what the lookup table builder evaluates per destination
//! pixel.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Represents a Pinhole camera model.
///
/// Holds the intrinsic parameters (focal length, principal point) and image
/// resolution. Assumes no lens distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use depthcam_tools::camera::pinhole::PinholeModel;
/// use depthcam_tools::camera::Resolution;
///
/// let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]); // fx, fy, cx, cy
/// let model = PinholeModel::new(&params, Resolution { width: 640, height: 480 }).unwrap();
///
/// assert_eq!(model.intrinsics.fx, 500.0);
/// assert_eq!(model.resolution.width, 640);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] from a parameter vector and resolution.
    ///
    /// # Arguments
    ///
    /// * `parameters` - A `&DVector<f64>` containing `fx`, `fy`, `cx`, `cy`.
    /// * `resolution` - The image resolution of the camera.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidParams`]
    pub fn new(
        parameters: &DVector<f64>,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        if parameters.len() != 4 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 4 parameters, got {}",
                parameters.len()
            )));
        }

        let model = PinholeModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution,
        };

        model.validate_params()?;

        Ok(model)
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates.
    ///
    /// `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: The Z-coordinate is too
    ///   close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: The projection falls
    ///   outside the camera's resolution.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let u: f64 = self.intrinsics.fx * point_3d.x / point_3d.z + self.intrinsics.cx;
        let v: f64 = self.intrinsics.fy * point_3d.y / point_3d.z + self.intrinsics.cy;

        if u < 0.0
            || u >= self.resolution.width as f64
            || v < 0.0
            || v >= self.resolution.height as f64
        {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(Vector2::new(u, v))
    }

    /// Unprojects a 2D image point to a unit 3D ray in camera coordinates.
    ///
    /// `mx = (u - cx) / fx`, `my = (v - cy) / fy`; the ray `(mx, my, 1.0)` is
    /// returned normalized. No distortion is applied; this is the inverse of
    /// the linear pinhole equations only.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: The input pixel is
    ///   outside the camera's resolution.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if point_2d.x < 0.0
            || point_2d.x >= self.resolution.width as f64
            || point_2d.y < 0.0
            || point_2d.y >= self.resolution.height as f64
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let mx = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let ray = Vector3::new(mx, my, 1.0);

        Ok(ray.normalize())
    }

    /// Loads pinhole camera parameters from a YAML file.
    ///
    /// Expects a `cam0` node with `intrinsics` (fx, fy, cx, cy) and
    /// `resolution` (width, height).
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;

        if docs.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "Empty YAML document".to_string(),
            ));
        }

        let doc = &docs[0];

        let intrinsics_yaml = doc["cam0"]["intrinsics"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid intrinsics".to_string()))?;
        let resolution_yaml = doc["cam0"]["resolution"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))?;

        let intrinsics = Intrinsics {
            fx: intrinsics_yaml[0]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fx".to_string()))?,
            fy: intrinsics_yaml[1]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid fy".to_string()))?,
            cx: intrinsics_yaml[2]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cx".to_string()))?,
            cy: intrinsics_yaml[3]
                .as_f64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cy".to_string()))?,
        };

        let resolution = Resolution {
            width: resolution_yaml[0]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid width".to_string()))?
                as u32,
            height: resolution_yaml[1]
                .as_i64()
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid height".to_string()))?
                as u32,
        };

        let model = PinholeModel {
            intrinsics,
            resolution,
        };

        model.validate_params()?;

        Ok(model)
    }

    /// Saves the camera model's parameters to a YAML file.
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let cam0 = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String("pinhole".to_string()),
            ),
            (
                serde_yaml::Value::String("intrinsics".to_string()),
                serde_yaml::to_value(vec![
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ])
                .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
            ),
            (
                serde_yaml::Value::String("resolution".to_string()),
                serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])
                    .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
            ),
        ]);

        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::Value::Mapping(cam0),
        )]))
        .map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file =
            fs::File::create(path).map_err(|e| CameraModelError::IOError(e.to_string()))?;
        file.write_all(yaml_string.as_bytes())
            .map_err(|e| CameraModelError::IOError(e.to_string()))?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_resolution(&self.resolution)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    /// The pinhole model has no distortion coefficients.
    fn get_distortion(&self) -> Vec<f64> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model() -> PinholeModel {
        let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]);
        PinholeModel::new(
            &params,
            Resolution {
                width: 640,
                height: 480,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_pinhole_project_known_point() {
        let model = test_model();

        let point_2d = model.project(&Vector3::new(0.1, 0.2, 1.0)).unwrap();
        assert!((point_2d.x - 370.0).abs() < 1e-9);
        assert!((point_2d.y - 340.0).abs() < 1e-9);
    }

    #[test]
    fn test_pinhole_unproject_principal_point_is_optical_axis() {
        let model = test_model();

        let ray = model.unproject(&Vector2::new(320.0, 240.0)).unwrap();
        assert!((ray - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn test_pinhole_project_unproject_round_trip() {
        let model = test_model();

        let point_3d = Vector3::new(0.25, -0.1, 1.5);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();
        let ray = model.unproject(&point_2d).unwrap();

        assert!((ray - norm_3d).norm() < 1e-12);
    }

    #[test]
    fn test_pinhole_rejects_out_of_image_pixel() {
        let model = test_model();

        let result = model.unproject(&Vector2::new(640.0, 100.0));
        assert!(matches!(result, Err(CameraModelError::PointIsOutSideImage)));
    }
}
