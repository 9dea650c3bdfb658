//! Implements the extended Radial-Tangential (RadTan) lens model.
//!
//! This module provides the [`RadTanModel`] struct for representing the
//! rational radial/tangential distortion model delivered by depth-camera
//! factory calibration. It adheres to the [`CameraModel`] trait defined in
//! the parent `camera` module ([`crate::camera`]). The forward direction
//! (`project`) is the primitive the undistortion table builder evaluates for
//! every destination pixel; the iterative inverse (`unproject`) is the
//! "undistort to ray" primitive the pinhole range estimator samples across
//! the raw image.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Matrix2, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io::Write};
use yaml_rust::YamlLoader;

/// Represents an extended Radial-Tangential (RadTan) camera model.
///
/// This struct holds the intrinsic parameters (focal length, principal
/// point), image resolution, and the 8 distortion coefficients of the
/// rational radial/tangential model:
/// *   `k1`..`k6`: Radial distortion coefficients (numerator `k1,k2,k3`,
///     denominator `k4,k5,k6`).
/// *   `p1`, `p2`: Tangential distortion coefficients.
///
/// The coefficient ordering `[k1, k2, p1, p2, k3, k4, k5, k6]` follows the
/// factory calibration layout of the range cameras this crate targets.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use depthcam_tools::camera::rad_tan::RadTanModel;
/// use depthcam_tools::camera::Resolution;
///
/// // fx, fy, cx, cy followed by k1, k2, p1, p2, k3, k4, k5, k6
/// let params = DVector::from_vec(vec![
///     504.0, 504.1, 321.0, 330.0,
///     0.1, -0.05, 0.0001, 0.0002, 0.01, 0.08, -0.03, 0.005,
/// ]);
/// let model = RadTanModel::new(&params, Resolution { width: 640, height: 576 }).unwrap();
///
/// assert_eq!(model.intrinsics.fx, 504.0);
/// assert_eq!(model.distortions[0], 0.1); // k1
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// The 8 distortion coefficients: `[k1, k2, p1, p2, k3, k4, k5, k6]`.
    pub distortions: [f64; 8],
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`] from a parameter vector and resolution.
    ///
    /// # Arguments
    ///
    /// * `parameters` - A `&DVector<f64>` containing, in order: `fx`, `fy`,
    ///   `cx`, `cy`, `k1`, `k2`, `p1`, `p2`, `k3`, `k4`, `k5`, `k6`.
    /// * `resolution` - The raw image resolution the calibration refers to.
    ///
    /// # Errors
    ///
    /// Returns a [`CameraModelError`] if the intrinsics or resolution are
    /// invalid, specifically:
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidParams`]
    pub fn new(
        parameters: &DVector<f64>,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        if parameters.len() != 12 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 12 parameters, got {}",
                parameters.len()
            )));
        }

        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution,
            distortions: [
                parameters[4],  // k1
                parameters[5],  // k2
                parameters[6],  // p1
                parameters[7],  // p2
                parameters[8],  // k3
                parameters[9],  // k4
                parameters[10], // k5
                parameters[11], // k6
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Evaluates the distortion polynomial on normalized image coordinates.
    ///
    /// Returns the distorted normalized point for an undistorted normalized
    /// point `(x, y)`.
    fn distort(&self, x: f64, y: f64) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.distortions;

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let a = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
        let b = 1.0 + k4 * r2 + k5 * r4 + k6 * r6;
        let radial = a / b;

        let x_distorted = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_distorted = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        Vector2::new(x_distorted, y_distorted)
    }
}

/// Provides a debug string representation for [`RadTanModel`].
impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates,
    /// applying the rational radial and tangential distortion.
    ///
    /// Unlike an ideal pinhole projection, the distortion polynomial is only
    /// trustworthy near the calibrated field of view. Rays whose projection
    /// lands far outside the image (beyond one full image size on either
    /// side) are rejected as unstable extrapolation; projections that fall
    /// moderately outside the image bounds are returned as-is so the lookup
    /// table builder can make its own in-bounds decision.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: The Z-coordinate is too
    ///   close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: The projection left
    ///   the guard band around the image.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        // Normalized image coordinates
        let x_prime = point_3d.x / point_3d.z;
        let y_prime = point_3d.y / point_3d.z;

        let distorted = self.distort(x_prime, y_prime);

        let u = self.intrinsics.fx * distorted.x + self.intrinsics.cx;
        let v = self.intrinsics.fy * distorted.y + self.intrinsics.cy;

        // Extrapolation guard band: one image size on either side
        let width = self.resolution.width as f64;
        let height = self.resolution.height as f64;
        if u < -width || u > 2.0 * width || v < -height || v > 2.0 * height {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(Vector2::new(u, v))
    }

    /// Unprojects a 2D image point (with distortion) to a unit 3D ray.
    ///
    /// Iteratively solves for the undistorted normalized coordinates that,
    /// when distorted, reproduce the input pixel. Uses Newton's method with
    /// the analytic Jacobian of the rational distortion model, starting from
    /// the distorted coordinates themselves.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: The input pixel is
    ///   outside the camera's resolution.
    /// * [`CameraModelError::NumericalError`]: The iteration hit a singular
    ///   Jacobian or failed to converge.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if point_2d.x < 0.0
            || point_2d.x >= self.resolution.width as f64
            || point_2d.y < 0.0
            || point_2d.y >= self.resolution.height as f64
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.distortions;

        // Normalized coordinates of the distorted input point; this is the
        // target the iteration must reproduce.
        let x_distorted = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let y_distorted = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;
        let target_distorted_point = Vector2::new(x_distorted, y_distorted);

        // Initial guess: the distorted point itself
        let mut point = target_distorted_point;

        const EPS: f64 = 1e-6;
        const MAX_ITERATIONS: u32 = 100;

        for iteration in 0..MAX_ITERATIONS {
            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;

            let a = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
            let b = 1.0 + k4 * r2 + k5 * r4 + k6 * r6;
            let radial = a / b;

            let estimated_distorted_point = self.distort(x, y);
            let error = estimated_distorted_point - target_distorted_point;

            if error.norm() < EPS {
                break;
            }

            // d(A/B)/d(r^2) by the quotient rule
            let da_dr2 = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
            let db_dr2 = k4 + 2.0 * k5 * r2 + 3.0 * k6 * r4;
            let d_radial_dr2 = (da_dr2 * b - a * db_dr2) / (b * b);

            let dr2_dx = 2.0 * x;
            let dr2_dy = 2.0 * y;
            let d_radial_dx = d_radial_dr2 * dr2_dx;
            let d_radial_dy = d_radial_dr2 * dr2_dy;

            // Jacobian of the distortion map at the current estimate
            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + p2 * (dr2_dx + 4.0 * x);
            let j01 = x * d_radial_dy + 2.0 * p1 * x + p2 * dr2_dy;
            let j10 = y * d_radial_dx + p1 * dr2_dx + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + p1 * (dr2_dy + 4.0 * y) + 2.0 * p2 * x;

            let jacobian = Matrix2::new(j00, j01, j10, j11);

            if let Some(inv_jacobian) = jacobian.try_inverse() {
                let delta = inv_jacobian * error;
                point -= delta;

                if delta.norm() < EPS {
                    break;
                }
            } else {
                return Err(CameraModelError::NumericalError(
                    "Jacobian is singular".to_string(),
                ));
            }

            if iteration == MAX_ITERATIONS - 1 {
                return Err(CameraModelError::NumericalError(format!(
                    "Unprojection did not converge after {} iterations.",
                    MAX_ITERATIONS
                )));
            }
        }

        let point3d = Vector3::new(point.x, point.y, 1.0);

        Ok(point3d.normalize())
    }

    /// Loads RadTan camera parameters from a YAML file.
    ///
    /// The file follows the Kalibr-style layout: a `cam0` node with
    /// `intrinsics` (fx, fy, cx, cy), `resolution` (width, height) and
    /// `distortion` (the 8 coefficients in factory ordering).
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
        let distortion_node = doc["cam0"]["distortion"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("Missing distortion parameters".to_string())
        })?;

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

        if distortion_node.len() != 8 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 8 distortion parameters in YAML, found {}",
                distortion_node.len()
            )));
        }

        let mut distortions = [0.0; 8];
        for (i, param) in distortion_node.iter().enumerate() {
            distortions[i] = param.as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams(format!(
                    "Invalid distortion parameter at index {}",
                    i
                ))
            })?;
        }

        let model = RadTanModel {
            intrinsics,
            resolution,
            distortions,
        };

        model.validate_params()?;

        Ok(model)
    }

    /// Saves the camera model's parameters to a YAML file.
    ///
    /// # Related
    /// * [`RadTanModel::load_from_yaml()`]
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let cam0 = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String("rad_tan".to_string()),
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
                serde_yaml::Value::String("distortion".to_string()),
                serde_yaml::to_value(self.distortions.to_vec())
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

    /// Returns the distortion coefficients in the order
    /// `[k1, k2, p1, p2, k3, k4, k5, k6]`.
    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model() -> RadTanModel {
        let params = DVector::from_vec(vec![
            504.2, 504.6, 320.5, 329.7, // fx, fy, cx, cy
            0.737, -2.77, 6.0e-5, -1.07e-4, 1.55, 0.618, -2.58, 1.48, // distortion
        ]);
        RadTanModel::new(
            &params,
            Resolution {
                width: 640,
                height: 576,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_radtan_new_rejects_bad_parameter_count() {
        let params = DVector::from_vec(vec![504.0, 504.0, 320.0, 240.0]);
        let result = RadTanModel::new(
            &params,
            Resolution {
                width: 640,
                height: 576,
            },
        );
        assert!(matches!(result, Err(CameraModelError::InvalidParams(_))));
    }

    #[test]
    fn test_radtan_project_unproject() {
        let model = test_model();

        // A point pointing somewhat forward and to the side
        let point_3d = Vector3::new(0.5, -0.3, 2.0);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();

        assert!(point_2d.x >= 0.0 && point_2d.x < model.resolution.width as f64);
        assert!(point_2d.y >= 0.0 && point_2d.y < model.resolution.height as f64);

        let point_3d_unprojected = model.unproject(&point_2d).unwrap();

        assert!((norm_3d.x - point_3d_unprojected.x).abs() < 1e-6);
        assert!((norm_3d.y - point_3d_unprojected.y).abs() < 1e-6);
        assert!((norm_3d.z - point_3d_unprojected.z).abs() < 1e-6);
    }

    #[test]
    fn test_radtan_zero_distortion_matches_pinhole_equations() {
        let params = DVector::from_vec(vec![
            100.0, 100.0, 50.0, 50.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        let model = RadTanModel::new(
            &params,
            Resolution {
                width: 100,
                height: 100,
            },
        )
        .unwrap();

        let point_3d = Vector3::new(0.2, -0.1, 1.0);
        let point_2d = model.project(&point_3d).unwrap();
        assert!((point_2d.x - 70.0).abs() < 1e-12);
        assert!((point_2d.y - 40.0).abs() < 1e-12);

        let ray = model.unproject(&point_2d).unwrap();
        let expected = point_3d.normalize();
        assert!((ray - expected).norm() < 1e-9);
    }

    #[test]
    fn test_radtan_project_rejects_point_behind_camera() {
        let model = test_model();
        let result = model.project(&Vector3::new(0.1, 0.1, -1.0));
        assert!(matches!(result, Err(CameraModelError::PointAtCameraCenter)));
    }

    #[test]
    fn test_radtan_project_rejects_extreme_extrapolation() {
        let params = DVector::from_vec(vec![
            100.0, 100.0, 50.0, 50.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        let model = RadTanModel::new(
            &params,
            Resolution {
                width: 100,
                height: 100,
            },
        )
        .unwrap();

        // Lands at u = 100 * 5 + 50 = 550, far outside the guard band
        let result = model.project(&Vector3::new(5.0, 0.0, 1.0));
        assert!(matches!(
            result,
            Err(CameraModelError::ProjectionOutSideImage)
        ));

        // Moderately outside the image is allowed through for the LUT builder
        let point_2d = model.project(&Vector3::new(0.7, 0.0, 1.0)).unwrap();
        assert!((point_2d.x - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_radtan_save_and_reload_yaml() {
        let model = test_model();
        let path = std::env::temp_dir().join("depthcam_rad_tan_saved.yaml");
        let path = path.to_str().unwrap();

        model.save_to_yaml(path).unwrap();
        let saved_model = RadTanModel::load_from_yaml(path).unwrap();

        assert_eq!(model.intrinsics.fx, saved_model.intrinsics.fx);
        assert_eq!(model.intrinsics.fy, saved_model.intrinsics.fy);
        assert_eq!(model.intrinsics.cx, saved_model.intrinsics.cx);
        assert_eq!(model.intrinsics.cy, saved_model.intrinsics.cy);
        assert_eq!(model.resolution, saved_model.resolution);
        for i in 0..8 {
            assert_eq!(model.distortions[i], saved_model.distortions[i]);
        }

        fs::remove_file(path).unwrap();
    }
}
