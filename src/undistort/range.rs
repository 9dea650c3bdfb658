//! Derives the virtual pinhole camera for a calibrated lens.
//!
//! The raw image is swept pixel by pixel through the iterative inverse of
//! the distortion model; the bounding box of the resulting ray directions on
//! the unit projection plane defines the region the undistorted output image
//! spans. Both functions are pure: identical calibration and resolution
//! always produce bit-identical results.

use crate::camera::{CameraModel, Intrinsics, PinholeModel, RadTanModel, Resolution};
use crate::undistort::UndistortError;
use nalgebra::Vector2;

/// Bounding box on the unit projection plane (z = 1) reachable from the raw
/// image.
///
/// Conservative in the sense of the dense pixel sweep: every recorded corner
/// was produced by an actual raw pixel. Near strongly distorted borders the
/// box may still cover directions no raw pixel maps to; the table builder
/// marks those destination pixels invalid rather than extrapolating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyRange {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// Computes the x/z, y/z range covered by valid unprojections of every raw
/// pixel.
///
/// Pixels where the iterative unprojection fails to converge are skipped;
/// the sweep only fails entirely ([`UndistortError::EmptyRange`]) when no
/// pixel at all unprojects, which indicates an unusable calibration.
pub fn compute_xy_range(calibration: &RadTanModel) -> Result<XyRange, UndistortError> {
    let resolution = calibration.get_resolution();

    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for y in 0..resolution.height {
        for x in 0..resolution.width {
            let pixel = Vector2::new(x as f64, y as f64);
            let ray = match calibration.unproject(&pixel) {
                Ok(ray) => ray,
                Err(_) => continue,
            };
            if ray.z <= 0.0 {
                continue;
            }

            let px = ray.x / ray.z;
            let py = ray.y / ray.z;

            x_min = x_min.min(px);
            x_max = x_max.max(px);
            y_min = y_min.min(py);
            y_max = y_max.max(py);
        }
    }

    if !(x_max > x_min && y_max > y_min) {
        return Err(UndistortError::EmptyRange);
    }

    Ok(XyRange {
        x_min,
        x_max,
        y_min,
        y_max,
    })
}

/// Derives the virtual pinhole camera whose image exactly spans `range` at
/// the requested output resolution.
///
/// `fx = width / (x_max - x_min)`, `fy = height / (y_max - y_min)`,
/// `cx = -x_min * fx`, `cy = -y_min * fy`.
pub fn create_pinhole_from_xy_range(
    range: &XyRange,
    width: u32,
    height: u32,
) -> Result<PinholeModel, UndistortError> {
    if width == 0
        || height == 0
        || !(range.x_max > range.x_min && range.y_max > range.y_min)
        || !(range.x_min.is_finite() && range.y_min.is_finite())
    {
        return Err(UndistortError::EmptyRange);
    }

    let fx = width as f64 / (range.x_max - range.x_min);
    let fy = height as f64 / (range.y_max - range.y_min);
    let cx = -range.x_min * fx;
    let cy = -range.y_min * fy;

    Ok(PinholeModel {
        intrinsics: Intrinsics { fx, fy, cx, cy },
        resolution: Resolution { width, height },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn identity_model(width: u32, height: u32, fx: f64, cx: f64, cy: f64) -> RadTanModel {
        let params = DVector::from_vec(vec![
            fx, fx, cx, cy, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        RadTanModel::new(&params, Resolution { width, height }).unwrap()
    }

    fn barrel_model(width: u32, height: u32) -> RadTanModel {
        let params = DVector::from_vec(vec![
            50.0,
            50.0,
            width as f64 / 2.0 - 0.5,
            height as f64 / 2.0 - 0.5,
            -0.1,
            0.01,
            1.0e-4,
            -2.0e-4,
            0.0,
            0.0,
            0.0,
            0.0,
        ]);
        RadTanModel::new(&params, Resolution { width, height }).unwrap()
    }

    #[test]
    fn test_xy_range_of_undistorted_camera_matches_image_edges() {
        let model = identity_model(64, 48, 50.0, 31.5, 23.5);
        let range = compute_xy_range(&model).unwrap();

        // Without distortion the range is the normalized pixel grid itself
        assert_relative_eq!(range.x_min, (0.0 - 31.5) / 50.0, epsilon = 1e-9);
        assert_relative_eq!(range.x_max, (63.0 - 31.5) / 50.0, epsilon = 1e-9);
        assert_relative_eq!(range.y_min, (0.0 - 23.5) / 50.0, epsilon = 1e-9);
        assert_relative_eq!(range.y_max, (47.0 - 23.5) / 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_create_pinhole_spans_range_exactly() {
        let range = XyRange {
            x_min: -0.5,
            x_max: 0.3,
            y_min: -0.2,
            y_max: 0.6,
        };
        let pinhole = create_pinhole_from_xy_range(&range, 320, 240).unwrap();

        assert_relative_eq!(pinhole.intrinsics.fx, 320.0 / 0.8, epsilon = 1e-12);
        assert_relative_eq!(pinhole.intrinsics.fy, 240.0 / 0.8, epsilon = 1e-12);
        assert_relative_eq!(pinhole.intrinsics.cx, 0.5 * 320.0 / 0.8, epsilon = 1e-12);
        assert_relative_eq!(pinhole.intrinsics.cy, 0.2 * 240.0 / 0.8, epsilon = 1e-12);
        assert_eq!(pinhole.resolution.width, 320);
        assert_eq!(pinhole.resolution.height, 240);
    }

    #[test]
    fn test_range_estimation_is_deterministic() {
        let model = barrel_model(64, 48);

        let first = compute_xy_range(&model).unwrap();
        let second = compute_xy_range(&model).unwrap();

        // Bit-identical, not merely close
        assert_eq!(first, second);

        let pinhole_a = create_pinhole_from_xy_range(&first, 64, 48).unwrap();
        let pinhole_b = create_pinhole_from_xy_range(&second, 64, 48).unwrap();
        assert_eq!(pinhole_a, pinhole_b);
    }

    #[test]
    fn test_round_trip_containment_without_distortion() {
        let model = identity_model(64, 48, 50.0, 31.5, 23.5);
        let range = compute_xy_range(&model).unwrap();
        let pinhole = create_pinhole_from_xy_range(&range, 64, 48).unwrap();

        for v in 0..48u32 {
            for u in 0..64u32 {
                let ray = pinhole.unproject(&Vector2::new(u as f64, v as f64)).unwrap();
                let source = model.project(&ray).unwrap();
                // Tolerance covers rounding at the exact image border
                assert!(
                    source.x >= -1e-6 && source.x <= 63.0 + 1e-6,
                    "pixel ({u}, {v}) reprojects to x = {}",
                    source.x
                );
                assert!(
                    source.y >= -1e-6 && source.y <= 47.0 + 1e-6,
                    "pixel ({u}, {v}) reprojects to y = {}",
                    source.y
                );
            }
        }
    }

    #[test]
    fn test_degenerate_range_is_rejected() {
        let range = XyRange {
            x_min: 0.1,
            x_max: 0.1,
            y_min: -0.2,
            y_max: 0.6,
        };
        assert!(matches!(
            create_pinhole_from_xy_range(&range, 320, 240),
            Err(UndistortError::EmptyRange)
        ));
    }

    #[test]
    fn test_barrel_distortion_widens_the_range() {
        let distorted = barrel_model(64, 48);
        let range = compute_xy_range(&distorted).unwrap();

        // Barrel distortion compresses the raw image, so undistorting the
        // pixel grid must reach further out than the linear model does
        let linear_x_max = (63.0 - 31.5) / 50.0;
        assert!(range.x_max > linear_x_max);
        assert!(range.x_min < -linear_x_max);
    }
}
