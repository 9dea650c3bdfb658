//! Builds the per-destination-pixel undistortion lookup table.
//!
//! Every destination pixel of the virtual pinhole image is back-projected to
//! a ray and forward-projected through the real lens model once, here, at
//! configuration time. Per frame the remap engine only reads the table; the
//! distortion polynomial is never evaluated on the capture path.

use crate::camera::{CameraModel, PinholeModel, RadTanModel};
use crate::undistort::{Interpolation, LutEntry, UndistortionTable};
use nalgebra::Vector2;

/// Tolerance for source coordinates landing a rounding error outside the
/// exact image bounds.
const BOUNDS_EPS: f64 = 1e-6;

impl UndistortionTable {
    /// Builds the table mapping `pinhole` destination pixels into the raw
    /// image described by `calibration`.
    ///
    /// Destination pixels whose ray projects outside the source image (or
    /// fails to project at all) get [`LutEntry::Invalid`]. In the bilinear
    /// modes, neighbors that fall off the image edge are clamped to the
    /// border pixel instead.
    ///
    /// Cost is one projection per destination pixel, O(width x height),
    /// incurred once per calibration or resolution change.
    pub fn build(
        calibration: &RadTanModel,
        pinhole: &PinholeModel,
        interpolation: Interpolation,
    ) -> UndistortionTable {
        let src = calibration.get_resolution();
        let dst = pinhole.get_resolution();

        let mut entries = Vec::with_capacity(dst.width as usize * dst.height as usize);
        for v in 0..dst.height {
            for u in 0..dst.width {
                entries.push(build_entry(
                    calibration,
                    pinhole,
                    u,
                    v,
                    interpolation,
                    src.width,
                    src.height,
                ));
            }
        }

        UndistortionTable {
            entries,
            width: dst.width,
            height: dst.height,
            src_width: src.width,
            src_height: src.height,
            interpolation,
        }
    }
}

fn build_entry(
    calibration: &RadTanModel,
    pinhole: &PinholeModel,
    u: u32,
    v: u32,
    interpolation: Interpolation,
    src_width: u32,
    src_height: u32,
) -> LutEntry {
    let pixel = Vector2::new(u as f64, v as f64);
    let ray = match pinhole.unproject(&pixel) {
        Ok(ray) => ray,
        Err(_) => return LutEntry::Invalid,
    };
    let source = match calibration.project(&ray) {
        Ok(source) => source,
        Err(_) => return LutEntry::Invalid,
    };

    let max_x = (src_width - 1) as f64;
    let max_y = (src_height - 1) as f64;
    if source.x < -BOUNDS_EPS
        || source.x > max_x + BOUNDS_EPS
        || source.y < -BOUNDS_EPS
        || source.y > max_y + BOUNDS_EPS
    {
        return LutEntry::Invalid;
    }

    let sx = source.x.clamp(0.0, max_x);
    let sy = source.y.clamp(0.0, max_y);

    match interpolation {
        Interpolation::NearestNeighbor => {
            let x = sx.round() as u32;
            let y = sy.round() as u32;
            LutEntry::Nearest {
                index: y * src_width + x,
            }
        }
        Interpolation::Bilinear | Interpolation::BilinearDepth => {
            let x0f = sx.floor();
            let y0f = sy.floor();
            let ax = (sx - x0f) as f32;
            let ay = (sy - y0f) as f32;

            let x0 = x0f as u32;
            let y0 = y0f as u32;
            // Edge pixels repeat their border neighbor rather than punching
            // an invalid hole into the output
            let x1 = (x0 + 1).min(src_width - 1);
            let y1 = (y0 + 1).min(src_height - 1);

            LutEntry::Bilinear {
                indices: [
                    y0 * src_width + x0,
                    y0 * src_width + x1,
                    y1 * src_width + x0,
                    y1 * src_width + x1,
                ],
                weights: [
                    (1.0 - ax) * (1.0 - ay),
                    ax * (1.0 - ay),
                    (1.0 - ax) * ay,
                    ax * ay,
                ],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Resolution;
    use crate::undistort::{compute_xy_range, create_pinhole_from_xy_range};
    use nalgebra::DVector;

    fn identity_pair() -> (RadTanModel, PinholeModel) {
        let resolution = Resolution {
            width: 100,
            height: 100,
        };
        let params = DVector::from_vec(vec![
            100.0, 100.0, 50.0, 50.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        let calibration = RadTanModel::new(&params, resolution).unwrap();
        let pinhole_params = DVector::from_vec(vec![100.0, 100.0, 50.0, 50.0]);
        let pinhole = PinholeModel::new(&pinhole_params, resolution).unwrap();
        (calibration, pinhole)
    }

    fn distorted_model() -> RadTanModel {
        let params = DVector::from_vec(vec![
            50.0, 50.0, 31.5, 23.5, -0.1, 0.01, 1.0e-4, -2.0e-4, 0.0, 0.0, 0.0, 0.0,
        ]);
        RadTanModel::new(
            &params,
            Resolution {
                width: 64,
                height: 48,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_identity_nearest_table_maps_each_pixel_to_itself() {
        let (calibration, pinhole) = identity_pair();
        let table =
            UndistortionTable::build(&calibration, &pinhole, Interpolation::NearestNeighbor);

        assert_eq!(table.width(), 100);
        assert_eq!(table.height(), 100);
        for (i, entry) in table.entries().iter().enumerate() {
            match entry {
                LutEntry::Nearest { index } => assert_eq!(*index as usize, i),
                other => panic!("entry {i} is {other:?}, expected Nearest"),
            }
        }
    }

    #[test]
    fn test_bilinear_weights_are_nonnegative_and_normalized() {
        let calibration = distorted_model();
        let range = compute_xy_range(&calibration).unwrap();
        let pinhole = create_pinhole_from_xy_range(&range, 64, 48).unwrap();
        let table = UndistortionTable::build(&calibration, &pinhole, Interpolation::Bilinear);

        let mut valid = 0usize;
        for entry in table.entries() {
            if let LutEntry::Bilinear { indices, weights } = entry {
                let sum: f32 = weights.iter().sum();
                assert!(weights.iter().all(|&w| w >= 0.0));
                assert!((sum - 1.0).abs() < 1e-5, "weights sum to {sum}");
                assert!(indices.iter().all(|&i| i < 64 * 48));
                valid += 1;
            }
        }
        // The bulk of the output image must have a source correspondence
        assert!(valid > 64 * 48 / 2, "only {valid} valid entries");
    }

    #[test]
    fn test_table_build_is_idempotent() {
        let calibration = distorted_model();
        let range = compute_xy_range(&calibration).unwrap();
        let pinhole = create_pinhole_from_xy_range(&range, 64, 48).unwrap();

        let first = UndistortionTable::build(&calibration, &pinhole, Interpolation::BilinearDepth);
        let second = UndistortionTable::build(&calibration, &pinhole, Interpolation::BilinearDepth);

        assert_eq!(first, second);
    }

    #[test]
    fn test_central_region_is_fully_valid_under_distortion() {
        let calibration = distorted_model();
        let range = compute_xy_range(&calibration).unwrap();
        let pinhole = create_pinhole_from_xy_range(&range, 64, 48).unwrap();
        let table = UndistortionTable::build(&calibration, &pinhole, Interpolation::Bilinear);

        // Invalid entries are confined to the border region the distortion
        // cannot reach; the central field of view is always covered
        for v in 12..36u32 {
            for u in 16..48u32 {
                assert!(
                    !matches!(table.entry(u, v), LutEntry::Invalid),
                    "central pixel ({u}, {v}) has no source correspondence"
                );
            }
        }
    }

    #[test]
    fn test_nearest_rounds_to_closest_source_pixel() {
        // A pinhole shifted a quarter pixel against an identity calibration
        // exercises the rounding decision
        let (calibration, _) = identity_pair();
        let pinhole_params = DVector::from_vec(vec![100.0, 100.0, 50.25, 50.0]);
        let pinhole = PinholeModel::new(
            &pinhole_params,
            Resolution {
                width: 100,
                height: 100,
            },
        )
        .unwrap();

        let table =
            UndistortionTable::build(&calibration, &pinhole, Interpolation::NearestNeighbor);

        // Destination (10, 10): mx = (10 - 50.25) / 100, source x = 9.75,
        // rounds to 10
        match table.entry(10, 10) {
            LutEntry::Nearest { index } => assert_eq!(*index, 10 * 100 + 10),
            other => panic!("expected Nearest, got {other:?}"),
        }
    }
}
