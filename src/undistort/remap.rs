//! Applies a built [`UndistortionTable`] to raw frames.
//!
//! Remapping is a pure per-pixel table lookup. The depth path carries one
//! extra rule: under [`Interpolation::BilinearDepth`], a destination sample
//! whose 2x2 source neighborhood contains the "no valid return" sentinel is
//! forced to the sentinel instead of being blended. Averaging a real range
//! measurement with a missing one would fabricate a near-zero depth that
//! poisons downstream fusion.

use crate::frame::{ColorFrame, DepthFrame, NO_DEPTH};
use crate::undistort::{Interpolation, LutEntry, UndistortError, UndistortionTable};

fn check_source_size(
    width: u32,
    height: u32,
    table: &UndistortionTable,
) -> Result<(), UndistortError> {
    if width != table.src_width || height != table.src_height {
        return Err(UndistortError::SourceSizeMismatch {
            expected_width: table.src_width,
            expected_height: table.src_height,
            actual_width: width,
            actual_height: height,
        });
    }
    Ok(())
}

/// Remaps a raw depth frame into the undistorted pinhole view.
///
/// Invalid table entries produce [`NO_DEPTH`]. Nearest entries copy their
/// source sample verbatim. Bilinear entries blend the 2x2 neighborhood; when
/// the table was built for [`Interpolation::BilinearDepth`], any neighbor
/// equal to [`NO_DEPTH`] invalidates the whole output sample.
pub fn remap_depth(
    source: &DepthFrame,
    table: &UndistortionTable,
) -> Result<DepthFrame, UndistortError> {
    check_source_size(source.width(), source.height(), table)?;

    let mut output = DepthFrame::new(table.width, table.height);
    let src = source.data();
    let dst = output.data_mut();

    for (out, entry) in dst.iter_mut().zip(table.entries.iter()) {
        *out = match entry {
            LutEntry::Invalid => NO_DEPTH,
            LutEntry::Nearest { index } => src[*index as usize],
            LutEntry::Bilinear { indices, weights } => {
                let samples = [
                    src[indices[0] as usize],
                    src[indices[1] as usize],
                    src[indices[2] as usize],
                    src[indices[3] as usize],
                ];
                if table.interpolation == Interpolation::BilinearDepth
                    && samples.contains(&NO_DEPTH)
                {
                    NO_DEPTH
                } else {
                    let blended: f32 = samples
                        .iter()
                        .zip(weights.iter())
                        .map(|(&sample, &weight)| sample as f32 * weight)
                        .sum();
                    blended.round() as u16
                }
            }
        };
    }

    Ok(output)
}

/// Remaps a raw BGRA color frame into the undistorted pinhole view.
///
/// Color has no sentinel semantics, so [`Interpolation::BilinearDepth`]
/// tables blend exactly like plain bilinear ones. Invalid entries produce
/// transparent black.
pub fn remap_color(
    source: &ColorFrame,
    table: &UndistortionTable,
) -> Result<ColorFrame, UndistortError> {
    check_source_size(source.width(), source.height(), table)?;

    let mut output = ColorFrame::new(table.width, table.height);
    let src = source.data();

    for (i, entry) in table.entries.iter().enumerate() {
        let out_offset = i * 4;
        match entry {
            LutEntry::Invalid => {}
            LutEntry::Nearest { index } => {
                let src_offset = *index as usize * 4;
                output.data_mut()[out_offset..out_offset + 4]
                    .copy_from_slice(&src[src_offset..src_offset + 4]);
            }
            LutEntry::Bilinear { indices, weights } => {
                for channel in 0..4 {
                    let blended: f32 = indices
                        .iter()
                        .zip(weights.iter())
                        .map(|(&index, &weight)| {
                            src[index as usize * 4 + channel] as f32 * weight
                        })
                        .sum();
                    output.data_mut()[out_offset + channel] = blended.round() as u8;
                }
            }
        }
    }

    Ok(output)
}
