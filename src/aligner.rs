use ndarray::{Array3, Axis, Slice};
use tracing::warn;

use crate::error::{RegistrationError, Result};
use crate::estimator::Shift3;
use crate::volume::shape3;

/// Recovered anchor adjustment made while remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorWarning {
    /// A tail trim left the anchor past the end of the axis; it was moved to
    /// the last valid index.
    ClampedToExtent {
        axis: usize,
        requested: usize,
        clamped: usize,
    },
    /// A head trim would have moved the anchor below zero.
    ClampedToOrigin { axis: usize, requested: i64 },
}

pub struct VolumeAligner;

impl VolumeAligner {
    /// Crop a volume pair so that a target displaced by `shift` relative to
    /// the reference lines up with it.
    ///
    /// On an axis with `shift > 0` the tail of the reference and the head of
    /// the target lose `shift` samples; `shift < 0` trims the head of the
    /// reference and the tail of the target. Cropping only moves the array
    /// views, no sample is copied.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::ShapeMismatch`] if the volumes differ in
    /// shape and [`RegistrationError::ShiftExceedsVolume`] if a shift would
    /// leave an axis empty.
    pub fn apply_shift<T>(
        mut reference: Array3<T>,
        mut target: Array3<T>,
        shift: Shift3,
    ) -> Result<(Array3<T>, Array3<T>)> {
        if reference.dim() != target.dim() {
            return Err(RegistrationError::ShapeMismatch {
                reference: reference.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }

        let dims = shape3(&reference);
        for (axis, &s) in shift.iter().enumerate() {
            if s.unsigned_abs() as usize >= dims[axis] {
                return Err(RegistrationError::ShiftExceedsVolume {
                    axis,
                    shift: s,
                    extent: dims[axis],
                });
            }
        }

        for (axis, &s) in shift.iter().enumerate() {
            let n = s.unsigned_abs() as isize;
            let (head, tail) = (Slice::from(n..), Slice::from(..-n));
            match s.signum() {
                1 => {
                    reference.slice_axis_inplace(Axis(axis), tail);
                    target.slice_axis_inplace(Axis(axis), head);
                }
                -1 => {
                    reference.slice_axis_inplace(Axis(axis), head);
                    target.slice_axis_inplace(Axis(axis), tail);
                }
                _ => {}
            }
        }

        Ok((reference, target))
    }

    /// Move the anchor into the frame of the cropped reference.
    ///
    /// Head trims (`shift < 0`) translate the anchor; tail trims leave it in
    /// place unless it now lies past the end of the axis, in which case it is
    /// clamped and a warning is returned.
    pub fn remap_anchor(
        anchor: [usize; 3],
        shift: Shift3,
        new_dims: [usize; 3],
    ) -> ([usize; 3], Vec<AnchorWarning>) {
        let mut remapped = anchor;
        let mut warnings = Vec::new();

        for axis in 0..3 {
            let s = shift[axis];
            if s < 0 {
                let requested = anchor[axis] as i64 + s;
                if requested < 0 {
                    warn!(axis, requested, "anchor moved before the volume origin, clamping to 0");
                    warnings.push(AnchorWarning::ClampedToOrigin { axis, requested });
                    remapped[axis] = 0;
                } else {
                    remapped[axis] = requested as usize;
                }
            } else if s > 0 && anchor[axis] >= new_dims[axis] {
                let clamped = new_dims[axis].saturating_sub(1);
                warn!(
                    axis,
                    requested = anchor[axis],
                    clamped,
                    "anchor past the cropped volume, clamping to the last index"
                );
                warnings.push(AnchorWarning::ClampedToExtent {
                    axis,
                    requested: anchor[axis],
                    clamped,
                });
                remapped[axis] = clamped;
            }
        }

        (remapped, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(dims: (usize, usize, usize)) -> Array3<u32> {
        Array3::from_shape_fn(dims, |(i, j, k)| (i * 10_000 + j * 100 + k) as u32)
    }

    #[test]
    fn zero_shift_is_identity() {
        let reference = indexed((6, 7, 8));
        let target = indexed((6, 7, 8)).mapv(|v| v + 1);
        let (a, b) =
            VolumeAligner::apply_shift(reference.clone(), target.clone(), [0, 0, 0]).unwrap();
        assert_eq!(a, reference);
        assert_eq!(b, target);
    }

    #[test]
    fn nonzero_shift_shrinks_each_axis_by_its_magnitude() {
        let (a, b) =
            VolumeAligner::apply_shift(indexed((10, 12, 14)), indexed((10, 12, 14)), [3, -2, 0])
                .unwrap();
        assert_eq!(a.dim(), (7, 10, 14));
        assert_eq!(b.dim(), (7, 10, 14));

        // reference keeps its head on axis 0 and loses it on axis 1,
        // the target the other way round
        assert_eq!(a[[0, 0, 0]], 200);
        assert_eq!(b[[0, 0, 0]], 30_000);
        assert_eq!(a[[6, 9, 13]], 60_000 + 1_100 + 13);
        assert_eq!(b[[6, 9, 13]], 90_000 + 900 + 13);
    }

    #[test]
    fn shifted_content_lines_up() {
        let shift = [2i64, -1, 3];
        let reference = indexed((9, 9, 9));
        // target[p] = reference[p - shift]
        let target = Array3::from_shape_fn((9, 9, 9), |(i, j, k)| {
            let src = [i as i64 - shift[0], j as i64 - shift[1], k as i64 - shift[2]];
            if src.iter().all(|&v| (0..9).contains(&v)) {
                reference[[src[0] as usize, src[1] as usize, src[2] as usize]]
            } else {
                u32::MAX
            }
        });

        let (a, b) = VolumeAligner::apply_shift(reference, target, shift).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shift_reaching_extent_fails() {
        let err = VolumeAligner::apply_shift(indexed((4, 5, 6)), indexed((4, 5, 6)), [0, -5, 0])
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::ShiftExceedsVolume {
                axis: 1,
                shift: -5,
                extent: 5
            }
        ));
    }

    #[test]
    fn negative_shift_translates_anchor() {
        let (anchor, warnings) = VolumeAligner::remap_anchor([10, 10, 10], [-3, 0, 2], [47, 50, 48]);
        assert_eq!(anchor, [7, 10, 10]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn tail_trim_clamps_anchor_with_warning() {
        let (anchor, warnings) = VolumeAligner::remap_anchor([5, 9, 2], [0, 2, 0], [10, 8, 10]);
        assert_eq!(anchor, [5, 7, 2]);
        assert_eq!(
            warnings,
            vec![AnchorWarning::ClampedToExtent {
                axis: 1,
                requested: 9,
                clamped: 7
            }]
        );
    }

    #[test]
    fn head_trim_past_origin_clamps_with_warning() {
        let (anchor, warnings) = VolumeAligner::remap_anchor([1, 4, 4], [-3, 0, 0], [7, 10, 10]);
        assert_eq!(anchor, [0, 4, 4]);
        assert_eq!(
            warnings,
            vec![AnchorWarning::ClampedToOrigin {
                axis: 0,
                requested: -2
            }]
        );
    }
}
