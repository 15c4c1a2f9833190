use crate::error::{RegistrationError, Result};
use crate::observer::{NoopObserver, RegistrationObserver};
use crate::registration::{RegistrationConfig, RegistrationOutcome, register_volumes};
use crate::volume::{UserVolume, Volume};

/// Sub-volume set up for registering around a point of interest.
///
/// The volumes are cropped to twice the box size around the point, the anchor
/// is the point itself and the correlation window covers the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistrationBox {
    /// Crop of the full volume, `[low, high)` per axis.
    pub extent: [[usize; 2]; 3],
    /// Point of interest in the cropped frame.
    pub anchor: [usize; 3],
    /// Correlation window in the cropped frame.
    pub user_volume: UserVolume,
}

impl RegistrationBox {
    /// # Errors
    ///
    /// Fails if `box_size` is smaller than 2 or `point` lies outside `dims`.
    pub fn around(point: [usize; 3], box_size: usize, dims: [usize; 3]) -> Result<Self> {
        if box_size < 2 {
            return Err(RegistrationError::InvalidBox(format!(
                "box size must be at least 2, got {box_size}"
            )));
        }
        if let Some(axis) = (0..3).find(|&axis| point[axis] >= dims[axis]) {
            return Err(RegistrationError::InvalidBox(format!(
                "point {point:?} is outside the volume {dims:?} on axis {axis}"
            )));
        }

        let half = box_size / 2;
        let mut extent = [[0; 2]; 3];
        let mut anchor = [0; 3];
        let mut window = [[0; 2]; 3];
        for axis in 0..3 {
            let p = point[axis];
            let low = p.saturating_sub(box_size);
            extent[axis] = [low, (p + box_size).min(dims[axis])];
            anchor[axis] = p - low;
            window[axis] = [
                p.saturating_sub(half) - low,
                (p + half).min(dims[axis]) - low,
            ];
        }

        Ok(Self {
            extent,
            anchor,
            user_volume: UserVolume::new(window)?,
        })
    }

    /// Shape of the cropped volumes.
    pub fn dims(&self) -> [usize; 3] {
        self.extent.map(|[low, high]| high - low)
    }

    /// Crop both volumes to the box and register them.
    ///
    /// The accumulated shift of the outcome does not depend on the crop; the
    /// anchor and volumes are in the cropped frame.
    pub fn register<O: RegistrationObserver>(
        &self,
        reference: &Volume,
        target: &Volume,
        config: RegistrationConfig,
        observer: O,
    ) -> Result<RegistrationOutcome<Volume>> {
        if reference.shape() != target.shape() {
            return Err(RegistrationError::ShapeMismatch {
                reference: reference.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }
        register_volumes(
            reference.crop(self.extent),
            target.crop(self.extent),
            self.anchor,
            self.user_volume,
            config,
            observer,
        )
    }
}

/// Register two full volumes around `point` with a correlation window of
/// `box_size` samples per side.
pub fn register_around_point(
    reference: &Volume,
    target: &Volume,
    point: [usize; 3],
    box_size: usize,
    config: RegistrationConfig,
) -> Result<RegistrationOutcome<Volume>> {
    RegistrationBox::around(point, box_size, reference.shape())?.register(
        reference,
        target,
        config,
        NoopObserver,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn box_inside_volume() {
        let rbox = RegistrationBox::around([50, 60, 70], 20, [128, 128, 128]).unwrap();
        assert_eq!(rbox.extent, [[30, 70], [40, 80], [50, 90]]);
        assert_eq!(rbox.anchor, [20, 20, 20]);
        assert_eq!(rbox.user_volume.bounds(), [[10, 30], [10, 30], [10, 30]]);
        assert_eq!(rbox.dims(), [40, 40, 40]);
    }

    #[test]
    fn box_is_clipped_at_volume_borders() {
        let rbox = RegistrationBox::around([5, 95, 50], 20, [100, 100, 100]).unwrap();
        assert_eq!(rbox.extent, [[0, 25], [75, 100], [30, 70]]);
        assert_eq!(rbox.anchor, [5, 20, 20]);
        assert_eq!(rbox.user_volume.bounds(), [[0, 15], [10, 25], [10, 30]]);
        assert!(rbox.user_volume.contains(rbox.anchor));
    }

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(matches!(
            RegistrationBox::around([5, 5, 5], 1, [10, 10, 10]),
            Err(RegistrationError::InvalidBox(_))
        ));
        assert!(matches!(
            RegistrationBox::around([5, 10, 5], 4, [10, 10, 10]),
            Err(RegistrationError::InvalidBox(_))
        ));
    }

    #[test]
    fn registers_around_point_in_full_volume() {
        let dims = (64, 64, 64);
        let cube = |offset: [i64; 3]| {
            Array3::from_shape_fn(dims, |(i, j, k)| {
                let p = [i as i64, j as i64, k as i64];
                let inside = (0..3).all(|a| (p[a] - 40 - offset[a]).abs() <= 4);
                if inside { 180u8 } else { 20 }
            })
        };
        let reference = Volume::from(cube([0, 0, 0]));
        let target = Volume::from(cube([2, -3, 1]));

        let outcome =
            register_around_point(&reference, &target, [40, 40, 40], 16, RegistrationConfig::default())
                .unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.accumulated_shift, [2, -3, 1]);
        assert_eq!(outcome.reference.shape(), [30, 29, 31]);
    }
}
