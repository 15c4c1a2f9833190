use crate::enums::{Orientation, SampleType};
use crate::error::{RegistrationError, Result};

use ndarray::Array2;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::Zip;
use ndarray::s;
use std::fmt::Debug;
use std::ops::{Range, Sub};

/// Signed intermediate type used once slices leave the volume.
pub trait Promoted: Copy + Default + Debug + Sub<Output = Self> + Into<f64> + 'static {}

impl Promoted for i16 {}
impl Promoted for i32 {}

/// A volume sample type together with its signed promotion.
///
/// The 8-bit family promotes to `i16` and the 16-bit family to `i32`, so the
/// difference of two samples never wraps.
pub trait Sample: Copy + Default + Debug + 'static {
    type Promoted: Promoted;
    const SAMPLE_TYPE: SampleType;

    fn promote(self) -> Self::Promoted;
}

impl Sample for i8 {
    type Promoted = i16;
    const SAMPLE_TYPE: SampleType = SampleType::Int8;

    #[inline]
    fn promote(self) -> i16 {
        i16::from(self)
    }
}

impl Sample for u8 {
    type Promoted = i16;
    const SAMPLE_TYPE: SampleType = SampleType::UInt8;

    #[inline]
    fn promote(self) -> i16 {
        i16::from(self)
    }
}

impl Sample for i16 {
    type Promoted = i32;
    const SAMPLE_TYPE: SampleType = SampleType::Int16;

    #[inline]
    fn promote(self) -> i32 {
        i32::from(self)
    }
}

impl Sample for u16 {
    type Promoted = i32;
    const SAMPLE_TYPE: SampleType = SampleType::UInt16;

    #[inline]
    fn promote(self) -> i32 {
        i32::from(self)
    }
}

/// Fixed box, one half-open `[low, high)` range per axis, bounding where
/// correlation slices are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserVolume {
    bounds: [[usize; 2]; 3],
}

impl UserVolume {
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidUserVolume`] if any range is empty.
    pub fn new(bounds: [[usize; 2]; 3]) -> Result<Self> {
        for (axis, [low, high]) in bounds.iter().enumerate() {
            if low >= high {
                return Err(RegistrationError::InvalidUserVolume(format!(
                    "axis {axis} range [{low}, {high}) is empty"
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// Box covering a whole volume of the given dimensions.
    pub fn full(dims: [usize; 3]) -> Result<Self> {
        Self::new([[0, dims[0]], [0, dims[1]], [0, dims[2]]])
    }

    pub fn bounds(&self) -> [[usize; 2]; 3] {
        self.bounds
    }

    pub fn range(&self, axis: usize) -> Range<usize> {
        self.bounds[axis][0]..self.bounds[axis][1]
    }

    pub fn contains(&self, point: [usize; 3]) -> bool {
        (0..3).all(|axis| self.range(axis).contains(&point[axis]))
    }

    /// Check that the box fits inside a volume of the given dimensions.
    pub fn check_within(&self, dims: [usize; 3]) -> Result<()> {
        for axis in 0..3 {
            if self.bounds[axis][1] > dims[axis] {
                return Err(RegistrationError::InvalidUserVolume(format!(
                    "axis {axis} range {:?} exceeds the volume extent {}",
                    self.range(axis),
                    dims[axis]
                )));
            }
        }
        Ok(())
    }
}

/// Dense 3D volume of integer samples.
#[derive(Debug, Clone, PartialEq)]
pub enum Volume {
    Int8(Array3<i8>),
    UInt8(Array3<u8>),
    Int16(Array3<i16>),
    UInt16(Array3<u16>),
}

impl From<Array3<i8>> for Volume {
    fn from(data: Array3<i8>) -> Self {
        Volume::Int8(data)
    }
}

impl From<Array3<u8>> for Volume {
    fn from(data: Array3<u8>) -> Self {
        Volume::UInt8(data)
    }
}

impl From<Array3<i16>> for Volume {
    fn from(data: Array3<i16>) -> Self {
        Volume::Int16(data)
    }
}

impl From<Array3<u16>> for Volume {
    fn from(data: Array3<u16>) -> Self {
        Volume::UInt16(data)
    }
}

impl Volume {
    pub fn sample_type(&self) -> SampleType {
        match self {
            Volume::Int8(_) => SampleType::Int8,
            Volume::UInt8(_) => SampleType::UInt8,
            Volume::Int16(_) => SampleType::Int16,
            Volume::UInt16(_) => SampleType::UInt16,
        }
    }

    /// Get the dimensions of the volume (axis 0, axis 1, axis 2)
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            Volume::Int8(data) => data.dim(),
            Volume::UInt8(data) => data.dim(),
            Volume::Int16(data) => data.dim(),
            Volume::UInt16(data) => data.dim(),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        let (d0, d1, d2) = self.dim();
        [d0, d1, d2]
    }

    /// Copy out the sub-volume covered by `extent`, one `[low, high)` range per
    /// axis. Ranges are clamped to the volume.
    pub fn crop(&self, extent: [[usize; 2]; 3]) -> Volume {
        match self {
            Volume::Int8(data) => Volume::Int8(crop_array(data, extent)),
            Volume::UInt8(data) => Volume::UInt8(crop_array(data, extent)),
            Volume::Int16(data) => Volume::Int16(crop_array(data, extent)),
            Volume::UInt16(data) => Volume::UInt16(crop_array(data, extent)),
        }
    }
}

pub(crate) fn shape3<T>(data: &Array3<T>) -> [usize; 3] {
    let (d0, d1, d2) = data.dim();
    [d0, d1, d2]
}

fn clamp_range(range: Range<usize>, extent: usize) -> Range<usize> {
    range.start.min(extent)..range.end.min(extent)
}

fn crop_array<T: Clone>(data: &Array3<T>, extent: [[usize; 2]; 3]) -> Array3<T> {
    let dims = shape3(data);
    let [r0, r1, r2] =
        [0, 1, 2].map(|axis| clamp_range(extent[axis][0]..extent[axis][1], dims[axis]));
    data.slice(s![r0, r1, r2]).to_owned()
}

fn slice_view<'a, T>(
    data: &'a Array3<T>,
    index: usize,
    orientation: Orientation,
    roi: Option<&UserVolume>,
) -> Result<ArrayView2<'a, T>> {
    let dims = shape3(data);
    let axis = orientation.axis();
    if index >= dims[axis] {
        return Err(RegistrationError::IndexOutOfBounds {
            axis,
            index,
            extent: dims[axis],
        });
    }

    let (row_axis, col_axis) = orientation.in_plane_axes();
    let in_plane = |plane_axis: usize| match roi {
        Some(roi) => clamp_range(roi.range(plane_axis), dims[plane_axis]),
        None => 0..dims[plane_axis],
    };
    let rows = in_plane(row_axis);
    let cols = in_plane(col_axis);

    let view = match orientation {
        Orientation::Axial => data.slice(s![index, rows, cols]),
        Orientation::Coronal => data.slice(s![rows, index, cols]),
        Orientation::Sagittal => data.slice(s![rows, cols, index]),
    };
    Ok(view)
}

/// Extract a slice perpendicular to `orientation` and promote its samples.
///
/// # Errors
///
/// Returns [`RegistrationError::IndexOutOfBounds`] if `index` does not address
/// a slice of the volume.
pub fn extract_slice<T: Sample>(
    data: &Array3<T>,
    index: usize,
    orientation: Orientation,
    roi: Option<&UserVolume>,
) -> Result<Array2<T::Promoted>> {
    Ok(slice_view(data, index, orientation, roi)?.mapv(T::promote))
}

/// Same-position slices of a reference and a target volume, with their
/// signed difference.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePair<P> {
    pub orientation: Orientation,
    pub index: usize,
    pub reference: Array2<P>,
    pub target: Array2<P>,
    /// `reference - target` in the promoted type.
    pub diff: Array2<P>,
}

/// Extract the same slice from both volumes of a pair.
///
/// # Errors
///
/// Returns [`RegistrationError::ShapeMismatch`] if the volumes differ in shape,
/// or [`RegistrationError::IndexOutOfBounds`] for an invalid index.
pub fn extract_slice_pair<T: Sample>(
    reference: &Array3<T>,
    target: &Array3<T>,
    index: usize,
    orientation: Orientation,
    roi: Option<&UserVolume>,
) -> Result<SlicePair<T::Promoted>> {
    if reference.dim() != target.dim() {
        return Err(RegistrationError::ShapeMismatch {
            reference: reference.shape().to_vec(),
            target: target.shape().to_vec(),
        });
    }

    let reference = extract_slice(reference, index, orientation, roi)?;
    let target = extract_slice(target, index, orientation, roi)?;
    let diff = Zip::from(&reference)
        .and(&target)
        .map_collect(|&r, &t| r - t);

    Ok(SlicePair {
        orientation,
        index,
        reference,
        target,
        diff,
    })
}
