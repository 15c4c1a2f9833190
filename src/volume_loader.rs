use crate::enums::{ByteOrder, SampleType};
use crate::volume::Volume;

use bytemuck::{AnyBitPattern, NoUninit};
use ndarray::{Array3, ShapeError};
use ndarray_npy::{ReadNpyError, ReadableElement};
use std::{fs, path::Path};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NPY error: {0}")]
    Npy(#[from] ReadNpyError),

    #[error("Expected {expected} bytes for the volume, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Unsupported sample dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Invalid volume shape {0:?}")]
    InvalidShape([usize; 3]),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),
}

trait RawSample: NoUninit + AnyBitPattern + ReadableElement {
    fn swap_bytes(self) -> Self;
}

macro_rules! impl_raw_sample {
    ($($t:ty),*) => {
        $(impl RawSample for $t {
            fn swap_bytes(self) -> Self {
                <$t>::swap_bytes(self)
            }
        })*
    };
}

impl_raw_sample!(i8, u8, i16, u16);

pub struct VolumeLoader;

impl VolumeLoader {
    /// Build a volume from raw, C-ordered sample bytes
    ///
    /// # Arguments
    ///
    /// * `bytes` - Sample data, `shape` product times the sample size
    /// * `shape` - Volume dimensions, slowest axis first
    /// * `sample_type` - Element type of the samples
    /// * `byte_order` - Byte order the samples were written in
    ///
    /// # Errors
    ///
    /// Returns error if the shape has a zero axis or the byte count does not
    /// match the shape
    pub fn from_raw_bytes(
        bytes: &[u8],
        shape: [usize; 3],
        sample_type: SampleType,
        byte_order: ByteOrder,
    ) -> Result<Volume, VolumeLoaderError> {
        if shape.contains(&0) {
            return Err(VolumeLoaderError::InvalidShape(shape));
        }
        let expected = shape
            .iter()
            .try_fold(sample_type.size_in_bytes(), |acc, &d| acc.checked_mul(d))
            .ok_or(VolumeLoaderError::InvalidShape(shape))?;
        if bytes.len() != expected {
            return Err(VolumeLoaderError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(match sample_type {
            SampleType::Int8 => Volume::Int8(Self::build_volume_array(bytes, shape, byte_order)?),
            SampleType::UInt8 => Volume::UInt8(Self::build_volume_array(bytes, shape, byte_order)?),
            SampleType::Int16 => Volume::Int16(Self::build_volume_array(bytes, shape, byte_order)?),
            SampleType::UInt16 => {
                Volume::UInt16(Self::build_volume_array(bytes, shape, byte_order)?)
            }
        })
    }

    /// Load a raw volume file
    ///
    /// # Arguments
    ///
    /// * `path` - File holding the samples and nothing else
    /// * `shape` - Volume dimensions, slowest axis first
    /// * `descriptor` - NumPy-style dtype such as `"<u2"`, `"uint8"` or `">i2"`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, the dtype is not supported or
    /// the file size does not match the shape
    pub fn load_raw(
        path: &Path,
        shape: [usize; 3],
        descriptor: &str,
    ) -> Result<Volume, VolumeLoaderError> {
        let (sample_type, byte_order) = SampleType::from_descriptor(descriptor)
            .map_err(|_| VolumeLoaderError::UnsupportedDtype(descriptor.to_string()))?;
        let bytes = fs::read(path)?;
        debug!(path = %path.display(), ?shape, %sample_type, "loaded raw volume");
        Self::from_raw_bytes(&bytes, shape, sample_type, byte_order)
    }

    /// Load a 3D `.npy` file of 8- or 16-bit integers
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not three-dimensional or
    /// holds an unsupported element type
    pub fn load_npy(path: &Path) -> Result<Volume, VolumeLoaderError> {
        let volume = if let Some(data) = Self::read_npy_as::<u8>(path)? {
            Volume::UInt8(data)
        } else if let Some(data) = Self::read_npy_as::<i8>(path)? {
            Volume::Int8(data)
        } else if let Some(data) = Self::read_npy_as::<u16>(path)? {
            Volume::UInt16(data)
        } else if let Some(data) = Self::read_npy_as::<i16>(path)? {
            Volume::Int16(data)
        } else {
            return Err(VolumeLoaderError::UnsupportedDtype(format!(
                "{} holds no 8- or 16-bit integer data",
                path.display()
            )));
        };
        debug!(path = %path.display(), shape = ?volume.shape(), sample_type = %volume.sample_type(), "loaded npy volume");
        Ok(volume)
    }

    /// Load either format, picking `.npy` by extension.
    pub fn load(
        path: &Path,
        raw_layout: Option<([usize; 3], &str)>,
    ) -> Result<Volume, VolumeLoaderError> {
        let is_npy = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"));
        match raw_layout {
            Some((shape, descriptor)) if !is_npy => Self::load_raw(path, shape, descriptor),
            _ => Self::load_npy(path),
        }
    }

    // `None` when the file holds another element type.
    fn read_npy_as<T: RawSample>(path: &Path) -> Result<Option<Array3<T>>, VolumeLoaderError> {
        match ndarray_npy::read_npy::<_, Array3<T>>(path) {
            Ok(data) => Ok(Some(data)),
            Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn build_volume_array<T: RawSample>(
        bytes: &[u8],
        shape: [usize; 3],
        byte_order: ByteOrder,
    ) -> Result<Array3<T>, VolumeLoaderError> {
        let mut samples: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
        if byte_order.needs_swap() {
            samples.iter_mut().for_each(|v| *v = v.swap_bytes());
        }
        Ok(Array3::from_shape_vec(shape, samples)?)
    }
}
