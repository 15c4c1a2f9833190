use std::fmt;

use crate::error::RegistrationError;

/// The three slicing directions of a volume.
///
/// Volumes are indexed `(axis 0, axis 1, axis 2)`, i.e. `(depth, height,
/// width)` for a stack of axial images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Slice perpendicular to axis 0.
    Axial,
    /// Slice perpendicular to axis 1.
    Coronal,
    /// Slice perpendicular to axis 2.
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Axis the slice is perpendicular to.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }

    /// Volume axes spanned by the slice, as (rows, columns) of the 2D image.
    pub fn in_plane_axes(self) -> (usize, usize) {
        match self {
            Orientation::Axial => (1, 2),
            Orientation::Coronal => (0, 2),
            Orientation::Sagittal => (0, 1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        }
    }
}

/// Integer sample types accepted for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleType {
    Int8,
    UInt8,
    Int16,
    UInt16,
}

impl SampleType {
    /// Parse a numpy-style dtype descriptor such as `uint8`, `>u2` or `<i2`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::UnsupportedDtype`] for anything outside the
    /// 8- and 16-bit integer families.
    pub fn from_descriptor(descriptor: &str) -> Result<(SampleType, ByteOrder), RegistrationError> {
        let trimmed = descriptor.trim();
        let (byte_order, body) = match trimmed.chars().next() {
            Some('<') => (ByteOrder::Little, &trimmed[1..]),
            Some('>') => (ByteOrder::Big, &trimmed[1..]),
            Some('=') | Some('|') => (ByteOrder::Native, &trimmed[1..]),
            _ => (ByteOrder::Native, trimmed),
        };

        let sample_type = match body {
            "i1" | "b" | "int8" => SampleType::Int8,
            "u1" | "B" | "uint8" => SampleType::UInt8,
            "i2" | "h" | "int16" => SampleType::Int16,
            "u2" | "H" | "uint16" => SampleType::UInt16,
            _ => return Err(RegistrationError::UnsupportedDtype(descriptor.to_string())),
        };

        Ok((sample_type, byte_order))
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            SampleType::Int8 | SampleType::UInt8 => 1,
            SampleType::Int16 | SampleType::UInt16 => 2,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleType::Int8 => "int8",
            SampleType::UInt8 => "uint8",
            SampleType::Int16 => "int16",
            SampleType::UInt16 => "uint16",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    Little,
    Big,
    #[default]
    Native,
}

impl ByteOrder {
    /// Whether samples stored in this order must be byte-swapped on this host.
    pub fn needs_swap(self) -> bool {
        match self {
            ByteOrder::Native => false,
            ByteOrder::Little => cfg!(target_endian = "big"),
            ByteOrder::Big => cfg!(target_endian = "little"),
        }
    }
}

/// Lifecycle of a registration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationStatus {
    #[default]
    Initialized,
    Iterating,
    Converged,
    MaxIterationsReached,
}

impl RegistrationStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RegistrationStatus::Converged | RegistrationStatus::MaxIterationsReached
        )
    }
}
