//! Error types for volume registration.

use thiserror::Error;

use crate::enums::{RegistrationStatus, SampleType};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Unsupported sample dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Sample type mismatch: reference is {reference}, target is {target}")]
    DtypeMismatch {
        reference: SampleType,
        target: SampleType,
    },

    #[error("Shape mismatch: reference is {reference:?}, target is {target:?}")]
    ShapeMismatch {
        reference: Vec<usize>,
        target: Vec<usize>,
    },

    #[error("Slice index {index} is out of bounds for axis {axis} with extent {extent}")]
    IndexOutOfBounds {
        axis: usize,
        index: usize,
        extent: usize,
    },

    #[error("Anchor {anchor:?} lies outside the user volume {user_volume:?}")]
    AnchorOutsideUserVolume {
        anchor: [usize; 3],
        user_volume: [[usize; 2]; 3],
    },

    #[error("Invalid user volume: {0}")]
    InvalidUserVolume(String),

    #[error("Shift of {shift} on axis {axis} does not fit a volume of extent {extent}")]
    ShiftExceedsVolume { axis: usize, shift: i64, extent: usize },

    #[error("Cannot correlate an empty image")]
    EmptyImage,

    #[error("Registration already finished ({0:?})")]
    Finished(RegistrationStatus),

    #[error("Invalid registration box: {0}")]
    InvalidBox(String),
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
