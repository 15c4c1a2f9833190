//! # DVC volume registration
//!
//! This crate coarsely registers a pair of 3D tomographic volumes before a
//! Digital Volume Correlation run
//!
//! The target volume is assumed to be a rigid integer translation of the
//! reference. Each iteration slices both volumes through an anchor point in
//! the three axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  and estimates the in-plane displacement of every slice pair with an FFT
//!  cross-correlation. The six measurements are fused into one 3D shift, both
//!  volumes are cropped so that they line up, and the anchor is moved into the
//!  cropped frame. Iteration stops when no shift is found or after a fixed
//!  number of iterations. Volumes are assumed to hold:
//!   - 8- or 16-bit signed or unsigned integer samples
//!   - The same shape and sample type in reference and target
//!   - A single frame, slowest axis first
//!
//! # Examples
//!
//! ## Registering two volumes around a point
//!
//! Load two `.npy` volumes, register them in a 64 voxel box around the
//! center and print the recovered shift.
//!
//! ```no_run
//! # use dvc_registration::{RegistrationBox, RegistrationConfig, VolumeLoader, LogObserver};
//! # use std::path::Path;
//! let reference = VolumeLoader::load_npy(Path::new("reference.npy"))
//!     .expect("should have loaded the reference volume");
//! let target = VolumeLoader::load_npy(Path::new("target.npy"))
//!     .expect("should have loaded the target volume");
//! let [d0, d1, d2] = reference.shape();
//! let outcome = RegistrationBox::around([d0 / 2, d1 / 2, d2 / 2], 64, reference.shape())
//!     .expect("should have fit a box into the volume")
//!     .register(&reference, &target, RegistrationConfig::default(), LogObserver)
//!     .expect("should have registered the volumes");
//! println!("shift {:?}, converged {}", outcome.accumulated_shift, outcome.converged);
//! ```

pub mod aligner;
pub mod correlation;
pub mod enums;
pub mod error;
pub mod estimator;
pub mod observer;
pub mod registration;
pub mod registration_box;
pub mod volume;
pub mod volume_loader;

pub use aligner::{AnchorWarning, VolumeAligner};
pub use correlation::{CorrelationPeak, CrossCorrelator};
pub use enums::{ByteOrder, Orientation, RegistrationStatus, SampleType};
pub use error::{RegistrationError, Result};
pub use estimator::{Shift3, ShiftEstimate, ShiftEstimator};
pub use observer::{
    ImageDumpObserver, IterationStep, LogObserver, NoopObserver, RegistrationObserver,
};
pub use registration::{
    IterationRecord, Registration, RegistrationConfig, RegistrationOutcome, RegistrationState,
    register_volumes,
};
pub use registration_box::{RegistrationBox, register_around_point};
pub use volume::{SlicePair, UserVolume, Volume, extract_slice, extract_slice_pair};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
