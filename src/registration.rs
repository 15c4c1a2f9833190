//! Iterative registration of a reference and a target volume.
//!
//! Each iteration slices both volumes through the anchor along the three
//! axes, estimates the in-plane displacement of every slice pair by
//! cross-correlation, fuses the six measurements into one integer 3D shift and
//! crops both volumes by that shift. The run stops when an iteration finds no
//! shift (converged) or after `max_iterations` iterations.

use ndarray::{Array2, Array3};
use tracing::{debug, info};

use crate::aligner::{AnchorWarning, VolumeAligner};
use crate::correlation::{CorrelationPeak, CrossCorrelator};
use crate::enums::{Orientation, RegistrationStatus};
use crate::error::{RegistrationError, Result};
use crate::estimator::{DEFAULT_ERR_THRESH, Shift3, ShiftEstimate, ShiftEstimator};
use crate::observer::{IterationStep, NoopObserver, RegistrationObserver};
use crate::volume::{Sample, SlicePair, UserVolume, Volume, extract_slice_pair, shape3};

pub const DEFAULT_MAX_ITERATIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistrationConfig {
    /// Largest disagreement, in pixels, between the two observations of an
    /// axis for the axis to be corrected.
    pub err_thresh: f64,
    pub max_iterations: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            err_thresh: DEFAULT_ERR_THRESH,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl RegistrationConfig {
    pub fn with_err_thresh(mut self, err_thresh: f64) -> Self {
        self.err_thresh = err_thresh;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Snapshot of the loop state between iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationState {
    pub status: RegistrationStatus,
    pub iterations: usize,
    pub accumulated_shift: Shift3,
    pub anchor: [usize; 3],
    pub dims: [usize; 3],
}

/// What a single iteration measured and changed.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// 1-based iteration counter.
    pub iteration: usize,
    pub estimate: ShiftEstimate,
    /// Volume dimensions the slices were taken from.
    pub dims: [usize; 3],
    /// Mean of `err[axis] / dims[axis]`, diagnostic only.
    pub relative_error: f64,
    /// Total shift after this iteration.
    pub accumulated_shift: Shift3,
    /// Anchor after this iteration's crop.
    pub anchor: [usize; 3],
    pub warnings: Vec<AnchorWarning>,
}

/// Final state of a registration run.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutcome<V> {
    pub reference: V,
    pub target: V,
    pub anchor: [usize; 3],
    /// Displacement of the target relative to the reference: a feature at
    /// index `p` of the input reference sits at `p + accumulated_shift` in the
    /// input target.
    pub accumulated_shift: Shift3,
    /// Couplet disagreement measured on the final volumes.
    pub residual_error: [f64; 3],
    pub converged: bool,
    pub iterations: usize,
    pub history: Vec<IterationRecord>,
}

impl<V> RegistrationOutcome<V> {
    pub fn map_volumes<W>(self, f: impl Fn(V) -> W) -> RegistrationOutcome<W> {
        RegistrationOutcome {
            reference: f(self.reference),
            target: f(self.target),
            anchor: self.anchor,
            accumulated_shift: self.accumulated_shift,
            residual_error: self.residual_error,
            converged: self.converged,
            iterations: self.iterations,
            history: self.history,
        }
    }
}

/// Registration loop over a typed volume pair.
pub struct Registration<T: Sample, O: RegistrationObserver = NoopObserver> {
    reference: Array3<T>,
    target: Array3<T>,
    anchor: [usize; 3],
    user_volume: UserVolume,
    config: RegistrationConfig,
    estimator: ShiftEstimator,
    correlator: CrossCorrelator,
    accumulated_shift: Shift3,
    iterations: usize,
    status: RegistrationStatus,
    history: Vec<IterationRecord>,
    observer: O,
}

struct Measurement<P> {
    slices: [SlicePair<P>; 3],
    correlation_maps: [Array2<f64>; 3],
    peaks: [CorrelationPeak; 3],
    estimate: ShiftEstimate,
}

impl<T: Sample> Registration<T> {
    /// Set up a run. The volumes are owned by the run and cropped as it
    /// progresses.
    ///
    /// # Errors
    ///
    /// Fails if the volumes differ in shape, if the user volume does not fit
    /// the volumes or if the anchor lies outside the user volume.
    pub fn new(
        reference: Array3<T>,
        target: Array3<T>,
        anchor: [usize; 3],
        user_volume: UserVolume,
        config: RegistrationConfig,
    ) -> Result<Self> {
        if reference.dim() != target.dim() {
            return Err(RegistrationError::ShapeMismatch {
                reference: reference.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }
        user_volume.check_within(shape3(&reference))?;
        if !user_volume.contains(anchor) {
            return Err(RegistrationError::AnchorOutsideUserVolume {
                anchor,
                user_volume: user_volume.bounds(),
            });
        }

        Ok(Self {
            reference,
            target,
            anchor,
            user_volume,
            config,
            estimator: ShiftEstimator::new(config.err_thresh),
            correlator: CrossCorrelator::new(),
            accumulated_shift: [0, 0, 0],
            iterations: 0,
            status: RegistrationStatus::Initialized,
            history: Vec::new(),
            observer: NoopObserver,
        })
    }
}

impl<T: Sample, O: RegistrationObserver> Registration<T, O> {
    /// Attach an observer called once per iteration.
    pub fn with_observer<O2: RegistrationObserver>(self, observer: O2) -> Registration<T, O2> {
        Registration {
            reference: self.reference,
            target: self.target,
            anchor: self.anchor,
            user_volume: self.user_volume,
            config: self.config,
            estimator: self.estimator,
            correlator: self.correlator,
            accumulated_shift: self.accumulated_shift,
            iterations: self.iterations,
            status: self.status,
            history: self.history,
            observer,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn user_volume(&self) -> &UserVolume {
        &self.user_volume
    }

    pub fn state(&self) -> RegistrationState {
        RegistrationState {
            status: self.status,
            iterations: self.iterations,
            accumulated_shift: self.accumulated_shift,
            anchor: self.anchor,
            dims: shape3(&self.reference),
        }
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    /// Run one iteration: measure, crop both volumes and move the anchor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Finished`] once the run has converged or
    /// used up its iterations, and propagates extraction, correlation and
    /// cropping failures.
    pub fn step(&mut self) -> Result<IterationRecord> {
        if self.status.is_finished() {
            return Err(RegistrationError::Finished(self.status));
        }
        self.status = RegistrationStatus::Iterating;

        let iteration = self.iterations + 1;
        let dims = shape3(&self.reference);
        debug!(iteration, ?dims, anchor = ?self.anchor, "starting iteration");

        let measurement = self.measure()?;
        self.observer.on_iteration(&IterationStep {
            iteration,
            anchor: self.anchor,
            slices: &measurement.slices,
            correlation_maps: &measurement.correlation_maps,
            peaks: measurement.peaks,
            accumulated_shift: self.accumulated_shift,
        });

        let estimate = measurement.estimate;
        let shift = estimate.shift;
        let relative_error = (0..3)
            .map(|axis| estimate.err[axis] / dims[axis] as f64)
            .sum::<f64>()
            / 3.0;
        info!(iteration, displacements = ?estimate.displacements, "slice displacements");
        info!(iteration, couplets = ?estimate.couplets, err = ?estimate.err, "couplets");
        info!(iteration, ?shift, fallback = estimate.used_fallback, "shift for this iteration");
        info!(iteration, relative_error, "relative error");

        let mut warnings = Vec::new();
        if !estimate.is_zero() {
            let reference = std::mem::take(&mut self.reference);
            let target = std::mem::take(&mut self.target);
            let (reference, target) = VolumeAligner::apply_shift(reference, target, shift)?;
            self.reference = reference;
            self.target = target;

            let (anchor, anchor_warnings) =
                VolumeAligner::remap_anchor(self.anchor, shift, shape3(&self.reference));
            self.anchor = anchor;
            warnings = anchor_warnings;
        }

        for axis in 0..3 {
            self.accumulated_shift[axis] += shift[axis];
        }
        self.iterations = iteration;
        self.status = if estimate.is_zero() {
            RegistrationStatus::Converged
        } else if self.iterations >= self.config.max_iterations {
            RegistrationStatus::MaxIterationsReached
        } else {
            RegistrationStatus::Iterating
        };
        info!(
            iteration,
            accumulated_shift = ?self.accumulated_shift,
            anchor = ?self.anchor,
            status = ?self.status,
            "iteration done"
        );

        let record = IterationRecord {
            iteration,
            estimate,
            dims,
            relative_error,
            accumulated_shift: self.accumulated_shift,
            anchor: self.anchor,
            warnings,
        };
        self.history.push(record.clone());
        Ok(record)
    }

    /// Iterate until convergence or the iteration cap, then measure the
    /// residual error on the final volumes.
    ///
    /// Not converging is not an error; it is reported through
    /// [`RegistrationOutcome::converged`].
    pub fn run(mut self) -> Result<RegistrationOutcome<Array3<T>>> {
        if self.config.max_iterations == 0 {
            self.status = RegistrationStatus::MaxIterationsReached;
        }
        while !self.status.is_finished() {
            self.step()?;
        }

        let residual = self.measure()?.estimate;
        info!(residual_error = ?residual.err, "residual error on the final volumes");

        let converged = self.status == RegistrationStatus::Converged;
        if converged {
            info!(
                iterations = self.iterations,
                accumulated_shift = ?self.accumulated_shift,
                "registration converged"
            );
        } else {
            info!(
                iterations = self.iterations,
                accumulated_shift = ?self.accumulated_shift,
                "registration stopped at the iteration limit"
            );
        }

        Ok(RegistrationOutcome {
            reference: self.reference,
            target: self.target,
            anchor: self.anchor,
            accumulated_shift: self.accumulated_shift,
            residual_error: residual.err,
            converged,
            iterations: self.iterations,
            history: self.history,
        })
    }

    fn measure(&mut self) -> Result<Measurement<T::Promoted>> {
        let [axial, coronal, sagittal] =
            Orientation::ALL.map(|orientation| self.correlate_slice(orientation));
        let (axial, coronal, sagittal) = (axial?, coronal?, sagittal?);

        let correlation_maps = [axial.1, coronal.1, sagittal.1];
        let peaks = correlation_maps
            .each_ref()
            .map(|surface| CrossCorrelator::locate_peak(surface));
        let estimate = self.estimator.estimate(peaks.map(|peak| peak.shift));

        Ok(Measurement {
            slices: [axial.0, coronal.0, sagittal.0],
            correlation_maps,
            peaks,
            estimate,
        })
    }

    fn correlate_slice(
        &mut self,
        orientation: Orientation,
    ) -> Result<(SlicePair<T::Promoted>, Array2<f64>)> {
        let pair = extract_slice_pair(
            &self.reference,
            &self.target,
            self.anchor[orientation.axis()],
            orientation,
            Some(&self.user_volume),
        )?;
        let surface = self
            .correlator
            .correlation_map(&pair.reference, &pair.target)?;
        Ok((pair, surface))
    }
}

/// Register a pair of dynamically typed volumes.
///
/// # Errors
///
/// Returns [`RegistrationError::DtypeMismatch`] if the volumes hold different
/// sample types, and otherwise fails like [`Registration::new`] and
/// [`Registration::run`].
pub fn register_volumes<O: RegistrationObserver>(
    reference: Volume,
    target: Volume,
    anchor: [usize; 3],
    user_volume: UserVolume,
    config: RegistrationConfig,
    observer: O,
) -> Result<RegistrationOutcome<Volume>> {
    fn typed<T: Sample, O: RegistrationObserver>(
        reference: Array3<T>,
        target: Array3<T>,
        anchor: [usize; 3],
        user_volume: UserVolume,
        config: RegistrationConfig,
        observer: O,
    ) -> Result<RegistrationOutcome<Array3<T>>> {
        Registration::new(reference, target, anchor, user_volume, config)?
            .with_observer(observer)
            .run()
    }

    match (reference, target) {
        (Volume::Int8(a), Volume::Int8(b)) => {
            typed(a, b, anchor, user_volume, config, observer).map(|o| o.map_volumes(Volume::Int8))
        }
        (Volume::UInt8(a), Volume::UInt8(b)) => {
            typed(a, b, anchor, user_volume, config, observer).map(|o| o.map_volumes(Volume::UInt8))
        }
        (Volume::Int16(a), Volume::Int16(b)) => {
            typed(a, b, anchor, user_volume, config, observer).map(|o| o.map_volumes(Volume::Int16))
        }
        (Volume::UInt16(a), Volume::UInt16(b)) => typed(a, b, anchor, user_volume, config, observer)
            .map(|o| o.map_volumes(Volume::UInt16)),
        (reference, target) => Err(RegistrationError::DtypeMismatch {
            reference: reference.sample_type(),
            target: target.sample_type(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bright box of the given half-sizes on a dim background.
    fn box_volume(dims: (usize, usize, usize), center: [i64; 3], half: [i64; 3]) -> Array3<u8> {
        Array3::from_shape_fn(dims, |(i, j, k)| {
            let p = [i as i64, j as i64, k as i64];
            let inside = (0..3).all(|a| (p[a] - center[a]).abs() <= half[a]);
            if inside { 200 } else { 10 }
        })
    }

    fn shifted_pair(shift: Shift3) -> (Array3<u8>, Array3<u8>) {
        let center = [24, 24, 24];
        let half = [6, 5, 7];
        let moved = [center[0] + shift[0], center[1] + shift[1], center[2] + shift[2]];
        (
            box_volume((48, 48, 48), center, half),
            box_volume((48, 48, 48), moved, half),
        )
    }

    fn central_user_volume() -> UserVolume {
        UserVolume::new([[12, 36], [12, 36], [12, 36]]).unwrap()
    }

    #[test]
    fn identical_volumes_converge_immediately() {
        let (reference, _) = shifted_pair([0, 0, 0]);
        let outcome = Registration::new(
            reference.clone(),
            reference.clone(),
            [24, 24, 24],
            central_user_volume(),
            RegistrationConfig::default(),
        )
        .unwrap()
        .run()
        .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.accumulated_shift, [0, 0, 0]);
        assert_eq!(outcome.history[0].estimate.shift, [0, 0, 0]);
        assert_eq!(outcome.residual_error, [0.0, 0.0, 0.0]);
        assert_eq!(outcome.reference, reference);
        assert_eq!(outcome.anchor, [24, 24, 24]);
    }

    #[test]
    fn recovers_known_shifts() {
        for shift in [[4, -3, 2], [-2, 5, -1], [0, 0, 3], [-4, -4, 4]] {
            let (reference, target) = shifted_pair(shift);
            let outcome = Registration::new(
                reference,
                target,
                [24, 24, 24],
                central_user_volume(),
                RegistrationConfig::default(),
            )
            .unwrap()
            .run()
            .unwrap();

            assert!(outcome.converged, "shift {shift:?}");
            assert_eq!(outcome.accumulated_shift, shift);
            assert_eq!(outcome.reference, outcome.target);
            let expected_dims = [0, 1, 2].map(|a| 48 - shift[a].unsigned_abs() as usize);
            assert_eq!(shape3(&outcome.reference), expected_dims);
        }
    }

    #[test]
    fn stops_at_iteration_limit_without_error() {
        let (reference, target) = shifted_pair([3, 0, -2]);
        let config = RegistrationConfig::default().with_max_iterations(1);
        let outcome = Registration::new(reference, target, [24, 24, 24], central_user_volume(), config)
            .unwrap()
            .run()
            .unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.accumulated_shift, [3, 0, -2]);
        assert_eq!(outcome.anchor, [24, 24, 22]);
        assert_eq!(outcome.residual_error, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_iterations_only_measures_residual() {
        let (reference, target) = shifted_pair([2, 0, 0]);
        let config = RegistrationConfig::default().with_max_iterations(0);
        let outcome = Registration::new(reference, target, [24, 24, 24], central_user_volume(), config)
            .unwrap()
            .run()
            .unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.accumulated_shift, [0, 0, 0]);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn step_by_step_state_is_explicit() {
        let (reference, target) = shifted_pair([-3, 2, 0]);
        let mut registration = Registration::new(
            reference,
            target,
            [24, 24, 24],
            central_user_volume(),
            RegistrationConfig::default(),
        )
        .unwrap();
        assert_eq!(registration.status(), RegistrationStatus::Initialized);

        let first = registration.step().unwrap();
        assert_eq!(first.iteration, 1);
        assert_eq!(first.estimate.shift, [-3, 2, 0]);
        assert_eq!(first.dims, [48, 48, 48]);
        assert_eq!(first.anchor, [21, 24, 24]);
        assert!(first.warnings.is_empty());

        let state = registration.state();
        assert_eq!(state.status, RegistrationStatus::Iterating);
        assert_eq!(state.dims, [45, 46, 48]);
        assert_eq!(state.accumulated_shift, [-3, 2, 0]);

        let second = registration.step().unwrap();
        assert!(second.estimate.is_zero());
        assert_eq!(registration.status(), RegistrationStatus::Converged);
        assert!(matches!(
            registration.step(),
            Err(RegistrationError::Finished(RegistrationStatus::Converged))
        ));
        assert_eq!(registration.history().len(), 2);
    }

    #[test]
    fn tail_trim_clamp_is_recorded_on_the_iteration() {
        // A rod along axis 0 carries the axial slice at the anchor; a block
        // away from the anchor plane carries the axis-0 displacement.
        let scene = |shift: i64| {
            Array3::from_shape_fn((48, 48, 48), |(i, j, k)| {
                let i = i as i64 - shift;
                let rod = i >= 36 && (30..=34).contains(&j) && (28..=33).contains(&k);
                let block = (20..=28).contains(&i) && (19..=29).contains(&j) && (18..=30).contains(&k);
                if rod || block { 200u8 } else { 10 }
            })
        };
        let user_volume = UserVolume::new([[12, 48], [12, 36], [12, 36]]).unwrap();
        let mut registration = Registration::new(
            scene(0),
            scene(3),
            [46, 24, 24],
            user_volume,
            RegistrationConfig::default(),
        )
        .unwrap();

        let record = registration.step().unwrap();
        assert_eq!(record.estimate.shift, [3, 0, 0]);
        assert_eq!(record.dims, [48, 48, 48]);
        assert_eq!(record.anchor, [44, 24, 24]);
        let expected = vec![AnchorWarning::ClampedToExtent {
            axis: 0,
            requested: 46,
            clamped: 44,
        }];
        assert_eq!(record.warnings, expected);
        assert_eq!(registration.state().anchor, [44, 24, 24]);
        assert_eq!(registration.state().dims, [45, 48, 48]);
        assert_eq!(registration.history()[0].warnings, expected);

        let second = registration.step().unwrap();
        assert!(second.estimate.is_zero());
        assert!(second.warnings.is_empty());
        assert_eq!(registration.status(), RegistrationStatus::Converged);
        assert_eq!(registration.history()[0].warnings, expected);
    }

    #[test]
    fn anchor_outside_user_volume_fails_fast() {
        let (reference, target) = shifted_pair([0, 0, 0]);
        let result = Registration::new(
            reference,
            target,
            [5, 24, 24],
            central_user_volume(),
            RegistrationConfig::default(),
        );
        assert!(matches!(
            result,
            Err(RegistrationError::AnchorOutsideUserVolume { .. })
        ));
    }

    #[test]
    fn user_volume_must_fit_volume() {
        let (reference, target) = shifted_pair([0, 0, 0]);
        let user_volume = UserVolume::new([[12, 36], [12, 60], [12, 36]]).unwrap();
        let result = Registration::new(
            reference,
            target,
            [24, 24, 24],
            user_volume,
            RegistrationConfig::default(),
        );
        assert!(matches!(result, Err(RegistrationError::InvalidUserVolume(_))));
    }

    #[test]
    fn mixed_sample_types_are_rejected() {
        let reference = Volume::from(Array3::<u8>::zeros((8, 8, 8)));
        let target = Volume::from(Array3::<u16>::zeros((8, 8, 8)));
        let result = register_volumes(
            reference,
            target,
            [4, 4, 4],
            UserVolume::full([8, 8, 8]).unwrap(),
            RegistrationConfig::default(),
            NoopObserver,
        );
        assert!(matches!(result, Err(RegistrationError::DtypeMismatch { .. })));
    }

    #[derive(Default)]
    struct Counting {
        calls: Vec<(usize, Shift3, usize)>,
    }

    impl RegistrationObserver for Counting {
        fn on_iteration<P: crate::volume::Promoted>(&mut self, step: &IterationStep<'_, P>) {
            self.calls
                .push((step.iteration, step.accumulated_shift, step.correlation_maps.len()));
        }
    }

    #[test]
    fn observer_sees_every_iteration() {
        let (reference, target) = shifted_pair([2, -1, 0]);
        let mut observer = Counting::default();
        let outcome = Registration::new(
            reference,
            target,
            [24, 24, 24],
            central_user_volume(),
            RegistrationConfig::default(),
        )
        .unwrap()
        .with_observer(&mut observer)
        .run()
        .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(observer.calls, vec![(1, [0, 0, 0], 3), (2, [2, -1, 0], 3)]);
    }
}
