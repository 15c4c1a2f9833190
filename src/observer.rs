//! Per-iteration hooks for inspecting a registration run.
//!
//! Observers see the slices, correlation surfaces and differences computed in
//! each iteration. They are a side channel: nothing they do feeds back into
//! the estimate.

use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;
use tracing::{info, warn};

use crate::correlation::CorrelationPeak;
use crate::estimator::Shift3;
use crate::volume::{Promoted, SlicePair};

/// Everything computed from the slices of one iteration.
#[derive(Debug)]
pub struct IterationStep<'a, P> {
    /// 1-based iteration counter.
    pub iteration: usize,
    pub anchor: [usize; 3],
    /// Axial, coronal and sagittal slices through the anchor.
    pub slices: &'a [SlicePair<P>; 3],
    pub correlation_maps: &'a [Array2<f64>; 3],
    pub peaks: [CorrelationPeak; 3],
    /// Shift accumulated before this iteration, i.e. the alignment the slices
    /// were taken at.
    pub accumulated_shift: Shift3,
}

pub trait RegistrationObserver {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>);
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RegistrationObserver for NoopObserver {
    fn on_iteration<P: Promoted>(&mut self, _step: &IterationStep<'_, P>) {}
}

impl<O: RegistrationObserver> RegistrationObserver for &mut O {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>) {
        (**self).on_iteration(step);
    }
}

impl<O: RegistrationObserver> RegistrationObserver for Option<O> {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>) {
        if let Some(observer) = self {
            observer.on_iteration(step);
        }
    }
}

impl<A: RegistrationObserver, B: RegistrationObserver> RegistrationObserver for (A, B) {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>) {
        self.0.on_iteration(step);
        self.1.on_iteration(step);
    }
}

/// Logs one line per slice quantity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RegistrationObserver for LogObserver {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>) {
        for (pair, peak) in step.slices.iter().zip(step.peaks.iter()) {
            let orientation = pair.orientation.name();
            let mean_abs_diff = mean_abs(&pair.diff);
            info!(
                iteration = step.iteration,
                orientation,
                index = pair.index,
                shape = ?pair.reference.dim(),
                "slice extracted"
            );
            info!(
                iteration = step.iteration,
                orientation,
                shift = ?peak.shift,
                peak = peak.peak,
                "correlation peak"
            );
            info!(
                iteration = step.iteration,
                orientation, mean_abs_diff, "slice difference"
            );
        }
    }
}

fn mean_abs<P: Promoted>(image: &Array2<P>) -> f64 {
    if image.is_empty() {
        return 0.0;
    }
    image.iter().map(|&v| Into::<f64>::into(v).abs()).sum::<f64>() / image.len() as f64
}

/// Writes the reference, target, correlation and difference images of every
/// iteration as 8-bit PNG files.
#[derive(Debug)]
pub struct ImageDumpObserver {
    directory: PathBuf,
    written: Vec<PathBuf>,
}

impl ImageDumpObserver {
    /// # Errors
    ///
    /// Fails if the output directory cannot be created.
    pub fn new(directory: impl AsRef<Path>) -> std::io::Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            written: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn save(&mut self, image: &Array2<f64>, name: String) {
        let Some(buffer) = Self::to_image(image) else {
            warn!(name = %name, "skipping empty image");
            return;
        };
        let path = self.directory.join(name);
        match buffer.save(&path) {
            Ok(()) => self.written.push(path),
            Err(err) => warn!(path = %path.display(), %err, "failed to write image"),
        }
    }

    // Stretch [min, max] onto [0, 255]; constant images become black.
    fn to_image(image: &Array2<f64>) -> Option<GrayImage> {
        let (height, width) = image.dim();
        if height == 0 || width == 0 {
            return None;
        }
        let (min, max) = image
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        let pixel_data: Vec<u8> = image
            .iter()
            .map(|&v| {
                if range > 0.0 {
                    (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
                } else {
                    0
                }
            })
            .collect();
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width as u32, height as u32, pixel_data)
    }
}

impl RegistrationObserver for ImageDumpObserver {
    fn on_iteration<P: Promoted>(&mut self, step: &IterationStep<'_, P>) {
        for (pair, correlation) in step.slices.iter().zip(step.correlation_maps.iter()) {
            let prefix = format!("iter{:03}_{}", step.iteration, pair.orientation.name());
            let as_f64 = |image: &Array2<P>| image.mapv(Into::<f64>::into);

            self.save(&as_f64(&pair.reference), format!("{prefix}_reference.png"));
            self.save(&as_f64(&pair.target), format!("{prefix}_target.png"));
            self.save(correlation, format!("{prefix}_correlation.png"));
            self.save(&as_f64(&pair.diff), format!("{prefix}_diff.png"));
        }
    }
}
