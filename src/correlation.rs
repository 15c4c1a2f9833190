//! FFT cross-correlation of two same-shape images.
//!
//! The correlation surface is the linear convolution of the reference with the
//! target flipped on both axes, cropped to the input size around the zero lag
//! (the "same" output mode of a direct convolution). The zero lag lands on the
//! center index `n / 2` of each axis, so a surface maximum at `p` reports an
//! integer displacement `n / 2 - p`: a feature at index `m` in the reference is
//! found at `m + displacement` in the target.

use ndarray::{Array2, s};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};

use crate::error::{RegistrationError, Result};

/// Location and height of the correlation maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Displacement of the target relative to the reference, (rows, columns).
    pub shift: [i64; 2],
    /// Value of the correlation surface at its maximum.
    pub peak: f64,
    /// Index of the maximum in the correlation surface.
    pub location: [usize; 2],
}

/// Integer-pixel displacement estimator. FFT plans are cached by the planner
/// across calls.
pub struct CrossCorrelator {
    planner: FftPlanner<f64>,
}

impl Default for CrossCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossCorrelator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Estimate the 2D displacement of `target` relative to `reference`.
    ///
    /// # Errors
    ///
    /// Fails if the images differ in shape or are empty.
    pub fn estimate_shift_2d<P: Copy + Into<f64>>(
        &mut self,
        reference: &Array2<P>,
        target: &Array2<P>,
    ) -> Result<CorrelationPeak> {
        let surface = self.correlation_map(reference, target)?;
        Ok(Self::locate_peak(&surface))
    }

    /// Correlation surface of the de-meaned images, same shape as the inputs.
    pub fn correlation_map<P: Copy + Into<f64>>(
        &mut self,
        reference: &Array2<P>,
        target: &Array2<P>,
    ) -> Result<Array2<f64>> {
        if reference.dim() != target.dim() {
            return Err(RegistrationError::ShapeMismatch {
                reference: reference.shape().to_vec(),
                target: target.shape().to_vec(),
            });
        }
        let (rows, cols) = reference.dim();
        if rows == 0 || cols == 0 {
            return Err(RegistrationError::EmptyImage);
        }

        let reference = demeaned(reference);
        let target = demeaned(target);

        // Padding to at least the full convolution size keeps the circular
        // product free of wrap-around.
        let padded = (
            (2 * rows - 1).next_power_of_two(),
            (2 * cols - 1).next_power_of_two(),
        );
        let zero = Complex::new(0.0, 0.0);

        let mut reference_spectrum = Array2::from_elem(padded, zero);
        reference_spectrum
            .slice_mut(s![..rows, ..cols])
            .zip_mut_with(&reference, |dst, &v| *dst = Complex::new(v, 0.0));

        let mut target_spectrum = Array2::from_elem(padded, zero);
        target_spectrum
            .slice_mut(s![..rows, ..cols])
            .zip_mut_with(&target.slice(s![..;-1, ..;-1]), |dst, &v| {
                *dst = Complex::new(v, 0.0)
            });

        self.fft_2d(&mut reference_spectrum, FftDirection::Forward);
        self.fft_2d(&mut target_spectrum, FftDirection::Forward);
        reference_spectrum.zip_mut_with(&target_spectrum, |a, &b| *a *= b);
        self.fft_2d(&mut reference_spectrum, FftDirection::Inverse);

        let norm = 1.0 / (padded.0 * padded.1) as f64;
        let row_start = (rows - 1) / 2;
        let col_start = (cols - 1) / 2;
        Ok(reference_spectrum
            .slice(s![row_start..row_start + rows, col_start..col_start + cols])
            .mapv(|c| c.re * norm))
    }

    /// First maximum of the surface in row-major order, converted to a
    /// displacement.
    pub fn locate_peak(surface: &Array2<f64>) -> CorrelationPeak {
        let (rows, cols) = surface.dim();
        let mut location = [0, 0];
        let mut peak = f64::NEG_INFINITY;
        for ((row, col), &value) in surface.indexed_iter() {
            if value > peak {
                peak = value;
                location = [row, col];
            }
        }

        let center = [(rows / 2) as i64, (cols / 2) as i64];
        CorrelationPeak {
            shift: [
                center[0] - location[0] as i64,
                center[1] - location[1] as i64,
            ],
            peak,
            location,
        }
    }

    // Row-column decomposition; lines are copied out so any memory layout works.
    fn fft_2d(&mut self, data: &mut Array2<Complex<f64>>, direction: FftDirection) {
        let (rows, cols) = data.dim();
        let row_fft = self.planner.plan_fft(cols, direction);
        let col_fft = self.planner.plan_fft(rows, direction);

        let zero = Complex::new(0.0, 0.0);
        let scratch_len = row_fft
            .get_inplace_scratch_len()
            .max(col_fft.get_inplace_scratch_len());
        let mut scratch = vec![zero; scratch_len];
        let mut line = vec![zero; rows.max(cols)];

        for mut row in data.rows_mut() {
            let buffer = &mut line[..cols];
            buffer.iter_mut().zip(row.iter()).for_each(|(dst, &src)| *dst = src);
            row_fft.process_with_scratch(buffer, &mut scratch);
            row.iter_mut().zip(buffer.iter()).for_each(|(dst, &src)| *dst = src);
        }

        for mut column in data.columns_mut() {
            let buffer = &mut line[..rows];
            buffer.iter_mut().zip(column.iter()).for_each(|(dst, &src)| *dst = src);
            col_fft.process_with_scratch(buffer, &mut scratch);
            column.iter_mut().zip(buffer.iter()).for_each(|(dst, &src)| *dst = src);
        }
    }
}

fn demeaned<P: Copy + Into<f64>>(image: &Array2<P>) -> Array2<f64> {
    let values: Array2<f64> = image.mapv(Into::into);
    let mean = values.mean().unwrap_or(0.0);
    values - mean
}
