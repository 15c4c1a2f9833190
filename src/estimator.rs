//! Fusion of the three orthogonal 2D displacements into one 3D shift.
//!
//! Slicing perpendicular to axis `r` yields a 2D displacement over the two
//! remaining axes, so every axis is observed by exactly two slices. The two
//! observations of an axis form its couplet:
//!
//! | axis | first               | second              |
//! |------|---------------------|---------------------|
//! | 0    | `displacements[2][0]` | `displacements[1][0]` |
//! | 1    | `displacements[0][0]` | `displacements[2][1]` |
//! | 2    | `displacements[0][1]` | `displacements[1][1]` |

use tracing::debug;

pub type Shift3 = [i64; 3];

/// Per-axis disagreement accepted by default, in pixels.
pub const DEFAULT_ERR_THRESH: f64 = 2.0;

/// Result of fusing one set of slice displacements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftEstimate {
    /// Row `r` is the displacement measured on the slice perpendicular to axis `r`.
    pub displacements: [[i64; 2]; 3],
    pub couplets: [[i64; 2]; 3],
    /// Accepted shift for this iteration.
    pub shift: Shift3,
    /// Absolute difference within each couplet.
    pub err: [f64; 3],
    /// Whether the shift came from the single-axis fallback.
    pub used_fallback: bool,
}

impl ShiftEstimate {
    pub fn is_zero(&self) -> bool {
        self.shift == [0, 0, 0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftEstimator {
    err_thresh: f64,
}

impl Default for ShiftEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ERR_THRESH)
    }
}

impl ShiftEstimator {
    pub fn new(err_thresh: f64) -> Self {
        Self { err_thresh }
    }

    pub fn err_thresh(&self) -> f64 {
        self.err_thresh
    }

    /// Fuse the displacements of the axial, coronal and sagittal slices.
    ///
    /// An axis is accepted when its two observations differ by at most the
    /// error threshold; the first observation is taken as is. If no axis
    /// moves, at most one axis is corrected by [`choose_shift`], the one with
    /// the smallest nonzero magnitude.
    pub fn estimate(&self, displacements: [[i64; 2]; 3]) -> ShiftEstimate {
        let couplets = couplets(&displacements);
        let err = couplets.map(|[a, b]| (a - b).abs() as f64);

        let mut shift = [0i64; 3];
        for axis in 0..3 {
            if err[axis] <= self.err_thresh {
                shift[axis] = couplets[axis][0];
            }
        }

        let mut used_fallback = false;
        if shift == [0, 0, 0] {
            if let Some((axis, value)) = conservative_axis(&couplets) {
                debug!(axis, value, "no couplet within threshold, using single-axis fallback");
                shift[axis] = value;
                used_fallback = true;
            }
        }

        ShiftEstimate {
            displacements,
            couplets,
            shift,
            err,
            used_fallback,
        }
    }
}

/// Group the two observations of every axis.
pub fn couplets(displacements: &[[i64; 2]; 3]) -> [[i64; 2]; 3] {
    [
        [displacements[2][0], displacements[1][0]],
        [displacements[0][0], displacements[2][1]],
        [displacements[0][1], displacements[1][1]],
    ]
}

/// `sign(a) * min(|a|, |b|)` when `a` and `b` have the same sign, `0` otherwise.
pub fn choose_shift(a: i64, b: i64) -> i64 {
    if a.signum() == b.signum() {
        a.signum() * a.abs().min(b.abs())
    } else {
        0
    }
}

fn conservative_axis(couplets: &[[i64; 2]; 3]) -> Option<(usize, i64)> {
    let tentative = couplets.map(|[a, b]| choose_shift(a, b));
    tentative
        .iter()
        .enumerate()
        .filter(|(_, value)| **value != 0)
        // min_by_key keeps the first of equal keys
        .min_by_key(|(_, value)| value.abs())
        .map(|(axis, value)| (axis, *value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn couplets_pair_observations_of_the_same_axis() {
        let displacements = [[1, 2], [3, 4], [5, 6]];
        assert_eq!(couplets(&displacements), [[5, 3], [1, 6], [2, 4]]);
    }

    #[test]
    fn accepts_first_observation_within_threshold() {
        // axis 0: (3, 2), axis 1: (-2, -2), axis 2: (1, 3)
        let displacements = [[-2, 1], [2, 3], [3, -2]];
        let estimate = ShiftEstimator::default().estimate(displacements);
        assert_eq!(estimate.shift, [3, -2, 1]);
        assert_eq!(estimate.err, [1.0, 0.0, 2.0]);
        assert!(!estimate.used_fallback);
    }

    #[test]
    fn rejects_axes_beyond_threshold_independently() {
        // axis 0: (4, 4), axis 1: (0, 7), axis 2: (2, -2)
        let displacements = [[0, 2], [4, -2], [4, 7]];
        let estimate = ShiftEstimator::new(2.0).estimate(displacements);
        assert_eq!(estimate.shift, [4, 0, 0]);
        assert_eq!(estimate.err, [0.0, 7.0, 4.0]);
        assert!(!estimate.used_fallback);
    }

    #[test]
    fn fallback_accepts_single_smallest_axis() {
        // axis 0: (5, 1), axis 1: (-6, -3), axis 2: (4, -4)
        let displacements = [[-6, 4], [1, -4], [5, -3]];
        let estimate = ShiftEstimator::default().estimate(displacements);
        assert_eq!(estimate.shift, [1, 0, 0]);
        assert_eq!(estimate.err, [4.0, 3.0, 8.0]);
        assert!(estimate.used_fallback);
    }

    #[test]
    fn fallback_breaks_ties_on_first_axis() {
        // axis 0: (6, 3) -> 3, axis 1: (-3, -7) -> -3, axis 2: (0, 9) -> 0
        let displacements = [[-3, 0], [3, 9], [6, -7]];
        let estimate = ShiftEstimator::default().estimate(displacements);
        assert_eq!(estimate.shift, [3, 0, 0]);
        assert!(estimate.used_fallback);
    }

    #[test]
    fn fallback_needs_sign_agreement() {
        // axis 0: (5, -5), axis 1: (-4, 4), axis 2: (8, -1)
        let displacements = [[-4, 8], [-5, -1], [5, 4]];
        let estimate = ShiftEstimator::default().estimate(displacements);
        assert_eq!(estimate.shift, [0, 0, 0]);
        assert!(!estimate.used_fallback);
    }

    #[test]
    fn fallback_never_moves_more_than_one_axis() {
        let values = [-9, -4, -1, 0, 2, 5, 8];
        let estimator = ShiftEstimator::new(0.0);
        for &a in &values {
            for &b in &values {
                for &c in &values {
                    let displacements = [[a, b], [c, a], [b, c]];
                    let estimate = estimator.estimate(displacements);
                    if estimate.used_fallback {
                        let moved = estimate.shift.iter().filter(|v| **v != 0).count();
                        assert_eq!(moved, 1, "{displacements:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn choose_shift_is_conservative() {
        assert_eq!(choose_shift(4, 2), 2);
        assert_eq!(choose_shift(-4, -6), -4);
        assert_eq!(choose_shift(3, -3), 0);
        assert_eq!(choose_shift(0, 5), 0);
        assert_eq!(choose_shift(0, 0), 0);
    }
}
