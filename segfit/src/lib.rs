//! # Segmented trend fitting
//!
//! `segfit` fits a continuous two-segment linear trend to a displacement
//! time series and reports where the displacement rate changes.
//!
//! ```
//! use segfit::{Sample, SegmentedTrendFitter};
//!
//! let samples: Vec<Sample> = [0.0, 0.0, 0.0, -0.1, -0.2, -0.3]
//!     .iter()
//!     .enumerate()
//!     .map(|(year, &disp)| Sample::new(year as f64, disp))
//!     .collect();
//!
//! let fit = SegmentedTrendFitter::default().fit(&samples, None).unwrap();
//! assert!((fit.params.k - 2.0).abs() < 1e-3);
//! ```

pub mod batch;
mod error;
mod fitter;
mod math;
mod model;
mod profile;
mod sample;

pub use crate::{
    batch::{fit_batch, BatchItem, BatchReport},
    error::{ConvergenceFailure, FitError, InvalidInput},
    fitter::{
        FitOptions, SegmentedFitResult, SegmentedTrendFitter, Seeding, Termination,
        DEFAULT_SLOPE_AFTER,
    },
    model::{Params, SegmentedLine},
    sample::{Sample, TimeWindow},
};

/// The model has four free parameters, so anything less is
/// under-determined.
pub const MIN_SAMPLES: usize = 4;

/// Fit `samples` with default options, starting from `initial_guess`
/// or the default subsidence-shaped guess.
pub fn fit(
    samples: &[Sample],
    initial_guess: Option<Params>,
) -> Result<SegmentedFitResult, FitError> {
    SegmentedTrendFitter::default().fit(samples, initial_guess)
}
