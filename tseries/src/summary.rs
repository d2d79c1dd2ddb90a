use crate::{series::date_after, TsError};
use chrono::NaiveDate;
use segfit::SegmentedFitResult;
use std::fmt;

const MM_PER_M: f64 = 1000.0;

/// A segmented fit expressed in calendar dates and mm/yr.
///
/// Assumes samples in decimal years since `start` and displacement in
/// meters, as produced by [`crate::TimeSeries::samples`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FitSummary {
    /// Date of the first observation.
    pub start: NaiveDate,

    /// Date of the rate change.
    pub breakpoint: NaiveDate,

    /// Rate change in decimal years after `start`.
    pub breakpoint_years: f64,

    pub velocity_before_mm_yr: f64,

    pub velocity_after_mm_yr: f64,

    /// Fitted displacement at the breakpoint.
    pub displacement_at_break_mm: f64,

    pub rmse_mm: f64,

    pub n_samples: usize,

    pub iterations: usize,
}

impl FitSummary {
    pub fn new(start: NaiveDate, result: &SegmentedFitResult) -> Result<Self, TsError> {
        let years = result.params.k;
        Ok(Self {
            start,
            breakpoint: date_after(start, years)?,
            breakpoint_years: years,
            velocity_before_mm_yr: result.params.m1 * MM_PER_M,
            velocity_after_mm_yr: result.params.m2 * MM_PER_M,
            displacement_at_break_mm: result.value_at_breakpoint() * MM_PER_M,
            rmse_mm: result.rmse() * MM_PER_M,
            n_samples: result.n_samples,
            iterations: result.iterations,
        })
    }

    /// Change in velocity across the breakpoint; negative means the
    /// ground started sinking faster.
    pub fn velocity_change_mm_yr(&self) -> f64 {
        self.velocity_after_mm_yr - self.velocity_before_mm_yr
    }
}

impl fmt::Display for FitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Change Point Detected: {}",
            self.breakpoint.format("%Y-%m-%d")
        )?;
        writeln!(f, "Velocity 1: {:.2} mm/yr", self.velocity_before_mm_yr)?;
        writeln!(f, "Velocity 2: {:.2} mm/yr", self.velocity_after_mm_yr)?;
        write!(
            f,
            "RMSE: {:.2} mm ({} samples, {} iterations)",
            self.rmse_mm, self.n_samples, self.iterations
        )
    }
}
