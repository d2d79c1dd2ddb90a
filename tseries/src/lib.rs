//! # InSAR displacement time series
//!
//! `tseries` reads per-pixel displacement time series exported as
//! delimited text with a leading `#` metadata block, turns them into
//! [`segfit::Sample`]s and summarizes segmented fits in calendar
//! dates and mm/yr.

mod error;
mod metadata;
mod series;
mod summary;
mod units;

pub use {
    crate::{
        error::TsError,
        metadata::Metadata,
        series::{Observation, ReaderConfig, TimeSeries},
        summary::FitSummary,
        units::LengthUnit,
    },
    chrono, segfit,
};

/// Mean length of a year in days, used to convert dates into decimal
/// years.
pub const DAYS_PER_YEAR: f64 = 365.25;
