use crate::{error::InvalidInput, MIN_SAMPLES};

/// A single displacement observation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Observation time, any consistent unit (decimal years for
    /// velocities in units per year).
    pub time: f64,

    /// Displacement at `time`.
    pub displacement: f64,
}

impl Sample {
    pub fn new(time: f64, displacement: f64) -> Self {
        Self { time, displacement }
    }
}

impl From<(f64, f64)> for Sample {
    fn from((time, displacement): (f64, f64)) -> Self {
        Self { time, displacement }
    }
}

/// The observed time range of a sample set.
///
/// The breakpoint of every fit is confined to this window.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    /// Validates `samples` and returns their time range.
    ///
    /// Rejects short inputs, non-finite values and a zero-width time
    /// range before anything reaches the optimizer.
    pub fn of(samples: &[Sample]) -> Result<Self, InvalidInput> {
        if samples.len() < MIN_SAMPLES {
            return Err(InvalidInput::TooFewSamples(samples.len()));
        }

        let mut start = f64::INFINITY;
        let mut end = f64::NEG_INFINITY;
        for (index, sample) in samples.iter().enumerate() {
            if !sample.time.is_finite() {
                return Err(InvalidInput::NonFinite {
                    index,
                    field: "time",
                });
            }
            if !sample.displacement.is_finite() {
                return Err(InvalidInput::NonFinite {
                    index,
                    field: "displacement",
                });
            }
            start = start.min(sample.time);
            end = end.max(sample.time);
        }

        // Time values are finite and non-empty at this point.
        if start >= end {
            return Err(InvalidInput::ZeroTimeSpan(start));
        }

        Ok(Self { start, end })
    }

    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        self.start + self.span() / 2.0
    }

    /// Projects `t` onto the window.
    pub fn clamp(&self, t: f64) -> f64 {
        t.clamp(self.start, self.end)
    }

    pub fn contains(&self, t: f64) -> bool {
        (self.start..=self.end).contains(&t)
    }
}
