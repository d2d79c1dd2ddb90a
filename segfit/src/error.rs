use crate::{model::Params, MIN_SAMPLES};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("invalid input, {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("no convergence after {iterations} iterations ({reason}); sse: {sse}, last params: {params}")]
    Convergence {
        params: Params,
        iterations: usize,
        sse: f64,
        reason: ConvergenceFailure,
    },

    #[error("breakpoint search failed, {0}")]
    Optimizer(String),
}

impl FitError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    pub fn is_convergence(&self) -> bool {
        matches!(self, Self::Convergence { .. } | Self::Optimizer(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidInput {
    #[error("need at least {MIN_SAMPLES} samples, got {0}")]
    TooFewSamples(usize),

    #[error("all sample times are {0}")]
    ZeroTimeSpan(f64),

    #[error("non-finite {field} at sample {index}")]
    NonFinite { index: usize, field: &'static str },

    #[error("non-finite initial guess {0}")]
    NonFiniteGuess(Params),

    #[error("multi-start needs at least one guess")]
    NoGuesses,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceFailure {
    #[error("iteration limit reached")]
    MaxIterations,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
