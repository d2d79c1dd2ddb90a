use segfit::FitError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Csv(#[from] csv::Error),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("line {line}: missing field '{column}'")]
    MissingField { line: u64, column: String },

    #[error("line {line}: invalid date '{value}', {source}")]
    Date {
        line: u64,
        value: String,
        source: chrono::ParseError,
    },

    #[error("line {line}: invalid value '{value}', {source}")]
    Value {
        line: u64,
        value: String,
        source: std::num::ParseFloatError,
    },

    #[error("time series has no observations")]
    Empty,

    #[error("unknown length unit '{0}'")]
    Unit(String),

    #[error("{0} years from the first observation is not a valid date")]
    DateRange(f64),

    #[error("{0}")]
    Fit(#[from] FitError),
}
