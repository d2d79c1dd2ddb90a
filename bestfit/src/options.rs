use anyhow::{anyhow, Error as AnyError};
use clap::{Args, Parser, ValueEnum};
use segfit::{FitOptions, Params, SegmentedTrendFitter, Seeding};
use std::{path::PathBuf, str::FromStr, time::Duration};
use tseries::{LengthUnit, ReaderConfig};

/// Find displacement-rate change points in InSAR time series.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub enum Cli {
    /// Fit a single time series and report its change point.
    Fit(Fit),

    /// Fit many time series in parallel and write one status row per
    /// input.
    Batch(Batch),
}

#[derive(Debug, Clone, Args)]
pub struct Fit {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub fitting: FitArgs,

    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Also print the fitted curve as CSV, sampled at this many
    /// points.
    #[arg(long)]
    pub curve: Option<usize>,

    /// Input time series (CSV).
    pub input: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct Batch {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub fitting: FitArgs,

    /// Output CSV, defaults to stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Don't draw a progress bar.
    #[arg(short, long)]
    pub quiet: bool,

    /// Input time series (CSV).
    #[arg(required = true)]
    pub input: Vec<PathBuf>,
}

/// Layout of the input files.
#[derive(Debug, Clone, Args)]
pub struct SeriesArgs {
    /// Header of the date column.
    #[arg(long, default_value = "Date")]
    pub date_column: String,

    /// Header of the displacement column.
    #[arg(long, default_value = "Displacement_m")]
    pub value_column: String,

    /// Date format, in strftime syntax.
    #[arg(long, default_value = "%Y%m%d")]
    pub date_format: String,

    /// Displacement unit: m, cm or mm.
    #[arg(long, default_value_t = LengthUnit::Meters)]
    pub unit: LengthUnit,

    /// Displacement value marking missing observations; "nan" drops
    /// NaN rows.
    #[arg(long, allow_hyphen_values = true)]
    pub nodata: Option<f64>,
}

impl From<&SeriesArgs> for ReaderConfig {
    fn from(args: &SeriesArgs) -> Self {
        Self {
            date_column: args.date_column.clone(),
            value_column: args.value_column.clone(),
            date_format: args.date_format.clone(),
            unit: args.unit,
            nodata: args.nodata,
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Args)]
pub struct FitArgs {
    /// Maximum optimizer iterations per fit.
    #[arg(long, default_value_t = 400)]
    pub max_iters: usize,

    /// Give up on a single fit after this many milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Scan every sample time as a breakpoint before optimizing.
    #[arg(long, conflicts_with = "guess")]
    pub profile: bool,

    /// Initial guess "k,m1,c1,m2" in years since the first date and
    /// meters. Repeat to fit from several starts and keep the best.
    #[arg(long, allow_hyphen_values = true)]
    pub guess: Vec<Guess>,
}

impl FitArgs {
    pub fn fitter(&self) -> SegmentedTrendFitter {
        let mut options = FitOptions::default().max_iterations(self.max_iters);
        if let Some(ms) = self.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        SegmentedTrendFitter::new(options)
    }

    pub fn seeding(&self) -> Seeding {
        match self.guess.as_slice() {
            _ if self.profile => Seeding::Profile,
            [] => Seeding::Default,
            [Guess(guess)] => Seeding::Guess(*guess),
            guesses => Seeding::MultiStart(guesses.iter().map(|Guess(p)| *p).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human readable report.
    Text,

    /// A single JSON object.
    Json,
}

#[derive(Clone, Debug, Copy, PartialEq)]
pub struct Guess(pub Params);

impl FromStr for Guess {
    type Err = AnyError;
    fn from_str(s: &str) -> Result<Self, AnyError> {
        let vals = s
            .split(',')
            .map(|v| f64::from_str(v.trim()))
            .collect::<Result<Vec<f64>, _>>()?;
        match vals.as_slice() {
            &[k, m1, c1, m2] => Ok(Self(Params::new(k, m1, c1, m2))),
            _ => Err(anyhow!("not a valid k,m1,c1,m2")),
        }
    }
}
