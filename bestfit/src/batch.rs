use crate::{options::Batch, progress};
use anyhow::Result;
use log::warn;
use rayon::prelude::*;
use segfit::{fit_batch, BatchItem, BatchReport, FitError};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tseries::{chrono::NaiveDate, FitSummary, ReaderConfig, TimeSeries, TsError};

/// One line of the batch status file.
#[derive(Debug, Serialize, PartialEq)]
struct Row {
    path: String,
    status: &'static str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    breakpoint: Option<NaiveDate>,
    velocity_1_mm_yr: Option<f64>,
    velocity_2_mm_yr: Option<f64>,
    rmse_mm: Option<f64>,
    iterations: Option<usize>,
    error: Option<String>,
}

impl Row {
    fn failed(path: &Path, series: Option<&TimeSeries>, status: &'static str, err: String) -> Self {
        let location = series.and_then(|s| s.metadata.location());
        Self {
            path: path.display().to_string(),
            status,
            latitude: location.map(|p| p.y()),
            longitude: location.map(|p| p.x()),
            breakpoint: None,
            velocity_1_mm_yr: None,
            velocity_2_mm_yr: None,
            rmse_mm: None,
            iterations: None,
            error: Some(err),
        }
    }

    fn fitted(path: &Path, series: &TimeSeries, summary: &FitSummary) -> Self {
        let location = series.metadata.location();
        Self {
            path: path.display().to_string(),
            status: "fitted",
            latitude: location.map(|p| p.y()),
            longitude: location.map(|p| p.x()),
            breakpoint: Some(summary.breakpoint),
            velocity_1_mm_yr: Some(summary.velocity_before_mm_yr),
            velocity_2_mm_yr: Some(summary.velocity_after_mm_yr),
            rmse_mm: Some(summary.rmse_mm),
            iterations: Some(summary.iterations),
            error: None,
        }
    }

    fn from_item(item: BatchItem<(usize, PathBuf, TimeSeries)>) -> (usize, Self) {
        let (idx, path, series) = item.key;
        let row = match item.outcome {
            Ok(result) => {
                match series
                    .start_date()
                    .ok_or(TsError::Empty)
                    .and_then(|start| FitSummary::new(start, &result))
                {
                    Ok(summary) => Self::fitted(&path, &series, &summary),
                    Err(err) => Self::failed(&path, Some(&series), "invalid_input", err.to_string()),
                }
            }
            Err(err) => Self::failed(&path, Some(&series), status_of(&err), err.to_string()),
        };
        (idx, row)
    }
}

fn status_of(err: &FitError) -> &'static str {
    if err.is_invalid_input() {
        "invalid_input"
    } else {
        "not_converged"
    }
}

impl Batch {
    pub fn run(&self) -> Result<()> {
        let config = ReaderConfig::from(&self.series);
        let fitter = self.fitting.fitter();
        let seeding = self.fitting.seeding();

        let loaded: Vec<(usize, &PathBuf, Result<TimeSeries, TsError>)> = self
            .input
            .par_iter()
            .enumerate()
            .map(|(idx, path)| (idx, path, TimeSeries::from_path(path, &config)))
            .collect();

        let mut rows = Vec::with_capacity(loaded.len());
        let mut items = Vec::with_capacity(loaded.len());
        for (idx, path, series) in loaded {
            match series {
                Ok(series) => {
                    let samples = series.samples();
                    items.push(((idx, path.clone(), series), samples));
                }
                Err(err) => {
                    warn!("{}: {err}", path.display());
                    rows.push((idx, Row::failed(path, None, "read_error", err.to_string())));
                }
            }
        }
        let unreadable = rows.len();

        let pb = progress::bar("Fitting".to_string(), items.len() as u64, self.quiet);
        let fitted = fit_batch(&fitter, &seeding, items, |_| pb.inc(1));
        pb.finish_and_clear();

        let report = BatchReport::from_items(&fitted);
        rows.extend(fitted.into_iter().map(Row::from_item));
        rows.sort_by_key(|(idx, _)| *idx);

        let out: Box<dyn Write> = match &self.out {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout().lock()),
        };
        write_rows(out, rows.into_iter().map(|(_, row)| row))?;

        eprintln!("{report}, {unreadable} unreadable");
        Ok(())
    }
}

fn write_rows<W: Write>(wtr: W, rows: impl Iterator<Item = Row>) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(wtr);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
