use crate::options::{Fit, Format};
use anyhow::Result;
use segfit::{Params, SegmentedFitResult, Termination};
use serde::Serialize;
use std::io::{self, Write};
use tseries::{chrono::NaiveDate, FitSummary, ReaderConfig, TimeSeries};

#[derive(Serialize)]
struct Report<'a> {
    input: String,
    source_crs: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    raster_cell: Option<(usize, usize)>,
    #[serde(flatten)]
    summary: FitSummary,
    params: Params,
    sse: f64,
    termination: Termination,
    #[serde(skip_serializing_if = "Option::is_none")]
    curve: Option<Vec<CurvePoint>>,
}

#[derive(Debug, Serialize)]
struct CurvePoint {
    date: NaiveDate,
    years: f64,
    displacement_m: f64,
}

impl Fit {
    pub fn run(&self) -> Result<()> {
        let config = ReaderConfig::from(&self.series);
        let series = TimeSeries::from_path(&self.input, &config)?;
        let (result, summary) = series.fit(&self.fitting.fitter(), &self.fitting.seeding())?;
        let curve = self
            .curve
            .map(|n| curve_points(&series, &result, n))
            .transpose()?;

        let mut stdout = io::stdout().lock();
        match self.format {
            Format::Text => {
                writeln!(stdout, "{summary}")?;
                if let Some(location) = series.metadata.location() {
                    writeln!(
                        stdout,
                        "Location: {:.6}, {:.6}",
                        location.y(),
                        location.x()
                    )?;
                }
                if let Some(curve) = curve {
                    write_curve(&mut stdout, curve)?;
                }
            }
            Format::Json => {
                let report = report(
                    self.input.display().to_string(),
                    &series,
                    &result,
                    summary,
                    curve,
                );
                serde_json::to_writer_pretty(&mut stdout, &report)?;
                writeln!(stdout)?;
            }
        }
        Ok(())
    }
}

fn report<'a>(
    input: String,
    series: &'a TimeSeries,
    result: &SegmentedFitResult,
    summary: FitSummary,
    curve: Option<Vec<CurvePoint>>,
) -> Report<'a> {
    let location = series.metadata.location();
    Report {
        input,
        source_crs: series.metadata.source_crs(),
        latitude: location.map(|p| p.y()),
        longitude: location.map(|p| p.x()),
        raster_cell: series.metadata.raster_cell(),
        summary,
        params: result.params,
        sse: result.sse,
        termination: result.termination,
        curve,
    }
}

/// The fitted line at `n` evenly spaced dates.
fn curve_points(
    series: &TimeSeries,
    result: &SegmentedFitResult,
    n: usize,
) -> Result<Vec<CurvePoint>> {
    result
        .curve(n)
        .map(|(years, displacement_m)| -> Result<CurvePoint> {
            Ok(CurvePoint {
                date: series.date_at(years)?,
                years,
                displacement_m,
            })
        })
        .collect()
}

/// Writes the curve as `date,years,displacement_m` rows.
fn write_curve<W: Write>(wtr: W, curve: Vec<CurvePoint>) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(wtr);
    for point in curve {
        wtr.serialize(point)?;
    }
    wtr.flush()?;
    Ok(())
}
