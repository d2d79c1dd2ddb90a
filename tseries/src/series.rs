use crate::{
    metadata::Metadata, summary::FitSummary, units::LengthUnit, TsError, DAYS_PER_YEAR,
};
use chrono::{Days, NaiveDate};
use itertools::Itertools;
use log::{debug, warn};
use segfit::{Sample, SegmentedFitResult, SegmentedTrendFitter, Seeding};
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

/// Layout of a time series file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Header of the date column.
    pub date_column: String,

    /// Header of the displacement column.
    pub value_column: String,

    /// `chrono` format of the date column.
    pub date_format: String,

    /// Unit of the displacement column.
    pub unit: LengthUnit,

    /// Displacement marking a missing observation; matching rows are
    /// dropped. A NaN sentinel drops NaN values.
    pub nodata: Option<f64>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            date_column: "Date".to_string(),
            value_column: "Displacement_m".to_string(),
            date_format: "%Y%m%d".to_string(),
            unit: LengthUnit::Meters,
            nodata: None,
        }
    }
}

impl ReaderConfig {
    fn is_nodata(&self, value: f64) -> bool {
        match self.nodata {
            Some(sentinel) if sentinel.is_nan() => value.is_nan(),
            Some(sentinel) => value == sentinel,
            None => false,
        }
    }
}

/// One dated displacement, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub displacement_m: f64,
}

/// A pixel's displacement history, sorted by date.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub metadata: Metadata,
    observations: Vec<Observation>,
}

impl TimeSeries {
    pub fn new(metadata: Metadata, mut observations: Vec<Observation>) -> Self {
        observations.sort_by_key(|obs| obs.date);
        let duplicates = observations
            .iter()
            .tuple_windows()
            .filter(|(a, b)| a.date == b.date)
            .count();
        if duplicates > 0 {
            warn!("time series has {duplicates} duplicate dates");
        }
        Self {
            metadata,
            observations,
        }
    }

    pub fn from_path(path: &Path, config: &ReaderConfig) -> Result<Self, TsError> {
        let file = File::open(path)?;
        let series = Self::from_reader(BufReader::new(file), config)?;
        debug!(
            "read {}; observations: {}, metadata entries: {}",
            path.display(),
            series.len(),
            series.metadata.len()
        );
        Ok(series)
    }

    pub fn from_reader<R: BufRead>(rdr: R, config: &ReaderConfig) -> Result<Self, TsError> {
        let mut metadata = Metadata::default();
        let mut body = String::new();
        // Number of lines consumed before the column header.
        let mut preamble_lines = 0;
        let mut in_preamble = true;

        for line in rdr.lines() {
            let line = line?;
            if in_preamble {
                let trimmed = line.trim();
                if let Some(comment) = trimmed.strip_prefix('#') {
                    metadata.push_line(comment);
                    preamble_lines += 1;
                    continue;
                }
                if trimmed.is_empty() {
                    preamble_lines += 1;
                    continue;
                }
                in_preamble = false;
            }
            body.push_str(&line);
            body.push('\n');
        }

        let mut csv_rdr = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let headers = csv_rdr.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TsError::MissingColumn(name.to_string()))
        };
        let date_idx = column(&config.date_column)?;
        let value_idx = column(&config.value_column)?;

        let mut observations = Vec::new();
        let mut dropped = 0;
        for record in csv_rdr.records() {
            let record = record?;
            let line = preamble_lines + record.position().map_or(0, |pos| pos.line());
            let raw_date = field(&record, date_idx, line, &config.date_column)?;
            let date = NaiveDate::parse_from_str(raw_date, &config.date_format).map_err(|source| {
                TsError::Date {
                    line,
                    value: raw_date.to_string(),
                    source,
                }
            })?;

            let raw_value = field(&record, value_idx, line, &config.value_column)?;
            if raw_value.is_empty() {
                dropped += 1;
                continue;
            }
            let value: f64 = raw_value.parse().map_err(|source| TsError::Value {
                line,
                value: raw_value.to_string(),
                source,
            })?;
            if config.is_nodata(value) {
                dropped += 1;
                continue;
            }

            observations.push(Observation {
                date,
                displacement_m: config.unit.to_meters(value),
            });
        }

        if dropped > 0 {
            warn!("dropped {dropped} rows without displacement");
        }
        if observations.is_empty() {
            return Err(TsError::Empty);
        }
        Ok(Self::new(metadata, observations))
    }

    /// Writes the metadata block, a blank line, then the columns
    /// named in `config`, displacement in `config.unit`.
    pub fn write<W: Write>(&self, mut wtr: W, config: &ReaderConfig) -> Result<(), TsError> {
        for (key, value) in self.metadata.iter() {
            if value.is_empty() {
                writeln!(wtr, "# {key}")?;
            } else {
                writeln!(wtr, "# {key},{value}")?;
            }
        }
        if !self.metadata.is_empty() {
            writeln!(wtr)?;
        }

        let mut csv_wtr = csv::Writer::from_writer(wtr);
        csv_wtr.write_record([config.date_column.as_str(), config.value_column.as_str()])?;
        for obs in &self.observations {
            csv_wtr.write_record([
                obs.date.format(&config.date_format).to_string(),
                config.unit.from_meters(obs.displacement_m).to_string(),
            ])?;
        }
        csv_wtr.flush()?;
        Ok(())
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.observations.first().map(|obs| obs.date)
    }

    /// Samples in decimal years since the first observation and
    /// meters.
    pub fn samples(&self) -> Vec<Sample> {
        let Some(start) = self.start_date() else {
            return Vec::new();
        };
        self.observations
            .iter()
            .map(|obs| {
                let days = (obs.date - start).num_days() as f64;
                Sample::new(days / DAYS_PER_YEAR, obs.displacement_m)
            })
            .collect()
    }

    /// The calendar date `years` after the first observation, truncated
    /// to whole days.
    pub fn date_at(&self, years: f64) -> Result<NaiveDate, TsError> {
        let start = self.start_date().ok_or(TsError::Empty)?;
        date_after(start, years)
    }

    /// Fits the series and summarizes the result in dates and mm/yr.
    pub fn fit(
        &self,
        fitter: &SegmentedTrendFitter,
        seeding: &Seeding,
    ) -> Result<(SegmentedFitResult, FitSummary), TsError> {
        let start = self.start_date().ok_or(TsError::Empty)?;
        let result = fitter.fit_with(&self.samples(), seeding)?;
        let summary = FitSummary::new(start, &result)?;
        Ok((result, summary))
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    idx: usize,
    line: u64,
    column: &str,
) -> Result<&'r str, TsError> {
    record.get(idx).ok_or_else(|| TsError::MissingField {
        line,
        column: column.to_string(),
    })
}

pub(crate) fn date_after(start: NaiveDate, years: f64) -> Result<NaiveDate, TsError> {
    let days = (years * DAYS_PER_YEAR).floor();
    let date = if !days.is_finite() || days.abs() > f64::from(u32::MAX) {
        None
    } else if days >= 0.0 {
        start.checked_add_days(Days::new(days as u64))
    } else {
        start.checked_sub_days(Days::new(-days as u64))
    };
    date.ok_or(TsError::DateRange(years))
}
