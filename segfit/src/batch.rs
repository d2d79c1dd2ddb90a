//! Fitting many independent series at once.

use crate::{
    error::FitError,
    fitter::{SegmentedFitResult, SegmentedTrendFitter, Seeding},
    sample::Sample,
};
use log::debug;
use rayon::prelude::*;
use std::fmt;

/// Outcome of one series in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem<K> {
    pub key: K,
    pub outcome: Result<SegmentedFitResult, FitError>,
}

/// Fits every `(key, samples)` pair in parallel.
///
/// Failures stay with their item; the rest of the batch is
/// unaffected. `on_item` runs once per finished item, from whichever
/// worker thread produced it. Output order matches input order.
pub fn fit_batch<K, F>(
    fitter: &SegmentedTrendFitter,
    seeding: &Seeding,
    items: Vec<(K, Vec<Sample>)>,
    on_item: F,
) -> Vec<BatchItem<K>>
where
    K: Send,
    F: Fn(&BatchItem<K>) + Sync,
{
    items
        .into_par_iter()
        .map(|(key, samples)| {
            let item = BatchItem {
                key,
                outcome: fitter.fit_with(&samples, seeding),
            };
            if let Err(err) = &item.outcome {
                debug!("batch; n: {}, err: {err}", samples.len());
            }
            on_item(&item);
            item
        })
        .collect()
}

/// Per-status counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub fitted: usize,
    pub invalid_input: usize,
    pub not_converged: usize,
}

impl BatchReport {
    pub fn from_items<K>(items: &[BatchItem<K>]) -> Self {
        items.iter().fold(Self::default(), |mut report, item| {
            report.total += 1;
            match &item.outcome {
                Ok(_) => report.fitted += 1,
                Err(err) if err.is_invalid_input() => report.invalid_input += 1,
                Err(_) => report.not_converged += 1,
            }
            report
        })
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} series: {} fitted, {} invalid, {} not converged",
            self.total, self.fitted, self.invalid_input, self.not_converged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{fit_batch, BatchReport};
    use crate::{
        error::{FitError, InvalidInput},
        fitter::{FitOptions, SegmentedTrendFitter, Seeding},
        model::{Params, SegmentedLine},
        sample::Sample,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn series(k: f64, m2: f64) -> Vec<Sample> {
        let line = SegmentedLine::new(0.0, Params::new(k, 0.0, 0.0, m2));
        (0..24)
            .map(|i| {
                let t = f64::from(i) * 0.25;
                Sample::new(t, line.eval(t))
            })
            .collect()
    }

    #[test]
    fn test_batch_isolates_failures() {
        let mut with_nan = series(2.0, -0.05);
        with_nan[7].displacement = f64::NAN;
        let items = vec![
            ("a", series(1.5, -0.02)),
            ("short", series(2.0, -0.05)[..2].to_vec()),
            ("nan", with_nan),
            ("b", series(4.0, -0.08)),
        ];

        let seen = AtomicUsize::new(0);
        let results = fit_batch(
            &SegmentedTrendFitter::default(),
            &Seeding::Profile,
            items,
            |_| {
                seen.fetch_add(1, Ordering::Relaxed);
            },
        );
        assert_eq!(seen.load(Ordering::Relaxed), 4);

        let keys: Vec<&str> = results.iter().map(|item| item.key).collect();
        assert_eq!(keys, vec!["a", "short", "nan", "b"]);

        let a = results[0].outcome.as_ref().unwrap();
        assert!((a.params.k - 1.5).abs() < 1e-6);
        assert_eq!(
            results[1].outcome,
            Err(FitError::InvalidInput(InvalidInput::TooFewSamples(2)))
        );
        assert!(results[2].outcome.as_ref().unwrap_err().is_invalid_input());
        let b = results[3].outcome.as_ref().unwrap();
        assert!((b.params.m2 + 0.08).abs() < 1e-6);

        assert_eq!(
            BatchReport::from_items(&results),
            BatchReport {
                total: 4,
                fitted: 2,
                invalid_input: 2,
                not_converged: 0,
            }
        );
    }

    #[test]
    fn test_report_counts_convergence_failures() {
        let fitter = SegmentedTrendFitter::new(FitOptions::default().max_iterations(0));
        let results = fit_batch(
            &fitter,
            &Seeding::Default,
            vec![(0, series(2.0, -0.05)), (1, series(3.0, -0.01))],
            |_| {},
        );
        let report = BatchReport::from_items(&results);
        assert_eq!(report.not_converged, 2);
        assert_eq!(report.to_string(), "2 series: 0 fitted, 0 invalid, 2 not converged");
    }
}
