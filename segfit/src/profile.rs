//! Breakpoint pre-search.
//!
//! With `k` fixed the segmented line is linear in `(m1, c1, m2)`, so
//! the residual can be minimized exactly for any candidate breakpoint.
//! Scanning the sample times and refining the best bracket with
//! Brent's method yields a start near the global minimum.

use crate::{
    error::FitError,
    model::{hinge_basis, Params, SegmentedLine},
    sample::{Sample, TimeWindow},
};
use argmin::{
    core::{CostFunction, Error as ArgminError, Executor, State},
    solver::brent::BrentOpt,
};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Singular values below this are treated as zero, which happens when
/// the breakpoint sits on the first or last sample and one segment has
/// no support.
const SVD_EPS: f64 = 1e-12;

const BRENT_EPS: f64 = 1e-12;
const BRENT_TOL: f64 = 1e-10;

/// Best `(m1, c1, m2)` for a fixed breakpoint `k`, and its residual.
pub(crate) fn solve_slopes(
    samples: &[Sample],
    k: f64,
    t0: f64,
) -> Result<(Params, f64), &'static str> {
    let design = DMatrix::from_fn(samples.len(), 3, |row, col| {
        hinge_basis(samples[row].time, k, t0)[col]
    });
    let observed = DVector::from_iterator(samples.len(), samples.iter().map(|s| s.displacement));
    let coeffs = design.svd(true, true).solve(&observed, SVD_EPS)?;
    let params = Params::new(k, coeffs[0], coeffs[1], coeffs[2]);
    let sse = SegmentedLine::new(t0, params).sse(samples);
    Ok((params, sse))
}

struct BreakpointCost<'a> {
    samples: &'a [Sample],
    t0: f64,
}

impl CostFunction for BreakpointCost<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, k: &f64) -> Result<f64, ArgminError> {
        solve_slopes(self.samples, *k, self.t0)
            .map(|(_, sse)| sse)
            .map_err(ArgminError::msg)
    }
}

/// Starting parameters from a scan over the distinct sample times.
pub(crate) fn seed(
    samples: &[Sample],
    window: TimeWindow,
    max_iterations: usize,
) -> Result<Params, FitError> {
    let t0 = window.start;
    let mut candidates: Vec<f64> = samples.iter().map(|s| s.time).collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    let mut best: Option<(usize, Params, f64)> = None;
    for (idx, &k) in candidates.iter().enumerate() {
        match solve_slopes(samples, k, t0) {
            Ok((params, sse)) if best.map_or(true, |(_, _, best_sse)| sse < best_sse) => {
                best = Some((idx, params, sse));
            }
            Ok(_) => {}
            Err(err) => debug!("profile; k: {k}, err: {err}"),
        }
    }
    let (idx, grid_params, grid_sse) =
        best.ok_or_else(|| FitError::Optimizer("no candidate breakpoint could be solved".into()))?;

    let lower = candidates[idx.saturating_sub(1)];
    let upper = candidates[(idx + 1).min(candidates.len() - 1)];
    let solver = BrentOpt::new(lower, upper).set_tolerance(BRENT_EPS, BRENT_TOL);
    let res = Executor::new(BreakpointCost { samples, t0 }, solver)
        .configure(|state| state.max_iters(max_iterations as u64))
        .run()
        .map_err(|err| FitError::Optimizer(err.to_string()))?;

    let refined = match res.state().get_best_param() {
        Some(&k) => solve_slopes(samples, window.clamp(k), t0).ok(),
        None => None,
    };

    let seed = match refined {
        Some((params, sse)) if sse < grid_sse => params,
        _ => grid_params,
    };
    debug!(
        "profile; candidates: {}, grid k: {}, seed k: {}, brent iterations: {}",
        candidates.len(),
        grid_params.k,
        seed.k,
        res.state().get_iter()
    );
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::{seed, solve_slopes};
    use crate::{
        model::{Params, SegmentedLine},
        sample::{Sample, TimeWindow},
    };
    use approx::assert_abs_diff_eq;

    fn samples_of(truth: Params, times: &[f64]) -> Vec<Sample> {
        let line = SegmentedLine::new(times[0], truth);
        times.iter().map(|&t| Sample::new(t, line.eval(t))).collect()
    }

    #[test]
    fn test_solve_slopes_at_true_breakpoint() {
        let truth = Params::new(3.0, 0.5, -1.0, -2.0);
        let times: Vec<f64> = (0..10).map(f64::from).collect();
        let samples = samples_of(truth, &times);
        let (params, sse) = solve_slopes(&samples, 3.0, 0.0).unwrap();
        assert_abs_diff_eq!(params.m1, truth.m1, epsilon = 1e-9);
        assert_abs_diff_eq!(params.c1, truth.c1, epsilon = 1e-9);
        assert_abs_diff_eq!(params.m2, truth.m2, epsilon = 1e-9);
        assert!(sse < 1e-18);
    }

    #[test]
    fn test_solve_slopes_at_window_edge() {
        // At the last sample the second segment has no support; the
        // minimum-norm solution leaves its slope at zero.
        let times: Vec<f64> = (0..6).map(f64::from).collect();
        let samples: Vec<Sample> = times.iter().map(|&t| Sample::new(t, 2.0 * t + 1.0)).collect();
        let (params, sse) = solve_slopes(&samples, 5.0, 0.0).unwrap();
        assert_abs_diff_eq!(params.m1, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(params.c1, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(params.m2, 0.0, epsilon = 1e-9);
        assert!(sse < 1e-18);
    }

    #[test]
    fn test_seed_between_samples() {
        let truth = Params::new(4.4, 0.0, 0.25, -0.5);
        let times: Vec<f64> = (0..12).map(f64::from).collect();
        let samples = samples_of(truth, &times);
        let window = TimeWindow::of(&samples).unwrap();
        let params = seed(&samples, window, 100).unwrap();
        assert_abs_diff_eq!(params.k, truth.k, epsilon = 1e-4);
        assert_abs_diff_eq!(params.m2, truth.m2, epsilon = 1e-3);
    }
}
