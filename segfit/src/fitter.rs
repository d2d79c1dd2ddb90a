use crate::{
    error::{ConvergenceFailure, FitError, InvalidInput},
    math::linspace,
    model::{Params, SegmentedLine},
    profile,
    sample::{Sample, TimeWindow},
};
use log::debug;
use nalgebra::{Matrix4, Vector4};
use std::time::{Duration, Instant};

/// Default first guess for the post-break slope. Tuned for subsidence
/// (flat, then sinking); other signal shapes should pass their own
/// guess.
pub const DEFAULT_SLOPE_AFTER: f64 = -0.1;

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Floor for the Marquardt scaling of parameters the data does not
/// constrain, e.g. `m2` while every sample precedes `k`.
const MIN_SCALE: f64 = 1e-12;

/// Optimizer budget and tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,

    /// Relative cost reduction below which an accepted step ends
    /// the fit.
    pub ftol: f64,

    /// Relative step length below which the fit ends.
    pub xtol: f64,

    /// Max-norm of the projected gradient below which the fit ends.
    pub gtol: f64,

    /// Wall-clock budget for a single fit (defaults to none).
    pub timeout: Option<Duration>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            timeout: None,
        }
    }
}

impl FitOptions {
    #[must_use]
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    #[must_use]
    pub fn tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How the optimizer is started.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Seeding {
    /// Breakpoint at the temporal midpoint, flat first segment through
    /// the first observation, then [`DEFAULT_SLOPE_AFTER`].
    #[default]
    Default,

    /// A single caller-supplied start.
    Guess(Params),

    /// Fit from every guess and keep the lowest residual.
    MultiStart(Vec<Params>),

    /// Search every sample time as a breakpoint with the slopes
    /// solved in closed form, refine the best one, then optimize all
    /// four parameters from there.
    Profile,
}

/// Why an optimization run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// The model passes through every sample.
    ExactFit,
    Gradient,
    CostReduction,
    StepSize,
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentedFitResult {
    pub params: Params,

    /// Time range of the fitted samples; `window.start` is `t0`.
    pub window: TimeWindow,

    /// Residual sum of squares at `params`.
    pub sse: f64,

    pub n_samples: usize,

    /// Optimizer iterations of the run that produced `params`.
    pub iterations: usize,

    pub termination: Termination,
}

impl SegmentedFitResult {
    pub fn t0(&self) -> f64 {
        self.window.start
    }

    pub fn line(&self) -> SegmentedLine {
        SegmentedLine::new(self.t0(), self.params)
    }

    pub fn eval(&self, t: f64) -> f64 {
        self.line().eval(t)
    }

    pub fn value_at_breakpoint(&self) -> f64 {
        self.line().value_at_breakpoint()
    }

    /// Root mean squared residual.
    pub fn rmse(&self) -> f64 {
        // n_samples is never zero for a successful fit.
        (self.sse / self.n_samples as f64).sqrt()
    }

    /// `n` evenly spaced `(time, value)` points across the fitted
    /// window.
    pub fn curve(&self, n: usize) -> impl Iterator<Item = (f64, f64)> {
        let line = self.line();
        linspace(self.window.start, self.window.end, n).map(move |t| (t, line.eval(t)))
    }
}

/// Least-squares fit of a continuous two-segment line.
///
/// The breakpoint is confined to the observed time window by
/// projecting every trial point onto it. The problem is non-convex in
/// the breakpoint, so a single start may settle in a local minimum;
/// see [`Seeding`] for more robust starts and check
/// [`SegmentedFitResult::sse`] to judge the fit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentedTrendFitter {
    options: FitOptions,
}

impl SegmentedTrendFitter {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// The starting point used when the caller supplies none.
    pub fn default_guess(samples: &[Sample], window: TimeWindow) -> Params {
        let first = samples
            .iter()
            .min_by(|a, b| a.time.total_cmp(&b.time))
            .map_or(0.0, |s| s.displacement);
        Params::new(window.midpoint(), 0.0, first, DEFAULT_SLOPE_AFTER)
    }

    pub fn fit(
        &self,
        samples: &[Sample],
        initial_guess: Option<Params>,
    ) -> Result<SegmentedFitResult, FitError> {
        let window = TimeWindow::of(samples)?;
        let guess = match initial_guess {
            Some(guess) => check_guess(guess)?,
            None => Self::default_guess(samples, window),
        };
        self.optimize(samples, window, guess)
    }

    /// Fits from each of `guesses` and returns the lowest-residual
    /// result, or the first failure when none converge.
    pub fn fit_multi_start(
        &self,
        samples: &[Sample],
        guesses: &[Params],
    ) -> Result<SegmentedFitResult, FitError> {
        let window = TimeWindow::of(samples)?;
        if guesses.is_empty() {
            return Err(InvalidInput::NoGuesses.into());
        }
        for guess in guesses {
            check_guess(*guess)?;
        }

        let mut best: Option<SegmentedFitResult> = None;
        let mut first_err = None;
        for guess in guesses {
            match self.optimize(samples, window, *guess) {
                Ok(result) if best.map_or(true, |b| result.sse < b.sse) => best = Some(result),
                Ok(_) => {}
                Err(err) => {
                    debug!("multi-start; guess: {guess}, err: {err}");
                    first_err.get_or_insert(err);
                }
            }
        }

        match (best, first_err) {
            (Some(result), _) => Ok(result),
            (None, Some(err)) => Err(err),
            (None, None) => Err(InvalidInput::NoGuesses.into()),
        }
    }

    /// Seeds the optimizer with a breakpoint search over the sample
    /// times before fitting all four parameters.
    pub fn fit_profiled(&self, samples: &[Sample]) -> Result<SegmentedFitResult, FitError> {
        let window = TimeWindow::of(samples)?;
        let seed = profile::seed(samples, window, self.options.max_iterations)?;
        self.optimize(samples, window, seed)
    }

    pub fn fit_with(
        &self,
        samples: &[Sample],
        seeding: &Seeding,
    ) -> Result<SegmentedFitResult, FitError> {
        match seeding {
            Seeding::Default => self.fit(samples, None),
            Seeding::Guess(guess) => self.fit(samples, Some(*guess)),
            Seeding::MultiStart(guesses) => self.fit_multi_start(samples, guesses),
            Seeding::Profile => self.fit_profiled(samples),
        }
    }

    /// Projected Levenberg-Marquardt over `(k, m1, c1, m2)`.
    fn optimize(
        &self,
        samples: &[Sample],
        window: TimeWindow,
        guess: Params,
    ) -> Result<SegmentedFitResult, FitError> {
        let FitOptions {
            max_iterations,
            ftol,
            xtol,
            gtol,
            timeout,
        } = self.options;
        let now = Instant::now();
        let t0 = window.start;
        let sse_at = |p: &Vector4<f64>| SegmentedLine::new(t0, Params::from_vector(p)).sse(samples);

        let mut p = guess.to_vector();
        p[0] = window.clamp(p[0]);
        let mut cost = sse_at(&p);
        let mut damping = INITIAL_DAMPING;

        let finish = |p: &Vector4<f64>,
                      sse: f64,
                      iterations: usize,
                      termination: Termination|
         -> Result<SegmentedFitResult, FitError> {
            debug!(
                "fit; n: {}, iterations: {iterations}, sse: {sse:e}, termination: {termination:?}, exec: {:?}",
                samples.len(),
                now.elapsed()
            );
            Ok(SegmentedFitResult {
                params: Params::from_vector(p),
                window,
                sse,
                n_samples: samples.len(),
                iterations,
                termination,
            })
        };
        let fail = |p: &Vector4<f64>,
                    sse: f64,
                    iterations: usize,
                    reason: ConvergenceFailure|
         -> Result<SegmentedFitResult, FitError> {
            debug!("fit; n: {}, iterations: {iterations}, failed: {reason}", samples.len());
            Err(FitError::Convergence {
                params: Params::from_vector(p),
                iterations,
                sse,
                reason,
            })
        };

        for iteration in 1..=max_iterations {
            if let Some(timeout) = timeout {
                if now.elapsed() >= timeout {
                    return fail(&p, cost, iteration - 1, ConvergenceFailure::Timeout(timeout));
                }
            }

            if cost == 0.0 {
                return finish(&p, cost, iteration - 1, Termination::ExactFit);
            }

            let line = SegmentedLine::new(t0, Params::from_vector(&p));
            let (jtj, mut gradient) = normal_equations(&line, samples);
            let pinned = breakpoint_pinned(p[0], gradient[0], window);
            if pinned {
                gradient[0] = 0.0;
            }
            if gradient.amax() <= gtol {
                return finish(&p, cost, iteration - 1, Termination::Gradient);
            }

            loop {
                let mut damped = jtj;
                for i in 0..4 {
                    damped[(i, i)] += damping * jtj[(i, i)].max(MIN_SCALE);
                }
                if pinned {
                    // Hold k on its bound and step the other three.
                    damped.row_mut(0).fill(0.0);
                    damped.column_mut(0).fill(0.0);
                    damped[(0, 0)] = 1.0;
                }
                let Some(cholesky) = damped.cholesky() else {
                    damping *= 10.0;
                    if damping > MAX_DAMPING {
                        return finish(&p, cost, iteration, Termination::StepSize);
                    }
                    continue;
                };

                let mut trial = p - cholesky.solve(&gradient);
                trial[0] = window.clamp(trial[0]);
                let small_step = (trial - p).norm() <= xtol * (xtol + p.norm());
                let trial_cost = sse_at(&trial);

                if trial_cost < cost {
                    let reduction = cost - trial_cost;
                    p = trial;
                    cost = trial_cost;
                    damping = (damping / 10.0).max(MIN_DAMPING);
                    if cost == 0.0 {
                        return finish(&p, cost, iteration, Termination::ExactFit);
                    }
                    if reduction <= ftol * cost {
                        return finish(&p, cost, iteration, Termination::CostReduction);
                    }
                    if small_step {
                        return finish(&p, cost, iteration, Termination::StepSize);
                    }
                    break;
                }

                // No decrease even for a vanishing step: nothing left
                // to gain locally.
                damping *= 10.0;
                if small_step || damping > MAX_DAMPING {
                    return finish(&p, cost, iteration, Termination::StepSize);
                }
            }
        }

        fail(&p, cost, max_iterations, ConvergenceFailure::MaxIterations)
    }
}

fn check_guess(guess: Params) -> Result<Params, InvalidInput> {
    if guess.is_finite() {
        Ok(guess)
    } else {
        Err(InvalidInput::NonFiniteGuess(guess))
    }
}

/// `(JᵀJ, Jᵀr)` with residuals `r = f(t) - y`.
fn normal_equations(line: &SegmentedLine, samples: &[Sample]) -> (Matrix4<f64>, Vector4<f64>) {
    let mut jtj = Matrix4::zeros();
    let mut jtr = Vector4::zeros();
    for sample in samples {
        let row = Vector4::from(line.jacobian(sample.time));
        let residual = line.eval(sample.time) - sample.displacement;
        jtj += row * row.transpose();
        jtr += row * residual;
    }
    (jtj, jtr)
}

/// True when `k` sits on a window bound and descent along `dk`, the
/// breakpoint component of the gradient, points out of the window.
fn breakpoint_pinned(k: f64, dk: f64, window: TimeWindow) -> bool {
    (k <= window.start && dk > 0.0) || (k >= window.end && dk < 0.0)
}

#[cfg(test)]
mod tests {
    use super::{FitOptions, SegmentedTrendFitter, Seeding, Termination};
    use crate::{
        error::{ConvergenceFailure, FitError, InvalidInput},
        model::{Params, SegmentedLine},
        sample::Sample,
    };
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};
    use std::time::Duration;

    fn synthetic(truth: Params, n: usize, dt: f64) -> Vec<Sample> {
        let line = SegmentedLine::new(0.0, truth);
        (0..n)
            .map(|i| {
                let t = i as f64 * dt;
                Sample::new(t, line.eval(t))
            })
            .collect()
    }

    fn flat_then_sinking() -> Vec<Sample> {
        [0.0, 0.0, 0.0, -0.1, -0.2, -0.3]
            .iter()
            .enumerate()
            .map(|(year, &disp)| Sample::new(year as f64, disp))
            .collect()
    }

    #[test]
    fn test_flat_then_sinking() {
        let result = SegmentedTrendFitter::default()
            .fit(&flat_then_sinking(), None)
            .unwrap();
        let Params { k, m1, c1, m2 } = result.params;
        assert_abs_diff_eq!(k, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m1, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c1, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(m2, -0.1, epsilon = 1e-6);
        assert!(result.sse < 1e-12);
        assert_eq!(result.n_samples, 6);
    }

    #[test]
    fn test_exact_recovery_from_truth() {
        let truth = Params::new(2.3, -0.004, 0.01, -0.035);
        let samples = synthetic(truth, 60, 0.1);
        let result = SegmentedTrendFitter::default()
            .fit(&samples, Some(truth))
            .unwrap();
        assert_abs_diff_eq!(result.params.k, truth.k, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.m1, truth.m1, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.c1, truth.c1, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.m2, truth.m2, epsilon = 1e-6);
        assert!(result.sse < 1e-20);
        assert!(result.rmse() < 1e-10);
    }

    #[test]
    fn test_exact_recovery_from_default_guess() {
        let truth = Params::new(2.3, -0.004, 0.01, -0.035);
        let samples = synthetic(truth, 60, 0.1);
        let result = SegmentedTrendFitter::default().fit(&samples, None).unwrap();
        assert_abs_diff_eq!(result.params.k, truth.k, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.m2, truth.m2, epsilon = 1e-6);
        assert!(result.sse < 1e-16);
    }

    #[test]
    fn test_noisy_recovery() {
        let truth = Params::new(2.5, -0.002, 0.0, -0.03);
        let sigma = 1e-3;
        let normal = Normal::new(0.0, sigma).unwrap();
        let mut rng = StdRng::seed_from_u64(0x1A5A);
        let samples: Vec<Sample> = synthetic(truth, 120, 5.0 / 119.0)
            .into_iter()
            .map(|s| Sample::new(s.time, s.displacement + normal.sample(&mut rng)))
            .collect();

        for seeding in [Seeding::Guess(truth), Seeding::Default, Seeding::Profile] {
            let result = SegmentedTrendFitter::default()
                .fit_with(&samples, &seeding)
                .unwrap();
            assert_abs_diff_eq!(result.params.k, truth.k, epsilon = 0.25);
            assert_abs_diff_eq!(result.params.m1, truth.m1, epsilon = 5.0 * sigma);
            assert_abs_diff_eq!(result.params.c1, truth.c1, epsilon = 5.0 * sigma);
            assert_abs_diff_eq!(result.params.m2, truth.m2, epsilon = 5.0 * sigma);
            // Residuals are the injected noise.
            assert_abs_diff_eq!(result.rmse(), sigma, epsilon = 0.5 * sigma);
        }
    }

    #[test]
    fn test_breakpoint_stays_in_window() {
        let samples = flat_then_sinking();
        let fitter = SegmentedTrendFitter::default();
        let guesses = [
            Params::new(-100.0, 0.0, 0.0, -0.1),
            Params::new(100.0, 0.0, 0.0, -0.1),
            Params::new(0.0, 5.0, -3.0, 5.0),
            Params::new(5.0, -1.0, 1.0, 1.0),
            Params::new(2.5, 1e3, 1e3, -1e3),
        ];
        for guess in guesses {
            let result = fitter.fit(&samples, Some(guess)).unwrap();
            assert!((0.0..=5.0).contains(&result.params.k), "{result:?}");
        }

        // Data that wants a break after the last sample.
        let line: Vec<Sample> = (0..8).map(|i| Sample::new(i as f64, 2.0 * i as f64)).collect();
        let result = fitter
            .fit(&line, Some(Params::new(6.5, 1.0, 0.0, -3.0)))
            .unwrap();
        assert!((0.0..=7.0).contains(&result.params.k));
        assert!(result.sse < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let fitter = SegmentedTrendFitter::default();
        let short = &flat_then_sinking()[..3];
        assert_eq!(
            fitter.fit(short, None),
            Err(FitError::InvalidInput(InvalidInput::TooFewSamples(3)))
        );

        let same_time: Vec<Sample> = (0..6).map(|i| Sample::new(1.0, i as f64)).collect();
        assert_eq!(
            fitter.fit(&same_time, None),
            Err(FitError::InvalidInput(InvalidInput::ZeroTimeSpan(1.0)))
        );

        let mut nan = flat_then_sinking();
        nan[2].displacement = f64::NAN;
        assert!(fitter.fit(&nan, None).unwrap_err().is_invalid_input());

        let mut inf = flat_then_sinking();
        inf[4].time = f64::INFINITY;
        assert!(fitter.fit_profiled(&inf).unwrap_err().is_invalid_input());

        let bad_guess = Params::new(f64::NAN, 0.0, 0.0, 0.0);
        assert!(matches!(
            fitter.fit(&flat_then_sinking(), Some(bad_guess)),
            Err(FitError::InvalidInput(InvalidInput::NonFiniteGuess(p))) if p.k.is_nan()
        ));
        assert_eq!(
            fitter.fit_multi_start(&flat_then_sinking(), &[]),
            Err(FitError::InvalidInput(InvalidInput::NoGuesses))
        );
    }

    #[test]
    fn test_breakpoint_held_at_window_end() {
        // A straight line with alternating noise; starting on the last
        // sample, descent keeps pushing k past the end.
        let samples: Vec<Sample> = (0..20)
            .map(|i| {
                let t = i as f64 * 0.1;
                let noise = if i % 2 == 1 { 1e-3 } else { -1e-3 };
                Sample::new(t, -0.02 * t + noise)
            })
            .collect();
        let guess = Params::new(samples[19].time, 0.0, -1e-3, -0.1);
        let result = SegmentedTrendFitter::default()
            .fit(&samples, Some(guess))
            .unwrap();

        assert_eq!(result.params.k, result.window.end);
        assert!(result.iterations <= 10, "{result:?}");
        // Ordinary least-squares line through all samples.
        assert_abs_diff_eq!(result.params.m1, -0.019_849_624_06, epsilon = 1e-8);
        assert_abs_diff_eq!(result.params.c1, -0.000_142_857_14, epsilon = 1e-8);
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let fitter = SegmentedTrendFitter::new(FitOptions::default().max_iterations(1));
        let samples = flat_then_sinking();
        match fitter.fit(&samples, Some(Params::new(4.5, 0.3, 1.0, 2.0))) {
            Err(FitError::Convergence {
                iterations,
                reason,
                params,
                sse,
            }) => {
                assert_eq!(iterations, 1);
                assert_eq!(reason, ConvergenceFailure::MaxIterations);
                assert!(params.is_finite());
                assert!(sse > 0.0);
            }
            other => panic!("expected convergence failure, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_timeout() {
        let fitter = SegmentedTrendFitter::new(FitOptions::default().timeout(Duration::ZERO));
        match fitter.fit(&flat_then_sinking(), None) {
            Err(FitError::Convergence {
                iterations, reason, ..
            }) => {
                assert_eq!(iterations, 0);
                assert_eq!(reason, ConvergenceFailure::Timeout(Duration::ZERO));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_multi_start_keeps_best() {
        let samples = flat_then_sinking();
        let fitter = SegmentedTrendFitter::default();
        let stuck = Params::new(0.0, 0.0, 0.0, -0.1);
        let single = fitter.fit(&samples, Some(stuck)).unwrap();
        assert!(single.sse > 1e-4, "{single:?}");

        let multi = fitter
            .fit_multi_start(&samples, &[stuck, Params::new(2.5, 0.0, 0.0, -0.1)])
            .unwrap();
        assert!(multi.sse < 1e-12);
        assert_abs_diff_eq!(multi.params.k, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_profile_escapes_bad_start() {
        let samples = flat_then_sinking();
        let result = SegmentedTrendFitter::default()
            .fit_profiled(&samples)
            .unwrap();
        assert_abs_diff_eq!(result.params.k, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.params.m2, -0.1, epsilon = 1e-6);
        assert!(result.sse < 1e-12);
    }

    #[test]
    fn test_exact_start_terminates_immediately() {
        let truth = Params::new(1.0, 1.0, 1.0, 1.0);
        let samples = synthetic(truth, 5, 1.0);
        let result = SegmentedTrendFitter::default()
            .fit(&samples, Some(truth))
            .unwrap();
        assert_eq!(result.termination, Termination::ExactFit);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_curve_spans_window() {
        let result = SegmentedTrendFitter::default()
            .fit(&flat_then_sinking(), None)
            .unwrap();
        let curve: Vec<(f64, f64)> = result.curve(11).collect();
        assert_eq!(curve.len(), 11);
        assert_eq!(curve[0].0, 0.0);
        assert_eq!(curve[10].0, 5.0);
        assert_abs_diff_eq!(curve[10].1, -0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(result.value_at_breakpoint(), 0.0, epsilon = 1e-6);
    }
}
