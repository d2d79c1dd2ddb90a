use crate::sample::Sample;
use nalgebra::Vector4;
use std::fmt;

/// Parameters of a continuous two-segment line.
///
/// Doubles as an initial guess for the optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Params {
    /// Breakpoint time.
    pub k: f64,

    /// Slope before the breakpoint.
    pub m1: f64,

    /// Value of the first segment at the first sample time.
    pub c1: f64,

    /// Slope from the breakpoint on.
    pub m2: f64,
}

impl Params {
    pub fn new(k: f64, m1: f64, c1: f64, m2: f64) -> Self {
        Self { k, m1, c1, m2 }
    }

    pub fn is_finite(&self) -> bool {
        self.k.is_finite() && self.m1.is_finite() && self.c1.is_finite() && self.m2.is_finite()
    }

    pub(crate) fn to_vector(self) -> Vector4<f64> {
        Vector4::new(self.k, self.m1, self.c1, self.m2)
    }

    pub(crate) fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "k: {}, m1: {}, c1: {}, m2: {}",
            self.k, self.m1, self.c1, self.m2
        )
    }
}

/// Two line segments joined at the breakpoint `k`.
///
/// ```text
/// f(t) = m1 * (t - t0) + c1                    t <  k
/// f(t) = m2 * (t - k) + m1 * (k - t0) + c1     t >= k
/// ```
///
/// The second segment starts from the first segment's value at `k`,
/// so the line is continuous for every choice of parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentedLine {
    /// Time origin of the first segment's intercept.
    pub t0: f64,
    pub params: Params,
}

impl SegmentedLine {
    pub fn new(t0: f64, params: Params) -> Self {
        Self { t0, params }
    }

    pub fn value_at_breakpoint(&self) -> f64 {
        let Params { k, m1, c1, .. } = self.params;
        m1 * (k - self.t0) + c1
    }

    pub fn eval(&self, t: f64) -> f64 {
        let Params { k, m1, c1, m2 } = self.params;
        if t < k {
            m1 * (t - self.t0) + c1
        } else {
            m2 * (t - k) + self.value_at_breakpoint()
        }
    }

    /// Partial derivatives of `eval(t)` with respect to `(k, m1, c1, m2)`.
    pub fn jacobian(&self, t: f64) -> [f64; 4] {
        let Params { k, m1, m2, .. } = self.params;
        if t < k {
            [0.0, t - self.t0, 1.0, 0.0]
        } else {
            [m1 - m2, k - self.t0, 1.0, t - k]
        }
    }

    /// Residual sum of squares over `samples`.
    pub fn sse(&self, samples: &[Sample]) -> f64 {
        samples
            .iter()
            .map(|s| {
                let r = s.displacement - self.eval(s.time);
                r * r
            })
            .sum()
    }
}

/// For a fixed breakpoint the model is linear in `(m1, c1, m2)` over
/// this basis.
pub(crate) fn hinge_basis(t: f64, k: f64, t0: f64) -> [f64; 3] {
    [t.min(k) - t0, 1.0, (t - k).max(0.0)]
}
