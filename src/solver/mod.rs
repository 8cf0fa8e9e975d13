//! Iterative numerical methods for `A·x ≈ b` and its projected variant.
//!
//! Methods work on any [`SystemOperator`]; the constraint solver uses the
//! Schur complement operator in [`schur`]. Dot products and norms run
//! serially in index order, so iterates do not depend on thread count.

mod active_set;
mod apgd;
mod gradient;
mod krylov;
pub mod schur;

use std::fmt;
use std::str::FromStr;

pub use apgd::{AcceleratedProjectedGradient, RestartedProjectedGradient};
pub use gradient::{GradientDescent, SteepestDescent};
pub use krylov::{
    BiconjugateGradient, BiconjugateGradientStabilized, ConjugateGradient,
    ConjugateGradientSquared, MinimumResidual,
};
pub use schur::SchurOperator;

pub(crate) use active_set::solve_active_set;

use crate::error::{ConfigError, SolverError};

/// Linear operator seen by a numerical method.
pub trait SystemOperator: Sync {
    fn dim(&self) -> usize;

    /// `out = A·x`
    fn apply(&self, x: &[f64], out: &mut [f64]);

    /// `out = Aᵀ·x`. Symmetric operators keep the default.
    fn apply_transpose(&self, x: &[f64], out: &mut [f64]) {
        self.apply(x, out);
    }

    /// Project `x` onto the feasible set. The default is unconstrained.
    fn project(&self, _x: &mut [f64]) {}
}

/// Stopping criteria for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationLimits {
    pub max_iterations: u32,
    pub tolerance: f64,
    /// Keep the residual of every iteration in [`SolveStats::history`].
    pub record_history: bool,
}

impl IterationLimits {
    pub const fn new(max_iterations: u32, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            record_history: false,
        }
    }

    pub fn recording(mut self, enabled: bool) -> Self {
        self.record_history = enabled;
        self
    }
}

/// Outcome of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveStats {
    pub iterations: u32,
    pub residual: f64,
    pub converged: bool,
    /// Residual after each iteration, oldest first. Empty unless the limits
    /// asked for it.
    pub history: Vec<f64>,
}

impl SolveStats {
    pub(crate) fn new(iterations: u32, residual: f64, tolerance: f64) -> Self {
        Self {
            iterations,
            residual,
            converged: residual < tolerance,
            history: Vec::new(),
        }
    }
}

/// Residual recorder for one solve.
pub(crate) struct History(Option<Vec<f64>>);

impl History {
    pub(crate) fn new(limits: &IterationLimits) -> Self {
        Self(limits.record_history.then(|| Vec::with_capacity(limits.max_iterations.min(1024) as usize)))
    }

    #[inline]
    pub(crate) fn push(&mut self, residual: f64) {
        if let Some(values) = &mut self.0 {
            values.push(residual);
        }
    }

    pub(crate) fn finish(self, iterations: u32, residual: f64, tolerance: f64) -> SolveStats {
        SolveStats {
            history: self.0.unwrap_or_default(),
            ..SolveStats::new(iterations, residual, tolerance)
        }
    }
}

/// An interchangeable iterative algorithm.
pub trait NumericalMethod: Send + Sync + fmt::Debug {
    fn method(&self) -> SolverMethod;

    /// Whether iterates stay on the feasible set.
    fn is_projected(&self) -> bool {
        false
    }

    /// Improve `x` in place. The initial guess is tested first.
    fn solve(
        &self,
        op: &dyn SystemOperator,
        limits: IterationLimits,
        rhs: &[f64],
        x: &mut [f64],
    ) -> SolveStats;
}

/// Method identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverMethod {
    SteepestDescent,
    GradientDescent,
    ConjugateGradient,
    ConjugateGradientSquared,
    BiconjugateGradient,
    BiconjugateGradientStabilized,
    MinimumResidual,
    AcceleratedProjectedGradientDescent,
    AcceleratedProjectedGradientDescentRestarted,
    /// Reserved; never installable.
    QuasiMinimumResidual,
}

impl SolverMethod {
    /// Every method [`create_method`] can build.
    pub const ALL_AVAILABLE: [SolverMethod; 9] = [
        SolverMethod::SteepestDescent,
        SolverMethod::GradientDescent,
        SolverMethod::ConjugateGradient,
        SolverMethod::ConjugateGradientSquared,
        SolverMethod::BiconjugateGradient,
        SolverMethod::BiconjugateGradientStabilized,
        SolverMethod::MinimumResidual,
        SolverMethod::AcceleratedProjectedGradientDescent,
        SolverMethod::AcceleratedProjectedGradientDescentRestarted,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            SolverMethod::SteepestDescent => "steepest-descent",
            SolverMethod::GradientDescent => "gradient-descent",
            SolverMethod::ConjugateGradient => "conjugate-gradient",
            SolverMethod::ConjugateGradientSquared => "conjugate-gradient-squared",
            SolverMethod::BiconjugateGradient => "biconjugate-gradient",
            SolverMethod::BiconjugateGradientStabilized => "biconjugate-gradient-stabilized",
            SolverMethod::MinimumResidual => "minimum-residual",
            SolverMethod::AcceleratedProjectedGradientDescent => {
                "accelerated-projected-gradient-descent"
            }
            SolverMethod::AcceleratedProjectedGradientDescentRestarted => {
                "accelerated-projected-gradient-descent-restarted"
            }
            SolverMethod::QuasiMinimumResidual => "quasi-minimum-residual",
        }
    }
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SolverMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SolverMethod::ALL_AVAILABLE
            .iter()
            .chain(std::iter::once(&SolverMethod::QuasiMinimumResidual))
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| ConfigError::UnknownMethod(s.to_string()))
    }
}

/// Build a method instance from its identifier.
pub fn create_method(method: SolverMethod) -> Result<Box<dyn NumericalMethod>, SolverError> {
    Ok(match method {
        SolverMethod::SteepestDescent => Box::new(SteepestDescent),
        SolverMethod::GradientDescent => Box::new(GradientDescent),
        SolverMethod::ConjugateGradient => Box::new(ConjugateGradient),
        SolverMethod::ConjugateGradientSquared => Box::new(ConjugateGradientSquared),
        SolverMethod::BiconjugateGradient => Box::new(BiconjugateGradient),
        SolverMethod::BiconjugateGradientStabilized => Box::new(BiconjugateGradientStabilized),
        SolverMethod::MinimumResidual => Box::new(MinimumResidual),
        SolverMethod::AcceleratedProjectedGradientDescent => {
            Box::new(AcceleratedProjectedGradient)
        }
        SolverMethod::AcceleratedProjectedGradientDescentRestarted => {
            Box::new(RestartedProjectedGradient)
        }
        SolverMethod::QuasiMinimumResidual => {
            return Err(SolverError::UnsupportedMethod(method));
        }
    })
}

// Serial vector kernels.

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y += alpha * x`
#[inline]
pub(crate) fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// `out = b - A·x`, returns `‖out‖`.
pub(crate) fn residual(op: &dyn SystemOperator, rhs: &[f64], x: &[f64], out: &mut [f64]) -> f64 {
    op.apply(x, out);
    for (r, b) in out.iter_mut().zip(rhs) {
        *r = b - *r;
    }
    norm(out)
}

/// Step `g` of the projected-gradient residual.
pub(crate) const RESIDUAL_STEP: f64 = 1e-6;

/// `‖x − Π(x − g·(A·x − b))‖ / g`. Leaves the gradient `A·x − b` in `grad`.
pub(crate) fn projected_residual(
    op: &dyn SystemOperator,
    rhs: &[f64],
    x: &[f64],
    grad: &mut [f64],
) -> f64 {
    op.apply(x, grad);
    for (gi, bi) in grad.iter_mut().zip(rhs) {
        *gi -= bi;
    }
    let mut step: Vec<f64> = x.iter().zip(grad.iter()).map(|(xi, gi)| xi - RESIDUAL_STEP * gi).collect();
    op.project(&mut step);
    let diff: f64 = x
        .iter()
        .zip(&step)
        .map(|(xi, si)| (xi - si) * (xi - si))
        .sum();
    diff.sqrt() / RESIDUAL_STEP
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::SystemOperator;

    /// Dense row-major matrix operator.
    pub struct Dense {
        pub n: usize,
        pub a: Vec<f64>,
    }

    impl Dense {
        /// Small SPD test matrix.
        pub fn spd() -> Self {
            #[rustfmt::skip]
            let a = vec![
                4.0, 1.0, 0.0, 0.5,
                1.0, 3.0, 0.5, 0.0,
                0.0, 0.5, 2.0, 0.25,
                0.5, 0.0, 0.25, 1.5,
            ];
            Self { n: 4, a }
        }

        /// Non-symmetric with a positive-definite symmetric part.
        pub fn nonsymmetric() -> Self {
            #[rustfmt::skip]
            let a = vec![
                4.0, 1.0, 0.0,
                -0.5, 3.0, 0.5,
                0.2, -0.3, 2.0,
            ];
            Self { n: 3, a }
        }
    }

    impl SystemOperator for Dense {
        fn dim(&self) -> usize {
            self.n
        }

        fn apply(&self, x: &[f64], out: &mut [f64]) {
            for i in 0..self.n {
                out[i] = (0..self.n).map(|j| self.a[i * self.n + j] * x[j]).sum();
            }
        }

        fn apply_transpose(&self, x: &[f64], out: &mut [f64]) {
            for i in 0..self.n {
                out[i] = (0..self.n).map(|j| self.a[j * self.n + i] * x[j]).sum();
            }
        }
    }

    /// Dense SPD operator with `x ≥ 0` projection.
    pub struct NonNegative(pub Dense);

    impl SystemOperator for NonNegative {
        fn dim(&self) -> usize {
            self.0.n
        }

        fn apply(&self, x: &[f64], out: &mut [f64]) {
            self.0.apply(x, out);
        }

        fn project(&self, x: &mut [f64]) {
            for v in x {
                *v = v.max(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::Dense;
    use super::*;

    const LIMITS: IterationLimits = IterationLimits::new(500, 1e-9);

    #[test]
    fn test_every_method_solves_spd() {
        let op = Dense::spd();
        let rhs = [1.0, -2.0, 0.5, 3.0];
        for method in SolverMethod::ALL_AVAILABLE {
            let solver = create_method(method).unwrap();
            if solver.is_projected() {
                continue;
            }
            let mut x = vec![0.0; 4];
            let stats = solver.solve(&op, LIMITS, &rhs, &mut x);
            let mut r = vec![0.0; 4];
            let res = residual(&op, &rhs, &x, &mut r);
            assert!(stats.converged, "{method} did not converge: {:?}", stats);
            assert!(res < 1e-8, "{method} residual {}", res);
        }
    }

    #[test]
    fn test_general_methods_solve_nonsymmetric() {
        let op = Dense::nonsymmetric();
        let rhs = [1.0, 2.0, 3.0];
        for method in [
            SolverMethod::ConjugateGradientSquared,
            SolverMethod::BiconjugateGradient,
            SolverMethod::BiconjugateGradientStabilized,
            SolverMethod::MinimumResidual,
        ] {
            let solver = create_method(method).unwrap();
            let mut x = vec![0.0; 3];
            let stats = solver.solve(&op, LIMITS, &rhs, &mut x);
            assert!(stats.converged, "{method} did not converge: {:?}", stats);
        }
    }

    #[test]
    fn test_converged_guess_costs_nothing() {
        let op = Dense::spd();
        let x_star = [0.5, -1.0, 0.25, 2.0];
        let mut rhs = vec![0.0; 4];
        op.apply(&x_star, &mut rhs);
        for method in SolverMethod::ALL_AVAILABLE {
            let solver = create_method(method).unwrap();
            let mut x = x_star.to_vec();
            let limits = IterationLimits::new(100, 1e-6);
            let stats = solver.solve(&op, limits, &rhs, &mut x);
            assert_eq!(stats.iterations, 0, "{method} iterated on a converged guess");
        }
    }

    #[test]
    fn test_zero_budget_leaves_guess() {
        let op = Dense::spd();
        let rhs = [1.0, 1.0, 1.0, 1.0];
        for method in SolverMethod::ALL_AVAILABLE {
            let solver = create_method(method).unwrap();
            let mut x = vec![0.1; 4];
            let limits = IterationLimits::new(0, 1e-9);
            let stats = solver.solve(&op, limits, &rhs, &mut x);
            assert_eq!(stats.iterations, 0);
            assert!(!stats.converged);
            assert_eq!(x, vec![0.1; 4], "{method} modified x with zero budget");
        }
    }

    #[test]
    fn test_history_tracks_every_iteration() {
        let op = Dense::spd();
        let rhs = [1.0, -2.0, 0.5, 3.0];
        for method in SolverMethod::ALL_AVAILABLE {
            let solver = create_method(method).unwrap();
            let mut x = vec![0.0; 4];
            let stats = solver.solve(&op, LIMITS.recording(true), &rhs, &mut x);
            assert_eq!(
                stats.history.len(),
                stats.iterations as usize,
                "{method}: {:?}",
                stats.history
            );
            assert!(stats.iterations > 0, "{method} did not iterate");
            let last = *stats.history.last().unwrap();
            assert_eq!(last, stats.residual, "{method}: last entry differs from the reported residual");

            let mut x = vec![0.0; 4];
            let quiet = solver.solve(&op, LIMITS, &rhs, &mut x);
            assert!(quiet.history.is_empty(), "{method} recorded without being asked");
            assert_eq!(quiet.iterations, stats.iterations);
        }
    }

    #[test]
    fn test_projected_residual_ignores_blocked_directions() {
        let op = test_util::NonNegative(Dense {
            n: 2,
            a: vec![1.0, 0.0, 0.0, 1.0],
        });
        let mut grad = vec![0.0; 2];
        // x[1] sits on its bound and the gradient pushes it further out
        let res = projected_residual(&op, &[1.0, -2.0], &[1.0, 0.0], &mut grad);
        assert!(res < 1e-9, "residual {}", res);
        assert_eq!(grad, vec![0.0, 2.0]);

        let res = projected_residual(&op, &[1.0, 2.0], &[1.0, 0.0], &mut grad);
        assert!((res - 2.0).abs() < 1e-6, "residual {}", res);
    }

    #[test]
    fn test_quasi_minimum_residual_rejected() {
        assert_eq!(
            create_method(SolverMethod::QuasiMinimumResidual).unwrap_err(),
            SolverError::UnsupportedMethod(SolverMethod::QuasiMinimumResidual)
        );
    }

    #[test]
    fn test_method_identifiers_round_trip() {
        for method in SolverMethod::ALL_AVAILABLE {
            assert_eq!(method.name().parse::<SolverMethod>(), Ok(method));
        }
        assert_eq!(
            "quasi-minimum-residual".parse::<SolverMethod>(),
            Ok(SolverMethod::QuasiMinimumResidual)
        );
        assert!(matches!(
            "newton".parse::<SolverMethod>(),
            Err(ConfigError::UnknownMethod(_))
        ));
    }
}
