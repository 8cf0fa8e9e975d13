//! Accelerated projected gradient descent for the cone-constrained QP
//! `min ½xᵀAx − bᵀx` subject to `x ∈ K`.

use super::{
    dot, norm, projected_residual, History, IterationLimits, NumericalMethod, SolveStats,
    SolverMethod, SystemOperator,
};

/// Cap on `L` doublings per iteration.
const MAX_BACKTRACKS: usize = 64;
/// `L` shrink applied after each iteration.
const LIPSCHITZ_DECAY: f64 = 0.9;
/// Relative slack in the sufficient-decrease test, absorbs rounding in `f`.
const ROUNDING_SLACK: f64 = 64.0 * f64::EPSILON;

/// Nesterov-accelerated projected gradient with backtracking on `L`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceleratedProjectedGradient;

/// [`AcceleratedProjectedGradient`] with gradient-based adaptive restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartedProjectedGradient;

impl NumericalMethod for AcceleratedProjectedGradient {
    fn method(&self) -> SolverMethod {
        SolverMethod::AcceleratedProjectedGradientDescent
    }

    fn is_projected(&self) -> bool {
        true
    }

    fn solve(
        &self,
        op: &dyn SystemOperator,
        limits: IterationLimits,
        rhs: &[f64],
        x: &mut [f64],
    ) -> SolveStats {
        Apgd::new(op, rhs).run(limits, x, false)
    }
}

impl NumericalMethod for RestartedProjectedGradient {
    fn method(&self) -> SolverMethod {
        SolverMethod::AcceleratedProjectedGradientDescentRestarted
    }

    fn is_projected(&self) -> bool {
        true
    }

    fn solve(
        &self,
        op: &dyn SystemOperator,
        limits: IterationLimits,
        rhs: &[f64],
        x: &mut [f64],
    ) -> SolveStats {
        Apgd::new(op, rhs).run(limits, x, true)
    }
}

struct Apgd<'a> {
    op: &'a dyn SystemOperator,
    rhs: &'a [f64],
    scratch: Vec<f64>,
}

impl<'a> Apgd<'a> {
    fn new(op: &'a dyn SystemOperator, rhs: &'a [f64]) -> Self {
        Self {
            op,
            rhs,
            scratch: vec![0.0; op.dim()],
        }
    }

    /// `g = A·x − b`
    fn gradient(&self, x: &[f64], g: &mut [f64]) {
        self.op.apply(x, g);
        for (gi, bi) in g.iter_mut().zip(self.rhs) {
            *gi -= bi;
        }
    }

    /// `f(x) = ½xᵀAx − bᵀx`
    fn objective(&mut self, x: &[f64]) -> f64 {
        self.op.apply(x, &mut self.scratch);
        0.5 * dot(x, &self.scratch) - dot(self.rhs, x)
    }

    fn projected_residual(&mut self, x: &[f64]) -> f64 {
        projected_residual(self.op, self.rhs, x, &mut self.scratch)
    }

    /// `out = Π(y − t·g)`
    fn projected_step(&self, y: &[f64], g: &[f64], t: f64, out: &mut [f64]) {
        for ((oi, yi), gi) in out.iter_mut().zip(y).zip(g) {
            *oi = yi - t * gi;
        }
        self.op.project(out);
    }

    fn initial_lipschitz(&self, x: &[f64]) -> f64 {
        let n = x.len();
        let shifted: Vec<f64> = x.iter().map(|v| v - 1.0).collect();
        let mut a_shifted = vec![0.0; n];
        self.op.apply(&shifted, &mut a_shifted);
        let l = norm(&a_shifted) / norm(&shifted);
        if l.is_finite() && l > 0.0 {
            l
        } else {
            1.0
        }
    }

    fn run(mut self, limits: IterationLimits, x: &mut [f64], restart: bool) -> SolveStats {
        let n = x.len();
        let mut best_residual = self.projected_residual(x);
        if best_residual < limits.tolerance || limits.max_iterations == 0 {
            return SolveStats::new(0, best_residual, limits.tolerance);
        }

        let mut gamma = x.to_vec();
        self.op.project(&mut gamma);
        let mut best = gamma.clone();
        let mut y = gamma.clone();
        let mut gamma_new = vec![0.0; n];
        let mut g = vec![0.0; n];
        let mut diff = vec![0.0; n];

        let mut lipschitz = self.initial_lipschitz(&gamma);
        let mut theta = 1.0_f64;
        let mut history = History::new(&limits);

        let mut iterations = 0;
        while iterations < limits.max_iterations {
            iterations += 1;

            self.gradient(&y, &mut g);
            let f_y = self.objective(&y);
            self.projected_step(&y, &g, 1.0 / lipschitz, &mut gamma_new);

            for _ in 0..MAX_BACKTRACKS {
                for ((d, a), b) in diff.iter_mut().zip(&gamma_new).zip(&y) {
                    *d = a - b;
                }
                let bound = f_y + dot(&g, &diff) + 0.5 * lipschitz * dot(&diff, &diff);
                let slack = ROUNDING_SLACK * f_y.abs().max(1.0);
                if self.objective(&gamma_new) <= bound + slack {
                    break;
                }
                lipschitz *= 2.0;
                self.projected_step(&y, &g, 1.0 / lipschitz, &mut gamma_new);
            }

            let theta_sq = theta * theta;
            let mut theta_new = (-theta_sq + theta * (theta_sq + 4.0).sqrt()) / 2.0;
            let beta = theta * (1.0 - theta) / (theta_sq + theta_new);

            for i in 0..n {
                diff[i] = gamma_new[i] - gamma[i];
                y[i] = gamma_new[i] + beta * diff[i];
            }

            let res = self.projected_residual(&gamma_new);
            if res < best_residual {
                best_residual = res;
                best.copy_from_slice(&gamma_new);
            }
            history.push(best_residual);
            if best_residual < limits.tolerance {
                break;
            }

            if restart && dot(&g, &diff) > 0.0 {
                y.copy_from_slice(&gamma_new);
                theta_new = 1.0;
            }

            theta = theta_new;
            std::mem::swap(&mut gamma, &mut gamma_new);
            lipschitz *= LIPSCHITZ_DECAY;
        }

        x.copy_from_slice(&best);
        history.finish(iterations, best_residual, limits.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{Dense, NonNegative};
    use super::*;

    const LIMITS: IterationLimits = IterationLimits::new(2000, 1e-8);

    #[test]
    fn test_unconstrained_matches_linear_solution() {
        let op = Dense::spd();
        let rhs = [1.0, -2.0, 0.5, 3.0];
        for method in [
            &AcceleratedProjectedGradient as &dyn NumericalMethod,
            &RestartedProjectedGradient,
        ] {
            let mut x = vec![0.0; 4];
            let stats = method.solve(&op, LIMITS, &rhs, &mut x);
            assert!(stats.converged, "{}: {:?}", method.method(), stats);

            let mut ax = vec![0.0; 4];
            op.apply(&x, &mut ax);
            for (a, b) in ax.iter().zip(&rhs) {
                assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_nonnegative_lcp() {
        // Diagonal system: x = max(b / d, 0)
        let op = NonNegative(Dense {
            n: 3,
            a: vec![2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 4.0],
        });
        let rhs = [1.0, -3.0, 2.0];
        for method in [
            &AcceleratedProjectedGradient as &dyn NumericalMethod,
            &RestartedProjectedGradient,
        ] {
            let mut x = vec![0.0; 3];
            let stats = method.solve(&op, LIMITS, &rhs, &mut x);
            assert!(stats.converged, "{}: {:?}", method.method(), stats);
            assert!((x[0] - 0.5).abs() < 1e-7);
            assert_eq!(x[1], 0.0);
            assert!((x[2] - 0.5).abs() < 1e-7);
        }
    }

    #[test]
    fn test_history_never_increases() {
        let op = NonNegative(Dense::spd());
        let rhs = [1.0, -2.0, 0.5, 3.0];
        let mut x = vec![0.0; 4];
        let stats = AcceleratedProjectedGradient.solve(&op, LIMITS.recording(true), &rhs, &mut x);
        assert_eq!(stats.history.len(), stats.iterations as usize);
        for pair in stats.history.windows(2) {
            assert!(pair[1] <= pair[0], "best residual went up: {:?}", pair);
        }
    }

    #[test]
    fn test_infeasible_guess_is_projected() {
        let op = NonNegative(Dense::spd());
        let rhs = [-1.0, -1.0, -1.0, -1.0];
        let mut x = vec![-5.0; 4];
        let stats = AcceleratedProjectedGradient.solve(&op, LIMITS, &rhs, &mut x);
        assert!(stats.converged, "{:?}", stats);
        assert!(x.iter().all(|v| *v == 0.0), "x = {:?}", x);
    }
}
