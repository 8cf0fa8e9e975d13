//! Plain gradient methods for SPD systems.

use super::{
    axpy, dot, norm, residual, History, IterationLimits, NumericalMethod, SolveStats,
    SolverMethod, SystemOperator,
};

/// Power iterations used to estimate the largest eigenvalue.
const POWER_ITERATIONS: usize = 20;

/// Gradient steps with an exact line search along the residual.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteepestDescent;

impl NumericalMethod for SteepestDescent {
    fn method(&self) -> SolverMethod {
        SolverMethod::SteepestDescent
    }

    fn solve(
        &self,
        op: &dyn SystemOperator,
        limits: IterationLimits,
        rhs: &[f64],
        x: &mut [f64],
    ) -> SolveStats {
        let n = op.dim();
        let mut r = vec![0.0; n];
        let mut ar = vec![0.0; n];
        let mut res = residual(op, rhs, x, &mut r);
        let mut history = History::new(&limits);

        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            iterations += 1;
            op.apply(&r, &mut ar);
            let denom = dot(&r, &ar);
            if denom <= 0.0 {
                history.push(res);
                break;
            }
            let alpha = dot(&r, &r) / denom;
            axpy(alpha, &r, x);
            axpy(-alpha, &ar, &mut r);
            res = norm(&r);
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

/// Fixed-step gradient descent, step `1/L` with `L` from power iteration.
/// The step is halved whenever it would increase the residual.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientDescent;

impl GradientDescent {
    fn lipschitz_estimate(op: &dyn SystemOperator) -> f64 {
        let n = op.dim();
        let mut v = vec![1.0 / (n as f64).sqrt(); n];
        let mut w = vec![0.0; n];
        let mut lambda = 0.0;
        for _ in 0..POWER_ITERATIONS {
            op.apply(&v, &mut w);
            lambda = norm(&w);
            if lambda <= 0.0 {
                return 0.0;
            }
            for (vi, wi) in v.iter_mut().zip(&w) {
                *vi = wi / lambda;
            }
        }
        lambda
    }
}

impl NumericalMethod for GradientDescent {
    fn method(&self) -> SolverMethod {
        SolverMethod::GradientDescent
    }

    fn solve(
        &self,
        op: &dyn SystemOperator,
        limits: IterationLimits,
        rhs: &[f64],
        x: &mut [f64],
    ) -> SolveStats {
        let n = op.dim();
        let mut r = vec![0.0; n];
        let mut res = residual(op, rhs, x, &mut r);
        if res < limits.tolerance || limits.max_iterations == 0 {
            return SolveStats::new(0, res, limits.tolerance);
        }

        let lipschitz = Self::lipschitz_estimate(op);
        if lipschitz <= 0.0 {
            return SolveStats::new(0, res, limits.tolerance);
        }
        let mut step = 1.0 / lipschitz;
        let mut history = History::new(&limits);

        let mut candidate = vec![0.0; n];
        let mut r_candidate = vec![0.0; n];
        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            iterations += 1;
            candidate.copy_from_slice(x);
            axpy(step, &r, &mut candidate);
            let res_candidate = residual(op, rhs, &candidate, &mut r_candidate);
            if res_candidate > res {
                step *= 0.5;
                history.push(res);
                continue;
            }
            x.copy_from_slice(&candidate);
            std::mem::swap(&mut r, &mut r_candidate);
            res = res_candidate;
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::Dense;
    use super::*;

    #[test]
    fn test_lipschitz_estimate_of_diagonal() {
        let op = Dense {
            n: 3,
            a: vec![1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 2.0],
        };
        let l = GradientDescent::lipschitz_estimate(&op);
        assert!((l - 5.0).abs() < 1e-3, "L = {}", l);
    }

    #[test]
    fn test_budget_is_respected() {
        let op = Dense::spd();
        let rhs = [1.0, 2.0, 3.0, 4.0];
        let limits = IterationLimits::new(3, 1e-14);
        for method in [&SteepestDescent as &dyn NumericalMethod, &GradientDescent] {
            let mut x = vec![0.0; 4];
            let stats = method.solve(&op, limits, &rhs, &mut x);
            assert_eq!(stats.iterations, 3);
            assert!(!stats.converged);
            assert!(x.iter().any(|v| *v != 0.0));
        }
    }
}
