//! Krylov subspace methods.
//!
//! CG needs a symmetric positive definite operator. CGS, BiCG and BiCGStab
//! accept general nonsingular operators; BiCG also needs `apply_transpose`.
//! All of them stop early on breakdown (a vanishing denominator) and report
//! the residual reached so far.

use super::{
    axpy, dot, norm, residual, History, IterationLimits, NumericalMethod, SolveStats,
    SolverMethod, SystemOperator,
};

#[inline]
fn breakdown(denom: f64) -> bool {
    !denom.is_finite() || denom.abs() < f64::MIN_POSITIVE
}

/// Conjugate gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateGradient;

impl NumericalMethod for ConjugateGradient {
    fn method(&self) -> SolverMethod {
        SolverMethod::ConjugateGradient
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
        let mut p = r.clone();
        let mut ap = vec![0.0; n];
        let mut rs = dot(&r, &r);

        let mut history = History::new(&limits);
        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            iterations += 1;
            op.apply(&p, &mut ap);
            let p_ap = dot(&p, &ap);
            if breakdown(p_ap) {
                history.push(res);
                break;
            }
            let alpha = rs / p_ap;
            axpy(alpha, &p, x);
            axpy(-alpha, &ap, &mut r);

            let rs_new = dot(&r, &r);
            res = rs_new.sqrt();
            let beta = rs_new / rs;
            rs = rs_new;
            for (pi, ri) in p.iter_mut().zip(&r) {
                *pi = ri + beta * *pi;
            }
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

/// Conjugate gradient squared.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateGradientSquared;

impl NumericalMethod for ConjugateGradientSquared {
    fn method(&self) -> SolverMethod {
        SolverMethod::ConjugateGradientSquared
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
        let r_hat = r.clone();

        let mut u = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut q = vec![0.0; n];
        let mut v_hat = vec![0.0; n];
        let mut u_hat = vec![0.0; n];
        let mut a_u_hat = vec![0.0; n];
        let mut rho_prev = 1.0;

        let mut history = History::new(&limits);
        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            let rho = dot(&r_hat, &r);
            if breakdown(rho) {
                break;
            }
            if iterations == 0 {
                u.copy_from_slice(&r);
                p.copy_from_slice(&u);
            } else {
                let beta = rho / rho_prev;
                for i in 0..n {
                    u[i] = r[i] + beta * q[i];
                    p[i] = u[i] + beta * (q[i] + beta * p[i]);
                }
            }
            iterations += 1;

            op.apply(&p, &mut v_hat);
            let sigma = dot(&r_hat, &v_hat);
            if breakdown(sigma) {
                history.push(res);
                break;
            }
            let alpha = rho / sigma;
            for i in 0..n {
                q[i] = u[i] - alpha * v_hat[i];
                u_hat[i] = u[i] + q[i];
            }
            axpy(alpha, &u_hat, x);
            op.apply(&u_hat, &mut a_u_hat);
            axpy(-alpha, &a_u_hat, &mut r);
            res = norm(&r);
            rho_prev = rho;
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

/// Biconjugate gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiconjugateGradient;

impl NumericalMethod for BiconjugateGradient {
    fn method(&self) -> SolverMethod {
        SolverMethod::BiconjugateGradient
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
        let mut r_tilde = r.clone();
        let mut p = r.clone();
        let mut p_tilde = r.clone();
        let mut ap = vec![0.0; n];
        let mut at_p = vec![0.0; n];
        let mut rho = dot(&r_tilde, &r);

        let mut history = History::new(&limits);
        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            iterations += 1;
            op.apply(&p, &mut ap);
            op.apply_transpose(&p_tilde, &mut at_p);
            let sigma = dot(&p_tilde, &ap);
            if breakdown(sigma) || breakdown(rho) {
                history.push(res);
                break;
            }
            let alpha = rho / sigma;
            axpy(alpha, &p, x);
            axpy(-alpha, &ap, &mut r);
            axpy(-alpha, &at_p, &mut r_tilde);
            res = norm(&r);

            let rho_new = dot(&r_tilde, &r);
            let beta = rho_new / rho;
            rho = rho_new;
            for i in 0..n {
                p[i] = r[i] + beta * p[i];
                p_tilde[i] = r_tilde[i] + beta * p_tilde[i];
            }
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

/// Stabilized biconjugate gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiconjugateGradientStabilized;

impl NumericalMethod for BiconjugateGradientStabilized {
    fn method(&self) -> SolverMethod {
        SolverMethod::BiconjugateGradientStabilized
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
        let r_hat = r.clone();

        let mut p = vec![0.0; n];
        let mut v = vec![0.0; n];
        let mut s = vec![0.0; n];
        let mut t = vec![0.0; n];
        let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

        let mut history = History::new(&limits);
        let mut iterations = 0;
        while res >= limits.tolerance && iterations < limits.max_iterations {
            iterations += 1;
            let rho_new = dot(&r_hat, &r);
            if breakdown(rho_new) || breakdown(omega) {
                history.push(res);
                break;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }
            op.apply(&p, &mut v);
            let sigma = dot(&r_hat, &v);
            if breakdown(sigma) {
                history.push(res);
                break;
            }
            alpha = rho_new / sigma;
            for i in 0..n {
                s[i] = r[i] - alpha * v[i];
            }
            let s_norm = norm(&s);
            if s_norm < limits.tolerance {
                axpy(alpha, &p, x);
                r.copy_from_slice(&s);
                res = s_norm;
                history.push(res);
                break;
            }

            op.apply(&s, &mut t);
            let tt = dot(&t, &t);
            if breakdown(tt) {
                history.push(res);
                break;
            }
            omega = dot(&t, &s) / tt;
            for i in 0..n {
                x[i] += alpha * p[i] + omega * s[i];
                r[i] = s[i] - omega * t[i];
            }
            res = norm(&r);
            rho = rho_new;
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}

/// Minimal residual iteration: each step minimizes `‖b − A·x‖` along the
/// current residual. Converges when the symmetric part of `A` is positive
/// definite.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumResidual;

impl NumericalMethod for MinimumResidual {
    fn method(&self) -> SolverMethod {
        SolverMethod::MinimumResidual
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
            let denom = dot(&ar, &ar);
            if breakdown(denom) {
                history.push(res);
                break;
            }
            let alpha = dot(&ar, &r) / denom;
            axpy(alpha, &r, x);
            axpy(-alpha, &ar, &mut r);
            res = norm(&r);
            history.push(res);
        }
        history.finish(iterations, res, limits.tolerance)
    }
}
