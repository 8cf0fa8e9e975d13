//! Active-set driver for methods that cannot honor contact bounds.
//!
//! Krylov and plain gradient methods solve `A·x = b` with no notion of the
//! friction cone. In complementarity mode they are run on the rows that are
//! currently pushing, with every other contact row pinned at zero. After
//! each pass the iterate is projected, the projected-gradient residual of
//! the full problem is measured, and the active set is rebuilt from the
//! result. A separating contact therefore never receives a negative impulse
//! and an approaching one is never left penetrating.

use super::{projected_residual, History, IterationLimits, NumericalMethod, SchurOperator, SolveStats};
use crate::body::BodyTable;
use crate::descriptor::ConstraintSystemDescriptor;

/// Solve the cone-constrained system over `base` rows (all rows if `None`)
/// with a bound-blind inner method. The returned residual is the projected
/// residual of the full problem.
pub(crate) fn solve_active_set(
    method: &dyn NumericalMethod,
    descriptor: &ConstraintSystemDescriptor,
    bodies: &BodyTable,
    base: Option<&[bool]>,
    limits: IterationLimits,
    rhs: &[f64],
    x: &mut [f64],
) -> SolveStats {
    let rows = descriptor.rows();
    let base = base.map_or_else(|| vec![true; rows], <[bool]>::to_vec);
    let full = SchurOperator::masked(descriptor, bodies, &base);

    let mut grad = vec![0.0; rows];
    let mut history = History::new(&limits);
    let mut active = vec![false; rows];
    let mut next = vec![false; rows];
    let mut sub_rhs = vec![0.0; rows];

    descriptor.project(x);
    let mut res = projected_residual(&full, rhs, x, &mut grad);
    pick_active(descriptor, &base, x, &grad, &mut active);

    let mut iterations = 0;
    while res >= limits.tolerance && iterations < limits.max_iterations {
        for row in 0..rows {
            if active[row] {
                sub_rhs[row] = rhs[row];
            } else {
                sub_rhs[row] = 0.0;
                x[row] = 0.0;
            }
        }

        let inner = {
            let sub = SchurOperator::masked(descriptor, bodies, &active);
            let budget = IterationLimits::new(limits.max_iterations - iterations, limits.tolerance);
            method.solve(&sub, budget, &sub_rhs, x)
        };
        iterations += inner.iterations.max(1);

        descriptor.project(x);
        res = projected_residual(&full, rhs, x, &mut grad);
        history.push(res);

        pick_active(descriptor, &base, x, &grad, &mut next);
        if next == active && inner.converged {
            break;
        }
        std::mem::swap(&mut active, &mut next);
    }

    tracing::trace!(
        method = %method.method(),
        iterations,
        residual = res,
        "active-set solve"
    );
    history.finish(iterations, res, limits.tolerance)
}

/// A contact is active while its normal impulse is positive or its normal
/// row still wants to push (`(A·x − b)_n < 0`). Sliding, spinning and
/// rolling rows follow their contact when their coefficient is nonzero.
/// Rows outside `base` stay inactive; rows outside every block keep `base`.
fn pick_active(
    descriptor: &ConstraintSystemDescriptor,
    base: &[bool],
    x: &[f64],
    grad: &[f64],
    out: &mut Vec<bool>,
) {
    out.clear();
    out.extend_from_slice(base);
    for block in descriptor.blocks() {
        let n = block.first_row;
        let pushing = base[n] && (x[n] > 0.0 || grad[n] < 0.0);
        let mut set = |row: usize, on: bool| out[row] = base[row] && on;

        set(n, pushing);
        set(n + 1, pushing && block.friction > 0.0);
        set(n + 2, pushing && block.friction > 0.0);
        if let Some((rolling, spinning)) = block.rolling {
            set(n + 3, pushing && spinning > 0.0);
            set(n + 4, pushing && rolling > 0.0);
            set(n + 5, pushing && rolling > 0.0);
        }
    }
}
