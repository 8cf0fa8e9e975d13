//! Per-step orchestration of the constraint solve.
//!
//! One call to [`IterativeSolver::run_time_step`] runs the pipeline
//!
//! ```text
//! Idle -> Preprocessing -> Iterating -> (Stabilizing) -> Postprocessed -> Idle
//! ```
//!
//! for either contact mode. The solver rests in `Postprocessed` until the
//! caller reads the step's results and calls [`IterativeSolver::finish_step`],
//! or until the next step starts. A failed step drops straight back to `Idle`.
//!
//! Complementarity mode solves for contact impulses with the installed
//! numerical method. Methods that cannot honor contact bounds run under an
//! active-set driver so their impulses stay inside the friction cone. Penalty
//! mode turns contacts into spring-damper forces and only solves the
//! bilateral rows.

use crate::body::BodyTable;
use crate::contact::{ContactContainer, ContactRegistry};
use crate::descriptor::{BilateralConstraint, ConstraintSystemDescriptor};
use crate::error::{ConfigError, SolverError};
use crate::penalty::PenaltyModel;
use crate::settings::{ContactMode, SolverSettings};
use crate::solver::{
    create_method, solve_active_set, IterationLimits, NumericalMethod, SchurOperator, SolveStats,
    SolverMethod,
};

/// Where the framework is within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Idle,
    Preprocessing,
    Iterating,
    Stabilizing,
    Postprocessed,
}

impl SolverPhase {
    fn can_enter(self, next: SolverPhase) -> bool {
        use SolverPhase::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Preprocessing)
                | (Preprocessing, Iterating)
                | (Preprocessing, Postprocessed)
                | (Iterating, Stabilizing)
                | (Iterating, Postprocessed)
                | (Stabilizing, Postprocessed)
        )
    }
}

/// Summary of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub mode: ContactMode,
    pub iterations: u32,
    pub residual: f64,
    pub converged: bool,
    /// Scalar rows handed to the numerical method.
    pub rows: usize,
    /// Residual after each iteration of the main solve, when
    /// [`SolverSettings::record_history`] is on. Bound-blind methods record
    /// one entry per active-set pass.
    pub history: Vec<f64>,
    pub stabilization: Option<SolveStats>,
}

const NOTHING_TO_SOLVE: SolveStats = SolveStats {
    iterations: 0,
    residual: 0.0,
    converged: true,
    history: Vec::new(),
};

/// Iterative constraint solver.
#[derive(Debug)]
pub struct IterativeSolver {
    settings: SolverSettings,
    method: Box<dyn NumericalMethod>,
    descriptor: ConstraintSystemDescriptor,
    penalty: PenaltyModel,
    phase: SolverPhase,
    residual: f64,
    history: Vec<f64>,
    projection_warned: bool,
}

impl IterativeSolver {
    pub fn new(settings: SolverSettings) -> Result<Self, SolverError> {
        let method = create_method(settings.method())?;
        Ok(Self {
            settings,
            method,
            descriptor: ConstraintSystemDescriptor::new(),
            penalty: PenaltyModel::new(),
            phase: SolverPhase::Idle,
            residual: 0.0,
            history: Vec::new(),
            projection_warned: false,
        })
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SolverSettings {
        &mut self.settings
    }

    /// Install a different numerical method. Settings are kept. On error the
    /// previous method stays installed.
    pub fn set_solver_type(&mut self, method: SolverMethod) -> Result<(), SolverError> {
        self.method = create_method(method)?;
        self.settings.set_method(method);
        self.projection_warned = false;
        tracing::debug!("Installed solver method {}", method);
        Ok(())
    }

    pub fn solver_type(&self) -> SolverMethod {
        self.method.method()
    }

    /// Residual of the last main solve.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Per-iteration residuals of the last main solve. Empty when recording
    /// is off.
    pub fn residual_history(&self) -> &[f64] {
        &self.history
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Close a finished step: `Postprocessed -> Idle`. No-op otherwise.
    pub fn finish_step(&mut self) {
        if self.phase == SolverPhase::Postprocessed {
            self.enter(SolverPhase::Idle);
        }
    }

    fn enter(&mut self, next: SolverPhase) {
        debug_assert!(
            self.phase.can_enter(next),
            "illegal phase change {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    pub fn descriptor(&self) -> &ConstraintSystemDescriptor {
        &self.descriptor
    }

    /// `[F_n, F_u, F_v]` per contact from the last penalty-mode step.
    pub fn penalty_forces(&self) -> &[[f64; 3]] {
        self.penalty.forces()
    }

    /// Advance body velocities by one step of size `step`.
    ///
    /// Reads force accumulators from `world`, solves contacts and bilateral
    /// rows, and writes velocities (and, in penalty mode, the added contact
    /// forces) back. Positions are only touched by the stabilization pass.
    pub fn run_time_step(
        &mut self,
        world: &mut hecs::World,
        registry: &mut ContactRegistry,
        bilaterals: &mut [BilateralConstraint],
        step: f64,
        time: f64,
    ) -> Result<StepReport, SolverError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::InvalidTimestep(step).into());
        }

        self.finish_step();
        self.enter(SolverPhase::Preprocessing);
        let result = match self.settings.mode() {
            ContactMode::Complementarity => {
                self.step_complementarity(world, registry, bilaterals, step, time)
            }
            ContactMode::Penalty => self.step_penalty(world, registry, bilaterals, step, time),
        };

        match result {
            Ok(report) => {
                self.enter(SolverPhase::Postprocessed);
                self.residual = report.residual;
                self.history.clone_from(&report.history);
                if !report.converged {
                    tracing::debug!(
                        "{} stopped after {} iterations, residual {:.3e} (tolerance {:.3e})",
                        self.method.method(),
                        report.iterations,
                        report.residual,
                        self.settings.tolerance()
                    );
                }
                tracing::trace!(
                    "step t={:.4}: {} rows, {} iterations, residual {:.3e}",
                    time,
                    report.rows,
                    report.iterations,
                    report.residual
                );
                Ok(report)
            }
            Err(err) => {
                self.enter(SolverPhase::Idle);
                Err(err)
            }
        }
    }

    /// Iteration budget: the global cap, lowered by the cap of every row
    /// category present.
    fn iteration_budget(&self, registry: Option<&ContactRegistry>, bilaterals: usize) -> u32 {
        let caps = self.settings.caps();
        let mut budget = self.settings.max_iterations();
        if bilaterals > 0 {
            budget = budget.min(caps.bilateral);
        }
        if let Some(registry) = registry.filter(|r| !r.is_empty()) {
            budget = budget.min(caps.normal);
            if registry.iter().any(|c| c.material.friction > 0.0) {
                budget = budget.min(caps.sliding);
            }
            if registry.active_rolling() > 0 {
                budget = budget.min(caps.spinning);
            }
        }
        budget
    }

    fn step_complementarity(
        &mut self,
        world: &mut hecs::World,
        registry: &mut ContactRegistry,
        bilaterals: &mut [BilateralConstraint],
        step: f64,
        time: f64,
    ) -> Result<StepReport, SolverError> {
        // 1. Snapshot bodies and refresh contact Jacobians
        let mut bodies = BodyTable::gather(world);
        registry.update(time, &bodies)?;

        // 2. Unconstrained velocities v* (external forces, gyroscopic torque)
        bodies.apply_accumulated_forces(step);

        // 3. Assemble the system
        let factor = 1.0 / step;
        let stabilize = self.settings.stabilize();
        let recovery_clamp = if stabilize {
            0.0
        } else {
            self.settings.recovery_speed()
        };
        self.descriptor.reset_bilateral(bilaterals, Some(&*registry));
        self.descriptor.load_residual(factor, recovery_clamp, true);
        self.descriptor.load_jacobians(&bodies)?;
        self.descriptor.load_warm_start(self.settings.warm_start());

        let budget = self.iteration_budget(Some(&*registry), bilaterals.len());
        let rows = self.descriptor.rows();

        // 4. Solve for impulses
        self.enter(SolverPhase::Iterating);
        let mut x = self.descriptor.take_solution();
        let (stats, velocity_changes) = if rows == 0 {
            (NOTHING_TO_SOLVE, None)
        } else {
            let limits = IterationLimits::new(budget, self.settings.tolerance())
                .recording(self.settings.record_history());
            let rhs = self.descriptor.rhs();
            let stats = if self.method.is_projected() || self.descriptor.blocks().is_empty() {
                let op = SchurOperator::new(&self.descriptor, &bodies);
                self.method.solve(&op, limits, rhs, &mut x)
            } else {
                if !self.projection_warned {
                    tracing::warn!(
                        "{} ignores contact bounds; solving contacts on an active set",
                        self.method.method()
                    );
                    self.projection_warned = true;
                }
                solve_active_set(self.method.as_ref(), &self.descriptor, &bodies, None, limits, rhs, &mut x)
            };
            let op = SchurOperator::new(&self.descriptor, &bodies);
            (stats, Some(op.body_response(&x)))
        };

        // 5. v = v* + M⁻¹·Dᵀ·γ
        if let Some(dv) = &velocity_changes {
            bodies.apply_velocity_changes(dv);
        }

        // 6. Position stabilization
        let stabilization = if stabilize && rows > 0 {
            self.enter(SolverPhase::Stabilizing);
            Some(self.stabilize_positions(world, &bodies))
        } else {
            None
        };

        // 7. Store impulses and write velocities back
        self.descriptor.store_solution(x);
        self.descriptor.fetch_reactions(factor, bilaterals, Some(registry));
        bodies.write_back(world);

        Ok(StepReport {
            mode: ContactMode::Complementarity,
            iterations: stats.iterations,
            residual: stats.residual,
            converged: stats.converged,
            rows,
            history: stats.history,
            stabilization,
        })
    }

    /// Solve `N·δ = −C` over bilateral and normal rows and shift poses by
    /// `M⁻¹·Dᵀ·δ`. Normal rows may only push.
    fn stabilize_positions(&self, world: &mut hecs::World, bodies: &BodyTable) -> SolveStats {
        let mask = self.descriptor.position_mask();
        let rhs = self.descriptor.position_rhs();
        let limits = IterationLimits::new(
            self.settings.stabilization_iterations(),
            self.settings.stabilization_tolerance(),
        );

        let mut delta = vec![0.0; rhs.len()];
        let op = SchurOperator::masked(&self.descriptor, bodies, &mask);
        let stats = if self.method.is_projected() || self.descriptor.blocks().is_empty() {
            self.method.solve(&op, limits, &rhs, &mut delta)
        } else {
            solve_active_set(self.method.as_ref(), &self.descriptor, bodies, Some(&mask), limits, &rhs, &mut delta)
        };
        bodies.write_pose_corrections(world, &op.body_response(&delta));
        stats
    }

    fn step_penalty(
        &mut self,
        world: &mut hecs::World,
        registry: &mut ContactRegistry,
        bilaterals: &mut [BilateralConstraint],
        step: f64,
        time: f64,
    ) -> Result<StepReport, SolverError> {
        let mut bodies = BodyTable::gather(world);
        registry.update(time, &bodies)?;

        // Contact forces go into the accumulators before integration
        self.penalty
            .apply(registry, &mut bodies, self.settings.penalty());
        self.penalty.store_reactions(registry, step);
        bodies.apply_accumulated_forces(step);

        let rows = bilaterals.len();
        let stats = if rows == 0 {
            NOTHING_TO_SOLVE
        } else {
            let factor = 1.0 / step;
            self.descriptor.reset_bilateral(bilaterals, None);
            self.descriptor.load_residual(factor, self.settings.recovery_speed(), true);
            self.descriptor.load_jacobians(&bodies)?;
            self.descriptor.load_warm_start(self.settings.warm_start());

            self.enter(SolverPhase::Iterating);
            let mut x = self.descriptor.take_solution();
            let (stats, dv) = {
                let op = SchurOperator::new(&self.descriptor, &bodies);
                let limits = IterationLimits::new(self.iteration_budget(None, rows), self.settings.tolerance())
                    .recording(self.settings.record_history());
                let stats = self.method.solve(&op, limits, self.descriptor.rhs(), &mut x);
                (stats, op.body_response(&x))
            };
            bodies.apply_velocity_changes(&dv);
            self.descriptor.store_solution(x);
            self.descriptor.fetch_reactions(factor, bilaterals, None);
            stats
        };

        bodies.write_back(world);

        Ok(StepReport {
            mode: ContactMode::Penalty,
            iterations: stats.iterations,
            residual: stats.residual,
            converged: stats.converged,
            rows,
            history: stats.history,
            stabilization: None,
        })
    }
}
