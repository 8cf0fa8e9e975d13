//! Vectorized view of all constraint rows for one step.
//!
//! Row layout: bilateral rows first, then one `[n, u, v]` block per plain
//! contact, then one `[n, u, v, spin, roll_u, roll_v]` block per rolling
//! contact. Buffers are rebuilt every step and keep their capacity.
//!
//! Calls must come in order:
//!
//! ```text
//! reset_bilateral -> load_residual -> load_jacobians -> load_warm_start
//!     -> take_solution / store_solution -> fetch_reactions
//! ```
//!
//! Anything else is a programming error and panics.

use glam::DVec3;

use crate::body::{BodyAdjacency, BodyTable};
use crate::contact::{ContactKind, ContactRegistry, JacobianRow};
use crate::error::SolverError;
use crate::par;

/// A two-body equality constraint row supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct BilateralConstraint {
    pub body_a: hecs::Entity,
    pub body_b: hecs::Entity,
    pub jacobian: JacobianRow,
    /// Position-level violation `C`.
    pub violation: f64,
    pub compliance: f64,
    /// Impulse from the last solve (warm-start seed).
    pub impulse: f64,
    /// Reaction force from the last solve.
    pub reaction: f64,
}

impl BilateralConstraint {
    pub fn new(body_a: hecs::Entity, body_b: hecs::Entity, jacobian: JacobianRow) -> Self {
        Self {
            body_a,
            body_b,
            jacobian,
            violation: 0.0,
            compliance: 0.0,
            impulse: 0.0,
            reaction: 0.0,
        }
    }

    /// Lock the relative linear velocity of B with respect to A along `axis`.
    pub fn linear(body_a: hecs::Entity, body_b: hecs::Entity, axis: DVec3, violation: f64) -> Self {
        let axis = axis.normalize_or_zero();
        let mut c = Self::new(
            body_a,
            body_b,
            JacobianRow::from_parts(-axis, DVec3::ZERO, axis, DVec3::ZERO),
        );
        c.violation = violation;
        c
    }

    pub fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance;
        self
    }
}

/// Category of a scalar row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Bilateral,
    Normal,
    Sliding,
    Spinning,
    Rolling,
}

/// Progress through the per-step call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorStage {
    Idle,
    Reset,
    ResidualLoaded,
    JacobiansLoaded,
    WarmStarted,
    Solving,
    Solved,
    Fetched,
}

/// One contact's rows for cone projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionBlock {
    pub first_row: usize,
    pub friction: f64,
    /// `(rolling_friction, spinning_friction)` for rolling contacts.
    pub rolling: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy)]
struct RowSource {
    kind: RowKind,
    entities: [hecs::Entity; 2],
    violation: f64,
    approach: f64,
    restitution: f64,
    compliance: f64,
    seed: f64,
}

/// Per-step constraint system: row metadata plus bias, rhs, compliance and
/// solution vectors.
#[derive(Debug)]
pub struct ConstraintSystemDescriptor {
    stage: DescriptorStage,
    bilateral_rows: usize,
    sources: Vec<RowSource>,
    jacobians: Vec<JacobianRow>,
    bodies: Vec<[usize; 2]>,
    compliance: Vec<f64>,
    bias: Vec<f64>,
    rhs: Vec<f64>,
    solution: Vec<f64>,
    blocks: Vec<ProjectionBlock>,
    adjacency: BodyAdjacency,
    body_count: usize,
}

impl Default for ConstraintSystemDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintSystemDescriptor {
    pub fn new() -> Self {
        Self {
            stage: DescriptorStage::Idle,
            bilateral_rows: 0,
            sources: Vec::new(),
            jacobians: Vec::new(),
            bodies: Vec::new(),
            compliance: Vec::new(),
            bias: Vec::new(),
            rhs: Vec::new(),
            solution: Vec::new(),
            blocks: Vec::new(),
            adjacency: BodyAdjacency::default(),
            body_count: 0,
        }
    }

    fn expect_stage(&self, expected: DescriptorStage, call: &str) {
        assert!(
            self.stage == expected,
            "{call} called in stage {:?}, expected {:?}",
            self.stage,
            expected
        );
    }

    pub fn stage(&self) -> DescriptorStage {
        self.stage
    }

    /// Total scalar rows.
    pub fn rows(&self) -> usize {
        self.sources.len()
    }

    pub fn bilateral_rows(&self) -> usize {
        self.bilateral_rows
    }

    pub fn body_count(&self) -> usize {
        self.body_count
    }

    pub fn row_kind(&self, row: usize) -> RowKind {
        self.sources[row].kind
    }

    pub fn has_kind(&self, kind: RowKind) -> bool {
        self.sources.iter().any(|s| s.kind == kind)
    }

    pub fn jacobians(&self) -> &[JacobianRow] {
        &self.jacobians
    }

    pub fn row_bodies(&self) -> &[[usize; 2]] {
        &self.bodies
    }

    pub fn compliance(&self) -> &[f64] {
        &self.compliance
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub fn solution(&self) -> &[f64] {
        &self.solution
    }

    pub fn blocks(&self) -> &[ProjectionBlock] {
        &self.blocks
    }

    pub fn adjacency(&self) -> &BodyAdjacency {
        &self.adjacency
    }

    /// Size the buffers for the current bilateral rows and (optionally)
    /// contact rows, and zero bias, rhs and solution.
    pub fn reset_bilateral(
        &mut self,
        bilaterals: &[BilateralConstraint],
        contacts: Option<&ContactRegistry>,
    ) {
        self.sources.clear();
        self.jacobians.clear();
        self.blocks.clear();
        self.bilateral_rows = bilaterals.len();

        for b in bilaterals {
            self.sources.push(RowSource {
                kind: RowKind::Bilateral,
                entities: [b.body_a, b.body_b],
                violation: b.violation,
                approach: 0.0,
                restitution: 0.0,
                compliance: b.compliance,
                seed: b.impulse,
            });
            self.jacobians.push(b.jacobian);
        }

        if let Some(registry) = contacts {
            for record in registry.iter() {
                let first_row = self.sources.len();
                let kinds: &[RowKind] = match record.kind {
                    ContactKind::Plain => &[RowKind::Normal, RowKind::Sliding, RowKind::Sliding],
                    ContactKind::Rolling => &[
                        RowKind::Normal,
                        RowKind::Sliding,
                        RowKind::Sliding,
                        RowKind::Spinning,
                        RowKind::Rolling,
                        RowKind::Rolling,
                    ],
                };
                for (k, kind) in kinds.iter().enumerate() {
                    self.sources.push(RowSource {
                        kind: *kind,
                        entities: [record.body_a, record.body_b],
                        violation: record.violation,
                        approach: record.approach_speed,
                        restitution: record.material.restitution,
                        compliance: record.material.compliance,
                        seed: record.impulse[k],
                    });
                    self.jacobians.push(record.jacobian[k]);
                }
                self.blocks.push(ProjectionBlock {
                    first_row,
                    friction: record.material.friction,
                    rolling: (record.kind == ContactKind::Rolling).then_some((
                        record.material.rolling_friction,
                        record.material.spinning_friction,
                    )),
                });
            }
        }

        let rows = self.sources.len();
        for buffer in [&mut self.bias, &mut self.rhs, &mut self.solution, &mut self.compliance] {
            buffer.clear();
            buffer.resize(rows, 0.0);
        }
        self.bodies.clear();
        self.bodies.resize(rows, [0, 0]);
        self.stage = DescriptorStage::Reset;
    }

    /// Fill the bias and compliance vectors. `factor` is `1/h`.
    pub fn load_residual(&mut self, factor: f64, recovery_clamp: f64, do_clamp: bool) {
        self.expect_stage(DescriptorStage::Reset, "load_residual");

        for (row, src) in self.sources.iter().enumerate() {
            let stab = factor * src.violation;
            self.bias[row] = match src.kind {
                RowKind::Bilateral => stab,
                RowKind::Normal => {
                    let stab = if do_clamp { stab.max(-recovery_clamp) } else { stab };
                    // rebound only while approaching
                    let rebound = src.restitution * src.approach.min(0.0);
                    if rebound < 0.0 {
                        stab.min(rebound)
                    } else {
                        stab
                    }
                }
                RowKind::Sliding | RowKind::Spinning | RowKind::Rolling => 0.0,
            };
            self.compliance[row] = match src.kind {
                RowKind::Bilateral | RowKind::Normal | RowKind::Sliding => {
                    src.compliance * factor * factor
                }
                RowKind::Spinning | RowKind::Rolling => 0.0,
            };
        }
        self.stage = DescriptorStage::ResidualLoaded;
    }

    /// Resolve body indices, build the body→rows adjacency and compute
    /// `rhs = -(bias + J·v*)`.
    pub fn load_jacobians(&mut self, bodies: &BodyTable) -> Result<(), SolverError> {
        self.expect_stage(DescriptorStage::ResidualLoaded, "load_jacobians");

        for (row, src) in self.sources.iter().enumerate() {
            let [a, b] = src.entities;
            self.bodies[row] = [
                bodies.index_of(a).ok_or(SolverError::UnknownBody(a))?,
                bodies.index_of(b).ok_or(SolverError::UnknownBody(b))?,
            ];
        }
        self.body_count = bodies.len();
        self.adjacency.rebuild(bodies.len(), &self.bodies);

        let jacobians = &self.jacobians;
        let row_bodies = &self.bodies;
        let bias = &self.bias;
        par::for_each_mut(&mut self.rhs, |row, rhs| {
            let [a, b] = row_bodies[row];
            let jv = jacobians[row].velocity(bodies.get(a), bodies.get(b));
            *rhs = -(bias[row] + jv);
        });

        self.stage = DescriptorStage::JacobiansLoaded;
        Ok(())
    }

    /// Seed the solution with last step's impulses, or zeros.
    pub fn load_warm_start(&mut self, enabled: bool) {
        self.expect_stage(DescriptorStage::JacobiansLoaded, "load_warm_start");
        for (x, src) in self.solution.iter_mut().zip(&self.sources) {
            *x = if enabled { src.seed } else { 0.0 };
        }
        self.stage = DescriptorStage::WarmStarted;
    }

    /// Hand the solution vector to a solver.
    pub fn take_solution(&mut self) -> Vec<f64> {
        self.expect_stage(DescriptorStage::WarmStarted, "take_solution");
        self.stage = DescriptorStage::Solving;
        std::mem::take(&mut self.solution)
    }

    pub fn store_solution(&mut self, solution: Vec<f64>) {
        self.expect_stage(DescriptorStage::Solving, "store_solution");
        assert_eq!(solution.len(), self.rows(), "solution length mismatch");
        self.solution = solution;
        self.stage = DescriptorStage::Solved;
    }

    /// Write impulses `γ` and reactions `γ·factor` back to their owners.
    pub fn fetch_reactions(
        &mut self,
        factor: f64,
        bilaterals: &mut [BilateralConstraint],
        contacts: Option<&mut ContactRegistry>,
    ) {
        self.expect_stage(DescriptorStage::Solved, "fetch_reactions");
        assert_eq!(bilaterals.len(), self.bilateral_rows, "bilateral rows changed");

        for (b, gamma) in bilaterals.iter_mut().zip(&self.solution) {
            b.impulse = *gamma;
            b.reaction = *gamma * factor;
        }

        if let Some(registry) = contacts {
            let mut row = self.bilateral_rows;
            let (plain, rolling) = registry.records_mut();
            for record in plain.iter_mut().chain(rolling.iter_mut()) {
                let n = record.rows();
                assert!(row + n <= self.rows(), "contact rows changed");
                for k in 0..n {
                    record.impulse[k] = self.solution[row + k];
                    record.reaction[k] = self.solution[row + k] * factor;
                }
                row += n;
            }
            assert_eq!(row, self.rows(), "contact rows changed");
        }
        self.stage = DescriptorStage::Fetched;
    }

    /// Position-level right-hand side `-C` on bilateral and normal rows.
    pub fn position_rhs(&self) -> Vec<f64> {
        self.sources
            .iter()
            .map(|s| match s.kind {
                RowKind::Bilateral | RowKind::Normal => -s.violation,
                _ => 0.0,
            })
            .collect()
    }

    /// Rows taking part in the position stabilization pass.
    pub fn position_mask(&self) -> Vec<bool> {
        self.sources
            .iter()
            .map(|s| matches!(s.kind, RowKind::Bilateral | RowKind::Normal))
            .collect()
    }

    /// Project contact blocks onto their friction cones. Bilateral rows are
    /// unbounded.
    pub fn project(&self, x: &mut [f64]) {
        for block in &self.blocks {
            project_block(block, &mut x[block.first_row..]);
        }
    }
}

/// Project a contact block in place. `x` starts at the block's normal row.
pub fn project_block(block: &ProjectionBlock, x: &mut [f64]) {
    let (n, t) = project_cone(block.friction, x[0], [x[1], x[2]]);
    x[0] = n;
    x[1] = t[0];
    x[2] = t[1];

    if let Some((rolling, spinning)) = block.rolling {
        let spin_limit = (spinning * n).max(0.0);
        x[3] = x[3].clamp(-spin_limit, spin_limit);

        let roll_limit = (rolling * n).max(0.0);
        let roll = (x[4] * x[4] + x[5] * x[5]).sqrt();
        if roll > roll_limit {
            let scale = if roll > 0.0 { roll_limit / roll } else { 0.0 };
            x[4] *= scale;
            x[5] *= scale;
        }
    }
}

/// Euclidean projection of `(n, t)` onto the cone `‖t‖ ≤ μ·n`.
pub fn project_cone(mu: f64, n: f64, t: [f64; 2]) -> (f64, [f64; 2]) {
    if mu <= 0.0 {
        return (n.max(0.0), [0.0, 0.0]);
    }
    let t_norm = (t[0] * t[0] + t[1] * t[1]).sqrt();
    if t_norm <= mu * n {
        return (n, t);
    }
    if mu * t_norm <= -n {
        return (0.0, [0.0, 0.0]);
    }
    let n_proj = (mu * t_norm + n) / (mu * mu + 1.0);
    let scale = mu * n_proj / t_norm;
    (n_proj, [t[0] * scale, t[1] * scale])
}
