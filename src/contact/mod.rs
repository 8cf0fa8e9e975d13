//! Contact records and the Begin/Add/End container protocol.
//!
//! A collision detector drives a [`ContactContainer`] once per step:
//!
//! ```text
//! begin_cycle()
//! add_contact(pair)   // zero or more times
//! end_cycle()
//! ```
//!
//! [`ContactRegistry`] keeps full per-contact constraint state and reuses its
//! storage across steps. [`AggregateContacts`] only keeps totals.

mod aggregate;
mod registry;

pub use aggregate::AggregateContacts;
pub use registry::ContactRegistry;

use glam::DVec3;

use crate::body::{BodyState, BodyTable};
use crate::error::SolverError;

/// Squared length below which a normal or tangent is considered degenerate.
pub(crate) const DEGENERATE_LENGTH_SQ: f64 = 1e-12;

/// Surface properties of a contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactMaterial {
    /// Sliding friction coefficient (default: 0.6).
    pub friction: f64,
    /// Rolling resistance coefficient, rolling contacts only (default: 0.0).
    pub rolling_friction: f64,
    /// Spinning resistance coefficient, rolling contacts only (default: 0.0).
    pub spinning_friction: f64,
    /// Normal and sliding compliance (default: 0.0, rigid).
    pub compliance: f64,
    /// Restitution coefficient (default: 0.0).
    pub restitution: f64,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction: 0.6,
            rolling_friction: 0.0,
            spinning_friction: 0.0,
            compliance: 0.0,
            restitution: 0.0,
        }
    }
}

impl ContactMaterial {
    pub fn frictionless() -> Self {
        Self {
            friction: 0.0,
            ..Self::default()
        }
    }

    /// Every coefficient is finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [
            self.friction,
            self.rolling_friction,
            self.spinning_friction,
            self.compliance,
            self.restitution,
        ]
        .iter()
        .all(|c| c.is_finite() && *c >= 0.0)
    }
}

/// One contact event from the collision detector.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactPair {
    pub body_a: hecs::Entity,
    pub body_b: hecs::Entity,
    /// World-space contact point.
    pub point: DVec3,
    /// Contact normal, pointing from A to B.
    pub normal: DVec3,
    pub tangents: [DVec3; 2],
    /// Penetration depth (positive = overlapping).
    pub penetration: f64,
    pub material: ContactMaterial,
    pub rolling: bool,
}

impl ContactPair {
    pub fn new(
        body_a: hecs::Entity,
        body_b: hecs::Entity,
        point: DVec3,
        normal: DVec3,
        penetration: f64,
    ) -> Self {
        let (u, v) = normal.normalize_or_zero().any_orthonormal_pair();
        Self {
            body_a,
            body_b,
            point,
            normal,
            tangents: [u, v],
            penetration,
            material: ContactMaterial::default(),
            rolling: false,
        }
    }

    pub fn with_material(mut self, material: ContactMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_tangents(mut self, u: DVec3, v: DVec3) -> Self {
        self.tangents = [u, v];
        self
    }

    /// Mark as a rolling contact (adds spin and rolling rows).
    pub fn rolling(mut self) -> Self {
        self.rolling = true;
        self
    }

    /// Why a container must refuse this pair, if it must.
    pub fn defect(&self) -> Option<&'static str> {
        if !self.normal.is_finite() || self.normal.length_squared() < DEGENERATE_LENGTH_SQ {
            Some("degenerate normal")
        } else if !self.point.is_finite() {
            Some("non-finite point")
        } else if !self.penetration.is_finite() {
            Some("non-finite penetration")
        } else if !self.material.is_valid() {
            Some("negative or non-finite material coefficient")
        } else {
            None
        }
    }
}

/// Contact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactKind {
    /// Normal and two sliding rows.
    Plain,
    /// Plain rows plus spin and two rolling rows.
    Rolling,
}

impl ContactKind {
    pub const fn rows(self) -> usize {
        match self {
            ContactKind::Plain => 3,
            ContactKind::Rolling => 6,
        }
    }
}

/// One scalar constraint row: 6 entries per body, linear first, then angular
/// (world frame).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JacobianRow {
    pub body_a: [f64; 6],
    pub body_b: [f64; 6],
}

impl JacobianRow {
    pub fn from_parts(lin_a: DVec3, ang_a: DVec3, lin_b: DVec3, ang_b: DVec3) -> Self {
        Self {
            body_a: [lin_a.x, lin_a.y, lin_a.z, ang_a.x, ang_a.y, ang_a.z],
            body_b: [lin_b.x, lin_b.y, lin_b.z, ang_b.x, ang_b.y, ang_b.z],
        }
    }

    /// Relative velocity along this row.
    #[inline]
    pub fn velocity(&self, a: &BodyState, b: &BodyState) -> f64 {
        a.velocity_along(&self.body_a) + b.velocity_along(&self.body_b)
    }
}

/// Persistent per-contact constraint record owned by a [`ContactRegistry`].
#[derive(Debug, Clone)]
pub struct ContactConstraint {
    pub body_a: hecs::Entity,
    pub body_b: hecs::Entity,
    pub point: DVec3,
    pub normal: DVec3,
    pub tangents: [DVec3; 2],
    pub penetration: f64,
    pub material: ContactMaterial,
    pub kind: ContactKind,
    /// Rows: normal, u, v, then spin, roll-u, roll-v for rolling contacts.
    pub jacobian: [JacobianRow; 6],
    /// `C = -penetration`.
    pub violation: f64,
    /// Normal relative velocity at the last `update` (negative = approaching).
    pub approach_speed: f64,
    pub impulse: [f64; 6],
    pub reaction: [f64; 6],
    pub(crate) bodies: [usize; 2],
    pub(crate) updated_at: f64,
}

impl ContactConstraint {
    pub(crate) fn from_pair(pair: &ContactPair, normal: DVec3, tangents: [DVec3; 2]) -> Self {
        Self {
            body_a: pair.body_a,
            body_b: pair.body_b,
            point: pair.point,
            normal,
            tangents,
            penetration: pair.penetration,
            material: pair.material,
            kind: if pair.rolling {
                ContactKind::Rolling
            } else {
                ContactKind::Plain
            },
            jacobian: [JacobianRow::default(); 6],
            violation: -pair.penetration,
            approach_speed: 0.0,
            impulse: [0.0; 6],
            reaction: [0.0; 6],
            bodies: [0, 0],
            updated_at: f64::NAN,
        }
    }

    pub fn rows(&self) -> usize {
        self.kind.rows()
    }

    /// Body indices into the [`BodyTable`] of the last `update`.
    pub fn body_indices(&self) -> [usize; 2] {
        self.bodies
    }

    /// Simulation time of the last `update`.
    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    pub fn impulse(&self) -> &[f64] {
        &self.impulse[..self.rows()]
    }

    pub fn reaction(&self) -> &[f64] {
        &self.reaction[..self.rows()]
    }

    /// Normal reaction force from the last step.
    pub fn normal_force(&self) -> f64 {
        self.reaction[0]
    }

    fn report(&self) -> ContactReport<'_> {
        ContactReport {
            body_a: self.body_a,
            body_b: self.body_b,
            point: self.point,
            normal: self.normal,
            tangents: self.tangents,
            reaction: self.reaction(),
        }
    }
}

/// Read-only view of one contact handed to a reporting visitor.
#[derive(Debug, Clone, Copy)]
pub struct ContactReport<'a> {
    pub body_a: hecs::Entity,
    pub body_b: hecs::Entity,
    pub point: DVec3,
    pub normal: DVec3,
    pub tangents: [DVec3; 2],
    /// Normal, u, v reaction (and spin, roll-u, roll-v for rolling contacts).
    pub reaction: &'a [f64],
}

/// Outcome of [`ContactContainer::report_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    /// Every contact visited, or the visitor stopped early.
    Complete { visited: usize },
    /// The container cannot enumerate its contacts.
    Partial { visited: usize },
}

/// Contact storage driven by the collision detector.
pub trait ContactContainer {
    /// Start a cycle. Does nothing if one is already open.
    fn begin_cycle(&mut self);

    /// Register a contact for the open cycle. Returns `false` if the pair was
    /// rejected as degenerate.
    ///
    /// # Panics
    /// If no cycle is open.
    fn add_contact(&mut self, pair: &ContactPair) -> bool;

    /// Close the cycle and drop contacts not re-added in it.
    ///
    /// # Panics
    /// If no cycle is open.
    fn end_cycle(&mut self);

    /// Number of scalar constraint rows.
    fn count(&self) -> usize;

    /// Refresh per-contact data from a body snapshot.
    fn update(&mut self, time: f64, bodies: &BodyTable) -> Result<(), SolverError>;

    /// Visit contacts until the visitor returns `false`.
    fn report_all(&self, visitor: &mut dyn FnMut(&ContactReport<'_>) -> bool) -> ReportStatus;

    /// Drop every contact.
    fn remove_all(&mut self);
}
