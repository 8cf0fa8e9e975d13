//! Rigid body components and the per-step body snapshot.
//!
//! Bodies live in a `hecs::World` as entities carrying a [`RigidBody`] and a
//! [`Pose`]. The solver never owns them: each step it gathers a [`BodyTable`]
//! snapshot, works on that, and writes velocities and accumulators back.

use std::collections::HashMap;

use glam::{DMat3, DQuat, DVec3};

use crate::par;

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    /// Affected by forces and constraints.
    Dynamic,
    /// Immovable.
    Static,
    /// Moved by the user; acts as infinite mass for the solver.
    Kinematic,
}

/// Rigid body component.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub body_type: BodyType,
    pub mass: f64,
    /// Inertia tensor in the body frame.
    pub inertia: DMat3,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
    pub force_accumulator: DVec3,
    pub torque_accumulator: DVec3,
    /// Gravity scale (default: 1.0).
    pub gravity_scale: f64,
}

impl RigidBody {
    /// Create a new dynamic rigid body with the given mass.
    pub fn new_dynamic(mass: f64) -> Self {
        // Default inertia tensor: identity * mass (unit sphere approximation)
        Self {
            body_type: BodyType::Dynamic,
            mass,
            inertia: DMat3::from_diagonal(DVec3::splat(mass)),
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            force_accumulator: DVec3::ZERO,
            torque_accumulator: DVec3::ZERO,
            gravity_scale: 1.0,
        }
    }

    /// Dynamic solid box with the given half extents.
    pub fn solid_box(mass: f64, half_extents: DVec3) -> Self {
        let e = half_extents * 2.0;
        let diag = DVec3::new(e.y * e.y + e.z * e.z, e.x * e.x + e.z * e.z, e.x * e.x + e.y * e.y)
            * (mass / 12.0);
        Self::new_dynamic(mass).with_inertia(DMat3::from_diagonal(diag))
    }

    /// Dynamic solid sphere.
    pub fn solid_sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new_dynamic(mass).with_inertia(DMat3::from_diagonal(DVec3::splat(i)))
    }

    /// Create a new static rigid body.
    pub fn new_static() -> Self {
        Self {
            body_type: BodyType::Static,
            mass: 0.0,
            inertia: DMat3::ZERO,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            force_accumulator: DVec3::ZERO,
            torque_accumulator: DVec3::ZERO,
            gravity_scale: 0.0,
        }
    }

    /// Create a new kinematic rigid body.
    pub fn new_kinematic() -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Self::new_static()
        }
    }

    pub fn with_inertia(mut self, inertia: DMat3) -> Self {
        self.inertia = inertia;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic && self.mass > 0.0
    }

    pub fn inv_mass(&self) -> f64 {
        if self.is_dynamic() {
            1.0 / self.mass
        } else {
            0.0
        }
    }
}

/// World-space placement of a body's center of mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Pose {
    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            rotation: DQuat::IDENTITY,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::from_position(DVec3::ZERO)
    }
}

/// Gyroscopic torque `ω × (I·ω)` for a world-frame inertia tensor.
pub fn gyroscopic_torque(inertia: DMat3, omega: DVec3) -> DVec3 {
    omega.cross(inertia * omega)
}

/// Apply gravity force to all dynamic rigid bodies.
pub fn apply_gravity(world: &mut hecs::World, gravity: DVec3) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        if rb.is_dynamic() {
            rb.force_accumulator += gravity * rb.mass * rb.gravity_scale;
        }
    }
}

/// Integrate positions: p += v * dt, q += 0.5 * omega * q * dt.
pub fn integrate_positions(world: &mut hecs::World, dt: f64) {
    for (_, (rb, pose)) in world.query_mut::<(&RigidBody, &mut Pose)>() {
        if rb.body_type == BodyType::Static {
            continue;
        }

        pose.position += rb.linear_velocity * dt;

        let omega = rb.angular_velocity;
        if omega.length_squared() > 1e-20 {
            let omega_quat = DQuat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
            let q_dot = omega_quat * pose.rotation * 0.5;
            pose.rotation = DQuat::from_xyzw(
                pose.rotation.x + q_dot.x * dt,
                pose.rotation.y + q_dot.y * dt,
                pose.rotation.z + q_dot.z * dt,
                pose.rotation.w + q_dot.w * dt,
            )
            .normalize();
        }
    }
}

/// Clear force and torque accumulators on all rigid bodies.
pub fn clear_forces(world: &mut hecs::World) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        rb.force_accumulator = DVec3::ZERO;
        rb.torque_accumulator = DVec3::ZERO;
    }
}

/// Snapshot of one body, in world frame.
#[derive(Debug, Clone)]
pub struct BodyState {
    pub entity: hecs::Entity,
    pub inv_mass: f64,
    pub inertia: DMat3,
    pub inv_inertia: DMat3,
    pub position: DVec3,
    pub rotation: DQuat,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
    pub force: DVec3,
    pub torque: DVec3,
}

impl BodyState {
    fn from_components(entity: hecs::Entity, rb: &RigidBody, pose: &Pose) -> Self {
        let (inertia, inv_inertia) = if rb.is_dynamic() {
            let rot = DMat3::from_quat(pose.rotation);
            let inv_body = if rb.inertia.determinant().abs() > f64::EPSILON {
                rb.inertia.inverse()
            } else {
                DMat3::ZERO
            };
            (
                rot * rb.inertia * rot.transpose(),
                rot * inv_body * rot.transpose(),
            )
        } else {
            (DMat3::ZERO, DMat3::ZERO)
        };

        Self {
            entity,
            inv_mass: rb.inv_mass(),
            inertia,
            inv_inertia,
            position: pose.position,
            rotation: pose.rotation,
            linear_velocity: rb.linear_velocity,
            angular_velocity: rb.angular_velocity,
            force: rb.force_accumulator,
            torque: rb.torque_accumulator,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.inv_mass > 0.0
    }

    /// Dot product of a 6-wide Jacobian block with this body's velocity.
    #[inline]
    pub fn velocity_along(&self, j: &[f64; 6]) -> f64 {
        let v = self.linear_velocity;
        let w = self.angular_velocity;
        j[0] * v.x + j[1] * v.y + j[2] * v.z + j[3] * w.x + j[4] * w.y + j[5] * w.z
    }

    /// Velocity change `M⁻¹·g` caused by a generalized impulse `g`.
    #[inline]
    pub fn response(&self, g: &[f64; 6]) -> [f64; 6] {
        let lin = DVec3::new(g[0], g[1], g[2]) * self.inv_mass;
        let ang = self.inv_inertia * DVec3::new(g[3], g[4], g[5]);
        [lin.x, lin.y, lin.z, ang.x, ang.y, ang.z]
    }
}

/// Per-step snapshot of every body in the world, indexed densely.
#[derive(Debug, Default)]
pub struct BodyTable {
    states: Vec<BodyState>,
    index: HashMap<hecs::Entity, usize>,
}

impl BodyTable {
    /// Gather all entities with both a [`RigidBody`] and a [`Pose`].
    pub fn gather(world: &hecs::World) -> Self {
        let mut states = Vec::new();
        let mut index = HashMap::new();
        for (entity, (rb, pose)) in world.query::<(&RigidBody, &Pose)>().iter() {
            index.insert(entity, states.len());
            states.push(BodyState::from_components(entity, rb, pose));
        }
        Self { states, index }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn index_of(&self, entity: hecs::Entity) -> Option<usize> {
        self.index.get(&entity).copied()
    }

    pub fn get(&self, index: usize) -> &BodyState {
        &self.states[index]
    }

    pub fn states(&self) -> &[BodyState] {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut [BodyState] {
        &mut self.states
    }

    /// Advance velocities by the accumulated forces over `dt`, including the
    /// gyroscopic term: `ω += dt·I⁻¹·(τ − ω × I·ω)`.
    pub fn apply_accumulated_forces(&mut self, dt: f64) {
        par::for_each_mut(&mut self.states, |_, body| {
            if !body.is_dynamic() {
                return;
            }
            let gyro = gyroscopic_torque(body.inertia, body.angular_velocity);
            body.linear_velocity += body.force * body.inv_mass * dt;
            body.angular_velocity += body.inv_inertia * (body.torque - gyro) * dt;
        });
    }

    /// Add per-body velocity changes (linear, angular) to the snapshot.
    pub fn apply_velocity_changes(&mut self, deltas: &[[f64; 6]]) {
        par::for_each_mut(&mut self.states, |i, body| {
            let d = &deltas[i];
            body.linear_velocity += DVec3::new(d[0], d[1], d[2]);
            body.angular_velocity += DVec3::new(d[3], d[4], d[5]);
        });
    }

    /// Write velocities and force accumulators back to the world.
    pub fn write_back(&self, world: &mut hecs::World) {
        for body in &self.states {
            if let Ok(mut rb) = world.get::<&mut RigidBody>(body.entity) {
                if !rb.is_dynamic() {
                    continue;
                }
                rb.linear_velocity = body.linear_velocity;
                rb.angular_velocity = body.angular_velocity;
                rb.force_accumulator = body.force;
                rb.torque_accumulator = body.torque;
            }
        }
    }

    /// Shift poses by per-body position corrections (linear, small-angle rotation).
    pub fn write_pose_corrections(&self, world: &mut hecs::World, corrections: &[[f64; 6]]) {
        for (body, d) in self.states.iter().zip(corrections) {
            if !body.is_dynamic() {
                continue;
            }
            if let Ok(mut pose) = world.get::<&mut Pose>(body.entity) {
                pose.position += DVec3::new(d[0], d[1], d[2]);
                let dtheta = DVec3::new(d[3], d[4], d[5]);
                if dtheta.length_squared() > 0.0 {
                    pose.rotation = (DQuat::from_scaled_axis(dtheta) * pose.rotation).normalize();
                }
            }
        }
    }
}

/// Which side of a two-body row a body sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Compressed body → items map used for conflict-free per-body reductions.
///
/// Items touching a body are listed in ascending item order, so sums over a
/// body's items are reproducible.
#[derive(Debug, Default, Clone)]
pub struct BodyAdjacency {
    offsets: Vec<usize>,
    entries: Vec<(usize, Side)>,
}

impl BodyAdjacency {
    /// Rebuild from the `[body_a, body_b]` indices of each item.
    pub fn rebuild(&mut self, body_count: usize, items: &[[usize; 2]]) {
        self.offsets.clear();
        self.offsets.resize(body_count + 1, 0);
        for pair in items {
            self.offsets[pair[0] + 1] += 1;
            self.offsets[pair[1] + 1] += 1;
        }
        for i in 0..body_count {
            self.offsets[i + 1] += self.offsets[i];
        }

        self.entries.clear();
        self.entries.resize(items.len() * 2, (0, Side::A));
        let mut cursor: Vec<usize> = self.offsets[..body_count].to_vec();
        for (item, pair) in items.iter().enumerate() {
            self.entries[cursor[pair[0]]] = (item, Side::A);
            cursor[pair[0]] += 1;
            self.entries[cursor[pair[1]]] = (item, Side::B);
            cursor[pair[1]] += 1;
        }
    }

    /// Items touching `body`.
    pub fn of(&self, body: usize) -> &[(usize, Side)] {
        &self.entries[self.offsets[body]..self.offsets[body + 1]]
    }

    pub fn body_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}
