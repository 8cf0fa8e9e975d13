//! Spring-damper (DEM) contact forces.
//!
//! Per contact, with penetration `δ` and relative velocity split into normal
//! `v_n` and tangential `v_t` parts:
//!
//! ```text
//! F_n = max(k·δ − c_n·v_n, 0)
//! F_t = −c_t·v_t, clamped to ‖F_t‖ ≤ μ·F_n
//! ```
//!
//! Forces are computed per contact, then each body sums the contacts touching
//! it in contact order. Rolling resistance is not modeled; rolling contacts
//! only get their normal and sliding forces.

use crate::body::{BodyAdjacency, BodyTable, Side};
use crate::contact::ContactRegistry;
use crate::par;
use crate::settings::PenaltySettings;

/// Reusable buffers for the penalty force pass.
#[derive(Debug, Default)]
pub struct PenaltyModel {
    forces: Vec<[f64; 3]>,
    pairs: Vec<[usize; 2]>,
    adjacency: BodyAdjacency,
}

impl PenaltyModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[F_n, F_u, F_v]` per contact from the last [`Self::apply`], plain
    /// contacts first.
    pub fn forces(&self) -> &[[f64; 3]] {
        &self.forces
    }

    /// Compute contact forces and add them to the body force and torque
    /// accumulators of `bodies`. The registry must be updated against the
    /// same table.
    pub fn apply(
        &mut self,
        registry: &ContactRegistry,
        bodies: &mut BodyTable,
        settings: &PenaltySettings,
    ) {
        let records: Vec<_> = registry.iter().collect();
        let table: &BodyTable = bodies;
        self.forces = par::map_collect(&records, |c| {
            let [a, b] = c.body_indices();
            let (a, b) = (table.get(a), table.get(b));
            let v_n = c.jacobian[0].velocity(a, b);
            let v_u = c.jacobian[1].velocity(a, b);
            let v_v = c.jacobian[2].velocity(a, b);

            let f_n = (settings.stiffness() * c.penetration - settings.normal_damping() * v_n).max(0.0);
            let mut f_u = -settings.tangential_damping() * v_u;
            let mut f_v = -settings.tangential_damping() * v_v;
            let limit = c.material.friction * f_n;
            let f_t = (f_u * f_u + f_v * f_v).sqrt();
            if f_t > limit {
                let scale = if f_t > 0.0 { limit / f_t } else { 0.0 };
                f_u *= scale;
                f_v *= scale;
            }
            [f_n, f_u, f_v]
        });

        self.pairs.clear();
        self.pairs.extend(records.iter().map(|c| c.body_indices()));
        self.adjacency.rebuild(bodies.len(), &self.pairs);

        let forces = &self.forces;
        let adjacency = &self.adjacency;
        par::for_each_mut(bodies.states_mut(), |i, body| {
            if !body.is_dynamic() {
                return;
            }
            let mut g = [0.0; 6];
            for &(item, side) in adjacency.of(i) {
                let c = records[item];
                for (row, f) in forces[item].iter().enumerate() {
                    let j = match side {
                        Side::A => &c.jacobian[row].body_a,
                        Side::B => &c.jacobian[row].body_b,
                    };
                    for k in 0..6 {
                        g[k] += j[k] * f;
                    }
                }
            }
            body.force += glam::DVec3::new(g[0], g[1], g[2]);
            body.torque += glam::DVec3::new(g[3], g[4], g[5]);
        });
    }

    /// Store the last forces as contact reactions (`impulse = F·h`).
    pub fn store_reactions(&self, registry: &mut ContactRegistry, step: f64) {
        let (plain, rolling) = registry.records_mut();
        for (c, f) in plain.iter_mut().chain(rolling.iter_mut()).zip(&self.forces) {
            c.reaction = [0.0; 6];
            c.impulse = [0.0; 6];
            for k in 0..3 {
                c.reaction[k] = f[k];
                c.impulse[k] = f[k] * step;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Pose, RigidBody};
    use crate::contact::{ContactContainer, ContactMaterial, ContactPair};
    use glam::DVec3;

    fn setup(velocity: DVec3, penetration: f64, friction: f64) -> (hecs::World, ContactRegistry) {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let mut rb = RigidBody::new_dynamic(1.0);
        rb.linear_velocity = velocity;
        let body = world.spawn((rb, Pose::from_position(DVec3::new(0.0, 0.5, 0.0))));

        let mut registry = ContactRegistry::new();
        registry.begin_cycle();
        registry.add_contact(
            &ContactPair::new(ground, body, DVec3::ZERO, DVec3::Y, penetration)
                .with_tangents(DVec3::X, DVec3::Z)
                .with_material(ContactMaterial {
                    friction,
                    ..ContactMaterial::default()
                }),
        );
        registry.end_cycle();
        (world, registry)
    }

    #[test]
    fn test_spring_damper_normal_force() {
        let (world, mut registry) = setup(DVec3::new(0.0, -0.1, 0.0), 0.01, 0.0);
        let mut bodies = BodyTable::gather(&world);
        registry.update(0.0, &bodies).unwrap();

        let settings = PenaltySettings::new(1000.0, 50.0, 10.0).unwrap();
        let mut model = PenaltyModel::new();
        model.apply(&registry, &mut bodies, &settings);

        // k·δ − c·v_n = 10 + 5
        let f = model.forces()[0];
        assert!((f[0] - 15.0).abs() < 1e-12, "F_n = {}", f[0]);

        let body = bodies.states().iter().find(|b| b.is_dynamic()).unwrap();
        assert!((body.force.y - 15.0).abs() < 1e-12);
        // contact point directly below the center: no torque
        assert!(body.torque.length() < 1e-12);

        model.store_reactions(&mut registry, 0.01);
        assert!((registry.contacts()[0].normal_force() - 15.0).abs() < 1e-12);
        assert!((registry.contacts()[0].impulse[0] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_separating_contact_has_no_force() {
        let (world, registry) = setup(DVec3::new(0.0, 5.0, 0.0), 0.001, 0.5);
        let mut bodies = BodyTable::gather(&world);
        let mut registry = registry;
        registry.update(0.0, &bodies).unwrap();
        let mut model = PenaltyModel::new();
        model.apply(&registry, &mut bodies, &PenaltySettings::default());
        assert_eq!(model.forces()[0], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_friction_is_clamped_to_cone() {
        let (world, mut registry) = setup(DVec3::new(2.0, 0.0, 0.0), 0.01, 0.5);
        let mut bodies = BodyTable::gather(&world);
        registry.update(0.0, &bodies).unwrap();
        let settings = PenaltySettings::new(1000.0, 0.0, 1e4).unwrap();
        let mut model = PenaltyModel::new();
        model.apply(&registry, &mut bodies, &settings);
        let [f_n, f_u, f_v] = model.forces()[0];
        assert!((f_n - 10.0).abs() < 1e-12);
        assert!((f_u + 5.0).abs() < 1e-12, "F_u = {}", f_u);
        assert_eq!(f_v, 0.0);
    }
}
