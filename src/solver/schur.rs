//! Matrix-free Schur complement `N = D·M⁻¹·Dᵀ + E` over the descriptor rows.
//!
//! `N·x` is evaluated in two phases. First every body sums the impulses of
//! the rows touching it (over the fixed body→rows adjacency) and turns them
//! into a velocity change. Then every row reads the finished per-body
//! velocity changes. No two tasks write the same body or row.

use std::sync::Mutex;

use super::SystemOperator;
use crate::body::{BodyTable, Side};
use crate::descriptor::ConstraintSystemDescriptor;
use crate::par;

pub struct SchurOperator<'a> {
    descriptor: &'a ConstraintSystemDescriptor,
    bodies: &'a BodyTable,
    mask: Option<&'a [bool]>,
    scratch: Mutex<Vec<[f64; 6]>>,
}

impl<'a> SchurOperator<'a> {
    /// Operator over every row of a descriptor whose Jacobians are loaded.
    pub fn new(descriptor: &'a ConstraintSystemDescriptor, bodies: &'a BodyTable) -> Self {
        assert_eq!(
            descriptor.body_count(),
            bodies.len(),
            "descriptor was loaded against a different body table"
        );
        Self {
            descriptor,
            bodies,
            mask: None,
            scratch: Mutex::new(vec![[0.0; 6]; bodies.len()]),
        }
    }

    /// Restrict to rows where `mask` is true. Other rows act as identity.
    pub fn masked(
        descriptor: &'a ConstraintSystemDescriptor,
        bodies: &'a BodyTable,
        mask: &'a [bool],
    ) -> Self {
        assert_eq!(mask.len(), descriptor.rows());
        Self {
            mask: Some(mask),
            ..Self::new(descriptor, bodies)
        }
    }

    #[inline]
    fn active(&self, row: usize) -> bool {
        self.mask.map_or(true, |m| m[row])
    }

    fn gather(&self, x: &[f64], out: &mut [[f64; 6]]) {
        let jacobians = self.descriptor.jacobians();
        let adjacency = self.descriptor.adjacency();
        let bodies = self.bodies;

        par::for_each_mut(out, |b, dv| {
            let body = bodies.get(b);
            if !body.is_dynamic() {
                *dv = [0.0; 6];
                return;
            }
            let mut impulse = [0.0; 6];
            for &(row, side) in adjacency.of(b) {
                if !self.active(row) || x[row] == 0.0 {
                    continue;
                }
                let j = match side {
                    Side::A => &jacobians[row].body_a,
                    Side::B => &jacobians[row].body_b,
                };
                for k in 0..6 {
                    impulse[k] += j[k] * x[row];
                }
            }
            *dv = body.response(&impulse);
        });
    }

    /// Per-body velocity change `M⁻¹·Dᵀ·x`.
    pub fn body_response(&self, x: &[f64]) -> Vec<[f64; 6]> {
        let mut out = vec![[0.0; 6]; self.bodies.len()];
        self.gather(x, &mut out);
        out
    }
}

#[inline]
fn dot6(a: &[f64; 6], b: &[f64; 6]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl SystemOperator for SchurOperator<'_> {
    fn dim(&self) -> usize {
        self.descriptor.rows()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        let mut scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        self.gather(x, &mut scratch);

        let dv: &[[f64; 6]] = &scratch;
        let jacobians = self.descriptor.jacobians();
        let row_bodies = self.descriptor.row_bodies();
        let compliance = self.descriptor.compliance();

        par::for_each_mut(out, |row, value| {
            if !self.active(row) {
                *value = x[row];
                return;
            }
            let [a, b] = row_bodies[row];
            let j = &jacobians[row];
            *value = dot6(&j.body_a, &dv[a]) + dot6(&j.body_b, &dv[b]) + compliance[row] * x[row];
        });
    }

    fn project(&self, x: &mut [f64]) {
        self.descriptor.project(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Pose, RigidBody};
    use crate::contact::{ContactContainer, ContactMaterial, ContactPair, ContactRegistry};
    use crate::descriptor::BilateralConstraint;
    use glam::DVec3;

    fn loaded(
        world: &hecs::World,
        pairs: &[ContactPair],
        bilaterals: &[BilateralConstraint],
    ) -> (BodyTable, ConstraintSystemDescriptor) {
        let bodies = BodyTable::gather(world);
        let mut registry = ContactRegistry::new();
        registry.begin_cycle();
        for p in pairs {
            registry.add_contact(p);
        }
        registry.end_cycle();
        registry.update(0.0, &bodies).unwrap();

        let mut desc = ConstraintSystemDescriptor::new();
        desc.reset_bilateral(bilaterals, Some(&registry));
        desc.load_residual(60.0, 1.0, true);
        desc.load_jacobians(&bodies).unwrap();
        (bodies, desc)
    }

    /// Dense `N` built column by column.
    fn dense(op: &SchurOperator<'_>) -> Vec<Vec<f64>> {
        let n = op.dim();
        let mut cols = Vec::new();
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let mut col = vec![0.0; n];
            op.apply(&e, &mut col);
            cols.push(col);
        }
        cols
    }

    #[test]
    fn test_operator_is_symmetric() {
        let mut world = hecs::World::new();
        let a = world.spawn((
            RigidBody::solid_box(1.0, DVec3::splat(0.5)),
            Pose::from_position(DVec3::new(0.0, 0.5, 0.0)),
        ));
        let b = world.spawn((
            RigidBody::solid_sphere(2.0, 0.5),
            Pose::from_position(DVec3::new(0.3, 1.4, 0.1)),
        ));
        let pairs = [
            ContactPair::new(a, b, DVec3::new(0.1, 1.0, 0.0), DVec3::new(0.2, 1.0, 0.0), 0.01),
            ContactPair::new(a, b, DVec3::new(-0.2, 1.0, 0.1), DVec3::Y, 0.0).rolling(),
        ];
        let bilaterals = [BilateralConstraint::linear(a, b, DVec3::Z, 0.0)];
        let (bodies, desc) = loaded(&world, &pairs, &bilaterals);
        let op = SchurOperator::new(&desc, &bodies);
        let n = dense(&op);
        for i in 0..n.len() {
            for j in 0..n.len() {
                assert!((n[i][j] - n[j][i]).abs() < 1e-12, "N[{i}][{j}] != N[{j}][{i}]");
            }
            assert!(n[i][i] > 0.0);
        }
    }

    #[test]
    fn test_single_contact_entry() {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let body = world.spawn((
            RigidBody::solid_box(2.0, DVec3::splat(0.5)),
            Pose::from_position(DVec3::new(0.0, 0.5, 0.0)),
        ));
        let pair = ContactPair::new(ground, body, DVec3::ZERO, DVec3::Y, 0.0)
            .with_material(ContactMaterial {
                compliance: 1e-4,
                ..ContactMaterial::default()
            });
        let (bodies, desc) = loaded(&world, &[pair], &[]);
        let op = SchurOperator::new(&desc, &bodies);
        let mut out = vec![0.0; 3];
        op.apply(&[1.0, 0.0, 0.0], &mut out);
        // 1/m + compliance / h²
        assert!((out[0] - (0.5 + 1e-4 * 3600.0)).abs() < 1e-12, "N_nn = {}", out[0]);
    }

    #[test]
    fn test_masked_rows_are_identity() {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let body = world.spawn((RigidBody::new_dynamic(1.0), Pose::from_position(DVec3::Y)));
        let pair = ContactPair::new(ground, body, DVec3::ZERO, DVec3::Y, 0.0);
        let (bodies, desc) = loaded(&world, &[pair], &[]);
        let mask = desc.position_mask();
        let op = SchurOperator::masked(&desc, &bodies, &mask);
        let mut out = vec![0.0; 3];
        op.apply(&[0.0, 2.0, 3.0], &mut out);
        assert_eq!(out, vec![0.0, 2.0, 3.0]);
    }
}
