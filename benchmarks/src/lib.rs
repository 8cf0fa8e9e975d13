//! Scene builders shared by the benchmarks.

use contactor::{ContactMaterial, ContactPair, Pose, RigidBody};
use glam::DVec3;

/// A static ground plus `n` unit cubes resting on it in a square grid, with
/// the four bottom-corner contacts of every cube.
pub fn resting_boxes(n: usize) -> (hecs::World, Vec<ContactPair>) {
    let mut world = hecs::World::new();
    let ground = world.spawn((RigidBody::new_static(), Pose::default()));
    let side = (n as f64).sqrt().ceil() as usize;

    let mut pairs = Vec::with_capacity(n * 4);
    for i in 0..n {
        let center = DVec3::new((i % side) as f64 * 2.0, 0.5, (i / side) as f64 * 2.0);
        let body = world.spawn((
            RigidBody::solid_box(1.0, DVec3::splat(0.5)),
            Pose::from_position(center),
        ));
        for (x, z) in [(-0.5, -0.5), (0.5, -0.5), (-0.5, 0.5), (0.5, 0.5)] {
            let corner = center + DVec3::new(x, -0.5, z);
            pairs.push(ContactPair::new(ground, body, corner, DVec3::Y, 0.001));
        }
    }
    (world, pairs)
}

/// `n` spheres resting on a static ground, one rolling contact each.
pub fn rolling_spheres(n: usize) -> (hecs::World, Vec<ContactPair>) {
    let mut world = hecs::World::new();
    let ground = world.spawn((RigidBody::new_static(), Pose::default()));
    let side = (n as f64).sqrt().ceil() as usize;
    let material = ContactMaterial {
        rolling_friction: 0.01,
        spinning_friction: 0.01,
        ..ContactMaterial::default()
    };

    let mut pairs = Vec::with_capacity(n);
    for i in 0..n {
        let center = DVec3::new((i % side) as f64 * 2.0, 0.5, (i / side) as f64 * 2.0);
        let body = world.spawn((RigidBody::solid_sphere(1.0, 0.5), Pose::from_position(center)));
        pairs.push(
            ContactPair::new(ground, body, center - DVec3::new(0.0, 0.5, 0.0), DVec3::Y, 0.001)
                .with_material(material)
                .rolling(),
        );
    }
    (world, pairs)
}

/// Apply gravity to every dynamic body.
pub fn with_gravity(world: &mut hecs::World) {
    contactor::body::apply_gravity(world, DVec3::new(0.0, -9.81, 0.0));
}
