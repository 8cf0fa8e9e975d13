//! End-to-end contact scenarios through `ContactWorld`.

use contactor::glam::DVec3;
use contactor::hecs;
use contactor::{
    ContactMaterial, ContactMode, ContactPair, ContactWorld, PenaltySettings, Pose, RigidBody,
    SolverMethod, SolverSettings, WorldConfig,
};

const RADIUS: f64 = 0.5;
const GRAVITY: f64 = 9.81;
const CONTACT_MARGIN: f64 = 0.01;

/// Sphere-sphere contact between two entities, if they overlap.
fn sphere_pair(world: &hecs::World, a: hecs::Entity, b: hecs::Entity) -> Option<ContactPair> {
    let pa = world.get::<&Pose>(a).ok()?.position;
    let pb = world.get::<&Pose>(b).ok()?.position;
    let d = pb - pa;
    let dist = d.length();
    let penetration = 2.0 * RADIUS - dist;
    if penetration < 0.0 || dist <= 0.0 {
        return None;
    }
    let normal = d / dist;
    let point = pa + normal * (RADIUS - 0.5 * penetration);
    Some(
        ContactPair::new(a, b, point, normal, penetration)
            .with_material(ContactMaterial::frictionless()),
    )
}

/// Static lower sphere at the origin, unit-mass upper sphere just touching it.
fn stacked_spheres() -> (hecs::World, hecs::Entity, hecs::Entity) {
    let mut world = hecs::World::new();
    let lower = world.spawn((RigidBody::new_static(), Pose::default()));
    let upper = world.spawn((
        RigidBody::solid_sphere(1.0, RADIUS),
        Pose::from_position(DVec3::new(0.0, 2.0 * RADIUS, 0.0)),
    ));
    (world, lower, upper)
}

fn resting_impulse_force(dt: f64) -> f64 {
    let (mut world, lower, upper) = stacked_spheres();
    let mut settings = SolverSettings::default();
    settings.set_tolerance(1e-10).unwrap();
    settings.set_max_iterations(1000);
    let config = WorldConfig {
        fixed_timestep: dt,
        ..WorldConfig::default()
    };
    let mut physics = ContactWorld::new(config, settings).unwrap();

    let pair = sphere_pair(&world, lower, upper).expect("spheres touch");
    let report = physics.step(&mut world, &[pair]).unwrap();
    assert!(report.converged, "{:?}", report);
    physics.registry().contacts()[0].impulse[0] / dt
}

fn settled_penalty_force(dt: f64, stiffness: f64, steps: usize) -> f64 {
    let (mut world, lower, upper) = stacked_spheres();
    let damping = 2.0 * (stiffness * 1.0_f64).sqrt();
    let mut settings = SolverSettings::default();
    settings.set_mode(ContactMode::Penalty);
    *settings.penalty_mut() = PenaltySettings::new(stiffness, damping, damping).unwrap();
    let config = WorldConfig {
        fixed_timestep: dt,
        ..WorldConfig::default()
    };
    let mut physics = ContactWorld::new(config, settings).unwrap();

    let mut force = 0.0;
    for _ in 0..steps {
        let pairs: Vec<_> = sphere_pair(&world, lower, upper).into_iter().collect();
        physics.step(&mut world, &pairs).unwrap();
        force = physics
            .registry()
            .contacts()
            .first()
            .map_or(0.0, |c| c.normal_force());
    }
    force
}

#[test]
fn penalty_force_matches_complementarity_impulse() {
    let dt = 1e-4;
    let reference = resting_impulse_force(dt);
    assert!(
        (reference - GRAVITY).abs() / GRAVITY < 1e-6,
        "impulse / h = {}",
        reference
    );

    for stiffness in [1e4, 1e5] {
        let force = settled_penalty_force(dt, stiffness, 3000);
        let relative = (force - reference).abs() / reference;
        assert!(
            relative < 1e-3,
            "k = {stiffness}: penalty force {force} vs {reference} (relative error {relative})"
        );
    }
}

/// Contacts at the bottom corners of a unit cube near the plane `y = 0`.
/// Corners within the margin become contacts with a negative penetration
/// (gap), so the box lands on the plane instead of sinking into it.
fn box_ground_pairs(world: &hecs::World, ground: hecs::Entity, body: hecs::Entity) -> Vec<ContactPair> {
    let Ok(pose) = world.get::<&Pose>(body) else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for (x, z) in [(-0.5, -0.5), (0.5, -0.5), (-0.5, 0.5), (0.5, 0.5)] {
        let corner = pose.position + pose.rotation * DVec3::new(x, -0.5, z);
        if corner.y < CONTACT_MARGIN {
            pairs.push(ContactPair::new(ground, body, corner, DVec3::Y, -corner.y));
        }
    }
    pairs
}

#[test]
fn dropped_box_comes_to_rest() {
    for method in [
        SolverMethod::AcceleratedProjectedGradientDescent,
        SolverMethod::AcceleratedProjectedGradientDescentRestarted,
    ] {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let body = world.spawn((
            RigidBody::solid_box(1.0, DVec3::splat(0.5)),
            Pose::from_position(DVec3::new(0.0, 0.6, 0.0)),
        ));

        let mut settings = SolverSettings::default();
        settings.set_tolerance(1e-8).unwrap();
        settings.set_max_iterations(500);
        settings.set_warm_start(true);
        let mut physics = ContactWorld::new(WorldConfig::default(), settings).unwrap();
        physics.solver_mut().set_solver_type(method).unwrap();

        for _ in 0..180 {
            let pairs = box_ground_pairs(&world, ground, body);
            physics.step(&mut world, &pairs).unwrap();
        }

        let pose = world.get::<&Pose>(body).unwrap();
        let rb = world.get::<&RigidBody>(body).unwrap();
        assert!(
            (pose.position.y - 0.5).abs() < 0.02,
            "{method}: box height {}",
            pose.position.y
        );
        assert!(
            rb.linear_velocity.length() < 0.05,
            "{method}: box still moving at {:?}",
            rb.linear_velocity
        );
        assert_eq!(physics.registry().active_contacts(), 4);
    }
}
