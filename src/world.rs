//! Fixed-step driver around the contact registry and the solver.
//!
//! # Pipeline
//!
//! Each fixed step:
//!
//! 1. Apply forces (gravity)
//! 2. Feed contacts through the Begin/Add/End protocol
//! 3. Solve contact and bilateral constraints
//! 4. Integrate positions
//! 5. Clear force accumulators

use glam::DVec3;

use crate::body::{apply_gravity, clear_forces, integrate_positions};
use crate::contact::{AggregateContacts, ContactContainer, ContactPair, ContactRegistry};
use crate::descriptor::BilateralConstraint;
use crate::error::{ConfigError, SolverError};
use crate::framework::{IterativeSolver, StepReport};
use crate::settings::SolverSettings;

/// Configuration for the simulation loop.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: DVec3,
    /// Fixed timestep in seconds. Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of fixed steps per [`ContactWorld::advance`]. Default: 4.
    pub max_substeps: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: DVec3::new(0.0, -9.81, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 4,
        }
    }
}

/// Run one Begin/Add/End cycle on `container`. Returns how many pairs it
/// accepted.
pub fn feed_contacts<C: ContactContainer + ?Sized>(container: &mut C, pairs: &[ContactPair]) -> usize {
    container.begin_cycle();
    let accepted = pairs.iter().filter(|pair| container.add_contact(pair)).count();
    container.end_cycle();
    accepted
}

/// Owns the contact registry, the solver and the bilateral rows, and steps a
/// `hecs::World` of bodies.
#[derive(Debug)]
pub struct ContactWorld {
    config: WorldConfig,
    solver: IterativeSolver,
    registry: ContactRegistry,
    bilaterals: Vec<BilateralConstraint>,
    statistics: Option<AggregateContacts>,
    time: f64,
    accumulator: f64,
    last_report: Option<StepReport>,
}

impl ContactWorld {
    pub fn new(config: WorldConfig, settings: SolverSettings) -> Result<Self, SolverError> {
        if !(config.fixed_timestep.is_finite() && config.fixed_timestep > 0.0) {
            return Err(ConfigError::InvalidTimestep(config.fixed_timestep).into());
        }
        Ok(Self {
            config,
            solver: IterativeSolver::new(settings)?,
            registry: ContactRegistry::new(),
            bilaterals: Vec::new(),
            statistics: None,
            time: 0.0,
            accumulator: 0.0,
            last_report: None,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn set_gravity(&mut self, gravity: DVec3) {
        self.config.gravity = gravity;
    }

    pub fn set_fixed_timestep(&mut self, dt: f64) -> Result<(), ConfigError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ConfigError::InvalidTimestep(dt));
        }
        self.config.fixed_timestep = dt;
        Ok(())
    }

    pub fn solver(&self) -> &IterativeSolver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut IterativeSolver {
        &mut self.solver
    }

    pub fn registry(&self) -> &ContactRegistry {
        &self.registry
    }

    pub fn bilaterals(&self) -> &[BilateralConstraint] {
        &self.bilaterals
    }

    /// Also feed every step's contacts to an [`AggregateContacts`].
    pub fn set_statistics(&mut self, enabled: bool) {
        self.statistics = enabled.then(AggregateContacts::new);
    }

    /// Totals of the last step's contacts, if enabled.
    pub fn statistics(&self) -> Option<&AggregateContacts> {
        self.statistics.as_ref()
    }

    /// Add a bilateral row. Returns its index.
    pub fn add_bilateral(&mut self, constraint: BilateralConstraint) -> usize {
        self.bilaterals.push(constraint);
        self.bilaterals.len() - 1
    }

    /// Simulated time.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    /// Run one fixed step with the given contacts.
    pub fn step(
        &mut self,
        world: &mut hecs::World,
        pairs: &[ContactPair],
    ) -> Result<StepReport, SolverError> {
        let dt = self.config.fixed_timestep;

        // 1. Forces
        apply_gravity(world, self.config.gravity);

        // 2. Contacts
        let accepted = feed_contacts(&mut self.registry, pairs);
        if accepted < pairs.len() {
            tracing::debug!("{} of {} contacts rejected", pairs.len() - accepted, pairs.len());
        }
        if let Some(statistics) = &mut self.statistics {
            feed_contacts(statistics, pairs);
        }

        // 3. Constraints
        let report = match self.solver.run_time_step(
            world,
            &mut self.registry,
            &mut self.bilaterals,
            dt,
            self.time,
        ) {
            Ok(report) => report,
            Err(err) => {
                clear_forces(world);
                return Err(err);
            }
        };

        // 4-5. Positions, accumulators
        integrate_positions(world, dt);
        clear_forces(world);

        self.time += dt;
        self.last_report = Some(report.clone());
        self.solver.finish_step();
        Ok(report)
    }

    /// Advance by `delta_time` in fixed steps, asking `detect` for the
    /// contacts of each step. Returns the number of steps taken.
    pub fn advance<F>(
        &mut self,
        world: &mut hecs::World,
        delta_time: f64,
        mut detect: F,
    ) -> Result<u32, SolverError>
    where
        F: FnMut(&hecs::World) -> Vec<ContactPair>,
    {
        let dt = self.config.fixed_timestep;
        self.accumulator += delta_time;

        let mut substeps = 0u32;
        while self.accumulator >= dt && substeps < self.config.max_substeps {
            let pairs = detect(world);
            self.step(world, &pairs)?;
            self.accumulator -= dt;
            substeps += 1;
        }

        // Clamp accumulator to avoid spiral of death
        if self.accumulator > dt * self.config.max_substeps as f64 {
            self.accumulator = 0.0;
        }
        Ok(substeps)
    }

    /// Despawn a body. Contacts are fully reset and bilateral rows touching
    /// the body are dropped. Returns `false` if the entity did not exist.
    pub fn remove_body(&mut self, world: &mut hecs::World, entity: hecs::Entity) -> bool {
        self.registry.remove_all();
        self.bilaterals
            .retain(|b| b.body_a != entity && b.body_b != entity);
        world.despawn(entity).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Pose, RigidBody};

    fn falling_body(world: &mut hecs::World) -> hecs::Entity {
        world.spawn((
            RigidBody::new_dynamic(1.0),
            Pose::from_position(DVec3::new(0.0, 10.0, 0.0)),
        ))
    }

    #[test]
    fn test_free_fall() {
        let mut world = hecs::World::new();
        let entity = falling_body(&mut world);
        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();

        for _ in 0..60 {
            physics.step(&mut world, &[]).unwrap();
        }

        let pose = world.get::<&Pose>(entity).unwrap();
        assert!(pose.position.y < 10.0, "Entity should have fallen: y={}", pose.position.y);
        let rb = world.get::<&RigidBody>(entity).unwrap();
        assert!((rb.linear_velocity.y + 9.81).abs() < 1e-9, "v = {}", rb.linear_velocity.y);
        assert_eq!(rb.force_accumulator, DVec3::ZERO);
        assert!((physics.time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_static_body_does_not_move() {
        let mut world = hecs::World::new();
        let entity = world.spawn((RigidBody::new_static(), Pose::from_position(DVec3::Y)));
        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();
        physics.step(&mut world, &[]).unwrap();
        let pose = world.get::<&Pose>(entity).unwrap();
        assert_eq!(pose.position, DVec3::Y);
    }

    #[test]
    fn test_advance_runs_fixed_steps() {
        let mut world = hecs::World::new();
        falling_body(&mut world);
        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();

        let mut calls = 0;
        let steps = physics
            .advance(&mut world, 2.5 / 60.0, |_| {
                calls += 1;
                Vec::new()
            })
            .unwrap();
        assert_eq!(steps, 2);
        assert_eq!(calls, 2);

        // Leftover half step plus a large frame: capped at max_substeps
        let steps = physics.advance(&mut world, 1.0, |_| Vec::new()).unwrap();
        assert_eq!(steps, 4);
    }

    #[test]
    fn test_remove_body_resets_contacts() {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let body = world.spawn((RigidBody::new_dynamic(1.0), Pose::from_position(DVec3::new(0.0, 0.5, 0.0))));
        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();
        physics.add_bilateral(BilateralConstraint::linear(ground, body, DVec3::X, 0.0));

        let pair = ContactPair::new(ground, body, DVec3::ZERO, DVec3::Y, 0.0);
        physics.step(&mut world, &[pair]).unwrap();
        assert_eq!(physics.registry().count(), 3);

        assert!(physics.remove_body(&mut world, body));
        assert_eq!(physics.registry().count(), 0);
        assert!(physics.bilaterals().is_empty());
        assert!(!physics.remove_body(&mut world, body));

        // Stepping afterwards is fine
        physics.step(&mut world, &[]).unwrap();
    }

    #[test]
    fn test_statistics_sink_sees_every_step() {
        let mut world = hecs::World::new();
        let ground = world.spawn((RigidBody::new_static(), Pose::default()));
        let body = world.spawn((RigidBody::new_dynamic(1.0), Pose::from_position(DVec3::new(0.0, 0.5, 0.0))));
        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();
        assert!(physics.statistics().is_none());
        physics.set_statistics(true);

        let pairs = [
            ContactPair::new(ground, body, DVec3::ZERO, DVec3::Y, 0.002),
            ContactPair::new(ground, body, DVec3::X, DVec3::Y, 0.001).rolling(),
            ContactPair::new(ground, body, DVec3::ZERO, DVec3::ZERO, 0.5),
        ];
        physics.step(&mut world, &pairs).unwrap();

        let stats = physics.statistics().unwrap();
        assert_eq!(stats.count(), physics.registry().count());
        assert_eq!(stats.count(), 9);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.max_penetration(), 0.002);
        assert_eq!(physics.solver().phase(), crate::framework::SolverPhase::Idle);

        physics.step(&mut world, &pairs[..1]).unwrap();
        assert_eq!(physics.statistics().unwrap().count(), 3);
    }

    #[test]
    fn test_feed_contacts_through_trait_object() {
        let mut world = hecs::World::new();
        let a = world.spawn(());
        let b = world.spawn(());
        let pairs = [
            ContactPair::new(a, b, DVec3::ZERO, DVec3::Y, 0.0),
            ContactPair::new(a, b, DVec3::ZERO, DVec3::new(f64::NAN, 0.0, 0.0), 0.0),
        ];
        let mut registry = ContactRegistry::new();
        let mut totals = AggregateContacts::new();
        let containers: [&mut dyn ContactContainer; 2] = [&mut registry, &mut totals];
        for container in containers {
            assert_eq!(feed_contacts(&mut *container, &pairs), 1);
            assert_eq!(container.count(), 3);
        }
    }

    #[test]
    fn test_invalid_timestep_rejected() {
        let config = WorldConfig {
            fixed_timestep: 0.0,
            ..WorldConfig::default()
        };
        assert!(matches!(
            ContactWorld::new(config, SolverSettings::default()),
            Err(SolverError::Config(ConfigError::InvalidTimestep(_)))
        ));

        let mut physics = ContactWorld::new(WorldConfig::default(), SolverSettings::default()).unwrap();
        assert!(physics.set_fixed_timestep(-1.0).is_err());
        assert!((physics.config().fixed_timestep - 1.0 / 60.0).abs() < 1e-15);
    }
}
