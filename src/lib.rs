//! Contactor
//!
//! Contact bookkeeping and iterative constraint solving for rigid multibody
//! dynamics, on top of a hecs ECS world.
//!
//! # Architecture
//!
//! The library is organized into layers, leaves first:
//!
//! 1. **body** - `RigidBody`/`Pose` components and the per-step `BodyTable` snapshot
//! 2. **contact** - Begin/Add/End contact protocol, `ContactRegistry` arenas
//! 3. **descriptor** - Row layout, bias, right-hand side and solution vectors
//! 4. **solver** - Interchangeable numerical methods and the Schur complement operator
//! 5. **penalty** - Spring-damper contact forces
//! 6. **framework** - Per-step orchestration (`IterativeSolver`)
//! 7. **world** - Fixed-step driver (`ContactWorld`)
//!
//! Per-row and per-body loops run on rayon with the `parallel` feature
//! (enabled by default).

pub mod body;
pub mod contact;
pub mod descriptor;
pub mod error;
pub mod framework;
pub mod penalty;
pub mod settings;
pub mod solver;
pub mod world;

mod par;

// Re-export commonly used types
pub use body::{BodyTable, BodyType, Pose, RigidBody};
pub use contact::{
    AggregateContacts, ContactConstraint, ContactContainer, ContactKind, ContactMaterial,
    ContactPair, ContactRegistry, ContactReport, ReportStatus,
};
pub use descriptor::{BilateralConstraint, ConstraintSystemDescriptor, RowKind};
pub use error::{ConfigError, SolverError};
pub use framework::{IterativeSolver, SolverPhase, StepReport};
pub use settings::{ContactMode, IterationCaps, PenaltySettings, SolverSettings};
pub use solver::{create_method, NumericalMethod, SolverMethod};
pub use world::{feed_contacts, ContactWorld, WorldConfig};

// Re-export glam and hecs for convenience
pub use glam;
pub use hecs;
