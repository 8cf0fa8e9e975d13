//! Error types for configuration and solving.

use thiserror::Error;

use crate::solver::SolverMethod;

/// A rejected configuration value. The previous value stays in effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tolerance must be finite and positive, got {0}")]
    InvalidTolerance(f64),
    #[error("recovery speed must be finite and non-negative, got {0}")]
    InvalidRecoverySpeed(f64),
    #[error("time step must be finite and positive, got {0}")]
    InvalidTimestep(f64),
    #[error("penalty stiffness must be finite and positive, got {0}")]
    InvalidStiffness(f64),
    #[error("penalty damping must be finite and non-negative, got {0}")]
    InvalidDamping(f64),
    #[error("unknown solver method `{0}`")]
    UnknownMethod(String),
    #[error("unknown contact mode `{0}`")]
    UnknownMode(String),
}

/// Errors surfaced by a simulation step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("solver method `{0}` is not implemented")]
    UnsupportedMethod(SolverMethod),
    #[error("entity {0:?} is referenced by a constraint but has no rigid body")]
    UnknownBody(hecs::Entity),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
