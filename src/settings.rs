//! Solver configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::solver::SolverMethod;

/// How contacts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactMode {
    /// Velocity-level complementarity (DVI): impulses from a cone-constrained
    /// solve.
    #[default]
    Complementarity,
    /// Spring-damper forces (DEM).
    Penalty,
}

impl ContactMode {
    pub const fn name(self) -> &'static str {
        match self {
            ContactMode::Complementarity => "complementarity",
            ContactMode::Penalty => "penalty",
        }
    }
}

impl fmt::Display for ContactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContactMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complementarity" => Ok(ContactMode::Complementarity),
            "penalty" => Ok(ContactMode::Penalty),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Spring-damper parameters for [`ContactMode::Penalty`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltySettings {
    stiffness: f64,
    normal_damping: f64,
    tangential_damping: f64,
}

impl Default for PenaltySettings {
    fn default() -> Self {
        Self {
            stiffness: 1e5,
            normal_damping: 1e3,
            tangential_damping: 1e3,
        }
    }
}

impl PenaltySettings {
    pub fn new(stiffness: f64, normal_damping: f64, tangential_damping: f64) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.set_stiffness(stiffness)?;
        settings.set_normal_damping(normal_damping)?;
        settings.set_tangential_damping(tangential_damping)?;
        Ok(settings)
    }

    /// Normal spring stiffness `k` (default: 1e5).
    pub fn stiffness(&self) -> f64 {
        self.stiffness
    }

    /// Normal damping `c_n` (default: 1e3).
    pub fn normal_damping(&self) -> f64 {
        self.normal_damping
    }

    /// Tangential damping `c_t` (default: 1e3).
    pub fn tangential_damping(&self) -> f64 {
        self.tangential_damping
    }

    pub fn set_stiffness(&mut self, value: f64) -> Result<(), ConfigError> {
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::InvalidStiffness(value));
        }
        self.stiffness = value;
        Ok(())
    }

    pub fn set_normal_damping(&mut self, value: f64) -> Result<(), ConfigError> {
        validate_damping(value)?;
        self.normal_damping = value;
        Ok(())
    }

    pub fn set_tangential_damping(&mut self, value: f64) -> Result<(), ConfigError> {
        validate_damping(value)?;
        self.tangential_damping = value;
        Ok(())
    }
}

fn validate_damping(value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDamping(value))
    }
}

fn validate_tolerance(value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTolerance(value))
    }
}

/// Per-category iteration caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCaps {
    pub normal: u32,
    pub sliding: u32,
    pub spinning: u32,
    pub bilateral: u32,
}

impl IterationCaps {
    pub const fn uniform(value: u32) -> Self {
        Self {
            normal: value,
            sliding: value,
            spinning: value,
            bilateral: value,
        }
    }
}

/// Iterative solver settings. Setters validate and leave the previous value in
/// place on error.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    tolerance: f64,
    max_iterations: u32,
    caps: IterationCaps,
    warm_start: bool,
    stabilize: bool,
    recovery_speed: f64,
    stabilization_iterations: u32,
    stabilization_tolerance: f64,
    record_history: bool,
    method: SolverMethod,
    mode: ContactMode,
    penalty: PenaltySettings,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-7,
            max_iterations: 1000,
            caps: IterationCaps::uniform(100),
            warm_start: false,
            stabilize: false,
            recovery_speed: 0.6,
            stabilization_iterations: 100,
            stabilization_tolerance: 1e-6,
            record_history: true,
            method: SolverMethod::AcceleratedProjectedGradientDescent,
            mode: ContactMode::Complementarity,
            penalty: PenaltySettings::default(),
        }
    }
}

impl SolverSettings {
    /// Residual tolerance (default: 1e-7).
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, value: f64) -> Result<(), ConfigError> {
        validate_tolerance(value)?;
        self.tolerance = value;
        Ok(())
    }

    /// Global iteration cap (default: 1000).
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Set the global cap and every per-category cap.
    pub fn set_max_iterations(&mut self, value: u32) {
        self.max_iterations = value;
        self.caps = IterationCaps::uniform(value);
    }

    /// Set only the global cap.
    pub fn set_global_cap(&mut self, value: u32) {
        self.max_iterations = value;
    }

    /// Per-category caps (default: 100 each).
    pub fn caps(&self) -> IterationCaps {
        self.caps
    }

    pub fn set_caps(&mut self, caps: IterationCaps) {
        self.caps = caps;
    }

    /// Seed solves with last step's impulses (default: false).
    pub fn warm_start(&self) -> bool {
        self.warm_start
    }

    pub fn set_warm_start(&mut self, enabled: bool) {
        self.warm_start = enabled;
    }

    /// Run the position stabilization pass (default: false).
    pub fn stabilize(&self) -> bool {
        self.stabilize
    }

    pub fn set_stabilize(&mut self, enabled: bool) {
        self.stabilize = enabled;
    }

    /// Maximum push-out speed for penetration recovery (default: 0.6).
    pub fn recovery_speed(&self) -> f64 {
        self.recovery_speed
    }

    pub fn set_recovery_speed(&mut self, value: f64) -> Result<(), ConfigError> {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ConfigError::InvalidRecoverySpeed(value));
        }
        self.recovery_speed = value;
        Ok(())
    }

    /// Iteration cap of the stabilization pass (default: 100).
    pub fn stabilization_iterations(&self) -> u32 {
        self.stabilization_iterations
    }

    pub fn set_stabilization_iterations(&mut self, value: u32) {
        self.stabilization_iterations = value;
    }

    /// Tolerance of the stabilization pass (default: 1e-6).
    pub fn stabilization_tolerance(&self) -> f64 {
        self.stabilization_tolerance
    }

    pub fn set_stabilization_tolerance(&mut self, value: f64) -> Result<(), ConfigError> {
        validate_tolerance(value)?;
        self.stabilization_tolerance = value;
        Ok(())
    }

    /// Keep the residual of every iteration of the main solve (default: true).
    pub fn record_history(&self) -> bool {
        self.record_history
    }

    pub fn set_record_history(&mut self, enabled: bool) {
        self.record_history = enabled;
    }

    /// Selected method (default: APGD).
    pub fn method(&self) -> SolverMethod {
        self.method
    }

    pub(crate) fn set_method(&mut self, method: SolverMethod) {
        self.method = method;
    }

    /// Contact mode (default: complementarity).
    pub fn mode(&self) -> ContactMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ContactMode) {
        self.mode = mode;
    }

    pub fn penalty(&self) -> &PenaltySettings {
        &self.penalty
    }

    pub fn penalty_mut(&mut self) -> &mut PenaltySettings {
        &mut self.penalty
    }
}
