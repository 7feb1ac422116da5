//! Solver configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_INTERPOLATION_ORDER, DEFAULT_Z0, NEAR_ZERO};
use crate::error::{Error, Result};

/// Measurement noise model used to weight calibration equations.
///
/// Each equation derived from a measured value `m` is weighted by
/// `1 / sqrt(noise_floor² + (tracking · |m|)²)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementError {
    /// Additive noise floor (linear magnitude), must be positive.
    pub noise_floor: f64,
    /// Proportional tracking error (fraction of |m|).
    pub tracking: f64,
}

impl MeasurementError {
    /// Weight applied to an equation built from measured value magnitude `m_abs`.
    ///
    /// A validated config has a positive noise floor, so the weight is
    /// finite and falls monotonically with `m_abs`.
    pub fn weight(&self, m_abs: f64) -> f64 {
        let sigma = (self.noise_floor.powi(2) + (self.tracking * m_abs).powi(2)).sqrt();
        1.0 / sigma.max(NEAR_ZERO)
    }
}

/// Tunables of the error-term solver and applier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Reference impedance of the solve (ohms), used by calkit and data standards.
    pub z0: f64,
    /// Relative convergence tolerance on error terms.
    pub et_tolerance: f64,
    /// Convergence tolerance on unknown parameter values.
    pub p_tolerance: f64,
    /// Maximum number of re-estimation iterations when unknown parameters are present.
    pub iteration_limit: usize,
    /// Smallest accepted ratio of smallest to largest singular value.
    pub rank_tolerance: f64,
    /// Window order of the rational interpolator.
    pub interpolation_order: usize,
    /// Optional measurement noise model.
    pub measurement_error: Option<MeasurementError>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            z0: DEFAULT_Z0,
            et_tolerance: 1e-6,
            p_tolerance: 1e-6,
            iteration_limit: 30,
            rank_tolerance: 1e-12,
            interpolation_order: DEFAULT_INTERPOLATION_ORDER,
            measurement_error: None,
        }
    }
}

impl SolverConfig {
    /// Parse a YAML config document; missing keys take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: SolverConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is in its legal range.
    pub fn validate(&self) -> Result<()> {
        if !(self.z0.is_finite() && self.z0 > 0.0) {
            return Err(Error::usage(format!("invalid z0: {}", self.z0)));
        }
        if !(self.et_tolerance > 0.0 && self.p_tolerance > 0.0) {
            return Err(Error::usage("tolerances must be positive"));
        }
        if self.iteration_limit == 0 {
            return Err(Error::usage("iteration limit must be at least 1"));
        }
        if !(self.rank_tolerance >= 0.0 && self.rank_tolerance < 1.0) {
            return Err(Error::usage(format!(
                "invalid rank tolerance: {}",
                self.rank_tolerance
            )));
        }
        if self.interpolation_order == 0 {
            return Err(Error::usage("interpolation order must be at least 1"));
        }
        if let Some(me) = &self.measurement_error {
            if !(me.noise_floor.is_finite() && me.noise_floor > 0.0) {
                return Err(Error::usage(format!(
                    "measurement noise floor must be positive, got {}",
                    me.noise_floor
                )));
            }
            if !(me.tracking.is_finite() && me.tracking >= 0.0) {
                return Err(Error::usage("measurement tracking error must be non-negative"));
            }
        }
        Ok(())
    }
}
