//! Numerical constants for calibration
//!
//! Provides standardized tolerance values and other numerical constants
//! used throughout the library.

/// Tolerance for detecting near-zero values in division and singularity checks.
pub const NEAR_ZERO: f64 = 1e-15;

/// Fraction by which a tabulated frequency range may be exceeded before a
/// query is rejected as out of range.
///
/// A range `[fmin, fmax]` accepts `fmin * (1 - F_EXTRAPOLATION)` through
/// `fmax * (1 + F_EXTRAPOLATION)`.
pub const F_EXTRAPOLATION: f64 = 0.01;

/// Relative distance under which a query frequency is treated as equal to a
/// tabulated frequency by the rational interpolator.
pub const INTERPOLATION_EPSILON: f64 = 1e-12;

/// Default window order for rational interpolation of error terms.
pub const DEFAULT_INTERPOLATION_ORDER: usize = 3;

/// Default reference impedance in ohms.
pub const DEFAULT_Z0: f64 = 50.0;

/// Frequency used to normalize calkit offset loss (1 GHz).
pub const CALKIT_LOSS_REFERENCE_HZ: f64 = 1e9;
