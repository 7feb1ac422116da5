//! Frequency module - calibration frequency vectors
//!
//! A calibration is solved on a strictly ascending list of frequencies and
//! applied at arbitrary frequencies inside that range (plus a small
//! extrapolation allowance).

use std::str::FromStr;

use crate::constants::F_EXTRAPOLATION;
use crate::error::{Error, Result};

/// Frequency unit enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyUnit {
    #[default]
    Hz,
    KHz,
    MHz,
    GHz,
}

impl FrequencyUnit {
    /// Get the multiplier to convert to Hz
    pub fn multiplier(&self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = Error;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hz" => Ok(FrequencyUnit::Hz),
            "khz" => Ok(FrequencyUnit::KHz),
            "mhz" => Ok(FrequencyUnit::MHz),
            "ghz" => Ok(FrequencyUnit::GHz),
            _ => Err(Error::usage(format!("unknown frequency unit: {s}"))),
        }
    }
}

/// Sweep type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepType {
    #[default]
    Linear,
    Log,
}

/// A validated, strictly ascending frequency vector in Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct Frequency {
    f: Vec<f64>,
}

impl Frequency {
    /// Create a sweep from start/stop/npoints in the given unit.
    ///
    /// # Example
    /// ```
    /// use vnacal_core::frequency::{Frequency, FrequencyUnit, SweepType};
    /// let freq = Frequency::sweep(1.0, 10.0, 10, FrequencyUnit::GHz, SweepType::Linear).unwrap();
    /// assert_eq!(freq.npoints(), 10);
    /// ```
    pub fn sweep(
        start: f64,
        stop: f64,
        npoints: usize,
        unit: FrequencyUnit,
        sweep_type: SweepType,
    ) -> Result<Self> {
        let mult = unit.multiplier();
        let start_hz = start * mult;
        let stop_hz = stop * mult;

        let f = match (sweep_type, npoints) {
            (_, 0) => Vec::new(),
            (_, 1) => vec![start_hz],
            (SweepType::Linear, _) => {
                let step = (stop_hz - start_hz) / (npoints - 1) as f64;
                (0..npoints).map(|i| start_hz + i as f64 * step).collect()
            }
            (SweepType::Log, _) => {
                if start_hz <= 0.0 {
                    return Err(Error::usage("log sweep requires a positive start frequency"));
                }
                let log_start = start_hz.ln();
                let log_step = (stop_hz.ln() - log_start) / (npoints - 1) as f64;
                (0..npoints)
                    .map(|i| (log_start + i as f64 * log_step).exp())
                    .collect()
            }
        };
        Self::from_hz(f)
    }

    /// Create from a vector of frequencies in Hz, validating order.
    pub fn from_hz(f: Vec<f64>) -> Result<Self> {
        validate_ascending(&f)?;
        Ok(Self { f })
    }

    /// Get frequency vector in Hz
    #[inline]
    pub fn f(&self) -> &[f64] {
        &self.f
    }

    /// Get the number of frequency points
    #[inline]
    pub fn npoints(&self) -> usize {
        self.f.len()
    }

    /// Get the start frequency in Hz
    #[inline]
    pub fn start(&self) -> f64 {
        *self.f.first().unwrap_or(&0.0)
    }

    /// Get the stop frequency in Hz
    #[inline]
    pub fn stop(&self) -> f64 {
        *self.f.last().unwrap_or(&0.0)
    }

    /// True if `f` lies inside the vector's range widened by the
    /// extrapolation allowance.
    pub fn contains(&self, f: f64) -> bool {
        !self.f.is_empty() && in_range(self.start(), self.stop(), f)
    }
}

/// Check that `f` is finite, non-negative and strictly ascending.
pub fn validate_ascending(f: &[f64]) -> Result<()> {
    for (i, &x) in f.iter().enumerate() {
        if !x.is_finite() || x < 0.0 {
            return Err(Error::usage(format!(
                "invalid frequency {x} at index {i}"
            )));
        }
        if i > 0 && x <= f[i - 1] {
            return Err(Error::usage(format!(
                "frequencies must be strictly ascending: f[{}] = {} <= f[{}] = {}",
                i,
                x,
                i - 1,
                f[i - 1]
            )));
        }
    }
    Ok(())
}

/// True if `f` is within `[fmin, fmax]` widened by [`F_EXTRAPOLATION`].
#[inline]
pub fn in_range(fmin: f64, fmax: f64, f: f64) -> bool {
    f >= fmin * (1.0 - F_EXTRAPOLATION) && f <= fmax * (1.0 + F_EXTRAPOLATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_create_linear_sweep() {
        let freq = Frequency::sweep(1.0, 10.0, 10, FrequencyUnit::GHz, SweepType::Linear).unwrap();

        assert_eq!(freq.npoints(), 10);
        assert_relative_eq!(freq.start(), 1e9, epsilon = 1.0);
        assert_relative_eq!(freq.stop(), 10e9, epsilon = 1.0);
    }

    #[test]
    fn test_create_log_sweep() {
        let freq = Frequency::sweep(1.0, 10.0, 10, FrequencyUnit::GHz, SweepType::Log).unwrap();

        let f = freq.f();
        let ratios: Vec<f64> = f.windows(2).map(|w| w[1] / w[0]).collect();
        for r in &ratios[1..] {
            assert_relative_eq!(*r, ratios[0], epsilon = 1e-10);
        }
        assert!(Frequency::sweep(0.0, 1.0, 3, FrequencyUnit::GHz, SweepType::Log).is_err());
    }

    #[test]
    fn test_rejects_unordered() {
        assert!(Frequency::from_hz(vec![1.0, 1.0]).is_err());
        assert!(Frequency::from_hz(vec![2.0, 1.0]).is_err());
        assert!(Frequency::from_hz(vec![-1.0, 1.0]).is_err());
        assert!(Frequency::from_hz(vec![f64::NAN]).is_err());
        assert!(Frequency::from_hz(vec![0.0, 1e9]).is_ok());
    }

    #[test]
    fn test_contains_with_allowance() {
        let freq = Frequency::from_hz(vec![1e9, 2e9]).unwrap();
        assert!(freq.contains(1e9));
        assert!(freq.contains(0.995e9));
        assert!(freq.contains(2.01e9));
        assert!(!freq.contains(0.98e9));
        assert!(!freq.contains(2.1e9));
    }

    #[test]
    fn test_frequency_unit_from_str() {
        assert_eq!("ghz".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::GHz);
        assert_eq!("MHz".parse::<FrequencyUnit>().unwrap(), FrequencyUnit::MHz);
        assert!("furlong".parse::<FrequencyUnit>().is_err());
    }
}
