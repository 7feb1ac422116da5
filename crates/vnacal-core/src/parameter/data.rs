//! Data standards
//!
//! A standard known only as a table of measured or simulated S-parameters.
//! Values between tabulated frequencies come from the rational interpolator;
//! results are re-referenced to the solve impedance when the table carries
//! its own per-port reference impedances.

use ndarray::{s, Array2, Array3};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::frequency::{in_range, validate_ascending};
use crate::math::interpolate::{rational_interpolate, SegmentHint};
use crate::math::transforms::renormalize_s;
use crate::network::Network;

#[derive(Debug, Clone, PartialEq)]
pub struct DataStandard {
    frequencies: Vec<f64>,
    /// [nfreq, ports, ports]
    s: Array3<Complex64>,
    /// Per-port reference impedance of the table; `None` means the solve z0.
    z0: Option<Vec<Complex64>>,
}

impl DataStandard {
    pub fn new(
        frequencies: Vec<f64>,
        s: Array3<Complex64>,
        z0: Option<Vec<Complex64>>,
    ) -> Result<Self> {
        validate_ascending(&frequencies)?;
        let (nfreq, rows, cols) = s.dim();
        if frequencies.is_empty() || nfreq != frequencies.len() {
            return Err(Error::usage(format!(
                "data standard has {} frequencies and {nfreq} matrices",
                frequencies.len()
            )));
        }
        if rows != cols || rows == 0 {
            return Err(Error::usage(format!(
                "data standard matrices must be square, got {rows}x{cols}"
            )));
        }
        if let Some(z0) = &z0 {
            if z0.len() != rows {
                return Err(Error::usage(format!(
                    "data standard has {rows} ports but {} reference impedances",
                    z0.len()
                )));
            }
        }
        Ok(Self { frequencies, s, z0 })
    }

    /// Build from a network, keeping its reference impedances.
    pub fn from_network(network: &Network) -> Result<Self> {
        Self::new(
            network.frequency.f().to_vec(),
            network.s.clone(),
            Some(network.z0.to_vec()),
        )
    }

    pub fn ports(&self) -> usize {
        self.s.dim().1
    }

    /// Tabulated frequency range.
    pub fn range(&self) -> (f64, f64) {
        (
            self.frequencies[0],
            self.frequencies[self.frequencies.len() - 1],
        )
    }

    /// S-parameters at `f` referenced to `z0` on every port.
    pub fn s_matrix(&self, f: f64, order: usize, z0: f64) -> Result<Array2<Complex64>> {
        let (fmin, fmax) = self.range();
        if !in_range(fmin, fmax, f) {
            return Err(Error::usage(format!(
                "frequency {f} Hz outside data standard range [{fmin}, {fmax}]"
            )));
        }
        let n = self.ports();
        let mut hint = SegmentHint::new();
        let value = Array2::from_shape_fn((n, n), |(i, j)| {
            rational_interpolate(
                &self.frequencies,
                self.s.slice(s![.., i, j]),
                order,
                &mut hint,
                f,
            )
        });
        match &self.z0 {
            Some(table_z0) => {
                let target = vec![Complex64::new(z0, 0.0); n];
                renormalize_s(&value, table_z0, &target).ok_or_else(|| {
                    Error::math(format!("cannot renormalize data standard at {f} Hz"))
                })
            }
            None => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interpolates_between_points() {
        let f = vec![1e9, 2e9, 3e9];
        let mut s = Array3::<Complex64>::zeros((3, 1, 1));
        for (k, v) in [0.1, 0.2, 0.3].iter().enumerate() {
            s[[k, 0, 0]] = Complex64::new(*v, 0.0);
        }
        let data = DataStandard::new(f, s, None).unwrap();
        let v = data.s_matrix(2e9, 3, 50.0).unwrap();
        assert_relative_eq!(v[[0, 0]].re, 0.2, epsilon = 1e-12);
        assert!(data.s_matrix(5e9, 3, 50.0).is_err());
    }

    #[test]
    fn test_renormalizes_to_solve_impedance() {
        // A 75 ohm termination tabulated in its own reference is a match.
        let s = Array3::<Complex64>::zeros((1, 1, 1));
        let data = DataStandard::new(vec![1e9], s, Some(vec![Complex64::new(75.0, 0.0)])).unwrap();
        let v = data.s_matrix(1e9, 3, 50.0).unwrap();
        assert_relative_eq!(v[[0, 0]].re, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let s = Array3::<Complex64>::zeros((2, 2, 1));
        assert!(DataStandard::new(vec![1e9, 2e9], s, None).is_err());
        let s = Array3::<Complex64>::zeros((1, 2, 2));
        assert!(DataStandard::new(vec![1e9, 2e9], s, None).is_err());
    }
}
