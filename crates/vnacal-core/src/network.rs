//! Network module - N-port network representation
//!
//! Frequency-indexed S-parameter matrices with per-port reference
//! impedances. This is the exchange format with file readers and other
//! front-ends: calibrated results come back as a `Network`, and data
//! standards may be built from one.

use ndarray::{s, Array1, Array2, Array3};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::frequency::Frequency;
use crate::math::transforms::renormalize_s;

/// An N-port electrical network
#[derive(Debug, Clone)]
pub struct Network {
    /// Frequency data
    pub frequency: Frequency,
    /// S-parameter data [nfreq, nports, nports]
    pub s: Array3<Complex64>,
    /// Reference impedance (per port)
    pub z0: Array1<Complex64>,
    /// Network name
    pub name: Option<String>,
}

impl Network {
    /// Create a new Network from S-parameters, checking that the shapes agree.
    pub fn new(frequency: Frequency, s: Array3<Complex64>, z0: Array1<Complex64>) -> Result<Self> {
        let (nfreq, rows, cols) = s.dim();
        if nfreq != frequency.npoints() {
            return Err(Error::usage(format!(
                "network has {} frequencies but {} S matrices",
                frequency.npoints(),
                nfreq
            )));
        }
        if rows != cols || z0.len() != rows {
            return Err(Error::usage(format!(
                "network S matrices are {rows}x{cols} with {} reference impedances",
                z0.len()
            )));
        }
        Ok(Self {
            frequency,
            s,
            z0,
            name: None,
        })
    }

    /// Same as [`Network::new`] with every port referenced to real `z0`.
    pub fn with_uniform_z0(frequency: Frequency, s: Array3<Complex64>, z0: f64) -> Result<Self> {
        let nports = s.dim().1;
        Self::new(frequency, s, Array1::from_elem(nports, Complex64::new(z0, 0.0)))
    }

    /// Attach a name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of ports
    #[inline]
    pub fn nports(&self) -> usize {
        self.s.dim().1
    }

    /// Number of frequency points
    #[inline]
    pub fn nfreq(&self) -> usize {
        self.s.dim().0
    }

    /// The S matrix at frequency index `findex`.
    pub fn s_at(&self, findex: usize) -> Array2<Complex64> {
        self.s.slice(s![findex, .., ..]).to_owned()
    }

    /// Return a copy of this network re-referenced to `z0_new`.
    pub fn renormalized(&self, z0_new: &[Complex64]) -> Result<Network> {
        let n = self.nports();
        if z0_new.len() != n {
            return Err(Error::usage(format!(
                "expected {n} reference impedances, got {}",
                z0_new.len()
            )));
        }
        let z0_old = self.z0.to_vec();
        let mut s_new = Array3::<Complex64>::zeros(self.s.raw_dim());
        for (findex, &f) in self.frequency.f().iter().enumerate() {
            let renorm = renormalize_s(&self.s_at(findex), &z0_old, z0_new).ok_or_else(|| {
                Error::math(format!("cannot renormalize network at {f} Hz: singular matrix"))
            })?;
            s_new.slice_mut(s![findex, .., ..]).assign(&renorm);
        }
        Ok(Network {
            frequency: self.frequency.clone(),
            s: s_new,
            z0: Array1::from_vec(z0_new.to_vec()),
            name: self.name.clone(),
        })
    }
}
