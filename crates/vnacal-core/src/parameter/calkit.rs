//! Calkit standard models
//!
//! Short, open, load and through standards described the way calibration
//! kit definitions describe them: an offset transmission line (delay, loss,
//! impedance) terminated in a lumped element. Coefficients are SI: farads,
//! henries, seconds, ohms and ohms per second.

use std::f64::consts::PI;

use ndarray::{array, Array2};
use num_complex::Complex64;

use crate::constants::CALKIT_LOSS_REFERENCE_HZ;
use crate::error::{Error, Result};
use crate::math::transforms::abcd2s;

const ONE: Complex64 = Complex64::new(1.0, 0.0);
const J: Complex64 = Complex64::new(0.0, 1.0);

/// Approximation used for the lossy offset line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossModel {
    /// First-order expansion of the skin-effect loss.
    Traditional,
    /// Exact square-root form.
    #[default]
    Revised,
}

/// Offset transmission line between the reference plane and the termination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetLine {
    /// One-way delay in seconds.
    pub delay: f64,
    /// Loss in ohms per second, specified at 1 GHz.
    pub loss: f64,
    /// Characteristic impedance of the lossless line in ohms.
    pub z0: f64,
}

impl Default for OffsetLine {
    fn default() -> Self {
        Self {
            delay: 0.0,
            loss: 0.0,
            z0: 50.0,
        }
    }
}

impl OffsetLine {
    /// Characteristic impedance and electrical length `γl` at `f`.
    fn propagation(&self, f: f64, model: LossModel) -> (Complex64, Complex64) {
        let omega = 2.0 * PI * f;
        let lossless_gl = J * omega * self.delay;
        if f <= 0.0 || self.loss == 0.0 {
            return (Complex64::new(self.z0, 0.0), lossless_gl);
        }
        let k = Complex64::new(1.0, -1.0) * (self.loss / (omega * self.z0))
            * (f / CALKIT_LOSS_REFERENCE_HZ).sqrt();
        let factor = match model {
            LossModel::Revised => (ONE + k).sqrt(),
            LossModel::Traditional => ONE + k / 2.0,
        };
        (self.z0 * factor, lossless_gl * factor)
    }
}

/// What terminates the offset line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalkitKind {
    /// Inductance polynomial `L(f) = l[0] + l[1] f + l[2] f² + l[3] f³`.
    Short { l: [f64; 4] },
    /// Capacitance polynomial `C(f) = c[0] + c[1] f + c[2] f² + c[3] f³`.
    Open { c: [f64; 4] },
    Load { zl: Complex64 },
    /// Two-port: the offset line alone.
    Through,
}

/// A physical calkit standard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalkitStandard {
    pub kind: CalkitKind,
    pub offset: OffsetLine,
    pub model: LossModel,
}

fn polynomial(coefs: &[f64; 4], f: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, &c| acc * f + c)
}

impl CalkitStandard {
    pub fn short(l: [f64; 4], offset: OffsetLine) -> Self {
        Self {
            kind: CalkitKind::Short { l },
            offset,
            model: LossModel::default(),
        }
    }

    pub fn open(c: [f64; 4], offset: OffsetLine) -> Self {
        Self {
            kind: CalkitKind::Open { c },
            offset,
            model: LossModel::default(),
        }
    }

    pub fn load(zl: Complex64, offset: OffsetLine) -> Self {
        Self {
            kind: CalkitKind::Load { zl },
            offset,
            model: LossModel::default(),
        }
    }

    pub fn through(offset: OffsetLine) -> Self {
        Self {
            kind: CalkitKind::Through,
            offset,
            model: LossModel::default(),
        }
    }

    pub fn with_model(mut self, model: LossModel) -> Self {
        self.model = model;
        self
    }

    /// Number of ports: 2 for a through, otherwise 1.
    pub fn ports(&self) -> usize {
        match self.kind {
            CalkitKind::Through => 2,
            _ => 1,
        }
    }

    /// Check the coefficients describe a physical standard.
    pub fn validate(&self) -> Result<()> {
        let o = &self.offset;
        if !(o.z0.is_finite() && o.z0 > 0.0) {
            return Err(Error::usage(format!("invalid calkit offset impedance {}", o.z0)));
        }
        if !(o.delay.is_finite() && o.delay >= 0.0 && o.loss.is_finite() && o.loss >= 0.0) {
            return Err(Error::usage("calkit offset delay and loss must be non-negative"));
        }
        if let CalkitKind::Load { zl } = self.kind {
            if !zl.is_finite() {
                return Err(Error::usage("calkit load impedance must be finite"));
            }
        }
        Ok(())
    }

    /// Reflection coefficient of the termination relative to `zc`.
    fn termination_gamma(&self, f: f64, zc: Complex64) -> Complex64 {
        let omega = 2.0 * PI * f;
        match self.kind {
            CalkitKind::Open { c } => {
                // Admittance form keeps f = 0 finite.
                let yz = J * omega * polynomial(&c, f) * zc;
                (ONE - yz) / (ONE + yz)
            }
            CalkitKind::Short { l } => {
                let zl = J * omega * polynomial(&l, f);
                (zl - zc) / (zl + zc)
            }
            CalkitKind::Load { zl } => (zl - zc) / (zl + zc),
            CalkitKind::Through => ONE,
        }
    }

    /// S-parameters of the standard at `f` in reference impedance `z0`.
    pub fn s_matrix(&self, f: f64, z0: f64) -> Result<Array2<Complex64>> {
        let (zc, gl) = self.offset.propagation(f, self.model);
        let z0c = Complex64::new(z0, 0.0);
        match self.kind {
            CalkitKind::Through => {
                let (ch, sh) = (gl.cosh(), gl.sinh());
                let abcd = array![[ch, zc * sh], [sh / zc, ch]];
                abcd2s(&abcd, z0c).ok_or_else(|| {
                    Error::math(format!("calkit through is singular at {f} Hz"))
                })
            }
            _ => {
                let g1 = self.termination_gamma(f, zc) * (-2.0 * gl).exp();
                // Renormalize from the line impedance to z0.
                let num = zc * (ONE + g1) - z0c * (ONE - g1);
                let den = zc * (ONE + g1) + z0c * (ONE - g1);
                if den.norm() == 0.0 || !den.is_finite() {
                    return Err(Error::math(format!("calkit standard is singular at {f} Hz")));
                }
                Ok(Array2::from_elem((1, 1), num / den))
            }
        }
    }
}
