//! Parameter model
//!
//! Parameters are the values standards are made of: constants, tabulated
//! curves, physical calkit models, data tables, and values the solver has to
//! find. They live in an index-stable arena owned by one
//! [`NewCalibration`](crate::calibration::NewCalibration); handles are plain
//! indices, slots are never reused, and each entry carries a hold count.
//! Unknown and correlated parameters hold the parameter they are tied to.

pub mod calkit;
pub mod data;

use std::fmt;

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::frequency::{in_range, validate_ascending};
use crate::math::interpolate::{rational_interpolate, SegmentHint};

pub use calkit::{CalkitKind, CalkitStandard, LossModel, OffsetLine};
pub use data::DataStandard;

/// Handle to a parameter in a [`ParameterArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId(pub(crate) usize);

impl ParameterId {
    /// Perfect match, value 0.
    pub const MATCH: ParameterId = ParameterId(0);
    /// Perfect open, value 1.
    pub const OPEN: ParameterId = ParameterId(1);
    /// Perfect short, value -1.
    pub const SHORT: ParameterId = ParameterId(2);
    pub const ZERO: ParameterId = ParameterId::MATCH;
    pub const ONE: ParameterId = ParameterId::OPEN;

    pub fn index(&self) -> usize {
        self.0
    }

    fn is_predefined(&self) -> bool {
        self.0 < PREDEFINED
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter {}", self.0)
    }
}

const PREDEFINED: usize = 3;

/// Deviation allowed between a correlated parameter and the value it is
/// tied to.
#[derive(Debug, Clone, PartialEq)]
pub enum Sigma {
    Constant(f64),
    /// Tabulated sigma, interpolated over frequency.
    Curve {
        frequencies: Vec<f64>,
        values: Vec<f64>,
    },
}

impl Sigma {
    fn validate(&self) -> Result<()> {
        match self {
            Sigma::Constant(s) if s.is_finite() && *s > 0.0 => Ok(()),
            Sigma::Constant(s) => Err(Error::usage(format!("sigma must be positive, got {s}"))),
            Sigma::Curve {
                frequencies,
                values,
            } => {
                validate_ascending(frequencies)?;
                if frequencies.is_empty() || frequencies.len() != values.len() {
                    return Err(Error::usage("sigma curve needs one value per frequency"));
                }
                if values.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
                    return Err(Error::usage("sigma curve values must be positive"));
                }
                Ok(())
            }
        }
    }

    /// Sigma at `f`.
    pub fn at(&self, f: f64, order: usize) -> Result<f64> {
        match self {
            Sigma::Constant(s) => Ok(*s),
            Sigma::Curve {
                frequencies,
                values,
            } => {
                let (fmin, fmax) = (frequencies[0], frequencies[frequencies.len() - 1]);
                if !in_range(fmin, fmax, f) {
                    return Err(Error::usage(format!(
                        "frequency {f} Hz outside sigma curve range [{fmin}, {fmax}]"
                    )));
                }
                let y: Array1<Complex64> = values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                let mut hint = SegmentHint::new();
                Ok(rational_interpolate(frequencies, y.view(), order, &mut hint, f).re)
            }
        }
    }
}

/// What a parameter is.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Scalar(Complex64),
    /// Tabulated values interpolated over frequency.
    Vector {
        frequencies: Vec<f64>,
        values: Array1<Complex64>,
    },
    /// Multi-port physical standard.
    Calkit(CalkitStandard),
    /// Multi-port tabulated standard.
    Data(DataStandard),
    /// Solved for; `other` supplies the initial guess.
    Unknown { other: ParameterId },
    /// Solved for, constrained to stay within `sigma` of `other`.
    Correlated { other: ParameterId, sigma: Sigma },
}

impl ParameterKind {
    /// True for unknown and correlated parameters.
    pub fn is_unknown(&self) -> bool {
        matches!(self, ParameterKind::Unknown { .. } | ParameterKind::Correlated { .. })
    }

    /// Number of ports of a standard parameter; 1 for single values.
    pub fn ports(&self) -> usize {
        match self {
            ParameterKind::Calkit(c) => c.ports(),
            ParameterKind::Data(d) => d.ports(),
            _ => 1,
        }
    }

    fn other(&self) -> Option<ParameterId> {
        match self {
            ParameterKind::Unknown { other } | ParameterKind::Correlated { other, .. } => Some(*other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: ParameterKind,
    holds: usize,
}

/// Index-stable parameter storage with hold counts.
#[derive(Debug, Clone)]
pub struct ParameterArena {
    slots: Vec<Option<Entry>>,
}

impl Default for ParameterArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterArena {
    /// Create an arena holding the predefined MATCH, OPEN and SHORT.
    pub fn new() -> Self {
        let predefined = [0.0, 1.0, -1.0].map(|v| {
            Some(Entry {
                kind: ParameterKind::Scalar(Complex64::new(v, 0.0)),
                holds: 1,
            })
        });
        Self {
            slots: predefined.into_iter().collect(),
        }
    }

    fn entry(&self, id: ParameterId) -> Result<&Entry> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::usage(format!("{id} does not exist")))
    }

    pub fn kind(&self, id: ParameterId) -> Result<&ParameterKind> {
        Ok(&self.entry(id)?.kind)
    }

    pub fn contains(&self, id: ParameterId) -> bool {
        self.entry(id).is_ok()
    }

    /// Add a parameter with one hold owned by the caller.
    pub fn insert(&mut self, kind: ParameterKind) -> Result<ParameterId> {
        match &kind {
            ParameterKind::Scalar(v) if !v.is_finite() => {
                return Err(Error::usage("scalar parameter must be finite"));
            }
            ParameterKind::Vector {
                frequencies,
                values,
            } => {
                validate_ascending(frequencies)?;
                if frequencies.is_empty() || frequencies.len() != values.len() {
                    return Err(Error::usage("vector parameter needs one value per frequency"));
                }
            }
            ParameterKind::Calkit(c) => c.validate()?,
            ParameterKind::Correlated { sigma, .. } => sigma.validate()?,
            _ => {}
        }
        if let Some(other) = kind.other() {
            let target = self.kind(other)?;
            if target.ports() != 1 {
                return Err(Error::usage(format!(
                    "{other} is a multi-port standard and cannot be a correlation target"
                )));
            }
        }
        self.slots.try_reserve(1)?;
        if let Some(other) = kind.other() {
            self.hold(other)?;
        }
        self.slots.push(Some(Entry { kind, holds: 1 }));
        Ok(ParameterId(self.slots.len() - 1))
    }

    /// Take an additional hold on `id`.
    pub fn hold(&mut self, id: ParameterId) -> Result<()> {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(entry) => {
                entry.holds += 1;
                Ok(())
            }
            None => Err(Error::usage(format!("{id} does not exist"))),
        }
    }

    /// Drop one hold on `id`, freeing it (and releasing what it is tied to)
    /// when no holds remain. Predefined parameters are never freed.
    pub fn release(&mut self, id: ParameterId) -> Result<()> {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let entry = self
                .slots
                .get_mut(id.0)
                .and_then(Option::as_mut)
                .ok_or_else(|| Error::usage(format!("{id} does not exist")))?;
            if id.is_predefined() {
                return Ok(());
            }
            entry.holds -= 1;
            if entry.holds == 0 {
                next = entry.kind.other();
                self.slots[id.0] = None;
            }
        }
        Ok(())
    }

    /// Follow `other` links from an unknown parameter to the first known one.
    pub fn resolve_known(&self, id: ParameterId) -> Result<ParameterId> {
        let mut current = id;
        for _ in 0..self.slots.len() {
            match self.kind(current)?.other() {
                Some(other) => current = other,
                None => return Ok(current),
            }
        }
        Err(Error::usage(format!("{id} has a cyclic correlation chain")))
    }

    /// Value of a single-valued known parameter at `f`.
    pub fn value(&self, id: ParameterId, f: f64, order: usize) -> Result<Complex64> {
        match self.kind(id)? {
            ParameterKind::Scalar(v) => Ok(*v),
            ParameterKind::Vector {
                frequencies,
                values,
            } => {
                let (fmin, fmax) = (frequencies[0], frequencies[frequencies.len() - 1]);
                if !in_range(fmin, fmax, f) {
                    return Err(Error::usage(format!(
                        "frequency {f} Hz outside {id} range [{fmin}, {fmax}]"
                    )));
                }
                let mut hint = SegmentHint::new();
                Ok(rational_interpolate(frequencies, values.view(), order, &mut hint, f))
            }
            ParameterKind::Calkit(_) | ParameterKind::Data(_) => Err(Error::usage(format!(
                "{id} is a standard; evaluate it with s_matrix"
            ))),
            ParameterKind::Unknown { .. } | ParameterKind::Correlated { .. } => {
                Err(Error::usage(format!("{id} is unknown until solved")))
            }
        }
    }

    /// S matrix of a known parameter at `f` in reference impedance `z0`.
    pub fn s_matrix(&self, id: ParameterId, f: f64, order: usize, z0: f64) -> Result<Array2<Complex64>> {
        match self.kind(id)? {
            ParameterKind::Calkit(c) => c.s_matrix(f, z0),
            ParameterKind::Data(d) => d.s_matrix(f, order, z0),
            _ => Ok(Array2::from_elem((1, 1), self.value(id, f, order)?)),
        }
    }

    /// Initial guess for an unknown parameter: the value of the first known
    /// parameter along its `other` chain.
    pub fn initial_guess(&self, id: ParameterId, f: f64, order: usize, z0: f64) -> Result<Complex64> {
        let known = self.resolve_known(id)?;
        Ok(self.s_matrix(known, f, order, z0)?[[0, 0]])
    }

    /// Frequency range over which the parameter can be evaluated, if limited.
    pub fn range(&self, id: ParameterId) -> Result<Option<(f64, f64)>> {
        let narrow = |a: Option<(f64, f64)>, b: Option<(f64, f64)>| match (a, b) {
            (Some(a), Some(b)) => Some((a.0.max(b.0), a.1.min(b.1))),
            (a, None) => a,
            (None, b) => b,
        };
        Ok(match self.kind(id)? {
            ParameterKind::Scalar(_) | ParameterKind::Calkit(_) => None,
            ParameterKind::Vector { frequencies, .. } => {
                Some((frequencies[0], frequencies[frequencies.len() - 1]))
            }
            ParameterKind::Data(d) => Some(d.range()),
            ParameterKind::Unknown { other } => self.range(*other)?,
            ParameterKind::Correlated { other, sigma } => {
                let own = match sigma {
                    Sigma::Constant(_) => None,
                    Sigma::Curve { frequencies, .. } => {
                        Some((frequencies[0], frequencies[frequencies.len() - 1]))
                    }
                };
                narrow(own, self.range(*other)?)
            }
        })
    }

    /// Check that `id` can be evaluated over `[fmin, fmax]`.
    pub fn check_range(&self, id: ParameterId, fmin: f64, fmax: f64) -> Result<()> {
        if let Some((lo, hi)) = self.range(id)? {
            if !(in_range(lo, hi, fmin) && in_range(lo, hi, fmax)) {
                return Err(Error::usage(format!(
                    "{id} covers [{lo}, {hi}] Hz but the calibration needs [{fmin}, {fmax}] Hz"
                )));
            }
        }
        Ok(())
    }
}
