//! Calibration module
//!
//! A [`NewCalibration`] collects measured standards and solves them into a
//! [`Calibration`]: one error-term vector per calibration frequency, laid out
//! by [`Layout`]. A solved calibration corrects raw DUT measurements with
//! [`Calibration::apply`].

mod apply;
mod equations;
mod new;
mod solve;

use ndarray::{s, Array2, Array3, ArrayView1};
use num_complex::Complex64;

use crate::constants::DEFAULT_INTERPOLATION_ORDER;
use crate::error::{Error, Result};
use crate::frequency::validate_ascending;
use crate::layout::{ErrorTermType, Layout};
use crate::math::linalg::{is_singular, right_divide};
use crate::properties::Properties;

pub use new::NewCalibration;

/// Raw measurement of a standard or DUT over a frequency sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    /// Ratio matrices `m` indexed [freq, row, column].
    Ratio(Array3<Complex64>),
    /// Incident (`a`) and reflected (`b`) wave matrices, `m = b·a⁻¹`.
    ///
    /// For UE14 and E12 each column has its own source, and `a` is
    /// [freq, 1, columns]: column `j` of `m` is column `j` of `b` over `a[0, j]`.
    Waves {
        a: Array3<Complex64>,
        b: Array3<Complex64>,
    },
}

impl Measurement {
    pub fn nfreq(&self) -> usize {
        match self {
            Measurement::Ratio(m) => m.dim().0,
            Measurement::Waves { b, .. } => b.dim().0,
        }
    }

    /// Check the matrices are `rows`×`columns` over `nfreq` frequencies.
    pub(crate) fn validate(&self, nfreq: usize, rows: usize, columns: usize, per_column: bool) -> Result<()> {
        let shape_error = |what: &str, got: (usize, usize, usize), want: (usize, usize, usize)| {
            Error::usage(format!(
                "{what} has shape {got:?}, expected {want:?} (frequencies, rows, columns)"
            ))
        };
        match self {
            Measurement::Ratio(m) => {
                if m.dim() != (nfreq, rows, columns) {
                    return Err(shape_error("measurement", m.dim(), (nfreq, rows, columns)));
                }
            }
            Measurement::Waves { a, b } => {
                if b.dim() != (nfreq, rows, columns) {
                    return Err(shape_error("b matrix", b.dim(), (nfreq, rows, columns)));
                }
                let a_shape = if per_column {
                    (nfreq, 1, columns)
                } else {
                    (nfreq, columns, columns)
                };
                if a.dim() != a_shape {
                    return Err(shape_error("a matrix", a.dim(), a_shape));
                }
            }
        }
        Ok(())
    }

    /// Ratio matrix at frequency index `findex`.
    pub(crate) fn ratio_at(&self, findex: usize, per_column: bool, f: f64) -> Result<Array2<Complex64>> {
        match self {
            Measurement::Ratio(m) => Ok(m.slice(s![findex, .., ..]).to_owned()),
            Measurement::Waves { a, b } => {
                let a = a.slice(s![findex, .., ..]);
                let mut m = b.slice(s![findex, .., ..]).to_owned();
                if per_column {
                    for (j, mut column) in m.columns_mut().into_iter().enumerate() {
                        let aj = a[[0, j]];
                        if is_singular(aj) {
                            return Err(Error::math(format!(
                                "incident wave of column {j} is zero at {f} Hz"
                            )));
                        }
                        column.mapv_inplace(|v| v / aj);
                    }
                    Ok(m)
                } else {
                    let (ratio, det) = right_divide(&a.to_owned(), &m);
                    if is_singular(det) {
                        return Err(Error::math(format!("singular a matrix at {f} Hz")));
                    }
                    Ok(ratio)
                }
            }
        }
    }
}

/// A solved calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    name: String,
    layout: Layout,
    frequencies: Vec<f64>,
    /// Error terms [freq, term]
    terms: Array2<Complex64>,
    z0: f64,
    interpolation_order: usize,
    properties: Properties,
}

impl Calibration {
    /// Assemble a calibration from stored error terms.
    pub fn new(
        name: impl Into<String>,
        ty: ErrorTermType,
        rows: usize,
        columns: usize,
        frequencies: Vec<f64>,
        terms: Array2<Complex64>,
        z0: f64,
    ) -> Result<Self> {
        let layout = Layout::new(ty, rows, columns)?;
        validate_ascending(&frequencies)?;
        if frequencies.is_empty() {
            return Err(Error::usage("calibration needs at least one frequency"));
        }
        if terms.dim() != (frequencies.len(), layout.total_terms()) {
            return Err(Error::usage(format!(
                "{ty} {rows}x{columns} needs {} error terms at each of {} frequencies, got {:?}",
                layout.total_terms(),
                frequencies.len(),
                terms.dim()
            )));
        }
        Ok(Self {
            name: name.into(),
            layout,
            frequencies,
            terms,
            z0,
            interpolation_order: DEFAULT_INTERPOLATION_ORDER,
            properties: Properties::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn error_term_type(&self) -> ErrorTermType {
        self.layout.error_term_type()
    }

    pub fn rows(&self) -> usize {
        self.layout.rows()
    }

    pub fn columns(&self) -> usize {
        self.layout.columns()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn fmin(&self) -> f64 {
        self.frequencies[0]
    }

    pub fn fmax(&self) -> f64 {
        self.frequencies[self.frequencies.len() - 1]
    }

    /// Reference impedance the calibration was solved in.
    pub fn z0(&self) -> f64 {
        self.z0
    }

    /// All error terms, [freq, term].
    pub fn terms(&self) -> &Array2<Complex64> {
        &self.terms
    }

    /// Error terms at calibration frequency index `findex`.
    pub fn terms_at(&self, findex: usize) -> ArrayView1<'_, Complex64> {
        self.terms.row(findex)
    }

    pub fn interpolation_order(&self) -> usize {
        self.interpolation_order
    }

    pub fn set_interpolation_order(&mut self, order: usize) -> Result<()> {
        if order == 0 {
            return Err(Error::usage("interpolation order must be at least 1"));
        }
        self.interpolation_order = order;
        Ok(())
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_waves_to_ratio() {
        let m = array![[c(0.1, 0.2), c(0.5, 0.0)], [c(0.4, -0.1), c(-0.3, 0.3)]];
        let a = array![[c(1.0, 0.5), c(0.2, 0.0)], [c(0.1, 0.0), c(0.9, -0.2)]];
        let b = m.dot(&a);
        let waves = Measurement::Waves {
            a: a.insert_axis(ndarray::Axis(0)),
            b: b.insert_axis(ndarray::Axis(0)),
        };
        waves.validate(1, 2, 2, false).unwrap();
        let got = waves.ratio_at(0, false, 1e9).unwrap();
        for (x, y) in got.iter().zip(m.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_waves_per_column() {
        let b = array![[c(2.0, 0.0), c(3.0, 0.0)], [c(4.0, 0.0), c(6.0, 0.0)]];
        let a = array![[c(2.0, 0.0), c(3.0, 0.0)]];
        let waves = Measurement::Waves {
            a: a.insert_axis(ndarray::Axis(0)),
            b: b.insert_axis(ndarray::Axis(0)),
        };
        waves.validate(1, 2, 2, true).unwrap();
        assert!(waves.validate(1, 2, 2, false).is_err());
        let got = waves.ratio_at(0, true, 1e9).unwrap();
        assert_eq!(got, array![[c(1.0, 0.0), c(1.0, 0.0)], [c(2.0, 0.0), c(2.0, 0.0)]]);
    }

    #[test]
    fn test_calibration_shape_checks() {
        let terms = Array2::<Complex64>::zeros((2, 8));
        assert!(Calibration::new("c", ErrorTermType::T8, 2, 2, vec![1e9, 2e9], terms.clone(), 50.0).is_ok());
        assert!(Calibration::new("c", ErrorTermType::TE10, 2, 2, vec![1e9, 2e9], terms.clone(), 50.0).is_err());
        assert!(Calibration::new("c", ErrorTermType::T8, 2, 2, vec![2e9, 1e9], terms, 50.0).is_err());
    }
}
