//! Error correction
//!
//! Applying a calibration inverts the error model at each requested
//! frequency: the error terms are interpolated from the calibration
//! frequencies, leakage is subtracted from the measured ratio matrix, and
//! the DUT S-parameters are recovered from `A·S = B` (T family) or
//! `S·A = B` (U family, UE14, E12).
//!
//! Non-square calibrations (1×2 T, 2×1 U/UE14/E12) take a full 2×2
//! measurement. The second row (1×2) or column (2×1) is the measurement of
//! the reversed DUT written in DUT port order.

use ndarray::{array, concatenate, s, Array1, Array2, Array3, Axis};
use num_complex::Complex64;
use tracing::info;

use super::{Calibration, Measurement};
use crate::error::{Error, Result};
use crate::frequency::{in_range, validate_ascending, Frequency};
use crate::layout::{Layout, Model};
use crate::math::interpolate::{rational_interpolate, SegmentHint};
use crate::math::linalg::{is_singular, left_divide, right_divide};
use crate::network::Network;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Swap ports of a two-port.
fn swap() -> Array2<Complex64> {
    array![[ZERO, ONE], [ONE, ZERO]]
}

/// Join the forward and reversed halves of a non-square system.
fn stack(axis: Axis, forward: &Array2<Complex64>, reversed: &Array2<Complex64>) -> Result<Array2<Complex64>> {
    concatenate(axis, &[forward.view(), reversed.view()])
        .map_err(|e| Error::usage(format!("cannot assemble reversed measurement: {e}")))
}

fn unit(p: usize, j: usize) -> Array1<Complex64> {
    let mut e = Array1::zeros(p);
    e[j] = ONE;
    e
}

/// `S = A⁻¹B`
fn solve_left(a: &Array2<Complex64>, b: &Array2<Complex64>, f: f64) -> Result<Array2<Complex64>> {
    let (s, det) = left_divide(a, b);
    if is_singular(det) {
        return Err(Error::math(format!("singular correction matrix at {f} Hz")));
    }
    Ok(s)
}

/// `S = B·A⁻¹`
fn solve_right(a: &Array2<Complex64>, b: &Array2<Complex64>, f: f64) -> Result<Array2<Complex64>> {
    let (s, det) = right_divide(a, b);
    if is_singular(det) {
        return Err(Error::math(format!("singular correction matrix at {f} Hz")));
    }
    Ok(s)
}

/// Recover S from error terms `e` and a p×p ratio measurement `m`.
fn correct(layout: &Layout, e: &[Complex64], m: &Array2<Complex64>, f: f64) -> Result<Array2<Complex64>> {
    let (rows, columns) = (layout.rows(), layout.columns());
    let p = layout.ports();
    let leakage = layout
        .leakage()
        .map_or_else(|| Array2::zeros((rows, columns)), |el| el.to_matrix(e));

    match layout.model() {
        Model::T { ts, ti, tx, tm, .. } => {
            let (ts, ti, tx, tm) = (ts.to_matrix(e), ti.to_matrix(e), tx.to_matrix(e), tm.to_matrix(e));
            // Row 0 is the forward measurement; a 1×2 calibration adds the
            // reversed one, brought back to VNA port order.
            let m_forward = &m.slice(s![..rows, ..]) - &leakage;
            let mut a = m_forward.dot(&tx) - &ts;
            let mut b = &ti - &m_forward.dot(&tm);
            if rows < p {
                let swap = swap();
                let m_reverse = &m.slice(s![1..2, ..]).dot(&swap) - &leakage;
                let a_r = (m_reverse.dot(&tx) - &ts).dot(&swap);
                let b_r = (&ti - &m_reverse.dot(&tm)).dot(&swap);
                a = stack(Axis(0), &a, &a_r)?;
                b = stack(Axis(0), &b, &b_r)?;
            }
            solve_left(&a, &b, f)
        }
        Model::U { um, ui, ux, us, .. } => {
            let (um, ui, ux, us) = (um.to_matrix(e), ui.to_matrix(e), ux.to_matrix(e), us.to_matrix(e));
            let m_forward = &m.slice(s![.., ..columns]) - &leakage;
            let mut a = ux.dot(&m_forward) + &us;
            let mut b = um.dot(&m_forward) + &ui;
            if columns < p {
                let swap = swap();
                let m_reverse = &swap.dot(&m.slice(s![.., 1..2])) - &leakage;
                let a_r = swap.dot(&(ux.dot(&m_reverse) + &us));
                let b_r = swap.dot(&(um.dot(&m_reverse) + &ui));
                a = stack(Axis(1), &a, &a_r)?;
                b = stack(Axis(1), &b, &b_r)?;
            }
            solve_right(&a, &b, f)
        }
        Model::Ue14 { columns: blocks, .. } => {
            let mut a = Array2::zeros((p, p));
            let mut b = Array2::zeros((p, p));
            let swap = swap();
            for k in 0..p {
                // Column k < columns is measured directly; otherwise it is the
                // reversed measurement through column 0's error terms.
                let (j, reversed) = if k < columns { (k, false) } else { (0, true) };
                let col = &blocks[j];
                let mut mj = if reversed {
                    swap.dot(&m.column(k))
                } else {
                    m.column(k).to_owned()
                };
                mj -= &leakage.column(j);
                let um = col.um.to_matrix(e).column(0).to_owned();
                let ux = col.ux.to_matrix(e).column(0).to_owned();
                let ej = unit(p, j);
                let mut aj = &ux * &mj + &(&ej * col.us.scalar(e));
                let mut bj = &um * &mj + &(&ej * col.ui.scalar(e));
                if reversed {
                    aj = swap.dot(&aj);
                    bj = swap.dot(&bj);
                }
                a.column_mut(k).assign(&aj);
                b.column_mut(k).assign(&bj);
            }
            solve_right(&a, &b, f)
        }
        Model::E12 { columns: blocks } => {
            let mut a = Array2::zeros((p, p));
            let mut b = Array2::zeros((p, p));
            let swap = swap();
            for k in 0..p {
                let (j, reversed) = if k < columns { (k, false) } else { (0, true) };
                let col = &blocks[j];
                let mj = if reversed {
                    swap.dot(&m.column(k))
                } else {
                    m.column(k).to_owned()
                };
                let el = col.el.to_matrix(e).column(0).to_owned();
                let er = col.er.to_matrix(e).column(0).to_owned();
                let em = col.em.to_matrix(e).column(0).to_owned();
                if er.iter().any(|v| is_singular(*v)) {
                    return Err(Error::math(format!("zero reflection tracking term at {f} Hz")));
                }
                let mut bj = (&mj - &el) / &er;
                let mut aj = unit(p, j) + &em * &bj;
                if reversed {
                    aj = swap.dot(&aj);
                    bj = swap.dot(&bj);
                }
                a.column_mut(k).assign(&aj);
                b.column_mut(k).assign(&bj);
            }
            solve_right(&a, &b, f)
        }
    }
}

impl Calibration {
    /// Error terms interpolated to `f`, sharing `hint` across terms.
    pub fn terms_at_frequency(&self, f: f64, hint: &mut SegmentHint) -> Result<Vec<Complex64>> {
        if !in_range(self.fmin(), self.fmax(), f) {
            return Err(Error::math(format!(
                "frequency {f} Hz outside calibration range [{}, {}] Hz",
                self.fmin(),
                self.fmax()
            )));
        }
        Ok((0..self.layout.total_terms())
            .map(|k| {
                rational_interpolate(
                    &self.frequencies,
                    self.terms.column(k),
                    self.interpolation_order,
                    hint,
                    f,
                )
            })
            .collect())
    }

    /// Correct a raw measurement taken at `frequencies`.
    ///
    /// Measurements are p×p per frequency (`p = max(rows, columns)`); for
    /// UE14 and E12 wave measurements `a` is 1×p. Stops at the first
    /// frequency that fails.
    pub fn apply(&self, frequencies: &[f64], measurement: &Measurement) -> Result<Network> {
        validate_ascending(frequencies)?;
        if frequencies.is_empty() {
            return Err(Error::usage("no frequencies to correct"));
        }
        let p = self.layout.ports();
        let per_column = self.error_term_type().is_per_column();
        measurement.validate(frequencies.len(), p, p, per_column)?;

        let mut s = Array3::<Complex64>::zeros((frequencies.len(), p, p));
        let mut hint = SegmentHint::new();
        for (findex, &f) in frequencies.iter().enumerate() {
            let e = self.terms_at_frequency(f, &mut hint)?;
            let m = measurement.ratio_at(findex, per_column, f)?;
            let corrected = correct(&self.layout, &e, &m, f)?;
            if corrected.iter().any(|v| !v.is_finite()) {
                return Err(Error::math(format!("non-finite corrected value at {f} Hz")));
            }
            s.slice_mut(s![findex, .., ..]).assign(&corrected);
        }
        info!(
            calibration = %self.name,
            frequencies = frequencies.len(),
            "applied calibration"
        );
        Network::with_uniform_z0(Frequency::from_hz(frequencies.to_vec())?, s, self.z0)
            .map(|network| network.named(self.name.clone()))
    }

    /// Correct ratio measurements `m` [freq, p, p].
    pub fn apply_m(&self, frequencies: &[f64], m: &Array3<Complex64>) -> Result<Network> {
        self.apply(frequencies, &Measurement::Ratio(m.clone()))
    }
}
