//! Calibration equations
//!
//! Each measured standard contributes equations that are homogeneous and
//! linear in the error terms: `Σ coef · s · x[term] = 0`, where `s` is an
//! S-parameter of the standard. Known S values are folded into `coef`;
//! unknown ones are kept as an index into the unknown-parameter vector so
//! the solver can iterate on them.
//!
//! Only the ports a standard covers take part. Leakage (the off-diagonal
//! `el` block) is estimated separately, from measurements of port pairs the
//! standard leaves disconnected, and subtracted before equations are formed.

use ndarray::Array2;
use num_complex::Complex64;

use crate::config::MeasurementError;
use crate::layout::{Block, Layout, Model};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// An S-parameter of a standard at one frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SValue {
    Known(Complex64),
    /// Index into the unknown-parameter vector.
    Unknown(usize),
}

impl SValue {
    /// True only for a known, exactly zero value: no signal path.
    pub fn is_zero(&self) -> bool {
        matches!(self, SValue::Known(v) if *v == ZERO)
    }
}

/// A standard evaluated at one frequency.
#[derive(Debug, Clone)]
pub(crate) struct EvaluatedStandard {
    /// S over all `p` ports, indexed by VNA port; uncovered cells are zero.
    pub s: Array2<SValue>,
    /// Ports the standard is connected to, ascending.
    pub covered: Vec<usize>,
    /// Measured ratio matrix, rows×columns.
    pub m: Array2<Complex64>,
}

impl EvaluatedStandard {
    /// Connected component of every VNA port. Uncovered ports are alone;
    /// covered ports join when either S path between them is not known zero.
    pub fn components(&self) -> Vec<usize> {
        let ports = self.s.nrows();
        let mut parent: Vec<usize> = (0..ports).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        for &a in &self.covered {
            for &b in &self.covered {
                if a != b && !self.s[[a, b]].is_zero() {
                    let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                    parent[ra] = rb;
                }
            }
        }
        (0..ports).map(|i| find(&mut parent, i)).collect()
    }

    fn covers(&self, port: usize) -> bool {
        self.covered.binary_search(&port).is_ok()
    }
}

/// One coefficient of an equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct EqTerm {
    pub term: usize,
    pub coef: Complex64,
    /// Unknown parameter multiplying this coefficient, if any.
    pub unknown: Option<usize>,
}

/// `weight · Σ coef · u? · x[term] = 0`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Equation {
    /// Measurement column the equation came from.
    pub column: usize,
    pub weight: f64,
    pub terms: Vec<EqTerm>,
}

impl Equation {
    fn new(column: usize, weight: f64) -> Self {
        Self {
            column,
            weight,
            terms: Vec::new(),
        }
    }

    fn add(&mut self, term: Option<usize>, coef: Complex64) {
        if let Some(term) = term {
            if coef != ZERO {
                self.terms.push(EqTerm {
                    term,
                    coef,
                    unknown: None,
                });
            }
        }
    }

    fn add_s(&mut self, term: Option<usize>, coef: Complex64, s: SValue) {
        match s {
            SValue::Known(v) => self.add(term, coef * v),
            SValue::Unknown(k) => {
                if let Some(term) = term {
                    if coef != ZERO {
                        self.terms.push(EqTerm {
                            term,
                            coef,
                            unknown: Some(k),
                        });
                    }
                }
            }
        }
    }
}

// ============================================================================
// Leakage
// ============================================================================

/// Leakage estimate for the off-diagonal block `el`.
#[derive(Debug, Clone)]
pub(crate) struct LeakageEstimate {
    /// Values in block order.
    pub values: Vec<Complex64>,
    /// Cells no standard observed; their value is zero.
    pub unobserved: Vec<(usize, usize)>,
}

/// Mean of `M[i][j]` over standards where ports `i` and `j` are not connected.
pub(crate) fn estimate_leakage(el: &Block, standards: &[EvaluatedStandard]) -> LeakageEstimate {
    let (rows, cols) = el.dim();
    let mut sums = vec![ZERO; el.len()];
    let mut counts = vec![0usize; el.len()];
    for standard in standards {
        let component = standard.components();
        for i in 0..rows {
            for j in 0..cols {
                let Some(k) = el.index(i, j) else { continue };
                if component[i] != component[j] {
                    sums[k - el.offset] += standard.m[[i, j]];
                    counts[k - el.offset] += 1;
                }
            }
        }
    }
    let mut unobserved = Vec::new();
    for i in 0..rows {
        for j in 0..cols {
            if let Some(k) = el.index(i, j) {
                if counts[k - el.offset] == 0 {
                    unobserved.push((i, j));
                }
            }
        }
    }
    let values = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &n)| if n == 0 { ZERO } else { sum / n as f64 })
        .collect();
    LeakageEstimate { values, unobserved }
}

// ============================================================================
// Equation builders
// ============================================================================

/// Equations contributed by one standard.
///
/// `leakage` is the rows×columns off-diagonal leakage matrix subtracted from
/// the measurement (zero for types without one).
pub(crate) fn build_equations(
    layout: &Layout,
    standard: &EvaluatedStandard,
    leakage: &Array2<Complex64>,
    noise: Option<&MeasurementError>,
) -> Vec<Equation> {
    let m = &standard.m - leakage;
    let weight = |i: usize, j: usize| noise.map_or(1.0, |me| me.weight(standard.m[[i, j]].norm()));
    let rows = layout.rows();
    let cols = layout.columns();
    let cov = &standard.covered;
    let s = &standard.s;
    let mut equations = Vec::new();

    match layout.model() {
        Model::T { ts, ti, tx, tm, .. } => {
            // M'(Tx S + Tm) = Ts S + Ti, row i, column j.
            for &i in cov.iter().filter(|&&i| i < rows) {
                for &j in cov {
                    let mut eq = Equation::new(j, weight(i, j));
                    for &c in cov.iter().filter(|&&c| c < cols) {
                        for &l in cov {
                            eq.add_s(tx.index(c, l), m[[i, c]], s[[l, j]]);
                        }
                        eq.add(tm.index(c, j), m[[i, c]]);
                    }
                    for &l in cov {
                        eq.add_s(ts.index(i, l), -ONE, s[[l, j]]);
                    }
                    eq.add(ti.index(i, j), -ONE);
                    equations.push(eq);
                }
            }
        }
        Model::U { um, ui, ux, us, .. } => {
            // S(Ux M' + Us) = Um M' + Ui, row i, column j.
            for &i in cov {
                for &j in cov.iter().filter(|&&j| j < cols) {
                    let mut eq = Equation::new(j, weight(i, j));
                    for &l in cov {
                        for &r in cov.iter().filter(|&&r| r < rows) {
                            eq.add_s(ux.index(l, r), m[[r, j]], s[[i, l]]);
                        }
                        eq.add_s(us.index(l, j), ONE, s[[i, l]]);
                    }
                    for &r in cov.iter().filter(|&&r| r < rows) {
                        eq.add(um.index(i, r), -m[[r, j]]);
                    }
                    eq.add(ui.index(i, j), -ONE);
                    equations.push(eq);
                }
            }
        }
        Model::Ue14 { columns, .. } => {
            // S a = b with a = Ux m + us e_j, b = Um m + ui e_j.
            for (j, col) in columns.iter().enumerate() {
                if !standard.covers(j) {
                    continue;
                }
                for &i in cov {
                    let mut eq = Equation::new(j, weight(i, j));
                    for &l in cov {
                        eq.add_s(col.ux.index(l, 0), m[[l, j]], s[[i, l]]);
                    }
                    eq.add_s(col.us.index(0, 0), ONE, s[[i, j]]);
                    eq.add(col.um.index(i, 0), -m[[i, j]]);
                    if i == j {
                        eq.add(col.ui.index(0, 0), -ONE);
                    }
                    equations.push(eq);
                }
            }
        }
        // Solved through its UE14 layout.
        Model::E12 { .. } => {}
    }
    equations
}
