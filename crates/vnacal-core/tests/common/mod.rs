//! Shared helpers for integration tests
//!
//! Measurements are synthesized by running the error model forward from
//! known error terms, so a solve should give those terms back.

#![allow(dead_code)]

use approx::assert_relative_eq;
use ndarray::{Array1, Array2, Array3, Axis};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::Rng;
use vnacal_core::layout::{BlockShape, ErrorTermType, Layout, Model};
use vnacal_core::math::linalg::{left_divide, right_divide};
use vnacal_core::{Measurement, NewCalibration, ParameterId};

pub const FREQUENCIES: [f64; 3] = [1e9, 2e9, 3e9];

/// Route library logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();
}

pub fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

pub fn crand(rng: &mut StdRng, scale: f64) -> Complex64 {
    c(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)) * scale
}

/// Random n×n S matrix with entries well inside the unit circle.
pub fn random_s(n: usize, rng: &mut StdRng) -> Array2<Complex64> {
    Array2::from_shape_simple_fn((n, n), || crand(rng, 0.5))
}

/// Every (rows, columns) pair up to 5 ports the type accepts.
pub fn valid_dims(ty: ErrorTermType) -> Vec<(usize, usize)> {
    let mut dims = Vec::new();
    for rows in 1..=5 {
        for columns in 1..=5 {
            if ty.validate_dimensions(rows, columns).is_ok() {
                dims.push((rows, columns));
            }
        }
    }
    dims
}

fn sub(a: &Array2<Complex64>, rows: &[usize], cols: &[usize]) -> Array2<Complex64> {
    Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| a[[rows[i], cols[j]]])
}

fn diag(v: impl Iterator<Item = Complex64>) -> Array2<Complex64> {
    Array2::from_diag(&v.collect::<Array1<_>>())
}

/// Perturbed identity terms, normalized the way the solver pins them.
pub fn random_terms(layout: &Layout, rng: &mut StdRng) -> Vec<Complex64> {
    let mut e = layout.identity_terms();
    for block in layout.blocks() {
        let scale = match block.shape {
            BlockShape::Full { .. } => 0.1,
            BlockShape::OffDiagonal { .. } => 0.05,
            _ => 0.3,
        };
        for k in block.range() {
            e[k] += crand(rng, scale);
        }
    }
    normalize(layout, &mut e);
    e
}

pub fn normalize(layout: &Layout, e: &mut [Complex64]) {
    match layout.model() {
        Model::T { .. } | Model::U { .. } => {
            let n = e[layout.normalization_terms()[0]];
            let leakage = layout.leakage().map(|el| el.range());
            for (k, v) in e.iter_mut().enumerate() {
                if !leakage.as_ref().is_some_and(|r| r.contains(&k)) {
                    *v /= n;
                }
            }
        }
        Model::Ue14 { columns, .. } => {
            for (j, col) in columns.iter().enumerate() {
                let n = e[col.um.index(j, 0).unwrap()];
                for k in col.range() {
                    e[k] /= n;
                }
            }
        }
        Model::E12 { .. } => {}
    }
}

/// Ratio measurement of a standard with S-parameters `s` (standard port
/// order) connected to VNA ports `ports`.
pub fn measure(layout: &Layout, e: &[Complex64], s: &Array2<Complex64>, ports: &[usize]) -> Array2<Complex64> {
    let p = layout.ports();
    let (rows, cols) = (layout.rows(), layout.columns());
    let mut k = ports.to_vec();
    k.sort_unstable();
    let mut full = Array2::zeros((p, p));
    for (a, &pa) in ports.iter().enumerate() {
        for (b, &pb) in ports.iter().enumerate() {
            full[[pa, pb]] = s[[a, b]];
        }
    }
    let sk = sub(&full, &k, &k);
    let kr: Vec<usize> = k.iter().copied().filter(|&i| i < rows).collect();
    let kc: Vec<usize> = k.iter().copied().filter(|&j| j < cols).collect();
    let mut m = layout
        .leakage()
        .map_or_else(|| Array2::zeros((rows, cols)), |el| el.to_matrix(e));

    match layout.model() {
        Model::T { ts, ti, tx, tm, .. } => {
            let (ts, ti, tx, tm) = (ts.to_matrix(e), ti.to_matrix(e), tx.to_matrix(e), tm.to_matrix(e));
            let a = sub(&tx, &kc, &k).dot(&sk) + sub(&tm, &kc, &k);
            let b = sub(&ts, &kr, &k).dot(&sk) + sub(&ti, &kr, &k);
            let (mk, _) = right_divide(&a, &b);
            for (x, &i) in kr.iter().enumerate() {
                for (y, &j) in kc.iter().enumerate() {
                    m[[i, j]] += mk[[x, y]];
                }
            }
        }
        Model::U { um, ui, ux, us, .. } => {
            let (um, ui, ux, us) = (um.to_matrix(e), ui.to_matrix(e), ux.to_matrix(e), us.to_matrix(e));
            let a = sk.dot(&sub(&ux, &k, &kr)) - sub(&um, &k, &kr);
            let b = sub(&ui, &k, &kc) - sk.dot(&sub(&us, &k, &kc));
            let (mk, _) = left_divide(&a, &b);
            for (x, &i) in kr.iter().enumerate() {
                for (y, &j) in kc.iter().enumerate() {
                    m[[i, j]] += mk[[x, y]];
                }
            }
        }
        Model::Ue14 { columns, .. } => {
            for &j in &kc {
                let col = &columns[j];
                let jj = k.iter().position(|&q| q == j).unwrap();
                let ux = diag(k.iter().map(|&l| e[col.ux.index(l, 0).unwrap()]));
                let um = diag(k.iter().map(|&l| e[col.um.index(l, 0).unwrap()]));
                let a = sk.dot(&ux) - um;
                let (ui, us) = (col.ui.scalar(e), col.us.scalar(e));
                let rhs = Array2::from_shape_fn((k.len(), 1), |(l, _)| {
                    let delta = if l == jj { ui } else { c(0.0, 0.0) };
                    delta - us * sk[[l, jj]]
                });
                let (mk, _) = left_divide(&a, &rhs);
                for (x, &i) in k.iter().enumerate() {
                    m[[i, j]] += mk[[x, 0]];
                }
            }
        }
        Model::E12 { columns } => {
            for (j, col) in columns.iter().enumerate() {
                for i in 0..rows {
                    m[[i, j]] = e[col.el.index(i, 0).unwrap()];
                }
                let Some(jj) = k.iter().position(|&q| q == j) else { continue };
                let em = diag(k.iter().map(|&l| e[col.em.index(l, 0).unwrap()]));
                let a = Array2::eye(k.len()) - sk.dot(&em);
                let rhs = sk.column(jj).to_owned().insert_axis(Axis(1));
                let (b, _) = left_divide(&a, &rhs);
                for (x, &i) in k.iter().enumerate() {
                    m[[i, j]] += e[col.er.index(i, 0).unwrap()] * b[[x, 0]];
                }
            }
        }
    }
    m
}

/// p×p measurement of a DUT. Non-square layouts add the reversed DUT in
/// the second row (1×2) or column (2×1), in DUT port order.
pub fn measure_dut(layout: &Layout, e: &[Complex64], s: &Array2<Complex64>) -> Array2<Complex64> {
    let p = layout.ports();
    let all: Vec<usize> = (0..p).collect();
    let forward = measure(layout, e, s, &all);
    if layout.rows() == layout.columns() {
        return forward;
    }
    let swap = Array2::from_shape_fn((2, 2), |(i, j)| if i != j { c(1.0, 0.0) } else { c(0.0, 0.0) });
    let reversed = measure(layout, e, &swap.dot(s).dot(&swap), &all);
    let mut m = Array2::zeros((2, 2));
    if layout.rows() < p {
        m.row_mut(0).assign(&forward.row(0));
        m.row_mut(1).assign(&reversed.dot(&swap).row(0));
    } else {
        m.column_mut(0).assign(&forward.column(0));
        m.column_mut(1).assign(&swap.dot(&reversed).column(0));
    }
    m
}

/// Known error terms at each calibration frequency.
pub struct Truth {
    pub layout: Layout,
    /// [freq, term]
    pub terms: Array2<Complex64>,
}

impl Truth {
    /// Independent random terms at every frequency.
    pub fn random(ty: ErrorTermType, rows: usize, columns: usize, nfreq: usize, rng: &mut StdRng) -> Self {
        let layout = Layout::new(ty, rows, columns).unwrap();
        let mut terms = Array2::zeros((nfreq, layout.total_terms()));
        for mut row in terms.rows_mut() {
            row.assign(&Array1::from(random_terms(&layout, rng)));
        }
        Self { layout, terms }
    }

    /// The same random terms at every frequency, so interpolation is exact.
    pub fn constant(ty: ErrorTermType, rows: usize, columns: usize, nfreq: usize, rng: &mut StdRng) -> Self {
        let layout = Layout::new(ty, rows, columns).unwrap();
        let e = Array1::from(random_terms(&layout, rng));
        let terms = Array2::from_shape_fn((nfreq, e.len()), |(_, k)| e[k]);
        Self { layout, terms }
    }

    pub fn identity(ty: ErrorTermType, rows: usize, columns: usize, nfreq: usize) -> Self {
        let layout = Layout::new(ty, rows, columns).unwrap();
        let e = layout.identity_terms();
        let terms = Array2::from_shape_fn((nfreq, e.len()), |(_, k)| e[k]);
        Self { layout, terms }
    }

    pub fn nfreq(&self) -> usize {
        self.terms.nrows()
    }

    pub fn at(&self, findex: usize) -> Vec<Complex64> {
        self.terms.row(findex).to_vec()
    }

    /// Measurement of a standard whose S-parameters do not vary.
    pub fn measure(&self, s: &Array2<Complex64>, ports: &[usize]) -> Measurement {
        self.measure_with(|_| s.clone(), ports)
    }

    /// Measurement of a standard with S-parameters `s(findex)`.
    pub fn measure_with(&self, s: impl Fn(usize) -> Array2<Complex64>, ports: &[usize]) -> Measurement {
        let (rows, cols) = (self.layout.rows(), self.layout.columns());
        let mut m = Array3::zeros((self.nfreq(), rows, cols));
        for findex in 0..self.nfreq() {
            let mf = measure(&self.layout, &self.at(findex), &s(findex), ports);
            m.index_axis_mut(Axis(0), findex).assign(&mf);
        }
        Measurement::Ratio(m)
    }

    /// p×p DUT measurement at each calibration frequency.
    pub fn measure_dut(&self, s: &Array3<Complex64>) -> Array3<Complex64> {
        let p = self.layout.ports();
        let mut m = Array3::zeros((self.nfreq(), p, p));
        for findex in 0..self.nfreq() {
            let sf = s.index_axis(Axis(0), findex).to_owned();
            m.index_axis_mut(Axis(0), findex)
                .assign(&measure_dut(&self.layout, &self.at(findex), &sf));
        }
        m
    }
}

pub fn reflect(v: Complex64) -> Array2<Complex64> {
    Array2::from_elem((1, 1), v)
}

pub fn through() -> Array2<Complex64> {
    Array2::from_shape_fn((2, 2), |(i, j)| if i != j { c(1.0, 0.0) } else { c(0.0, 0.0) })
}

/// Short, open and load on each observed port, throughs between every pair.
pub fn add_solt(cal: &mut NewCalibration, truth: &Truth) -> anyhow::Result<()> {
    add_solt_with(cal, truth, |m| m)
}

/// SOLT sequence with every measurement passed through `convert` first.
pub fn add_solt_with(
    cal: &mut NewCalibration,
    truth: &Truth,
    mut convert: impl FnMut(Measurement) -> Measurement,
) -> anyhow::Result<()> {
    let (rows, columns) = (truth.layout.rows(), truth.layout.columns());
    let p = truth.layout.ports();
    for port in 0..rows.min(columns) {
        for (id, v) in [
            (ParameterId::SHORT, -1.0),
            (ParameterId::OPEN, 1.0),
            (ParameterId::MATCH, 0.0),
        ] {
            let m = convert(truth.measure(&reflect(c(v, 0.0)), &[port]));
            cal.add_single_reflect(&m, id, port)?;
        }
    }
    for a in 0..p {
        for b in a + 1..p {
            cal.add_through(&convert(truth.measure(&through(), &[a, b])), a, b)?;
        }
    }
    Ok(())
}

/// Split ratio measurements `m` [freq, rows, columns] into random incident
/// waves `a` and reflected waves `b` with `b = m·a`.
///
/// Per-column types drive each column separately, so `a` is 1×columns and
/// column j of `b` is column j of `m` times `a[j]`. Otherwise `a` is a
/// diagonally dominant columns×columns matrix.
pub fn waves(m: &Array3<Complex64>, per_column: bool, rng: &mut StdRng) -> Measurement {
    let (nfreq, rows, columns) = m.dim();
    if per_column {
        let a = Array3::from_shape_simple_fn((nfreq, 1, columns), || c(1.0, 0.0) + crand(rng, 0.2));
        let b = Array3::from_shape_fn((nfreq, rows, columns), |(f, i, j)| m[[f, i, j]] * a[[f, 0, j]]);
        return Measurement::Waves { a, b };
    }
    let a = Array3::from_shape_fn((nfreq, columns, columns), |(_, i, j)| {
        let perturbation = crand(rng, 0.1);
        if i == j {
            c(1.0, 0.0) + perturbation
        } else {
            perturbation
        }
    });
    let mut b = Array3::<Complex64>::zeros((nfreq, rows, columns));
    for f in 0..nfreq {
        let bf = m.index_axis(Axis(0), f).dot(&a.index_axis(Axis(0), f));
        b.index_axis_mut(Axis(0), f).assign(&bf);
    }
    Measurement::Waves { a, b }
}

/// [`waves`] for a ratio [`Measurement`].
pub fn to_waves(m: Measurement, per_column: bool, rng: &mut StdRng) -> Measurement {
    match m {
        Measurement::Ratio(ratio) => waves(&ratio, per_column, rng),
        other => other,
    }
}

/// `count` random standards connecting every port, as scalar parameters.
pub fn add_random_standards(
    cal: &mut NewCalibration,
    truth: &Truth,
    count: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let p = truth.layout.ports();
    let ports: Vec<usize> = (0..p).collect();
    for _ in 0..count {
        let s = random_s(p, rng);
        let mut cells = Array2::from_elem((p, p), ParameterId::MATCH);
        for ((i, j), v) in s.indexed_iter() {
            cells[[i, j]] = cal.make_scalar(*v)?;
        }
        cal.add_mapped_matrix(&truth.measure(&s, &ports), &cells, &ports)?;
    }
    Ok(())
}

/// Add the standards that determine `truth`'s type.
pub fn add_standards(cal: &mut NewCalibration, truth: &Truth, rng: &mut StdRng) -> anyhow::Result<()> {
    if truth.layout.error_term_type().is_dense() {
        add_random_standards(cal, truth, 6, rng)
    } else {
        add_solt(cal, truth)
    }
}

pub fn assert_complex_close(actual: Complex64, expected: Complex64, epsilon: f64) {
    assert_relative_eq!(actual.re, expected.re, epsilon = epsilon);
    assert_relative_eq!(actual.im, expected.im, epsilon = epsilon);
}

pub fn assert_all_close<'a>(
    actual: impl IntoIterator<Item = &'a Complex64>,
    expected: impl IntoIterator<Item = &'a Complex64>,
    epsilon: f64,
) {
    for (a, e) in actual.into_iter().zip(expected) {
        assert_complex_close(*a, *e, epsilon);
    }
}
