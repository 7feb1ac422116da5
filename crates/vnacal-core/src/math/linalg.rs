//! Dense complex linear algebra
//!
//! Small dense kernels used by the solver and applier: multiply, inverse,
//! full QR, left/right division and least squares. Singularity is never an
//! error here: it is reported through a zero or non-finite determinant and
//! callers decide what to do with it.
//!
//! LU solves, inverses, determinants and singular values come from
//! nalgebra; all ndarray<->nalgebra conversion is contained in this module.
//! The QR is written here because callers need the full m×m `Q`, which
//! nalgebra's thin QR does not give.

use nalgebra::DMatrix;
use ndarray::{s, Array2};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

// ============================================================================
// Conversion helpers (internal)
// ============================================================================

/// Convert ndarray Array2<Complex64> to nalgebra DMatrix<Complex64>
#[inline]
fn to_na_complex(a: &Array2<Complex64>) -> DMatrix<Complex64> {
    let (m, n) = a.dim();
    DMatrix::from_fn(m, n, |i, j| a[[i, j]])
}

/// Convert nalgebra DMatrix<Complex64> to ndarray Array2<Complex64>
#[inline]
fn from_na_complex(m: &DMatrix<Complex64>) -> Array2<Complex64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

// ============================================================================
// Predicates
// ============================================================================

/// True if a determinant signals a singular (or numerically broken) system.
#[inline]
pub fn is_singular(det: Complex64) -> bool {
    det == ZERO || !det.is_finite()
}

// ============================================================================
// Multiply
// ============================================================================

/// `C = A · B` for `A` m×n and `B` n×o.
pub fn multiply(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    debug_assert_eq!(a.ncols(), b.nrows(), "inner dimensions must agree");
    a.dot(b)
}

/// Conjugate transpose.
pub fn adjoint(a: &Array2<Complex64>) -> Array2<Complex64> {
    a.t().mapv(|z| z.conj())
}

// ============================================================================
// LU Solve
// ============================================================================

/// Solve `A · X = B` for square `A` (n×n) and `B` (n×k) by LU decomposition
/// with partial pivoting.
///
/// Returns `(X, det(A))`. When `A` is singular the determinant is zero (or
/// non-finite) and `X` is all zeros.
pub fn left_divide(a: &Array2<Complex64>, b: &Array2<Complex64>) -> (Array2<Complex64>, Complex64) {
    let n = a.nrows();
    let k = b.ncols();
    debug_assert_eq!(a.ncols(), n, "left_divide requires a square matrix");
    debug_assert_eq!(b.nrows(), n, "row counts must agree");
    if n == 0 {
        return (Array2::zeros((0, k)), ONE);
    }

    let lu = to_na_complex(a).lu();
    let det = lu.determinant();
    if is_singular(det) {
        return (Array2::zeros((n, k)), det);
    }
    match lu.solve(&to_na_complex(b)) {
        Some(x) => (from_na_complex(&x), det),
        None => (Array2::zeros((n, k)), ZERO),
    }
}

/// Solve `X · A = B` for square `A` (n×n) and `B` (k×n).
///
/// Returns `(X, det(A))` with the same singularity contract as
/// [`left_divide`].
pub fn right_divide(a: &Array2<Complex64>, b: &Array2<Complex64>) -> (Array2<Complex64>, Complex64) {
    debug_assert_eq!(a.nrows(), a.ncols(), "right_divide requires a square matrix");
    debug_assert_eq!(b.ncols(), a.nrows(), "column counts must agree");

    // X A = B  <=>  A^T X^T = B^T
    let at = a.t().to_owned();
    let bt = b.t().to_owned();
    let (xt, det) = left_divide(&at, &bt);
    (xt.t().to_owned(), det)
}

/// Invert a square matrix, returning `(A⁻¹, det(A))`.
///
/// A singular matrix gives a zero (or non-finite) determinant and an
/// all-zero inverse.
pub fn inverse(a: &Array2<Complex64>) -> (Array2<Complex64>, Complex64) {
    let n = a.nrows();
    debug_assert_eq!(a.ncols(), n, "inverse requires a square matrix");
    if n == 0 {
        return (Array2::zeros((0, 0)), ONE);
    }

    let lu = to_na_complex(a).lu();
    let det = lu.determinant();
    if is_singular(det) {
        return (Array2::zeros((n, n)), det);
    }
    match lu.try_inverse() {
        Some(inv) => (from_na_complex(&inv), det),
        None => (Array2::zeros((n, n)), ZERO),
    }
}

/// Determinant of a square matrix.
pub fn determinant(a: &Array2<Complex64>) -> Complex64 {
    if a.nrows() == 0 {
        return ONE;
    }
    to_na_complex(a).lu().determinant()
}

// ============================================================================
// QR Decomposition
// ============================================================================

/// Full QR decomposition by Householder reflections.
///
/// For `A` m×n returns `Q` (m×m, unitary) and `R` (m×n, exactly zero below
/// the diagonal) with `A = Q·R`.
pub fn qr(a: &Array2<Complex64>) -> (Array2<Complex64>, Array2<Complex64>) {
    let (m, n) = a.dim();
    let mut q = Array2::<Complex64>::eye(m);
    let mut r = a.clone();

    for k in 0..n.min(m.saturating_sub(1)) {
        let norm_x = r.slice(s![k.., k]).iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if norm_x == 0.0 {
            continue;
        }
        let x0 = r[[k, k]];
        let phase = if x0.norm() == 0.0 { ONE } else { x0 / x0.norm() };
        let alpha = -phase * norm_x;

        // v = x - alpha e1, normalized
        let mut v: Vec<Complex64> = r.slice(s![k.., k]).to_vec();
        v[0] -= alpha;
        let v_norm = v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if v_norm == 0.0 {
            continue;
        }
        for z in v.iter_mut() {
            *z /= v_norm;
        }

        // R[k.., k..] -= 2 v (v^H R[k.., k..])
        for j in k..n {
            let mut dot = ZERO;
            for (i, vi) in v.iter().enumerate() {
                dot += vi.conj() * r[[k + i, j]];
            }
            let dot = dot * 2.0;
            for (i, vi) in v.iter().enumerate() {
                r[[k + i, j]] -= vi * dot;
            }
        }
        r[[k, k]] = alpha;
        for i in k + 1..m {
            r[[i, k]] = ZERO;
        }

        // Q[:, k..] -= 2 (Q[:, k..] v) v^H
        for row in 0..m {
            let mut dot = ZERO;
            for (i, vi) in v.iter().enumerate() {
                dot += q[[row, k + i]] * vi;
            }
            let dot = dot * 2.0;
            for (i, vi) in v.iter().enumerate() {
                q[[row, k + i]] -= dot * vi.conj();
            }
        }
    }

    (q, r)
}

// ============================================================================
// Least Squares
// ============================================================================

/// Minimize `‖A·X − B‖` for `A` m×n (m ≥ n, full column rank) and `B` m×k.
///
/// Returns `None` if the system is underdetermined or `R` has a zero on its
/// diagonal.
pub fn solve_least_squares(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let (m, n) = a.dim();
    if m < n || b.nrows() != m {
        return None;
    }
    if n == 0 {
        return Some(Array2::zeros((0, b.ncols())));
    }
    let (q, r) = qr(a);
    let qhb = adjoint(&q).dot(b);

    let r_top = r.slice(s![..n, ..]).to_owned();
    let rhs = qhb.slice(s![..n, ..]).to_owned();
    let (x, det) = left_divide(&r_top, &rhs);
    if is_singular(det) {
        return None;
    }
    Some(x)
}

// ============================================================================
// Singular Value Decomposition
// ============================================================================

/// Singular values of a complex matrix, largest first.
pub fn singular_values(a: &Array2<Complex64>) -> Vec<f64> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 {
        return Vec::new();
    }

    let svd = to_na_complex(a).svd(false, false);
    let mut sv: Vec<f64> = svd.singular_values.iter().cloned().collect();
    sv.sort_by(|x, y| y.total_cmp(x));
    sv
}

/// Ratio of smallest to largest singular value (0 for rank-deficient or
/// empty matrices, and for matrices with more columns than rows).
pub fn inverse_condition(a: &Array2<Complex64>) -> f64 {
    let (m, n) = a.dim();
    if m < n {
        return 0.0;
    }
    let sv = singular_values(a);
    match (sv.first(), sv.last()) {
        (Some(&max), Some(&min)) if max > 0.0 => min / max,
        _ => 0.0,
    }
}
