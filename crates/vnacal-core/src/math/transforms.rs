//! Network parameter transformations
//!
//! Per-frequency conversions between S, Z and ABCD matrices, and S-parameter
//! renormalization between reference impedances. Reference impedances are
//! given per port. All functions return `None` when the conversion hits a
//! singular matrix or the shapes do not agree.

use ndarray::Array2;
use num_complex::Complex64;

use super::linalg::{is_singular, right_divide};

const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Square `n×n` matrix with one reference impedance per port.
fn shapes_agree(m: &Array2<Complex64>, z0: &[Complex64]) -> bool {
    m.is_square() && m.nrows() == z0.len()
}

/// Diagonal matrix of `sqrt(z0)` and its inverse.
fn sqrt_z0_diag(z0: &[Complex64]) -> (Array2<Complex64>, Array2<Complex64>) {
    let n = z0.len();
    let mut f = Array2::zeros((n, n));
    let mut f_inv = Array2::zeros((n, n));
    for (i, z) in z0.iter().enumerate() {
        let v = z.sqrt();
        f[[i, i]] = v;
        f_inv[[i, i]] = ONE / v;
    }
    (f, f_inv)
}

/// Convert S-parameters to Z-parameters
///
/// Formula: Z = F (I + S) (I - S)⁻¹ F, where F = diag(sqrt(z0))
pub fn s2z(s: &Array2<Complex64>, z0: &[Complex64]) -> Option<Array2<Complex64>> {
    if !shapes_agree(s, z0) {
        return None;
    }
    let n = s.nrows();
    let identity = Array2::<Complex64>::eye(n);
    let (f, _) = sqrt_z0_diag(z0);

    let i_plus_s = &identity + s;
    let i_minus_s = &identity - s;
    let (term, det) = right_divide(&i_minus_s, &i_plus_s);
    if is_singular(det) {
        return None;
    }
    Some(f.dot(&term).dot(&f))
}

/// Convert Z-parameters to S-parameters
///
/// Formula: S = F⁻¹ (Z - Z0) (Z + Z0)⁻¹ F, where Z0 = diag(z0)
pub fn z2s(z: &Array2<Complex64>, z0: &[Complex64]) -> Option<Array2<Complex64>> {
    if !shapes_agree(z, z0) {
        return None;
    }
    let n = z.nrows();
    let (f, f_inv) = sqrt_z0_diag(z0);
    let mut z0_diag = Array2::<Complex64>::zeros((n, n));
    for (i, &v) in z0.iter().enumerate() {
        z0_diag[[i, i]] = v;
    }

    let z_minus_z0 = z - &z0_diag;
    let z_plus_z0 = z + &z0_diag;
    let (term, det) = right_divide(&z_plus_z0, &z_minus_z0);
    if is_singular(det) {
        return None;
    }
    Some(f_inv.dot(&term).dot(&f))
}

/// Re-reference S-parameters from `z0_old` to `z0_new`.
///
/// Equivalent to `z2s(s2z(s, z0_old), z0_new)` but without forming Z, so
/// ideal opens (where `I - S` is singular) renormalize cleanly:
///
/// S' = F'⁻¹ P Q⁻¹ F', with P = F(I+S) - Z0' F⁻¹(I-S), Q = F(I+S) + Z0' F⁻¹(I-S)
pub fn renormalize_s(
    s: &Array2<Complex64>,
    z0_old: &[Complex64],
    z0_new: &[Complex64],
) -> Option<Array2<Complex64>> {
    if !shapes_agree(s, z0_old) || z0_new.len() != z0_old.len() {
        return None;
    }
    let n = s.nrows();
    if z0_old == z0_new {
        return Some(s.clone());
    }
    let identity = Array2::<Complex64>::eye(n);
    let (f, f_inv) = sqrt_z0_diag(z0_old);
    let (f_new, f_new_inv) = sqrt_z0_diag(z0_new);
    let mut z0_new_diag = Array2::<Complex64>::zeros((n, n));
    for (i, &v) in z0_new.iter().enumerate() {
        z0_new_diag[[i, i]] = v;
    }

    let forward = f.dot(&(&identity + s));
    let backward = z0_new_diag.dot(&f_inv).dot(&(&identity - s));
    let p = &forward - &backward;
    let q = &forward + &backward;
    let (term, det) = right_divide(&q, &p);
    if is_singular(det) {
        return None;
    }
    Some(f_new_inv.dot(&term).dot(&f_new))
}

/// Convert a 2-port ABCD matrix to S-parameters in a common reference
/// impedance `z0`.
pub fn abcd2s(abcd: &Array2<Complex64>, z0: Complex64) -> Option<Array2<Complex64>> {
    if abcd.dim() != (2, 2) {
        return None;
    }
    let (a, b, c, d) = (abcd[[0, 0]], abcd[[0, 1]], abcd[[1, 0]], abcd[[1, 1]]);
    let denom = a + b / z0 + c * z0 + d;
    if is_singular(denom) {
        return None;
    }
    let mut s = Array2::zeros((2, 2));
    s[[0, 0]] = (a + b / z0 - c * z0 - d) / denom;
    s[[0, 1]] = 2.0 * (a * d - b * c) / denom;
    s[[1, 0]] = 2.0 / denom;
    s[[1, 1]] = (-a + b / z0 - c * z0 + d) / denom;
    Some(s)
}
