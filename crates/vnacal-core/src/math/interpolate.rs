//! Rational-function frequency interpolation
//!
//! Bulirsch–Stoer rational interpolation over a window of the `order`
//! tabulated points nearest the query. Queries at or beyond either end of the
//! table return the end value (flat extrapolation); range checks against the
//! extrapolation allowance are the caller's job.
//!
//! Sweeps query frequencies in nearly monotonic order, so the segment found
//! for one query is kept in a [`SegmentHint`] and used as the starting point
//! of the next search.

use ndarray::ArrayView1;
use num_complex::Complex64;

use crate::constants::INTERPOLATION_EPSILON;

/// Opaque position cache for repeated queries against the same table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentHint(usize);

impl SegmentHint {
    pub fn new() -> Self {
        Self(0)
    }
}

/// Find `s` with `x[s] <= xq < x[s + 1]`, starting from the hint.
///
/// Requires `x.len() >= 2` and `x[0] < xq < x[n - 1]`.
fn locate(x: &[f64], xq: f64, hint: &mut SegmentHint) -> usize {
    let n = x.len();
    let mut seg = hint.0.min(n - 2);

    // Short walk first; fall back to bisection for large jumps.
    for _ in 0..4 {
        if xq < x[seg] {
            seg -= 1;
        } else if xq >= x[seg + 1] {
            seg += 1;
        } else {
            hint.0 = seg;
            return seg;
        }
    }
    seg = x.partition_point(|&f| f <= xq).saturating_sub(1).min(n - 2);
    hint.0 = seg;
    seg
}

#[inline]
fn coincides(a: f64, b: f64) -> bool {
    (a - b).abs() <= INTERPOLATION_EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Interpolate the table `(x, y)` at `xq` using a window of `order` points.
///
/// `x` must be strictly ascending and the same length as `y`. `order` is
/// clamped to `1..=x.len()`; 1 picks the nearest point, `x.len()` uses the
/// whole table.
pub fn rational_interpolate(
    x: &[f64],
    y: ArrayView1<Complex64>,
    order: usize,
    hint: &mut SegmentHint,
    xq: f64,
) -> Complex64 {
    let n = x.len();
    debug_assert_eq!(n, y.len(), "x and y must have the same length");
    if n == 0 {
        return Complex64::new(0.0, 0.0);
    }
    if n == 1 || xq <= x[0] {
        return y[0];
    }
    if xq >= x[n - 1] {
        return y[n - 1];
    }

    let seg = locate(x, xq, hint);
    if coincides(xq, x[seg]) {
        return y[seg];
    }
    if coincides(xq, x[seg + 1]) {
        return y[seg + 1];
    }

    let m = order.clamp(1, n);
    if m == 1 {
        return if xq - x[seg] <= x[seg + 1] - xq {
            y[seg]
        } else {
            y[seg + 1]
        };
    }

    // Window of m points centered on the segment.
    let base = (seg + 1).saturating_sub(m / 2).min(n - m);
    let xs = &x[base..base + m];
    let ys: Vec<Complex64> = (base..base + m).map(|i| y[i]).collect();

    bulirsch_stoer(xs, &ys, xq).unwrap_or_else(|| neville(xs, &ys, xq))
}

/// Diagonal rational interpolation; `None` if the tableau hits a pole.
fn bulirsch_stoer(xs: &[f64], ys: &[Complex64], xq: f64) -> Option<Complex64> {
    const TINY: f64 = 1e-25;
    let n = xs.len();

    let mut ns = 0;
    let mut hh = (xq - xs[0]).abs();
    for (i, &xi) in xs.iter().enumerate().skip(1) {
        let h = (xq - xi).abs();
        if h < hh {
            ns = i;
            hh = h;
        }
    }

    let mut c: Vec<Complex64> = ys.to_vec();
    let mut d: Vec<Complex64> = ys.iter().map(|&v| v + TINY).collect();
    let mut result = ys[ns];
    let mut ns = ns as isize - 1;

    for m in 1..n {
        for i in 0..n - m {
            let w = c[i + 1] - d[i];
            let h = xs[i + m] - xq;
            let t = d[i] * ((xs[i] - xq) / h);
            let dd = t - c[i + 1];
            if dd.norm() == 0.0 {
                return None;
            }
            let dd = w / dd;
            d[i] = c[i + 1] * dd;
            c[i] = t * dd;
        }
        let dy = if 2 * (ns + 1) < (n - m) as isize {
            c[(ns + 1) as usize]
        } else {
            let v = d[ns as usize];
            ns -= 1;
            v
        };
        result += dy;
    }
    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

/// Polynomial interpolation over the same window, used when the rational
/// tableau is degenerate.
fn neville(xs: &[f64], ys: &[Complex64], xq: f64) -> Complex64 {
    let n = xs.len();
    let mut p: Vec<Complex64> = ys.to_vec();
    for m in 1..n {
        for i in 0..n - m {
            let num = p[i] * (xs[i + m] - xq) + p[i + 1] * (xq - xs[i]);
            p[i] = num / (xs[i + m] - xs[i]);
        }
    }
    p[0]
}
