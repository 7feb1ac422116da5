//! Per-frequency error-term solver
//!
//! Solves the homogeneous calibration equations for one frequency. The
//! normalization terms are pinned to 1 and moved to the right-hand side;
//! leakage terms are already fixed by the caller. Without unknown
//! parameters the system is linear and solved by weighted least squares,
//! one group per measurement column for UE14. With unknowns the equations
//! are bilinear in (error terms, unknown values) and solved jointly by
//! Gauss–Newton, starting from the linear solution at the initial guesses.

use ndarray::Array2;
use num_complex::Complex64;

use super::equations::{Equation, SValue};
use crate::config::SolverConfig;
use crate::error::{Error, Result};
use crate::layout::{Block, Layout, Model};
use crate::math::linalg::{inverse_condition, solve_least_squares};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Pulls a correlated parameter toward its target: `(u − target) / sigma ≈ 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Constraint {
    pub unknown: usize,
    pub target: SValue,
    pub sigma: f64,
}

/// A set of error terms solved together, with the equations that constrain them.
struct Group<'a> {
    variables: Vec<usize>,
    equations: Vec<&'a Equation>,
}

/// Terms the solver determines: everything except leakage and normalization.
fn solved_terms(layout: &Layout, range: std::ops::Range<usize>) -> Vec<usize> {
    let fixed = layout.normalization_terms();
    let leakage = layout.leakage().map(|el| el.range());
    range
        .filter(|t| !fixed.contains(t) && !leakage.as_ref().is_some_and(|el| el.contains(t)))
        .collect()
}

fn groups<'a>(layout: &Layout, equations: &'a [Equation], joint: bool) -> Vec<Group<'a>> {
    match layout.model() {
        Model::Ue14 { columns, .. } if !joint => columns
            .iter()
            .enumerate()
            .map(|(j, col)| Group {
                variables: solved_terms(layout, col.range()),
                equations: equations.iter().filter(|eq| eq.column == j).collect(),
            })
            .collect(),
        _ => vec![Group {
            variables: solved_terms(layout, 0..layout.total_terms()),
            equations: equations.iter().collect(),
        }],
    }
}

/// Column of every variable term in the system matrix.
fn positions(total: usize, variables: &[usize]) -> Vec<Option<usize>> {
    let mut position = vec![None; total];
    for (col, &t) in variables.iter().enumerate() {
        position[t] = Some(col);
    }
    position
}

fn check_rank(a: &Array2<Complex64>, config: &SolverConfig, f: f64) -> Result<f64> {
    let ratio = inverse_condition(a);
    if !(ratio.is_finite() && ratio >= config.rank_tolerance) {
        return Err(Error::math(format!(
            "calibration equations are rank deficient at {f} Hz (singular value ratio {ratio:.3e}); \
             the standards do not determine every error term"
        )));
    }
    Ok(ratio)
}

fn check_count(equations: usize, unknowns: usize) -> Result<()> {
    if equations < unknowns {
        return Err(Error::usage(format!(
            "{equations} equations for {unknowns} unknowns; more standards are needed"
        )));
    }
    Ok(())
}

fn norm(v: &[Complex64]) -> f64 {
    v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

/// Solve one group with unknown parameters held at `unknowns`.
fn solve_linear(
    group: &Group<'_>,
    terms: &mut [Complex64],
    unknowns: &[Complex64],
    config: &SolverConfig,
    f: f64,
) -> Result<f64> {
    let n = group.variables.len();
    if n == 0 {
        return Ok(1.0);
    }
    check_count(group.equations.len(), n)?;
    let position = positions(terms.len(), &group.variables);
    let mut a = Array2::<Complex64>::zeros((group.equations.len(), n));
    let mut b = Array2::<Complex64>::zeros((group.equations.len(), 1));
    for (r, eq) in group.equations.iter().enumerate() {
        for t in &eq.terms {
            let c = t.coef * eq.weight * t.unknown.map_or(ONE, |k| unknowns[k]);
            match position[t.term] {
                Some(col) => a[[r, col]] += c,
                None => b[[r, 0]] -= c * terms[t.term],
            }
        }
    }
    let ratio = check_rank(&a, config, f)?;
    let x = solve_least_squares(&a, &b)
        .ok_or_else(|| Error::math(format!("singular calibration system at {f} Hz")))?;
    for (col, &t) in group.variables.iter().enumerate() {
        terms[t] = x[[col, 0]];
    }
    Ok(ratio)
}

/// Outcome of one frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SolveStats {
    pub iterations: usize,
    pub inverse_condition: f64,
}

/// Solve the error terms (and unknown parameter values) at one frequency.
///
/// `terms` arrives with normalization terms set to 1 and leakage filled in;
/// `unknowns` holds the initial guesses and receives the solved values.
pub(crate) fn solve_frequency(
    layout: &Layout,
    equations: &[Equation],
    terms: &mut [Complex64],
    unknowns: &mut [Complex64],
    constraints: &[Constraint],
    config: &SolverConfig,
    f: f64,
) -> Result<SolveStats> {
    let joint = !unknowns.is_empty();
    let groups = groups(layout, equations, joint);
    let mut inverse_condition = 1.0f64;
    for group in &groups {
        inverse_condition = inverse_condition.min(solve_linear(group, terms, unknowns, config, f)?);
    }
    if !joint {
        return Ok(SolveStats {
            iterations: 0,
            inverse_condition,
        });
    }
    let iterations = gauss_newton(&groups[0], terms, unknowns, constraints, config, f)?;
    Ok(SolveStats {
        iterations,
        inverse_condition,
    })
}

/// Refine error terms and unknown values together until both stop moving.
fn gauss_newton(
    group: &Group<'_>,
    terms: &mut [Complex64],
    unknowns: &mut [Complex64],
    constraints: &[Constraint],
    config: &SolverConfig,
    f: f64,
) -> Result<usize> {
    let nx = group.variables.len();
    let nu = unknowns.len();
    let rows = group.equations.len() + constraints.len();
    check_count(rows, nx + nu)?;
    let position = positions(terms.len(), &group.variables);

    for iteration in 1..=config.iteration_limit {
        let mut jacobian = Array2::<Complex64>::zeros((rows, nx + nu));
        let mut residual = Array2::<Complex64>::zeros((rows, 1));
        for (r, eq) in group.equations.iter().enumerate() {
            for t in &eq.terms {
                let s = t.unknown.map_or(ONE, |k| unknowns[k]);
                let c = t.coef * eq.weight;
                residual[[r, 0]] -= c * s * terms[t.term];
                if let Some(col) = position[t.term] {
                    jacobian[[r, col]] += c * s;
                }
                if let Some(k) = t.unknown {
                    jacobian[[r, nx + k]] += c * terms[t.term];
                }
            }
        }
        for (q, constraint) in constraints.iter().enumerate() {
            let r = group.equations.len() + q;
            let inv_sigma = 1.0 / constraint.sigma;
            let target = match constraint.target {
                SValue::Known(v) => v,
                SValue::Unknown(o) => {
                    jacobian[[r, nx + o]] -= Complex64::new(inv_sigma, 0.0);
                    unknowns[o]
                }
            };
            jacobian[[r, nx + constraint.unknown]] += Complex64::new(inv_sigma, 0.0);
            residual[[r, 0]] = -(unknowns[constraint.unknown] - target) * inv_sigma;
        }
        if iteration == 1 {
            check_rank(&jacobian, config, f)?;
        }
        let delta = solve_least_squares(&jacobian, &residual).ok_or_else(|| {
            Error::math(format!("singular Gauss-Newton step at {f} Hz, iteration {iteration}"))
        })?;

        let dx: Vec<Complex64> = (0..nx).map(|k| delta[[k, 0]]).collect();
        let du: Vec<Complex64> = (0..nu).map(|k| delta[[nx + k, 0]]).collect();
        for (k, &t) in group.variables.iter().enumerate() {
            terms[t] += dx[k];
        }
        for (u, d) in unknowns.iter_mut().zip(&du) {
            *u += d;
        }
        if terms.iter().chain(unknowns.iter()).any(|v| !v.is_finite()) {
            return Err(Error::math(format!("non-finite solution at {f} Hz")));
        }

        let x: Vec<Complex64> = group.variables.iter().map(|&t| terms[t]).collect();
        let x_converged = norm(&dx) <= config.et_tolerance * norm(&x).max(1.0);
        let u_converged = norm(&du) <= config.p_tolerance * norm(unknowns).max(1.0);
        if x_converged && u_converged {
            return Ok(iteration);
        }
    }
    Err(Error::math(format!(
        "unknown parameters did not converge within {} iterations at {f} Hz",
        config.iteration_limit
    )))
}

/// Convert solved UE14 terms into the E12 layout.
///
/// Per column `j`, with `c = us − ux[j]·ui/um[j]`:
/// `em[i] = ux[i]/um[i]`, `er[i] = c/um[i]`, `el[j] = −ui/um[j]` and
/// `el[i] = leakage(i, j)` off the diagonal.
pub(crate) fn ue14_to_e12(ue14: &Layout, e12: &Layout, terms: &[Complex64], f: f64) -> Result<Vec<Complex64>> {
    let (Model::Ue14 { columns, el }, Model::E12 { columns: out }) = (ue14.model(), e12.model()) else {
        return Err(Error::usage("E12 conversion needs UE14 and E12 layouts"));
    };
    let mut e = vec![ZERO; e12.total_terms()];
    for (j, (col, dst)) in columns.iter().zip(out).enumerate() {
        let um = |i: usize| col.um.index(i, 0).map_or(ZERO, |k| terms[k]);
        let ux = |i: usize| col.ux.index(i, 0).map_or(ZERO, |k| terms[k]);
        let ui = col.ui.scalar(terms);
        let us = col.us.scalar(terms);
        let um_j = um(j);
        if um_j == ZERO || !um_j.is_finite() {
            return Err(Error::math(format!("zero um14 term in column {j} at {f} Hz")));
        }
        let c = us - ux(j) * ui / um_j;
        let (rows, _) = col.um.dim();
        for i in 0..rows {
            let um_i = um(i);
            if um_i == ZERO {
                return Err(Error::math(format!("zero um14 term ({i}, {j}) at {f} Hz")));
            }
            let set = |block: &Block, e: &mut [Complex64], v: Complex64| {
                if let Some(k) = block.index(i, 0) {
                    e[k] = v;
                }
            };
            set(&dst.em, &mut e, ux(i) / um_i);
            set(&dst.er, &mut e, c / um_i);
            let leak = if i == j {
                -ui / um_j
            } else {
                el.index(i, j).map_or(ZERO, |k| terms[k])
            };
            set(&dst.el, &mut e, leak);
        }
    }
    Ok(e)
}
