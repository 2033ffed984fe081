//! Bounded Levenberg-Marquardt for small nonlinear least-squares problems.
//!
//! We minimize `0.5 * Σ r_i(x)^2` over the freed parameters of one refinement
//! step. Properties the scheduler relies on:
//!
//! - deterministic: same residual function + same start point = same result
//!   (the Jacobian is computed in parallel but assembled in column order)
//! - bounded: iterations are capped and every trial point is projected into
//!   the parameter box
//!
//! Damping uses Marquardt's column scaling (`D = diag(||J_j||)`), so parameters
//! with very different magnitudes (a lattice constant vs. a displacement
//! parameter) converge at comparable rates.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::AppError;
use crate::math::solve_least_squares;

const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

/// Solver settings.
#[derive(Debug, Clone)]
pub struct LmOptions {
    /// Maximum number of accepted-or-rejected outer iterations.
    pub max_iter: usize,
    /// Stop when the relative cost reduction of an accepted step is below this.
    pub ftol: f64,
    /// Stop when the step norm is below `xtol * (||x|| + xtol)`.
    pub xtol: f64,
    /// Initial damping factor.
    pub lambda0: f64,
    /// Relative forward-difference step.
    pub fd_step: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            ftol: 1e-12,
            xtol: 1e-10,
            lambda0: 1e-3,
            fd_step: 1e-7,
        }
    }
}

/// Outcome of one solve.
#[derive(Debug, Clone)]
pub struct LmResult {
    pub x: Vec<f64>,
    /// Cost at `x0` as given, before it is projected into the box.
    pub cost_initial: f64,
    /// Whether `x0` had to be projected into the box.
    pub clamped: bool,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize `0.5 * ||residual(x)||^2` subject to `bounds[i].0 <= x[i] <= bounds[i].1`.
pub fn levenberg_marquardt<F>(
    residual: F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    opts: &LmOptions,
) -> Result<LmResult, AppError>
where
    F: Fn(&[f64]) -> Vec<f64> + Sync,
{
    if bounds.len() != x0.len() {
        return Err(AppError::Model(format!(
            "solver received {} bounds for {} parameters",
            bounds.len(),
            x0.len()
        )));
    }
    if bounds.iter().any(|&(lo, hi)| !(lo <= hi)) {
        return Err(AppError::Model("solver received an empty parameter box".into()));
    }

    let mut x = project(x0, bounds);
    let clamped = x.as_slice() != x0;
    let mut r = residual(&x);
    let mut cost = half_norm_sq(&r);
    if !cost.is_finite() {
        return Err(AppError::Model(
            "residual is not finite at the starting point".into(),
        ));
    }
    let cost_initial = if clamped {
        half_norm_sq(&residual(x0))
    } else {
        cost
    };

    if x.is_empty() || r.is_empty() {
        return Ok(LmResult {
            x,
            cost_initial,
            clamped,
            cost,
            iterations: 0,
            converged: true,
        });
    }

    let m = r.len();
    let n = x.len();
    let mut lambda = opts.lambda0;
    let mut iterations = 0;
    let mut converged = false;

    'outer: while iterations < opts.max_iter {
        let jac = jacobian(&residual, &x, &r, bounds, opts.fd_step);
        let scale: Vec<f64> = (0..n).map(|j| jac.column(j).norm().max(1e-12)).collect();

        loop {
            iterations += 1;

            let mut a = DMatrix::<f64>::zeros(m + n, n);
            a.view_mut((0, 0), (m, n)).copy_from(&jac);
            let sqrt_lambda = lambda.sqrt();
            for j in 0..n {
                a[(m + j, j)] = sqrt_lambda * scale[j];
            }
            let mut b = DVector::<f64>::zeros(m + n);
            for i in 0..m {
                b[i] = -r[i];
            }

            let Some(delta) = solve_least_squares(&a, &b) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX || iterations >= opts.max_iter {
                    break 'outer;
                }
                continue;
            };

            let trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(xi, di)| xi + di).collect();
            let trial = project(&trial, bounds);
            let r_trial = residual(&trial);
            let cost_trial = half_norm_sq(&r_trial);

            if cost_trial.is_finite() && cost_trial < cost {
                let step_norm = trial
                    .iter()
                    .zip(x.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
                let reduction = (cost - cost_trial) / cost.max(f64::MIN_POSITIVE);

                x = trial;
                r = r_trial;
                cost = cost_trial;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);

                if reduction <= opts.ftol || step_norm <= opts.xtol * (x_norm + opts.xtol) {
                    converged = true;
                    break 'outer;
                }
                break;
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No downhill step exists at any damping: we are at a (bounded) minimum.
                converged = true;
                break 'outer;
            }
            if iterations >= opts.max_iter {
                break 'outer;
            }
        }
    }

    Ok(LmResult {
        x,
        cost_initial,
        clamped,
        cost,
        iterations,
        converged,
    })
}

fn jacobian<F>(residual: &F, x: &[f64], r0: &[f64], bounds: &[(f64, f64)], fd_step: f64) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64> + Sync,
{
    let m = r0.len();
    let n = x.len();

    let columns: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|j| {
            let mut h = fd_step * (1.0 + x[j].abs());
            // Step backwards when the forward point would leave the box.
            if x[j] + h > bounds[j].1 {
                h = -h;
            }
            let mut xp = x.to_vec();
            xp[j] += h;
            let rp = residual(&xp);
            (0..m)
                .map(|i| {
                    let d = (rp.get(i).copied().unwrap_or(f64::NAN) - r0[i]) / h;
                    if d.is_finite() { d } else { 0.0 }
                })
                .collect()
        })
        .collect();

    DMatrix::from_fn(m, n, |i, j| columns[j][i])
}

fn project(x: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    x.iter()
        .zip(bounds.iter())
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

fn half_norm_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}
