//! Bundled pair distribution model for single-element cubic crystals.
//!
//! The calculated profile is
//!
//! ```text
//! G(r) = scale * exp(-(qdamp r)^2 / 2) * [ Σ_k N_k / r * φ(r - R_k; σ_k) - 4π r ρ0 ]
//! σ_k^2 = 2 Uiso * max(1 - delta1/R_k - delta2/R_k^2 + qbroad^2 R_k^2, 0.01) + 1/qmax^2
//! ```
//!
//! with `R_k = a * u_k` (reduced shell distance `u_k`), `φ` a unit Gaussian and
//! `ρ0 = atoms per cell / a^3`. It is deliberately small: enough structure for
//! strategies to matter (peak positions, widths, envelope), nothing more.
//!
//! Clones share the bound dataset and shell table through `Arc`, so branching a
//! fit is a copy of a handful of floats.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;

use tracing::debug;

use crate::domain::params::close_matches;
use crate::domain::{Action, ActionItem, Payload};
use crate::error::AppError;
use crate::math::{LmOptions, levenberg_marquardt};
use crate::model::structure::{Lattice, Shell, StructureSpec, coordination_shells};
use crate::model::{FitInputs, FitModel, FitOutcome, ModelFactory};

/// Refinable parameters, in payload order.
pub const PDF_PARAMETERS: [&str; 7] = ["scale", "qdamp", "qbroad", "delta1", "delta2", "a", "Uiso_0"];

const SCALE: usize = 0;
const QDAMP: usize = 1;
const QBROAD: usize = 2;
const DELTA1: usize = 3;
const DELTA2: usize = 4;
const A: usize = 5;
const UISO: usize = 6;

type Values = [f64; PDF_PARAMETERS.len()];

/// Shell table plus the constants of one structure.
#[derive(Debug)]
struct Kernel {
    lattice: Lattice,
    shells: Vec<Shell>,
    atoms_per_cell: f64,
    qmax: f64,
    sigma_floor2: f64,
    /// Smallest lattice constant for which every shell below `max_r` is in
    /// the table.
    min_a: f64,
}

impl Kernel {
    fn new(lattice: Lattice, min_a: f64, max_r: f64, qmax: f64) -> Self {
        // A few peak widths of margin past the last grid point.
        let max_reduced = (max_r + 1.0) / min_a;
        Self {
            lattice,
            shells: coordination_shells(lattice, max_reduced),
            atoms_per_cell: lattice.atoms_per_cell() as f64,
            qmax,
            sigma_floor2: 1.0 / (qmax * qmax),
            min_a,
        }
    }

    fn covers(&self, a: f64) -> bool {
        a >= self.min_a
    }

    fn evaluate(&self, v: &Values, r: &[f64]) -> Vec<f64> {
        let a = v[A];
        let rho0 = self.atoms_per_cell / (a * a * a);
        let peaks: Vec<(f64, f64, f64)> = self
            .shells
            .iter()
            .map(|s| {
                let rk = a * s.reduced;
                let shape =
                    1.0 - v[DELTA1] / rk - v[DELTA2] / (rk * rk) + (v[QBROAD] * rk).powi(2);
                let sigma2 = 2.0 * v[UISO] * shape.max(0.01) + self.sigma_floor2;
                (rk, s.count, sigma2.sqrt())
            })
            .collect();

        r.iter()
            .map(|&ri| {
                let mut sum = 0.0;
                for &(rk, count, sigma) in &peaks {
                    let x = ri - rk;
                    if x.abs() > 6.0 * sigma {
                        continue;
                    }
                    sum += count * (-0.5 * x * x / (sigma * sigma)).exp()
                        / ((2.0 * PI).sqrt() * sigma);
                }
                let envelope = (-0.5 * (v[QDAMP] * ri).powi(2)).exp();
                v[SCALE] * envelope * (sum / ri - 4.0 * PI * ri * rho0)
            })
            .collect()
    }
}

/// Dataset resampled onto the calculation grid, shared between clones.
#[derive(Debug)]
struct Bound {
    r: Vec<f64>,
    y: Vec<f64>,
    /// Centre of the lattice-constant box.
    a0: f64,
    kernel: Kernel,
}

impl Bound {
    fn new(r: Vec<f64>, y: Vec<f64>, lattice: Lattice, a0: f64, qmax: f64) -> Self {
        let max_r = r.last().copied().unwrap_or(0.0);
        let (lo, _) = a_box(a0);
        Self {
            r,
            y,
            a0,
            kernel: Kernel::new(lattice, lo, max_r, qmax),
        }
    }

    /// Same dataset with the lattice-constant box (and the shell table) moved
    /// to centre on `a`.
    fn recentred(&self, a: f64) -> Self {
        Self::new(
            self.r.clone(),
            self.y.clone(),
            self.kernel.lattice,
            a,
            self.kernel.qmax,
        )
    }

    fn residuals(&self, v: &Values) -> Vec<f64> {
        self.kernel
            .evaluate(v, &self.r)
            .into_iter()
            .zip(self.y.iter())
            .map(|(calc, obs)| calc - obs)
            .collect()
    }

    fn bounds(&self, idx: usize) -> (f64, f64) {
        match idx {
            SCALE => (1e-4, 100.0),
            QDAMP | QBROAD => (0.0, 0.5),
            DELTA1 => (0.0, 5.0),
            DELTA2 => (0.0, 20.0),
            A => a_box(self.a0),
            _ => (1e-5, 0.1),
        }
    }
}

fn a_box(a0: f64) -> (f64, f64) {
    (0.8 * a0, 1.25 * a0)
}

#[derive(Debug, Clone)]
pub struct PdfModel {
    bound: Option<Arc<Bound>>,
    values: Values,
    refinable: Vec<usize>,
    snapshots: BTreeMap<String, Vec<f64>>,
    options: LmOptions,
}

impl Default for PdfModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfModel {
    /// Unloaded model; call `load_inputs` before fitting.
    pub fn new() -> Self {
        Self::with_options(LmOptions::default())
    }

    pub fn with_options(options: LmOptions) -> Self {
        Self {
            bound: None,
            values: [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.005],
            refinable: Vec::new(),
            snapshots: BTreeMap::new(),
            options,
        }
    }

    fn bound(&self) -> Result<&Arc<Bound>, AppError> {
        self.bound
            .as_ref()
            .ok_or_else(|| AppError::Model("PDF model has no inputs loaded".into()))
    }

    fn record_snapshots(&mut self, bound: &Bound) {
        let ycalc = bound.kernel.evaluate(&self.values, &bound.r);
        let ydiff: Vec<f64> = bound.y.iter().zip(ycalc.iter()).map(|(o, c)| o - c).collect();
        self.snapshots.insert("x_0".into(), bound.r.clone());
        self.snapshots.insert("y_0".into(), bound.y.clone());
        self.snapshots.insert("ycalc_0".into(), ycalc);
        self.snapshots.insert("ydiff_0".into(), ydiff);
    }
}

fn parameter_index(name: &str) -> Option<usize> {
    PDF_PARAMETERS.iter().position(|p| *p == name)
}

fn half_norm_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

/// Linear interpolation of `(xs, ys)` at `x`; `xs` must be ascending.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let hi = xs.partition_point(|&v| v < x);
    if hi == 0 {
        return ys[0];
    }
    if hi >= xs.len() {
        return ys[xs.len() - 1];
    }
    let (x0, x1) = (xs[hi - 1], xs[hi]);
    if x1 == x0 {
        return ys[hi];
    }
    let t = (x - x0) / (x1 - x0);
    ys[hi - 1] + t * (ys[hi] - ys[hi - 1])
}

fn check_range(inputs: &FitInputs) -> Result<(), AppError> {
    let ok = inputs.xmin.is_finite()
        && inputs.xmax.is_finite()
        && inputs.xmin > 0.0
        && inputs.xmin < inputs.xmax
        && inputs.dx > 0.0
        && inputs.qmin >= 0.0
        && inputs.qmin < inputs.qmax;
    if ok {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "invalid calculation range: r {}..{} step {}, q {}..{}",
            inputs.xmin, inputs.xmax, inputs.dx, inputs.qmin, inputs.qmax
        )))
    }
}

impl FitModel for PdfModel {
    fn load_inputs(&mut self, inputs: &FitInputs) -> Result<(), AppError> {
        inputs.structure.validate()?;
        check_range(inputs)?;

        let profile = &inputs.profile;
        if profile.is_empty() || profile.r.len() != profile.g.len() {
            return Err(AppError::Model(format!(
                "profile needs matching r and G columns (got {} and {})",
                profile.r.len(),
                profile.g.len()
            )));
        }
        if profile.r.windows(2).any(|w| w[1] < w[0]) {
            return Err(AppError::Model("profile r values are not ascending".into()));
        }

        let (lo, hi) = (profile.r[0], profile.r[profile.len() - 1]);
        let steps = ((inputs.xmax - inputs.xmin) / inputs.dx + 1e-9).floor() as usize;
        let r: Vec<f64> = (0..=steps)
            .map(|i| inputs.xmin + i as f64 * inputs.dx)
            .filter(|&x| x >= lo && x <= hi)
            .collect();
        if r.is_empty() {
            return Err(AppError::Model(format!(
                "calculation range {}..{} does not overlap the profile ({lo}..{hi})",
                inputs.xmin, inputs.xmax
            )));
        }
        let y = r.iter().map(|&x| interpolate(&profile.r, &profile.g, x)).collect();

        let mut refinable: Vec<usize> = (0..PDF_PARAMETERS.len()).collect();
        for name in &inputs.remove_vars {
            let Some(idx) = parameter_index(name) else {
                let hints = close_matches(name, PDF_PARAMETERS, 3);
                return Err(AppError::Validation(format!(
                    "cannot remove unknown parameter '{name}'{}",
                    if hints.is_empty() {
                        String::new()
                    } else {
                        format!(" (did you mean {}?)", hints.join(", "))
                    }
                )));
            };
            refinable.retain(|&i| i != idx);
        }

        let bound = Bound::new(
            r,
            y,
            inputs.structure.lattice,
            inputs.structure.a,
            inputs.qmax,
        );

        self.values = [1.0, 0.0, 0.0, 0.0, 0.0, inputs.structure.a, inputs.structure.uiso];
        self.refinable = refinable;
        self.snapshots.clear();
        debug!(
            points = bound.r.len(),
            shells = bound.kernel.shells.len(),
            structure = %inputs.structure,
            "PDF model loaded"
        );
        self.bound = Some(Arc::new(bound));
        Ok(())
    }

    fn parameter_names(&self) -> Vec<String> {
        self.refinable
            .iter()
            .map(|&i| PDF_PARAMETERS[i].to_string())
            .collect()
    }

    fn apply_payload(&mut self, payload: &Payload) {
        for (name, &value) in payload {
            let Some(idx) = parameter_index(name) else {
                continue;
            };
            if self.refinable.contains(&idx) && value.is_finite() {
                self.values[idx] = value;
            }
        }

        // A carried lattice constant outside the fit box moves the box with it.
        let a = self.values[A];
        let Some(bound) = &self.bound else {
            return;
        };
        let (_, hi) = bound.bounds(A);
        if a > 0.0 && (!bound.kernel.covers(a) || a > hi) {
            debug!(a, a0 = bound.a0, "lattice constant outside the fit box; rebuilding shells");
            let recentred = Arc::new(bound.recentred(a));
            self.bound = Some(recentred);
        }
    }

    fn get_payload(&self) -> Payload {
        self.refinable
            .iter()
            .map(|&i| (PDF_PARAMETERS[i].to_string(), self.values[i]))
            .collect()
    }

    fn run_action(&mut self, action: &Action) -> Result<FitOutcome, AppError> {
        let bound = Arc::clone(self.bound()?);

        if action.is_noop() {
            self.record_snapshots(&bound);
            let cost = half_norm_sq(&bound.residuals(&self.values));
            return Ok(FitOutcome {
                freed: Vec::new(),
                cost_before: cost,
                cost_after: cost,
                iterations: 0,
            });
        }

        action.validate(&self.parameter_names())?;

        let freed: Vec<usize> = if action.frees_all() {
            self.refinable.clone()
        } else {
            action
                .items()
                .iter()
                .filter_map(|item| match item {
                    ActionItem::Param(name) => parameter_index(name),
                    ActionItem::All => None,
                })
                .collect()
        };

        let x0: Vec<f64> = freed.iter().map(|&i| self.values[i]).collect();
        let bounds: Vec<(f64, f64)> = freed.iter().map(|&i| bound.bounds(i)).collect();
        let base = self.values;
        let result = levenberg_marquardt(
            |x: &[f64]| {
                let mut v = base;
                for (k, &i) in freed.iter().enumerate() {
                    v[i] = x[k];
                }
                bound.residuals(&v)
            },
            &x0,
            &bounds,
            &self.options,
        )?;

        // Parameters outside `freed` never left `base`: they stay fixed.
        for (k, &i) in freed.iter().enumerate() {
            self.values[i] = result.x[k];
        }
        self.record_snapshots(&bound);

        let freed: Vec<String> = freed.iter().map(|&i| PDF_PARAMETERS[i].to_string()).collect();
        debug!(
            freed = %freed.join(","),
            cost_before = result.cost_initial,
            cost_after = result.cost,
            clamped = result.clamped,
            iterations = result.iterations,
            converged = result.converged,
            "fit step finished"
        );
        Ok(FitOutcome {
            freed,
            cost_before: result.cost_initial,
            cost_after: result.cost,
            iterations: result.iterations,
        })
    }

    fn cost(&self) -> f64 {
        match &self.bound {
            Some(bound) => half_norm_sq(&bound.residuals(&self.values)),
            None => f64::NAN,
        }
    }

    fn clone_model(&self) -> Box<dyn FitModel> {
        Box::new(self.clone())
    }

    fn snapshot(&self, name: &str) -> Option<Vec<f64>> {
        self.snapshots.get(name).cloned()
    }
}

/// Builds loaded `PdfModel`s.
#[derive(Debug, Clone, Default)]
pub struct PdfModelFactory {
    pub options: LmOptions,
}

impl ModelFactory for PdfModelFactory {
    fn build(&self, inputs: &FitInputs) -> Result<Box<dyn FitModel>, AppError> {
        let mut model = PdfModel::with_options(self.options.clone());
        model.load_inputs(inputs)?;
        Ok(Box::new(model))
    }
}

/// Evaluate the model for `structure` at `payload` on an arbitrary grid.
///
/// Parameters missing from `payload` take the structure defaults.
pub fn simulate(
    structure: &StructureSpec,
    payload: &Payload,
    r: &[f64],
    qmax: f64,
) -> Result<Vec<f64>, AppError> {
    structure.validate()?;
    if r.iter().any(|&x| !(x > 0.0)) {
        return Err(AppError::Config("simulation grid must be positive".into()));
    }
    if !(qmax > 0.0) {
        return Err(AppError::Config(format!("qmax must be positive, got {qmax}")));
    }
    let mut values: Values = [1.0, 0.0, 0.0, 0.0, 0.0, structure.a, structure.uiso];
    for (name, &value) in payload {
        if let Some(idx) = parameter_index(name) {
            values[idx] = value;
        }
    }
    if !(values[A] > 0.0) {
        return Err(AppError::Config(format!(
            "lattice constant must be positive, got {}",
            values[A]
        )));
    }
    let max_r = r.iter().copied().fold(0.0, f64::max);
    let kernel = Kernel::new(structure.lattice, values[A], max_r, qmax);
    Ok(kernel.evaluate(&values, r))
}
