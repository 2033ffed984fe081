//! Fit model capability consumed by the scheduler.
//!
//! The scheduler never looks inside a model. It only needs to:
//!
//! - build one from a root's `FitInputs` (through a `ModelFactory`)
//! - push a payload in, run an action, read the payload back out
//! - clone it at branch points
//! - read optional array snapshots for the observation sink
//!
//! `PdfModel` is the bundled implementation.

pub mod pdf;
pub mod structure;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};

use crate::domain::{Action, Payload};
use crate::error::AppError;

pub use pdf::{PdfModel, PdfModelFactory};
pub use structure::{Lattice, StructureSpec};

/// Observed profile: `g[i]` measured at radius `r[i]` (ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Profile {
    pub r: Vec<f64>,
    pub g: Vec<f64>,
}

impl Profile {
    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
}

/// Everything needed to construct a model for one dataset.
///
/// Attached to root nodes only; every other node inherits its root's inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInputs {
    pub profile: Profile,
    pub structure: StructureSpec,
    pub xmin: f64,
    pub xmax: f64,
    pub dx: f64,
    pub qmin: f64,
    pub qmax: f64,
    /// Parameters removed from the refinable set.
    #[serde(default)]
    pub remove_vars: Vec<String>,
}

impl FitInputs {
    /// Inputs with the calculation range used by the bundled launcher.
    pub fn new(profile: Profile, structure: StructureSpec) -> Self {
        Self {
            profile,
            structure,
            xmin: 1.5,
            xmax: 15.0,
            dx: 0.01,
            qmin: 0.5,
            qmax: 25.0,
            remove_vars: Vec::new(),
        }
    }
}

/// Summary of one `run_action` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Parameters that were freed for this step (empty for a no-op).
    pub freed: Vec<String>,
    pub cost_before: f64,
    pub cost_after: f64,
    pub iterations: usize,
}

/// A numerical model bound to one dataset and one structure.
///
/// Implementations must be cheap to clone relative to `load_inputs`.
pub trait FitModel: Send {
    /// Bind a dataset and structure. Resets parameter values to the
    /// structure defaults.
    fn load_inputs(&mut self, inputs: &FitInputs) -> Result<(), AppError>;

    /// Names a strategy may free on this model.
    fn parameter_names(&self) -> Vec<String>;

    /// Set the named parameters. Names the model does not know are ignored.
    fn apply_payload(&mut self, payload: &Payload);

    /// Current values of every refinable parameter.
    fn get_payload(&self) -> Payload;

    /// Free the action's parameters, run one bounded fit, fix them again.
    fn run_action(&mut self, action: &Action) -> Result<FitOutcome, AppError>;

    /// Half the sum of squared residuals at the current values.
    fn cost(&self) -> f64;

    /// Independent instance with the same inputs and current values.
    fn clone_model(&self) -> Box<dyn FitModel>;

    /// Array captured at the last fit (e.g. `ycalc_0`), if the model records it.
    fn snapshot(&self, name: &str) -> Option<Vec<f64>>;
}

/// Builds loaded models from root inputs.
pub trait ModelFactory: Send + Sync {
    fn build(&self, inputs: &FitInputs) -> Result<Box<dyn FitModel>, AppError>;
}

impl<F> ModelFactory for F
where
    F: Fn(&FitInputs) -> Result<Box<dyn FitModel>, AppError> + Send + Sync,
{
    fn build(&self, inputs: &FitInputs) -> Result<Box<dyn FitModel>, AppError> {
        self(inputs)
    }
}
