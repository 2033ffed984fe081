//! Cheap deterministic model for executor and sink tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::{Action, ActionItem, Payload};
use crate::error::AppError;
use crate::model::{FitInputs, FitModel, FitOutcome, Lattice, Profile, StructureSpec};

/// Each freed parameter jumps straight to its target value.
#[derive(Debug, Clone)]
pub(crate) struct TargetModel {
    values: Payload,
    targets: Payload,
    snapshots: BTreeMap<String, Vec<f64>>,
    pub(crate) fail_on: Option<String>,
}

impl TargetModel {
    pub(crate) fn new(targets: Payload) -> Self {
        let values = targets.keys().map(|k| (k.clone(), 0.0)).collect();
        Self {
            values,
            targets,
            snapshots: BTreeMap::new(),
            fail_on: None,
        }
    }
}

impl FitModel for TargetModel {
    fn load_inputs(&mut self, _inputs: &FitInputs) -> Result<(), AppError> {
        Ok(())
    }

    fn parameter_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    fn apply_payload(&mut self, payload: &Payload) {
        for (k, v) in payload {
            if let Some(slot) = self.values.get_mut(k) {
                *slot = *v;
            }
        }
    }

    fn get_payload(&self) -> Payload {
        self.values.clone()
    }

    fn run_action(&mut self, action: &Action) -> Result<FitOutcome, AppError> {
        action.validate(&self.parameter_names())?;
        let before = self.cost();
        let freed: Vec<String> = if action.frees_all() {
            self.parameter_names()
        } else {
            action
                .items()
                .iter()
                .filter_map(|i| match i {
                    ActionItem::Param(n) => Some(n.clone()),
                    ActionItem::All => None,
                })
                .collect()
        };
        if let Some(bad) = &self.fail_on {
            if freed.contains(bad) {
                return Err(AppError::Model(format!("solver diverged on {bad}")));
            }
        }
        for name in &freed {
            self.values.insert(name.clone(), self.targets[name]);
        }
        let residual: Vec<f64> = self
            .values
            .iter()
            .map(|(k, v)| v - self.targets[k])
            .collect();
        self.snapshots.insert("ydiff_0".into(), residual);
        Ok(FitOutcome {
            freed,
            cost_before: before,
            cost_after: self.cost(),
            iterations: usize::from(!action.is_noop()),
        })
    }

    fn cost(&self) -> f64 {
        0.5 * self
            .values
            .iter()
            .map(|(k, v)| (v - self.targets[k]).powi(2))
            .sum::<f64>()
    }

    fn clone_model(&self) -> Box<dyn FitModel> {
        Box::new(self.clone())
    }

    fn snapshot(&self, name: &str) -> Option<Vec<f64>> {
        self.snapshots.get(name).cloned()
    }
}

/// Inputs carrying no data; `TargetModel` ignores them.
pub(crate) fn dummy_inputs() -> FitInputs {
    FitInputs::new(Profile::default(), StructureSpec::new(Lattice::Fcc, 3.52))
}

/// Factory closure plus a counter of how many models it built.
pub(crate) fn counting_factory(
    targets: Payload,
) -> (
    impl Fn(&FitInputs) -> Result<Box<dyn FitModel>, AppError> + Send + Sync + 'static,
    Arc<AtomicUsize>,
) {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let factory = move |_inputs: &FitInputs| -> Result<Box<dyn FitModel>, AppError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TargetModel::new(targets.clone())) as Box<dyn FitModel>)
    };
    (factory, built)
}
