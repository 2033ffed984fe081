//! Wavefront executor for prepared refinement graphs.
//!
//! - `Scheduler`: factory + optional observation sink + run settings
//! - `Execution`: a single run, stepped one wavefront at a time
//! - `RunReport`: what happened (completed/stalled nodes, per-step costs)
//!
//! `Scheduler::run` borrows the graph immutably. Runtime state lives in each
//! node's cell, so the graph stays readable from other threads (monitors,
//! sinks) while a run is in progress.

pub mod execution;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::graph::RefinementGraph;
use crate::model::ModelFactory;
use crate::observe::ObservationSink;

pub use execution::Execution;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Pause after a node pushed samples, giving a monitor time to draw.
    pub sample_yield: Duration,
    /// Stop once a node with this name (or id) becomes ready.
    pub stop_before: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_yield: Duration::from_millis(50),
            stop_before: None,
        }
    }
}

/// Record of one executed node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub node: String,
    pub action: String,
    pub freed: Vec<String>,
    pub cost_before: f64,
    pub cost_after: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Wavefronts executed.
    pub iterations: usize,
    pub completed: usize,
    pub total: usize,
    /// Names of nodes that did not complete, in insertion order.
    pub stalled: Vec<String>,
    pub stopped_before: Option<String>,
    pub cap_exceeded: bool,
    pub elapsed: Duration,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

pub struct Scheduler {
    pub(crate) factory: Arc<dyn ModelFactory>,
    pub(crate) sink: Option<Arc<ObservationSink>>,
    pub(crate) config: SchedulerConfig,
}

impl Scheduler {
    pub fn new<F>(factory: F) -> Self
    where
        F: ModelFactory + 'static,
    {
        Self::from_shared(Arc::new(factory))
    }

    pub fn from_shared(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            factory,
            sink: None,
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<ObservationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Seed `graph` and return an execution to step manually.
    pub fn start<'g>(&'g self, graph: &'g RefinementGraph) -> Result<Execution<'g>, AppError> {
        Execution::start(self, graph)
    }

    /// Run `graph` until no node is ready.
    ///
    /// A graph in which some nodes never become ready is not an error: the
    /// run ends and the report lists them as stalled. Validation and model
    /// errors abort the run and leave the graph as it was at that point.
    pub fn run(&self, graph: &RefinementGraph) -> Result<RunReport, AppError> {
        let mut execution = self.start(graph)?;
        while execution.step()? {}
        Ok(execution.finish())
    }
}
