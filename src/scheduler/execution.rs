//! One run of a prepared graph, stepped wave by wave.
//!
//! Each step executes every ready node in stable order, then hands payloads
//! and models to successors. A successor becomes ready once it holds both.
//!
//! Model hand-off at a node with several receivers:
//!
//! - receivers sharing the node's dataset get clones, except the first one,
//!   which gets the live instance after all clones are taken
//! - receivers on another dataset get a fresh model built from their own
//!   root inputs
//! - a node with no receivers drops its model

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::domain::{NodeStatus, RuntimeTag};
use crate::error::AppError;
use crate::graph::node::lock;
use crate::graph::{RefinementGraph, RefinementNode, Routes};
use crate::model::FitModel;
use crate::scheduler::{RunReport, Scheduler, StepRecord};

pub struct Execution<'g> {
    scheduler: &'g Scheduler,
    graph: &'g RefinementGraph,
    routes: &'g Routes,
    ready: Vec<usize>,
    iterations: usize,
    /// Upper bound on steps; a well-formed graph needs at most `len()`.
    pub(crate) cap: usize,
    stopped_before: Option<String>,
    cap_exceeded: bool,
    steps: Vec<StepRecord>,
    started: Instant,
}

impl<'g> Execution<'g> {
    /// Validate preconditions, build one model per root and seed the roots.
    ///
    /// Nothing is marked unless every root builds and every action names
    /// parameters its dataset's model can refine.
    pub(crate) fn start(
        scheduler: &'g Scheduler,
        graph: &'g RefinementGraph,
    ) -> Result<Self, AppError> {
        let routes = graph.routes.as_ref().ok_or_else(|| {
            AppError::Precondition("graph must be prepared before it is run".into())
        })?;
        if graph.is_empty() {
            return Err(AppError::Precondition("graph has no nodes".into()));
        }
        if let Some(node) = graph.nodes.iter().find(|n| n.status() != NodeStatus::Pending) {
            return Err(AppError::Precondition(format!(
                "node '{}' is already {:?}; run a clean copy instead",
                node.name,
                node.status()
            )));
        }

        let mut roots = Vec::new();
        for (idx, node) in graph.nodes.iter().enumerate() {
            if !graph.in_edges[idx].is_empty() {
                continue;
            }
            let Some(inputs) = node.inputs.as_deref() else {
                return Err(AppError::Precondition(format!(
                    "root '{}' has no inputs attached",
                    node.name
                )));
            };
            let Some(seed) = node.seed.as_ref() else {
                return Err(AppError::Precondition(format!(
                    "root '{}' has no starting payload",
                    node.name
                )));
            };
            roots.push((idx, inputs, seed));
        }

        let mut seeded = Vec::with_capacity(roots.len());
        for (root, inputs, seed) in roots {
            let model = scheduler.factory.build(inputs)?;
            let known = model.parameter_names();
            for (idx, node) in graph.nodes.iter().enumerate() {
                if routes.input_source[idx] != root {
                    continue;
                }
                node.action.validate(&known).map_err(|err| match err {
                    AppError::Validation(msg) => {
                        AppError::Validation(format!("node '{}': {msg}", node.name))
                    }
                    other => other,
                })?;
            }
            seeded.push((root, model, seed.clone()));
        }

        let mut ready = Vec::with_capacity(seeded.len());
        for (root, model, seed) in seeded {
            let cell = &graph.nodes[root].cell;
            {
                let mut buffer = lock(&cell.buffer);
                buffer.model = Some(model);
                buffer.payload = Some(seed);
            }
            cell.mark(RuntimeTag::HasPayload)?;
            cell.mark(RuntimeTag::HasAdapter)?;
            ready.push(root);
        }

        info!(roots = ready.len(), nodes = graph.len(), "run seeded");

        Ok(Self {
            scheduler,
            graph,
            routes,
            ready,
            iterations: 0,
            cap: graph.len() + 1,
            stopped_before: None,
            cap_exceeded: false,
            steps: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Nodes that will run on the next step.
    pub fn ready(&self) -> Vec<&'g RefinementNode> {
        self.ready.iter().map(|&i| &self.graph.nodes[i]).collect()
    }

    /// Run one wavefront. Returns `false` once nothing is left to run.
    pub fn step(&mut self) -> Result<bool, AppError> {
        if self.ready.is_empty() {
            return Ok(false);
        }
        if self.iterations >= self.cap {
            warn!(
                iterations = self.iterations,
                cap = self.cap,
                ready = %self.names(&self.ready),
                "iteration cap reached; stopping with a partial graph"
            );
            self.cap_exceeded = true;
            self.ready.clear();
            return Ok(false);
        }
        if let Some(stop) = self.scheduler.config.stop_before.as_deref() {
            let graph = self.graph;
            let hit = self
                .ready
                .iter()
                .map(|&i| &graph.nodes[i])
                .find(|n| n.name == stop || n.id.as_str() == stop);
            if let Some(node) = hit {
                info!(node = %node.name, "stopping before requested node");
                self.stopped_before = Some(node.name.clone());
                self.ready.clear();
                return Ok(false);
            }
        }

        self.iterations += 1;
        let wave = std::mem::take(&mut self.ready);
        let mut next = Vec::new();
        for idx in wave {
            let model = self.run_node(idx)?;
            self.hand_off(idx, model, &mut next)?;
        }

        let mut seen = HashSet::new();
        next.retain(|i| seen.insert(*i));

        let finished = self.graph.nodes_marked(NodeStatus::Completed).len();
        info!(
            iteration = self.iterations,
            finished,
            total = self.graph.len(),
            next = %self.names(&next),
            "wavefront done"
        );
        self.ready = next;
        Ok(!self.ready.is_empty())
    }

    fn run_node(&mut self, idx: usize) -> Result<Box<dyn FitModel>, AppError> {
        let graph = self.graph;
        let node = &graph.nodes[idx];
        let (model, payload) = {
            let mut buffer = lock(&node.cell.buffer);
            (buffer.model.take(), buffer.payload.take())
        };
        let (Some(mut model), Some(payload)) = (model, payload) else {
            node.cell.mark(RuntimeTag::Failed)?;
            return Err(AppError::Scheduling(format!(
                "node '{}' was scheduled without a model and payload",
                node.name
            )));
        };

        model.apply_payload(&payload);
        let outcome = match model.run_action(&node.action) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(node = %node.name, error = %err, "refinement step failed");
                {
                    let mut buffer = lock(&node.cell.buffer);
                    buffer.model = Some(model);
                    buffer.payload = Some(payload);
                }
                if let Err(mark_err) = node.cell.mark(RuntimeTag::Failed) {
                    warn!(node = %node.name, error = %mark_err, "could not mark node failed");
                }
                return Err(err);
            }
        };

        node.cell.publish(model.get_payload())?;
        node.cell.mark(RuntimeTag::Completed)?;
        debug!(
            node = %node.name,
            freed = %outcome.freed.join(","),
            cost_before = outcome.cost_before,
            cost_after = outcome.cost_after,
            "node completed"
        );
        self.steps.push(StepRecord {
            node: node.name.clone(),
            action: node.action.label(),
            freed: outcome.freed,
            cost_before: outcome.cost_before,
            cost_after: outcome.cost_after,
            iterations: outcome.iterations,
        });

        if let Some(sink) = self.scheduler.sink.as_deref() {
            let pushed = sink.collect(graph, node, Some(model.as_ref()));
            let pause = self.scheduler.config.sample_yield;
            if pushed > 0 && !pause.is_zero() {
                thread::sleep(pause);
            }
        }
        Ok(model)
    }

    /// Give payloads and models to the successors that take their payload
    /// from `idx`, and queue the ones that became ready.
    fn hand_off(
        &self,
        idx: usize,
        model: Box<dyn FitModel>,
        next: &mut Vec<usize>,
    ) -> Result<(), AppError> {
        let graph = self.graph;
        let routes = self.routes;
        let parent = &graph.nodes[idx];
        let Some(parent_payload) = parent.cell.completed_payload() else {
            return Err(AppError::Scheduling(format!(
                "node '{}' has no completed payload to hand off",
                parent.name
            )));
        };

        let receivers: Vec<(usize, usize)> = graph.out_edges[idx]
            .iter()
            .map(|&e| (e, graph.edges[e].target))
            .filter(|&(_, t)| routes.payload_source[t] == Some(idx))
            .collect();
        if receivers.is_empty() {
            debug!(node = %parent.name, "no receivers; model dropped");
            return Ok(());
        }

        for &(edge, target) in &receivers {
            let cell = &graph.nodes[target].cell;
            {
                let mut buffer = lock(&cell.buffer);
                let payload = graph.edges[edge]
                    .propagate
                    .apply(parent_payload, buffer.payload.as_ref());
                buffer.payload = Some(payload);
            }
            cell.mark(RuntimeTag::HasPayload)?;
        }

        let lineage = routes.input_source[idx];
        let live_to = receivers
            .iter()
            .position(|&(_, t)| routes.input_source[t] == lineage);
        let mut models: Vec<Option<Box<dyn FitModel>>> = Vec::with_capacity(receivers.len());
        for (k, &(_, target)) in receivers.iter().enumerate() {
            if Some(k) == live_to {
                models.push(None);
            } else if routes.input_source[target] == lineage {
                models.push(Some(model.clone_model()));
            } else {
                models.push(Some(self.fresh_model(target)?));
            }
        }
        if let Some(k) = live_to {
            models[k] = Some(model);
        }

        for (&(_, target), model) in receivers.iter().zip(models) {
            let node = &graph.nodes[target];
            lock(&node.cell.buffer).model = model;
            if node.cell.mark(RuntimeTag::HasAdapter)? == NodeStatus::Initialized {
                next.push(target);
            }
        }
        Ok(())
    }

    fn fresh_model(&self, target: usize) -> Result<Box<dyn FitModel>, AppError> {
        let root = &self.graph.nodes[self.routes.input_source[target]];
        let inputs = root.inputs.as_deref().ok_or_else(|| {
            AppError::Precondition(format!("root '{}' has no inputs attached", root.name))
        })?;
        debug!(
            node = %self.graph.nodes[target].name,
            root = %root.name,
            "building a fresh model for a new dataset"
        );
        self.scheduler.factory.build(inputs)
    }

    fn names(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .map(|&i| self.graph.nodes[i].name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn finish(self) -> RunReport {
        let total = self.graph.len();
        let completed = self.graph.nodes_marked(NodeStatus::Completed).len();
        let stalled: Vec<String> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.status() != NodeStatus::Completed)
            .map(|n| n.name.clone())
            .collect();
        let elapsed = self.started.elapsed();

        if !stalled.is_empty() && self.stopped_before.is_none() {
            warn!(
                completed,
                total,
                stalled = %stalled.join(", "),
                "run ended before every node completed"
            );
        }
        info!(
            iterations = self.iterations,
            completed,
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "run finished"
        );

        RunReport {
            iterations: self.iterations,
            completed,
            total,
            stalled,
            stopped_before: self.stopped_before,
            cap_exceeded: self.cap_exceeded,
            elapsed,
            steps: self.steps,
        }
    }
}
