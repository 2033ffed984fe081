//! Observation sink: captures watched values while a graph runs.
//!
//! Producer side (scheduler worker thread):
//! - `collect` is called once per completed node; one pass evaluates every
//!   registered watch and pushes samples onto per-window queues
//!
//! Consumer side (any other thread, typically the `Monitor`):
//! - `windows` lists the registered plots
//! - `drain` empties one window's queue
//!
//! Queues are unbounded unless `max_queue` is set, in which case the oldest
//! sample is dropped. The sink never blocks on a consumer.

pub mod monitor;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use crate::domain::{NodeId, PlotStyle, SampleSource, UpdateMode};
use crate::graph::node::lock;
use crate::graph::{RefinementGraph, RefinementNode};
use crate::model::FitModel;

pub use monitor::Monitor;

/// Predicate evaluated right after a node completes.
pub type Trigger = Arc<dyn Fn(&RefinementGraph, &RefinementNode) -> bool + Send + Sync>;

/// Fire after every node.
pub fn always() -> Trigger {
    Arc::new(|_: &RefinementGraph, _: &RefinementNode| true)
}

/// Fire only after the node with this name.
pub fn node_named(name: impl Into<String>) -> Trigger {
    let name = name.into();
    Arc::new(move |_: &RefinementGraph, node: &RefinementNode| node.name() == name)
}

/// Fire only after leaf nodes (the end of each lineage).
pub fn leaves_only() -> Trigger {
    Arc::new(|graph: &RefinementGraph, node: &RefinementNode| {
        graph.successors(node.id()).is_empty()
    })
}

/// Fire only after nodes on some path from `start` to `end`, both included.
/// Either end is looked up by name, then by id; an unknown end never fires.
pub fn on_path(start: impl Into<String>, end: impl Into<String>) -> Trigger {
    let (start, end) = (start.into(), end.into());
    Arc::new(move |graph: &RefinementGraph, node: &RefinementNode| {
        let (Some(from), Some(to)) = (graph.resolve(&start), graph.resolve(&end)) else {
            return false;
        };
        graph.reaches(from.id(), node.id()) && graph.reaches(node.id(), to.id())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WindowId(u64);

impl WindowId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One registered channel: when to sample, what, and how a plot shows it.
#[derive(Clone)]
pub struct Watch {
    pub trigger: Trigger,
    pub parameter: String,
    pub source: SampleSource,
    pub update_mode: UpdateMode,
    pub title: Option<String>,
    pub style: PlotStyle,
    /// Existing window to feed; a fresh one is allocated when `None`.
    pub window: Option<WindowId>,
}

impl Watch {
    /// Track a payload parameter across nodes, one point per completed node.
    pub fn payload(parameter: impl Into<String>) -> Self {
        Self {
            trigger: always(),
            parameter: parameter.into(),
            source: SampleSource::Payload,
            update_mode: UpdateMode::Append,
            title: None,
            style: PlotStyle::Sparse,
            window: None,
        }
    }

    /// Show the latest array the model recorded under `name`.
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            trigger: always(),
            parameter: name.into(),
            source: SampleSource::Snapshot,
            update_mode: UpdateMode::Replace,
            title: None,
            style: PlotStyle::Dense,
            window: None,
        }
    }

    pub fn when(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn style(mut self, style: PlotStyle) -> Self {
        self.style = style;
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn in_window(mut self, window: WindowId) -> Self {
        self.window = Some(window);
        self
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("parameter", &self.parameter)
            .field("source", &self.source)
            .field("update_mode", &self.update_mode)
            .field("title", &self.title)
            .field("style", &self.style)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Scalar(f64),
    Series(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub node: NodeId,
    pub node_name: String,
    pub parameter: String,
    pub value: SampleValue,
}

/// Display hints for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub update_mode: UpdateMode,
    pub style: PlotStyle,
    pub parameters: Vec<String>,
}

struct Channel {
    info: WindowInfo,
    queue: VecDeque<Sample>,
}

pub struct ObservationSink {
    watches: Mutex<Vec<(WindowId, Watch)>>,
    channels: Mutex<BTreeMap<WindowId, Channel>>,
    next_window: AtomicU64,
    max_queue: Option<usize>,
    dropped: AtomicU64,
}

impl Default for ObservationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationSink {
    pub fn new() -> Self {
        Self {
            watches: Mutex::new(Vec::new()),
            channels: Mutex::new(BTreeMap::new()),
            next_window: AtomicU64::new(1),
            max_queue: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Bound every window's queue; the oldest sample is dropped on overflow.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = Some(max_queue.max(1));
        self
    }

    /// Register a watch and return the window it feeds.
    pub fn watch(&self, watch: Watch) -> WindowId {
        let id = watch
            .window
            .unwrap_or_else(|| WindowId(self.next_window.fetch_add(1, Ordering::Relaxed)));

        {
            let mut channels = lock(&self.channels);
            let channel = channels.entry(id).or_insert_with(|| Channel {
                info: WindowInfo {
                    id,
                    title: watch.title.clone().unwrap_or_else(|| watch.parameter.clone()),
                    update_mode: watch.update_mode,
                    style: watch.style,
                    parameters: Vec::new(),
                },
                queue: VecDeque::new(),
            });
            if !channel.info.parameters.contains(&watch.parameter) {
                channel.info.parameters.push(watch.parameter.clone());
            }
        }

        lock(&self.watches).push((id, watch));
        id
    }

    pub fn has_watches(&self) -> bool {
        !lock(&self.watches).is_empty()
    }

    /// Evaluate every watch for a just-completed node. Returns the number of
    /// samples pushed.
    pub fn collect(
        &self,
        graph: &RefinementGraph,
        node: &RefinementNode,
        model: Option<&dyn FitModel>,
    ) -> usize {
        let watches: Vec<(WindowId, Watch)> = lock(&self.watches).clone();
        let mut samples = Vec::new();

        for (window, watch) in &watches {
            if !(watch.trigger)(graph, node) {
                continue;
            }
            let value = match watch.source {
                SampleSource::Payload => node
                    .completed_payload()
                    .and_then(|p| p.get(&watch.parameter))
                    .map(|&v| SampleValue::Scalar(v)),
                SampleSource::Snapshot => model
                    .and_then(|m| m.snapshot(&watch.parameter))
                    .map(SampleValue::Series),
            };
            let Some(value) = value else {
                warn!(
                    parameter = %watch.parameter,
                    source = ?watch.source,
                    node = %node.name(),
                    "watched value not available; skipping sample"
                );
                continue;
            };
            samples.push((
                *window,
                Sample {
                    node: node.id().clone(),
                    node_name: node.name().to_string(),
                    parameter: watch.parameter.clone(),
                    value,
                },
            ));
        }

        let pushed = samples.len();
        if pushed > 0 {
            let mut channels = lock(&self.channels);
            for (window, sample) in samples {
                let Some(channel) = channels.get_mut(&window) else {
                    continue;
                };
                channel.queue.push_back(sample);
                if let Some(max) = self.max_queue {
                    while channel.queue.len() > max {
                        channel.queue.pop_front();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        pushed
    }

    /// Take every queued sample of `window`, oldest first.
    pub fn drain(&self, window: WindowId) -> Vec<Sample> {
        lock(&self.channels)
            .get_mut(&window)
            .map(|c| c.queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, window: WindowId) -> usize {
        lock(&self.channels).get(&window).map_or(0, |c| c.queue.len())
    }

    pub fn windows(&self) -> Vec<WindowInfo> {
        lock(&self.channels).values().map(|c| c.info.clone()).collect()
    }

    /// Samples discarded because a queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, RuntimeTag};
    use crate::model::testing::TargetModel;

    fn completed_chain() -> RefinementGraph {
        let graph = RefinementGraph::build_linear("a->scale").unwrap();
        for (i, node) in graph.nodes().enumerate() {
            graph.mark(node.id(), RuntimeTag::HasPayload).unwrap();
            graph.mark(node.id(), RuntimeTag::HasAdapter).unwrap();
            node.cell
                .publish(Payload::from([("a".into(), 3.5 + i as f64)]))
                .unwrap();
            graph.mark(node.id(), RuntimeTag::Completed).unwrap();
        }
        graph
    }

    #[test]
    fn payload_watch_appends_one_sample_per_trigger() {
        let graph = completed_chain();
        let sink = ObservationSink::new();
        let w = sink.watch(Watch::payload("a"));
        for node in graph.nodes() {
            sink.collect(&graph, node, None);
        }
        let samples = sink.drain(w);
        let values: Vec<f64> = samples
            .iter()
            .map(|s| match s.value {
                SampleValue::Scalar(v) => v,
                SampleValue::Series(_) => f64::NAN,
            })
            .collect();
        assert_eq!(values, vec![3.5, 4.5, 5.5]);
        assert_eq!(samples[1].node_name, "a");
        assert!(sink.drain(w).is_empty());
    }

    #[test]
    fn trigger_filters_nodes_and_windows_can_be_shared() {
        let graph = completed_chain();
        let sink = ObservationSink::new();
        let shared = sink.watch(Watch::payload("a").when(node_named("scale")).titled("lattice"));
        let again = sink.watch(Watch::payload("a").when(leaves_only()).in_window(shared));
        assert_eq!(shared, again);
        let windows = sink.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].title, "lattice");

        for node in graph.nodes() {
            sink.collect(&graph, node, None);
        }
        // `scale` is both named and the leaf: two watches fire once each.
        assert_eq!(sink.pending(shared), 2);
    }

    #[test]
    fn path_trigger_skips_side_branches() {
        let mut graph = RefinementGraph::build_linear("a->scale->all").unwrap();
        let a = graph.node_by_name("a").unwrap().id().clone();
        let side = graph.add_node(crate::domain::Action::parse("qdamp"));
        graph.add_edge(&a, &side).unwrap();
        graph.prepare().unwrap();

        let fires = |trigger: Trigger| -> Vec<String> {
            graph
                .nodes()
                .filter(|n| trigger(&graph, *n))
                .map(|n| n.name().to_string())
                .collect()
        };
        assert_eq!(fires(on_path("a", "all")), vec!["a", "scale", "all"]);
        assert_eq!(fires(on_path("start", "qdamp")), vec!["start", "a", "qdamp"]);
        assert!(fires(on_path("scale", "qdamp")).is_empty());
        assert!(fires(on_path("a", "missing")).is_empty());
    }

    #[test]
    fn missing_values_are_skipped() {
        let graph = completed_chain();
        let sink = ObservationSink::new();
        let w = sink.watch(Watch::payload("qdamp"));
        let s = sink.watch(Watch::snapshot("ycalc_0"));
        let leaf = graph.leaf_nodes()[0];
        assert_eq!(sink.collect(&graph, leaf, None), 0);
        assert_eq!(sink.pending(w), 0);
        assert_eq!(sink.pending(s), 0);
    }

    #[test]
    fn snapshot_watch_reads_the_model() {
        let graph = completed_chain();
        let sink = ObservationSink::new();
        let w = sink.watch(Watch::snapshot("ydiff_0"));
        let mut model = TargetModel::new(Payload::from([("a".into(), 1.0)]));
        model.run_action(&crate::domain::Action::parse("a")).unwrap();
        let leaf = graph.leaf_nodes()[0];
        assert_eq!(sink.collect(&graph, leaf, Some(&model as &dyn FitModel)), 1);
        assert_eq!(sink.drain(w)[0].value, SampleValue::Series(vec![0.0]));
    }

    #[test]
    fn bounded_queue_drops_oldest() {
        let graph = completed_chain();
        let sink = ObservationSink::new().with_max_queue(2);
        let w = sink.watch(Watch::payload("a"));
        for node in graph.nodes() {
            sink.collect(&graph, node, None);
        }
        assert_eq!(sink.dropped(), 1);
        let names: Vec<String> = sink.drain(w).into_iter().map(|s| s.node_name).collect();
        assert_eq!(names, vec!["a", "scale"]);
    }
}
