//! Consumer side of the sink: drains windows on a tick and renders them.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::UpdateMode;
use crate::observe::{ObservationSink, SampleValue, WindowId, WindowInfo};
use crate::plot::{indexed, render_series};

/// Series kept per window in `Append` mode for snapshot arrays.
const MAX_OVERLAYS: usize = 4;

#[derive(Debug, Default)]
struct PlotState {
    /// Scalar history per parameter.
    points: BTreeMap<String, Vec<f64>>,
    /// Latest arrays, newest last.
    series: Vec<Vec<f64>>,
    last_node: Option<String>,
}

/// Drains every window of a sink and keeps what each plot needs.
pub struct Monitor {
    sink: Arc<ObservationSink>,
    plots: BTreeMap<WindowId, (WindowInfo, PlotState)>,
    width: usize,
    height: usize,
}

impl Monitor {
    pub fn new(sink: Arc<ObservationSink>) -> Self {
        Self {
            sink,
            plots: BTreeMap::new(),
            width: 60,
            height: 12,
        }
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Drain all windows once. Returns the number of samples consumed.
    pub fn poll(&mut self) -> usize {
        let mut consumed = 0;
        for info in self.sink.windows() {
            let samples = self.sink.drain(info.id);
            let entry = self
                .plots
                .entry(info.id)
                .or_insert_with(|| (info.clone(), PlotState::default()));
            entry.0 = info;
            let (info, state) = entry;

            for sample in samples {
                consumed += 1;
                state.last_node = Some(sample.node_name);
                match (sample.value, info.update_mode) {
                    (SampleValue::Scalar(v), UpdateMode::Append) => {
                        state.points.entry(sample.parameter).or_default().push(v);
                    }
                    (SampleValue::Scalar(v), UpdateMode::Replace) => {
                        state.points.insert(sample.parameter, vec![v]);
                    }
                    (SampleValue::Series(values), UpdateMode::Append) => {
                        state.series.push(values);
                        if state.series.len() > MAX_OVERLAYS {
                            state.series.remove(0);
                        }
                    }
                    (SampleValue::Series(values), UpdateMode::Replace) => {
                        state.series = vec![values];
                    }
                }
            }
        }
        consumed
    }

    /// Latest scalar history of `parameter` in `window`.
    pub fn history(&self, window: WindowId, parameter: &str) -> Option<&[f64]> {
        self.plots
            .get(&window)
            .and_then(|(_, s)| s.points.get(parameter))
            .map(Vec::as_slice)
    }

    /// Render every window that has data.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (info, state) in self.plots.values() {
            let mut series: Vec<Vec<(f64, f64)>> =
                state.points.values().map(|v| indexed(v)).collect();
            // Newest array first so it is drawn on top.
            series.extend(state.series.iter().rev().map(|v| indexed(v)));
            if series.is_empty() {
                continue;
            }
            let title = match &state.last_node {
                Some(node) => format!("{} {} (after {node})", info.id, info.title),
                None => format!("{} {}", info.id, info.title),
            };
            out.push_str(&render_series(&title, &series, info.style, self.width, self.height));
            out.push('\n');
        }
        out
    }

    /// Poll and redraw every `refresh` until `done()` turns true, then drain
    /// one last time so no sample produced before completion is lost.
    pub fn run_until<W, F>(&mut self, refresh: Duration, done: F, out: &mut W) -> std::io::Result<()>
    where
        W: Write,
        F: Fn() -> bool,
    {
        loop {
            let finished = done();
            if self.poll() > 0 {
                out.write_all(self.render().as_bytes())?;
                out.flush()?;
            }
            if finished {
                return Ok(());
            }
            std::thread::sleep(refresh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, RuntimeTag};
    use crate::graph::RefinementGraph;
    use crate::observe::Watch;

    fn graph_with_payloads(values: &[f64]) -> RefinementGraph {
        let strategy = vec!["a"; values.len() - 1].join("->");
        let graph = RefinementGraph::build_linear(&strategy).unwrap();
        for (node, &v) in graph.nodes().zip(values) {
            graph.mark(node.id(), RuntimeTag::HasPayload).unwrap();
            graph.mark(node.id(), RuntimeTag::HasAdapter).unwrap();
            node.cell.publish(Payload::from([("a".into(), v)])).unwrap();
            graph.mark(node.id(), RuntimeTag::Completed).unwrap();
        }
        graph
    }

    #[test]
    fn append_keeps_history_and_replace_keeps_latest() {
        let graph = graph_with_payloads(&[1.0, 2.0, 3.0]);
        let sink = Arc::new(ObservationSink::new());
        let append = sink.watch(Watch::payload("a"));
        let replace = sink.watch(Watch::payload("a").mode(UpdateMode::Replace));
        for node in graph.nodes() {
            sink.collect(&graph, node, None);
        }

        let mut monitor = Monitor::new(Arc::clone(&sink)).with_size(20, 6);
        assert_eq!(monitor.poll(), 6);
        assert_eq!(monitor.history(append, "a"), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(monitor.history(replace, "a"), Some(&[3.0][..]));
        assert_eq!(monitor.poll(), 0);

        let text = monitor.render();
        assert!(text.contains("#1 a (after a_1)"), "{text}");
    }

    #[test]
    fn run_until_drains_after_completion() {
        let graph = graph_with_payloads(&[1.0, 2.0]);
        let sink = Arc::new(ObservationSink::new());
        let w = sink.watch(Watch::payload("a"));
        for node in graph.nodes() {
            sink.collect(&graph, node, None);
        }
        let mut monitor = Monitor::new(Arc::clone(&sink));
        let mut out = Vec::new();
        monitor
            .run_until(Duration::from_millis(1), || true, &mut out)
            .unwrap();
        assert_eq!(monitor.history(w, "a"), Some(&[1.0, 2.0][..]));
        assert!(!out.is_empty());
    }
}
