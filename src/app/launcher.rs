//! Sequential refinement over a folder of temperature-indexed profiles.
//!
//! For each new `<n>K.gr` file, in index order:
//!
//! - clean-copy the template graph with fresh ids
//! - attach the profile and the carried payload to every root
//! - run the scheduler on a worker thread while the monitor drains the
//!   observation sink on the calling thread
//! - carry the payload of the last node (topological order) to the next file
//! - dump the run graph to `<dump>/<prefix>_<stem>.json`, append a summary row
//!   and rewrite the carried payload file
//!
//! With `watch` set the folder is polled forever; there is no cancellation
//! other than ending the process.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{Payload, PlotStyle, UpdateMode};
use crate::error::AppError;
use crate::graph::{CopyOptions, RefinementGraph};
use crate::io::{
    ProfileEntry, ProfileQueue, SummaryRow, read_profile, write_payload_json, write_summary_csv,
};
use crate::model::{FitInputs, Lattice, ModelFactory, PdfModelFactory, Profile, StructureSpec};
use crate::observe::{Monitor, ObservationSink, Watch, WindowId, node_named, on_path};
use crate::report::format_run_summary;
use crate::scheduler::{RunReport, Scheduler, SchedulerConfig};

/// Calculation settings shared by every profile of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct InputOptions {
    pub xmin: f64,
    pub xmax: f64,
    pub dx: f64,
    pub qmin: f64,
    pub qmax: f64,
    pub remove_vars: Vec<String>,
}

impl Default for InputOptions {
    fn default() -> Self {
        let base = FitInputs::new(Profile::default(), StructureSpec::new(Lattice::Fcc, 1.0));
        Self {
            xmin: base.xmin,
            xmax: base.xmax,
            dx: base.dx,
            qmin: base.qmin,
            qmax: base.qmax,
            remove_vars: Vec::new(),
        }
    }
}

impl InputOptions {
    pub fn build(&self, profile: Profile, structure: StructureSpec) -> FitInputs {
        FitInputs {
            profile,
            structure,
            xmin: self.xmin,
            xmax: self.xmax,
            dx: self.dx,
            qmin: self.qmin,
            qmax: self.qmax,
            remove_vars: self.remove_vars.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub profile_folder: PathBuf,
    pub structure: StructureSpec,
    pub initial_payload: Payload,
    pub dump_folder: PathBuf,
    pub dump_prefix: String,
    /// Summary CSV, rewritten after every profile.
    pub summary: Option<PathBuf>,
    /// Payload to carry into the next profile, rewritten after every profile.
    /// Feeding it back through `--payload` resumes a stopped sequence.
    pub carried_payload: Option<PathBuf>,
    pub inputs: InputOptions,
    pub scheduler: SchedulerConfig,
    pub watch: bool,
    pub poll_interval: Duration,
    pub refresh: Duration,
    pub plot_width: usize,
    pub plot_height: usize,
}

impl LauncherConfig {
    pub fn new(
        profile_folder: impl Into<PathBuf>,
        structure: StructureSpec,
        initial_payload: Payload,
        dump_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            profile_folder: profile_folder.into(),
            structure,
            initial_payload,
            dump_folder: dump_folder.into(),
            dump_prefix: "fit_results".into(),
            summary: None,
            carried_payload: None,
            inputs: InputOptions::default(),
            scheduler: SchedulerConfig::default(),
            watch: false,
            poll_interval: Duration::from_millis(500),
            refresh: Duration::from_millis(100),
            plot_width: 72,
            plot_height: 14,
        }
    }
}

pub struct Launcher {
    config: LauncherConfig,
    template: RefinementGraph,
    factory: Arc<dyn ModelFactory>,
    sink: Arc<ObservationSink>,
    monitor: Monitor,
    last_payload: Option<Payload>,
    rows: Vec<SummaryRow>,
}

impl Launcher {
    pub fn new(config: LauncherConfig, template: RefinementGraph) -> Self {
        Self::with_sink(config, template, ObservationSink::new())
    }

    pub fn with_sink(config: LauncherConfig, template: RefinementGraph, sink: ObservationSink) -> Self {
        let sink = Arc::new(sink);
        let monitor = Monitor::new(Arc::clone(&sink)).with_size(config.plot_width, config.plot_height);
        Self {
            config,
            template,
            factory: Arc::new(PdfModelFactory::default()),
            sink,
            monitor,
            last_payload: None,
            rows: Vec::new(),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ModelFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Plot payload parameter `pname` each time the node named `node` completes.
    pub fn watch_stable(&self, pname: &str, node: &str) -> WindowId {
        self.sink.watch(
            Watch::payload(pname)
                .when(node_named(node))
                .mode(UpdateMode::Append)
                .style(PlotStyle::Sparse)
                .titled(format!("{pname} @ {node}")),
        )
    }

    /// Plot payload parameter `pname` along one lineage, from `start` to `end`.
    pub fn watch_path(&self, pname: &str, start: &str, end: &str) -> WindowId {
        self.sink.watch(
            Watch::payload(pname)
                .when(on_path(start, end))
                .mode(UpdateMode::Append)
                .style(PlotStyle::Sparse)
                .titled(format!("{pname} @ {start}..{end}")),
        )
    }

    /// Plot model snapshot `pname` after every node, for diagnostics.
    pub fn watch_intermediate(&self, pname: &str, mode: UpdateMode) -> WindowId {
        self.sink
            .watch(Watch::snapshot(pname).mode(mode).style(PlotStyle::Dense))
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Payload that will seed the next profile.
    pub fn next_seed(&self) -> &Payload {
        self.last_payload.as_ref().unwrap_or(&self.config.initial_payload)
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    /// Process every profile in the folder; with `watch`, keep polling.
    /// Returns the number of profiles processed.
    pub fn launch<W: Write>(&mut self, out: &mut W) -> Result<usize, AppError> {
        let mut queue = ProfileQueue::new(&self.config.profile_folder);
        loop {
            for entry in queue.poll()? {
                self.run_profile(&entry, out)?;
                queue.mark_finished(&entry);
                info!(
                    profile = %entry.stem(),
                    finished = queue.finished(),
                    "finished fit task"
                );
            }
            if !self.config.watch {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }
        if queue.finished() == 0 {
            warn!(
                folder = %self.config.profile_folder.display(),
                "no <n>K.gr profiles found"
            );
        }
        Ok(queue.finished())
    }

    /// Refine one profile with a fresh copy of the template.
    pub fn run_profile<W: Write>(
        &mut self,
        entry: &ProfileEntry,
        out: &mut W,
    ) -> Result<RunReport, AppError> {
        let profile = read_profile(&entry.path)?;
        let inputs = self.config.inputs.build(profile, self.config.structure.clone());
        let seed = self.next_seed().clone();

        let mut graph = self.template.clean_copy(CopyOptions {
            fresh_ids: true,
            with_payload: false,
        });
        let roots: Vec<String> = graph
            .root_nodes()
            .iter()
            .map(|n| n.id().as_str().to_string())
            .collect();
        for root in &roots {
            graph.attach_root(root, inputs.clone(), seed.clone())?;
        }
        graph.prepare()?;
        let graph = Arc::new(graph);

        info!(profile = %entry.stem(), nodes = graph.len(), "starting run");
        let scheduler = Scheduler::from_shared(Arc::clone(&self.factory))
            .with_sink(Arc::clone(&self.sink))
            .with_config(self.config.scheduler.clone());
        let worker_graph = Arc::clone(&graph);
        let handle = thread::Builder::new()
            .name(format!("refine-{}", entry.stem()))
            .spawn(move || scheduler.run(&worker_graph))
            .map_err(|e| AppError::Scheduling(format!("failed to start worker thread: {e}")))?;

        self.monitor
            .run_until(self.config.refresh, || handle.is_finished(), out)
            .map_err(|e| AppError::io("<output>", e))?;
        let report = handle
            .join()
            .map_err(|_| AppError::Scheduling("worker thread panicked".into()))??;

        let order = graph.topological_order()?;
        match order.last().and_then(|n| n.completed_payload()) {
            Some(payload) => self.last_payload = Some(payload.clone()),
            None => warn!(
                profile = %entry.stem(),
                "last node did not complete; carrying the previous payload"
            ),
        }

        let dump = self
            .config
            .dump_folder
            .join(format!("{}_{}.json", self.config.dump_prefix, entry.stem()));
        graph.to_json(&dump)?;

        self.rows.push(SummaryRow {
            finished_at: Utc::now(),
            profile: entry.stem(),
            index: entry.index,
            completed: report.completed,
            total: report.total,
            iterations: report.iterations,
            elapsed_ms: report.elapsed.as_millis() as u64,
            final_cost: report.steps.last().map(|s| s.cost_after),
            payload: self.next_seed().clone(),
        });
        if let Some(path) = &self.config.summary {
            write_summary_csv(path, &self.rows)?;
        }
        if let Some(path) = &self.config.carried_payload {
            write_payload_json(path, self.next_seed())?;
        }

        writeln!(out, "{}", format_run_summary(&entry.stem(), &report))
            .map_err(|e| AppError::io("<output>", e))?;
        Ok(report)
    }
}
