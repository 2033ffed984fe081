//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - initialises logging
//! - parses CLI arguments and environment defaults
//! - builds the template graph
//! - runs the launcher, prints graphs or writes synthetic data

use std::io::{self, Write};
use std::time::Duration;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GraphArgs, GraphSource, PolicyArgs, RunArgs, SimulateArgs};
use crate::config::EnvConfig;
use crate::data::synthetic::{SyntheticSpec, reference_payload, temperature_series};
use crate::domain::{GraphPolicy, Payload};
use crate::error::AppError;
use crate::graph::RefinementGraph;
use crate::io::{read_payload_json, write_profile};
use crate::observe::ObservationSink;
use crate::report::{format_graph, format_payload};
use crate::scheduler::SchedulerConfig;

pub mod launcher;

pub use launcher::{InputOptions, Launcher, LauncherConfig};

/// Node watched by `--watch-stable` when none is given.
const DEFAULT_STABLE_NODE: &str = "all";

/// Entry point for the `refine` binary.
pub fn run() -> Result<(), AppError> {
    init_tracing();
    let cli = Cli::parse_from(std::env::args());

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Graph(args) => handle_graph(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let env = EnvConfig::from_env()?;
    let template = load_template(&args.source, &args.policy)?;
    let initial_payload = starting_payload(&template, &args)?;

    let mut config = LauncherConfig::new(
        &args.profiles,
        args.structure.clone(),
        initial_payload,
        &args.dump,
    );
    config.dump_prefix = args.prefix.clone();
    config.summary = Some(
        args.summary
            .clone()
            .unwrap_or_else(|| args.dump.join(format!("{}_summary.csv", args.prefix))),
    );
    config.carried_payload = Some(args.dump.join(format!("{}_payload.json", args.prefix)));
    config.inputs = InputOptions {
        xmin: args.xmin,
        xmax: args.xmax,
        qmax: args.qmax,
        remove_vars: args.remove_vars.clone(),
        ..InputOptions::default()
    };
    config.scheduler = SchedulerConfig {
        stop_before: args.stop_before.clone(),
        ..SchedulerConfig::default()
    };
    config.watch = args.watch;
    config.poll_interval = args
        .poll_ms
        .map(Duration::from_millis)
        .unwrap_or(env.poll_interval);
    config.refresh = args
        .refresh_ms
        .map(Duration::from_millis)
        .unwrap_or(env.refresh);
    config.plot_width = args.width;
    config.plot_height = args.height;

    let sink = match args.max_queue.or(env.max_queue) {
        Some(n) if n > 0 => ObservationSink::new().with_max_queue(n),
        _ => ObservationSink::new(),
    };
    let mut launcher = Launcher::with_sink(config, template, sink);
    for spec in &args.watch_stable {
        let (pname, node) = spec.split_once('@').unwrap_or((spec.as_str(), DEFAULT_STABLE_NODE));
        launcher.watch_stable(pname, node);
    }
    for watch in &args.watch_path {
        launcher.watch_path(&watch.parameter, &watch.start, &watch.end);
    }
    for pname in &args.watch_intermediate {
        launcher.watch_intermediate(pname, args.intermediate_mode);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let processed = launcher.launch(&mut out)?;
    writeln!(out, "Processed {processed} profile(s). Final payload:")
        .and_then(|_| write!(out, "{}", format_payload(launcher.next_seed())))
        .map_err(|e| AppError::io("<stdout>", e))?;
    Ok(())
}

fn handle_graph(args: GraphArgs) -> Result<(), AppError> {
    let graph = load_template(&args.source, &args.policy)?;
    println!("{}", format_graph(&graph)?);
    if let Some(path) = &args.export {
        graph.to_json(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let mut truth = reference_payload();
    truth.insert("a".into(), args.structure.a);
    let spec = SyntheticSpec {
        structure: args.structure.clone(),
        truth,
        rmin: args.rmin,
        rmax: args.rmax,
        dr: args.dr,
        noise: args.noise,
        seed: args.seed,
        ..SyntheticSpec::default()
    };

    let series = temperature_series(&spec, &args.temperatures, args.base_temperature, args.expansion)?;
    for (t, profile) in series {
        let path = args.out.join(format!("{}_{t}K.gr", args.prefix));
        let header = vec![
            format!("synthetic {} profile at {t} K", spec.structure),
            format!("noise sigma {} seed {}", spec.noise, spec.seed),
        ];
        write_profile(&path, &profile, &header)?;
        println!("Wrote {} ({} points)", path.display(), profile.len());
    }
    Ok(())
}

/// Build and prepare the template graph from a strategy or a document.
pub fn load_template(source: &GraphSource, policy: &PolicyArgs) -> Result<RefinementGraph, AppError> {
    let mut graph = match (&source.strategy, &source.graph_file) {
        (Some(strategy), _) => RefinementGraph::build_linear(strategy)?,
        (None, Some(path)) => RefinementGraph::from_json(path)?,
        (None, None) => {
            return Err(AppError::Config("either --strategy or --graph is required".into()));
        }
    };
    graph.set_policy(GraphPolicy {
        root_tie_break: policy.root_order,
        payload_source: policy.payload_source,
    });
    graph.prepare()?;
    Ok(graph)
}

/// Template root seed, overlaid by `--payload`, overlaid by `--set`.
fn starting_payload(template: &RefinementGraph, args: &RunArgs) -> Result<Payload, AppError> {
    let mut payload = template
        .root_nodes()
        .first()
        .and_then(|root| root.seed_payload().cloned())
        .unwrap_or_default();
    if let Some(path) = &args.payload {
        payload.extend(read_payload_json(path)?);
    }
    payload.extend(args.set.iter().cloned());
    if payload.is_empty() {
        warn!("no starting payload given; every parameter starts from the structure defaults");
    }
    Ok(payload)
}
