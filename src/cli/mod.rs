//! Command-line parsing for the sequential PDF refinement runner.
//!
//! The goal of this module is to keep **argument parsing** separate from
//! graph construction and execution (`app`).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{PayloadSourcePolicy, RootTieBreak, UpdateMode};
use crate::model::StructureSpec;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "refine",
    version,
    about = "Incremental PDF structure refinement over a graph of fit steps"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refine every `<n>K.gr` profile of a folder in temperature order,
    /// seeding each run with the previous result.
    Run(RunArgs),
    /// Print (and optionally export) a strategy graph without running it.
    Graph(GraphArgs),
    /// Write synthetic temperature-series profiles to a folder.
    Simulate(SimulateArgs),
}

/// Where the template graph comes from.
#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct GraphSource {
    /// Linear strategy, e.g. "a->scale->qdamp->Uiso_0->delta2->all".
    #[arg(long)]
    pub strategy: Option<String>,

    /// Graph JSON document (nodes + edges).
    #[arg(long = "graph", value_name = "JSON")]
    pub graph_file: Option<PathBuf>,
}

/// Source-resolution policies for `prepare()`.
#[derive(Debug, Args, Clone)]
pub struct PolicyArgs {
    /// Which predecessor supplies a node's payload.
    #[arg(long, value_enum, default_value_t = PayloadSourcePolicy::Nearest)]
    pub payload_source: PayloadSourcePolicy,

    /// Order in which roots claim nodes reachable from several roots.
    #[arg(long, value_enum, default_value_t = RootTieBreak::InsertionOrder)]
    pub root_order: RootTieBreak,
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Folder holding `<n>K.gr` profiles.
    #[arg(short = 'p', long, value_name = "DIR")]
    pub profiles: PathBuf,

    /// Structure as `<lattice>:<a>`, e.g. `fcc:3.52`.
    #[arg(short = 's', long, default_value = "fcc:3.52")]
    pub structure: StructureSpec,

    #[command(flatten)]
    pub source: GraphSource,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Starting payload as JSON (`{"a": 3.52, ...}`).
    #[arg(long, value_name = "JSON")]
    pub payload: Option<PathBuf>,

    /// Starting parameter value, `name=value` (repeatable; overrides --payload).
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, f64)>,

    /// Folder for per-profile graph dumps.
    #[arg(long, value_name = "DIR", default_value = "results")]
    pub dump: PathBuf,

    /// Dump file prefix: `<dump>/<prefix>_<stem>.json`.
    #[arg(long, default_value = "fit_results")]
    pub prefix: String,

    /// Summary CSV (defaults to `<dump>/<prefix>_summary.csv`).
    #[arg(long, value_name = "CSV")]
    pub summary: Option<PathBuf>,

    /// Keep polling the folder for new profiles.
    #[arg(long)]
    pub watch: bool,

    /// Folder poll interval in milliseconds (default from REFINE_POLL_MS).
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Monitor redraw interval in milliseconds (default from REFINE_REFRESH_MS).
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Per-window sample cap (default from REFINE_MAX_QUEUE).
    #[arg(long)]
    pub max_queue: Option<usize>,

    /// Plot a payload parameter at the named node, `pname[@node]` (node defaults to `all`).
    #[arg(long = "watch-stable", value_name = "PNAME[@NODE]")]
    pub watch_stable: Vec<String>,

    /// Plot a payload parameter along one lineage, `pname@start..end`.
    #[arg(long = "watch-path", value_name = "PNAME@START..END", value_parser = parse_path_watch)]
    pub watch_path: Vec<PathWatch>,

    /// Plot a model snapshot array after every node, e.g. `ycalc_0`.
    #[arg(long = "watch-intermediate", value_name = "NAME")]
    pub watch_intermediate: Vec<String>,

    /// How intermediate plots consume new arrays.
    #[arg(long, value_enum, default_value_t = UpdateMode::Replace)]
    pub intermediate_mode: UpdateMode,

    /// Stop each run before the named node.
    #[arg(long, value_name = "NODE")]
    pub stop_before: Option<String>,

    /// Lower end of the fit range.
    #[arg(long, default_value_t = 1.5)]
    pub xmin: f64,

    /// Upper end of the fit range.
    #[arg(long, default_value_t = 15.0)]
    pub xmax: f64,

    /// Maximum momentum transfer of the measurement.
    #[arg(long, default_value_t = 25.0)]
    pub qmax: f64,

    /// Parameter to exclude from refinement (repeatable).
    #[arg(long = "remove-var", value_name = "NAME")]
    pub remove_vars: Vec<String>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 72)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 14)]
    pub height: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct GraphArgs {
    #[command(flatten)]
    pub source: GraphSource,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Write the graph document to this path.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output folder.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub out: PathBuf,

    /// Structure used to generate the data, `<lattice>:<a>`.
    #[arg(short = 's', long, default_value = "fcc:3.54")]
    pub structure: StructureSpec,

    /// Temperatures in kelvin (comma separated).
    #[arg(long, value_delimiter = ',', default_value = "100,200,300")]
    pub temperatures: Vec<u32>,

    /// Reference temperature for thermal expansion.
    #[arg(long, default_value_t = 100)]
    pub base_temperature: u32,

    /// Linear expansion coefficient per kelvin.
    #[arg(long, default_value_t = 1.3e-5)]
    pub expansion: f64,

    /// Standard deviation of the added noise.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// File name prefix: `<prefix>_<T>K.gr`.
    #[arg(long, default_value = "sim")]
    pub prefix: String,

    #[arg(long, default_value_t = 1.0)]
    pub rmin: f64,

    #[arg(long, default_value_t = 20.0)]
    pub rmax: f64,

    #[arg(long, default_value_t = 0.01)]
    pub dr: f64,
}

/// Parsed `--watch-path` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWatch {
    pub parameter: String,
    pub start: String,
    pub end: String,
}

fn parse_path_watch(raw: &str) -> Result<PathWatch, String> {
    let malformed = || format!("expected PNAME@START..END, got '{raw}'");
    let (parameter, path) = raw.split_once('@').ok_or_else(malformed)?;
    let (start, end) = path.split_once("..").ok_or_else(malformed)?;
    let (parameter, start, end) = (parameter.trim(), start.trim(), end.trim());
    if parameter.is_empty() || start.is_empty() || end.is_empty() {
        return Err(malformed());
    }
    Ok(PathWatch {
        parameter: parameter.to_string(),
        start: start.to_string(),
        end: end.to_string(),
    })
}

fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.to_string(), value))
}
