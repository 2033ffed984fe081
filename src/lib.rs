//! `pdf-refine` library crate.
//!
//! Incremental PDF structure refinement: a strategy is a DAG of fit steps,
//! each freeing a few parameters, executed wavefront by wavefront while
//! payloads and fitted models flow along the edges.
//!
//! The binary (`refine`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the graph, scheduler and sink can be driven from other front-ends

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod graph;
pub mod io;
pub mod math;
pub mod model;
pub mod observe;
pub mod plot;
pub mod report;
pub mod scheduler;
