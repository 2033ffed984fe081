//! Reporting utilities: run summaries, payload tables and graph listings.

pub mod format;

pub use format::*;
