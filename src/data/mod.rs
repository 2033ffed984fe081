//! Data sources.
//!
//! - seeded synthetic PDF profiles (`synthetic`)

pub mod synthetic;

pub use synthetic::*;
