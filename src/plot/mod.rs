//! Terminal plots of observed parameter trajectories and model curves.

pub mod ascii;

pub use ascii::*;
