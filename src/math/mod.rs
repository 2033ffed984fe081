//! Numerical utilities: linear least squares and the bounded nonlinear solver.

pub mod lm;
pub mod ols;

pub use lm::*;
pub use ols::*;
