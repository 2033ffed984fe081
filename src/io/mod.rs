//! Input/output helpers.
//!
//! - `.gr` profile read/write (`profile`)
//! - temperature-ordered profile discovery (`discover`)
//! - summary CSV and payload JSON (`export`)

pub mod discover;
pub mod export;
pub mod profile;

pub use discover::*;
pub use export::*;
pub use profile::*;
