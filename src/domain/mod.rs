//! Domain types used throughout the refinement engine.
//!
//! This module defines:
//!
//! - parameter payloads and node identifiers (`Payload`, `NodeId`)
//! - refinement actions (`Action`, `ActionItem`)
//! - runtime status tags and the node state machine (`RuntimeTag`, `NodeStatus`)
//! - observation and source-resolution policies
//! - the parameter slot vocabulary and "did you mean" hints (`params`)

pub mod params;
pub mod types;

pub use types::*;
