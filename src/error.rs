//! Error taxonomy shared by the graph, the scheduler and the front-ends.
//!
//! Every variant maps to a stable process exit code so the `refine` binary can
//! report failures to shell scripts without parsing messages.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Cycle, unknown node, duplicate id or malformed strategy.
    #[error("topology error: {0}")]
    Topology(String),

    /// A strategy or payload names something the fit model does not know.
    #[error("validation error: {0}")]
    Validation(String),

    /// A run was started without the state it needs (inputs, seed payload, prepared graph).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Invalid runtime-state transition inside the executor.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// The fit model or its solver failed.
    #[error("model error: {0}")]
    Model(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Io { .. } | AppError::Json(_) => 3,
            AppError::Topology(_) | AppError::Validation(_) | AppError::Precondition(_) => 4,
            AppError::Model(_) => 5,
            AppError::Scheduling(_) => 6,
        }
    }
}
