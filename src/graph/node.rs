//! Nodes, edges and per-node runtime state.
//!
//! Topology fields are immutable once a graph is handed to the scheduler. The
//! runtime state lives in a `NodeCell`:
//!
//! - `status` is published atomically, so readers never take a lock to learn
//!   whether a node has completed
//! - the completed payload sits in a `OnceLock`, written once just before the
//!   node is marked `Completed`; a reader that saw `Completed` sees the payload
//! - every write (tag log, buffer) goes through a mutex

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::domain::{Action, NodeId, NodeStatus, Payload, RuntimeTag};
use crate::error::AppError;
use crate::model::{FitInputs, FitModel};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transient execution state: the attached model and the payload to apply
/// before the node runs.
#[derive(Default)]
pub(crate) struct NodeBuffer {
    pub(crate) model: Option<Box<dyn FitModel>>,
    pub(crate) payload: Option<Payload>,
}

pub(crate) struct NodeCell {
    status: AtomicU8,
    log: Mutex<Vec<RuntimeTag>>,
    pub(crate) buffer: Mutex<NodeBuffer>,
    payload: OnceLock<Payload>,
}

impl Default for NodeCell {
    fn default() -> Self {
        Self {
            status: AtomicU8::new(NodeStatus::Pending.to_u8()),
            log: Mutex::new(Vec::new()),
            buffer: Mutex::new(NodeBuffer::default()),
            payload: OnceLock::new(),
        }
    }
}

impl NodeCell {
    pub(crate) fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Append `tag` and publish the resulting status.
    pub(crate) fn mark(&self, tag: RuntimeTag) -> Result<NodeStatus, AppError> {
        let mut log = lock(&self.log);
        let current = self.status();
        let next = current.advance(tag).ok_or_else(|| {
            AppError::Scheduling(format!("cannot apply {tag:?} to a node that is {current:?}"))
        })?;
        log.push(tag);
        self.status.store(next.to_u8(), Ordering::Release);
        Ok(next)
    }

    pub(crate) fn tags(&self) -> Vec<RuntimeTag> {
        lock(&self.log).clone()
    }

    pub(crate) fn publish(&self, payload: Payload) -> Result<(), AppError> {
        self.payload
            .set(payload)
            .map_err(|_| AppError::Scheduling("node payload was already published".into()))
    }

    pub(crate) fn completed_payload(&self) -> Option<&Payload> {
        if self.status() == NodeStatus::Completed {
            self.payload.get()
        } else {
            None
        }
    }
}

/// One refinement step.
pub struct RefinementNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) action: Action,
    pub(crate) inputs: Option<Arc<FitInputs>>,
    pub(crate) seed: Option<Payload>,
    pub(crate) cell: NodeCell,
}

impl RefinementNode {
    pub(crate) fn new(id: NodeId, name: String, action: Action) -> Self {
        Self {
            id,
            name,
            action,
            inputs: None,
            seed: None,
            cell: NodeCell::default(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Dataset bound to this node (roots only).
    pub fn inputs(&self) -> Option<&FitInputs> {
        self.inputs.as_deref()
    }

    /// Starting payload for roots, or a payload carried over from a template.
    pub fn seed_payload(&self) -> Option<&Payload> {
        self.seed.as_ref()
    }

    pub fn status(&self) -> NodeStatus {
        self.cell.status()
    }

    pub fn is_marked(&self, status: NodeStatus) -> bool {
        self.cell.status() == status
    }

    /// Ordered history of runtime tags.
    pub fn tags(&self) -> Vec<RuntimeTag> {
        self.cell.tags()
    }

    /// Fitted payload; `None` until the node is `Completed`. Lock-free.
    pub fn completed_payload(&self) -> Option<&Payload> {
        self.cell.completed_payload()
    }

    /// Copy of the payload waiting to be applied before this node runs.
    pub fn buffered_payload(&self) -> Option<Payload> {
        lock(&self.cell.buffer).payload.clone()
    }

    pub fn has_model(&self) -> bool {
        lock(&self.cell.buffer).model.is_some()
    }
}

impl fmt::Debug for RefinementNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefinementNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("action", &self.action.label())
            .field("status", &self.status())
            .finish()
    }
}

/// Custom aggregation: `(parent payload, child's buffered payload) -> new payload`.
pub type PropagateFn = dyn Fn(&Payload, Option<&Payload>) -> Payload + Send + Sync;

/// How an edge turns a parent's payload into its child's buffered payload.
#[derive(Clone, Default)]
pub enum Propagate {
    /// Deep copy of the parent payload.
    #[default]
    Copy,
    Custom(Arc<PropagateFn>),
}

impl Propagate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Payload, Option<&Payload>) -> Payload + Send + Sync + 'static,
    {
        Propagate::Custom(Arc::new(f))
    }

    pub fn apply(&self, parent: &Payload, current: Option<&Payload>) -> Payload {
        match self {
            Propagate::Copy => parent.clone(),
            Propagate::Custom(f) => f(parent, current),
        }
    }
}

impl fmt::Debug for Propagate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagate::Copy => f.write_str("Copy"),
            Propagate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinementEdge {
    pub(crate) source: usize,
    pub(crate) target: usize,
    pub(crate) propagate: Propagate,
}

impl RefinementEdge {
    pub fn propagate(&self) -> &Propagate {
        &self.propagate
    }
}
