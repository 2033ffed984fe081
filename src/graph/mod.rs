//! Refinement graph: a DAG of refinement steps.
//!
//! Building blocks:
//!
//! - `node`: nodes, edges and the per-node runtime cell
//! - `build`: linear strategies, merging templates, clean copies
//! - `topology`: `prepare()` (cycle check, levels, input/payload sources)
//! - `persist`: JSON graph documents
//!
//! Topology changes only through `&mut self` methods, so a graph shared with
//! the scheduler (`&RefinementGraph`) cannot change shape mid-run. Every
//! mutation drops the prepared routes; call `prepare()` again before running.

pub mod build;
pub mod node;
pub mod persist;
pub mod topology;

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Action, GraphPolicy, NodeId, NodeStatus, Payload, RuntimeTag};
use crate::error::AppError;
use crate::model::FitInputs;

pub use build::CopyOptions;
pub use node::{Propagate, PropagateFn, RefinementEdge, RefinementNode};
pub use persist::{EdgeRecord, GraphDocument, NodeRecord};
pub(crate) use topology::Routes;

/// Name given to the synthetic first node of a linear strategy.
pub const START_NODE: &str = "start";

#[derive(Debug, Default)]
pub struct RefinementGraph {
    pub(crate) nodes: Vec<RefinementNode>,
    pub(crate) edges: Vec<RefinementEdge>,
    index: HashMap<NodeId, usize>,
    names: HashMap<String, usize>,
    /// Outgoing edge indices per node, in insertion order.
    pub(crate) out_edges: Vec<Vec<usize>>,
    /// Incoming edge indices per node, in insertion order.
    pub(crate) in_edges: Vec<Vec<usize>>,
    policy: GraphPolicy,
    pub(crate) routes: Option<Routes>,
}

impl RefinementGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: GraphPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> GraphPolicy {
        self.policy
    }

    /// Change the source-resolution policy. Requires a new `prepare()`.
    pub fn set_policy(&mut self, policy: GraphPolicy) {
        self.policy = policy;
        self.routes = None;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_prepared(&self) -> bool {
        self.routes.is_some()
    }

    // ---- builders ------------------------------------------------------

    /// Add a node with a fresh id, named after its action.
    pub fn add_node(&mut self, action: Action) -> NodeId {
        let name = self.unique_name(&default_name(&action));
        let id = NodeId::fresh();
        self.insert_node(RefinementNode::new(id.clone(), name, action));
        id
    }

    /// Add a node with caller-chosen id and/or name. A taken name is suffixed.
    pub fn add_node_with(
        &mut self,
        id: Option<NodeId>,
        name: Option<&str>,
        action: Action,
    ) -> Result<NodeId, AppError> {
        let id = id.unwrap_or_else(NodeId::fresh);
        if self.index.contains_key(&id) {
            return Err(AppError::Topology(format!("duplicate node id '{id}'")));
        }
        let base = match name {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => default_name(&action),
        };
        let name = self.unique_name(&base);
        self.insert_node(RefinementNode::new(id.clone(), name, action));
        Ok(id)
    }

    pub fn add_edge(&mut self, source: &NodeId, target: &NodeId) -> Result<(), AppError> {
        self.add_edge_with(source, target, Propagate::Copy)
    }

    pub fn add_edge_with(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        propagate: Propagate,
    ) -> Result<(), AppError> {
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        if s == t {
            return Err(AppError::Topology(format!("self loop on node '{}'", self.nodes[s].name)));
        }
        if self.out_edges[s].iter().any(|&e| self.edges[e].target == t) {
            return Err(AppError::Topology(format!(
                "duplicate edge '{}' -> '{}'",
                self.nodes[s].name, self.nodes[t].name
            )));
        }
        self.push_edge(s, t, propagate);
        Ok(())
    }

    /// Bind a root's dataset and starting payload.
    pub fn attach_root(
        &mut self,
        node: &str,
        inputs: FitInputs,
        seed: Payload,
    ) -> Result<(), AppError> {
        let idx = self.resolve_index(node)?;
        if !self.in_edges[idx].is_empty() {
            return Err(AppError::Topology(format!(
                "'{}' is not a root node; only roots carry inputs",
                self.nodes[idx].name
            )));
        }
        let node = &mut self.nodes[idx];
        node.inputs = Some(Arc::new(inputs));
        node.seed = Some(seed);
        Ok(())
    }

    pub(crate) fn insert_node(&mut self, node: RefinementNode) -> usize {
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.names.insert(node.name.clone(), idx);
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.routes = None;
        idx
    }

    pub(crate) fn push_edge(&mut self, source: usize, target: usize, propagate: Propagate) {
        let e = self.edges.len();
        self.edges.push(RefinementEdge {
            source,
            target,
            propagate,
        });
        self.out_edges[source].push(e);
        self.in_edges[target].push(e);
        self.routes = None;
    }

    pub(crate) fn unique_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    // ---- queries -------------------------------------------------------

    pub fn nodes(&self) -> impl Iterator<Item = &RefinementNode> {
        self.nodes.iter()
    }

    /// `(source, target)` id pairs in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.edges
            .iter()
            .map(|e| (&self.nodes[e.source].id, &self.nodes[e.target].id))
    }

    pub fn node(&self, id: &NodeId) -> Option<&RefinementNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_by_name(&self, name: &str) -> Option<&RefinementNode> {
        self.names.get(name).map(|&i| &self.nodes[i])
    }

    /// Look a node up by name first, then by id.
    pub fn resolve(&self, name_or_id: &str) -> Option<&RefinementNode> {
        self.resolve_index(name_or_id).ok().map(|i| &self.nodes[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn root_nodes(&self) -> Vec<&RefinementNode> {
        (0..self.nodes.len())
            .filter(|&i| self.in_edges[i].is_empty())
            .map(|i| &self.nodes[i])
            .collect()
    }

    pub fn leaf_nodes(&self) -> Vec<&RefinementNode> {
        (0..self.nodes.len())
            .filter(|&i| self.out_edges[i].is_empty())
            .map(|i| &self.nodes[i])
            .collect()
    }

    pub fn successors(&self, id: &NodeId) -> Vec<&RefinementNode> {
        self.index
            .get(id)
            .map(|&i| {
                self.out_edges[i]
                    .iter()
                    .map(|&e| &self.nodes[self.edges[e].target])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn predecessors(&self, id: &NodeId) -> Vec<&RefinementNode> {
        self.index
            .get(id)
            .map(|&i| {
                self.in_edges[i]
                    .iter()
                    .map(|&e| &self.nodes[self.edges[e].source])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `to` is `from` or one of its descendants.
    pub fn reaches(&self, from: &NodeId, to: &NodeId) -> bool {
        let (Some(&start), Some(&goal)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if i == goal {
                return true;
            }
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            stack.extend(self.out_edges[i].iter().map(|&e| self.edges[e].target));
        }
        false
    }

    /// Distance from the nearest root. `None` until prepared.
    pub fn level(&self, id: &NodeId) -> Option<usize> {
        let routes = self.routes.as_ref()?;
        self.index.get(id).map(|&i| routes.level[i])
    }

    /// Root whose dataset this node's model is built from. `None` until prepared.
    pub fn input_source(&self, id: &NodeId) -> Option<&RefinementNode> {
        let routes = self.routes.as_ref()?;
        let &i = self.index.get(id)?;
        Some(&self.nodes[routes.input_source[i]])
    }

    /// Predecessor whose payload this node inherits. `None` for roots and
    /// until prepared.
    pub fn payload_source(&self, id: &NodeId) -> Option<&RefinementNode> {
        let routes = self.routes.as_ref()?;
        let &i = self.index.get(id)?;
        routes.payload_source[i].map(|p| &self.nodes[p])
    }

    // ---- runtime state -------------------------------------------------

    /// Append a runtime tag to a node's log.
    pub fn mark(&self, id: &NodeId, tag: RuntimeTag) -> Result<NodeStatus, AppError> {
        let i = self.index_of(id)?;
        self.nodes[i].cell.mark(tag)
    }

    pub fn is_marked(&self, id: &NodeId, status: NodeStatus) -> bool {
        self.node(id).is_some_and(|n| n.is_marked(status))
    }

    /// Nodes that have reached `status`, in insertion order.
    pub fn nodes_marked(&self, status: NodeStatus) -> Vec<&RefinementNode> {
        self.nodes.iter().filter(|n| n.is_marked(status)).collect()
    }

    // ---- index helpers -------------------------------------------------

    pub(crate) fn index_of(&self, id: &NodeId) -> Result<usize, AppError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AppError::Topology(format!("unknown node id '{id}'")))
    }

    pub(crate) fn resolve_index(&self, name_or_id: &str) -> Result<usize, AppError> {
        self.names
            .get(name_or_id)
            .or_else(|| self.index.get(&NodeId::from(name_or_id)))
            .copied()
            .ok_or_else(|| AppError::Topology(format!("no node named or identified by '{name_or_id}'")))
    }
}

fn default_name(action: &Action) -> String {
    if action.is_noop() {
        START_NODE.to_string()
    } else {
        action.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> (RefinementGraph, Vec<NodeId>) {
        let mut graph = RefinementGraph::new();
        let ids: Vec<NodeId> = names
            .iter()
            .map(|n| {
                graph
                    .add_node_with(Some(NodeId::from(*n)), None, Action::parse(n))
                    .unwrap()
            })
            .collect();
        for pair in ids.windows(2) {
            graph.add_edge(&pair[0], &pair[1]).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn names_are_suffixed_on_collision() {
        let mut graph = RefinementGraph::new();
        graph.add_node(Action::parse("foo"));
        graph.add_node(Action::parse("foo"));
        graph.add_node(Action::parse("foo"));
        assert_eq!(graph.names(), vec!["foo", "foo_1", "foo_2"]);
    }

    #[test]
    fn reachability_follows_edge_direction() {
        let (mut graph, ids) = chain(&["a", "b", "c"]);
        let side = graph.add_node(Action::parse("d"));
        graph.add_edge(&ids[0], &side).unwrap();
        assert!(graph.reaches(&ids[0], &ids[2]));
        assert!(graph.reaches(&ids[1], &ids[1]));
        assert!(!graph.reaches(&ids[2], &ids[0]));
        assert!(!graph.reaches(&ids[1], &side));
        assert!(!graph.reaches(&ids[0], &NodeId::from("zzz")));
    }

    #[test]
    fn edge_errors() {
        let (mut graph, ids) = chain(&["a", "b"]);
        assert!(matches!(
            graph.add_edge(&ids[0], &ids[1]),
            Err(AppError::Topology(_))
        ));
        assert!(graph.add_edge(&ids[0], &ids[0]).is_err());
        assert!(graph.add_edge(&ids[0], &NodeId::from("zzz")).is_err());
        assert!(graph
            .add_node_with(Some(ids[0].clone()), None, Action::noop())
            .is_err());
    }

    #[test]
    fn roots_leaves_and_neighbours() {
        let (graph, ids) = chain(&["a", "b", "c"]);
        let roots: Vec<&str> = graph.root_nodes().iter().map(|n| n.name()).collect();
        let leaves: Vec<&str> = graph.leaf_nodes().iter().map(|n| n.name()).collect();
        assert_eq!(roots, vec!["a"]);
        assert_eq!(leaves, vec!["c"]);
        assert_eq!(graph.successors(&ids[1])[0].name(), "c");
        assert_eq!(graph.predecessors(&ids[1])[0].name(), "a");
        assert_eq!(graph.resolve("b").map(|n| n.id().clone()), Some(ids[1].clone()));
        assert_eq!(graph.resolve(ids[2].as_str()).map(|n| n.name()), Some("c"));
    }

    #[test]
    fn routes_unavailable_until_prepared() {
        let (mut graph, ids) = chain(&["a", "b"]);
        assert!(graph.level(&ids[1]).is_none());
        assert!(graph.input_source(&ids[1]).is_none());
        graph.prepare().unwrap();
        assert_eq!(graph.level(&ids[1]), Some(1));
        graph.add_node(Action::parse("c"));
        assert!(!graph.is_prepared());
        assert!(graph.payload_source(&ids[1]).is_none());
    }

    #[test]
    fn mark_follows_state_machine() {
        let (graph, ids) = chain(&["a", "b"]);
        assert!(graph.mark(&ids[0], RuntimeTag::Completed).is_err());
        graph.mark(&ids[0], RuntimeTag::HasPayload).unwrap();
        assert!(graph.is_marked(&ids[0], NodeStatus::HasPayload));
        graph.mark(&ids[0], RuntimeTag::HasAdapter).unwrap();
        assert!(graph.is_marked(&ids[0], NodeStatus::Initialized));
        assert_eq!(graph.nodes_marked(NodeStatus::Initialized).len(), 1);
        assert!(graph.is_marked(&ids[1], NodeStatus::Pending));
    }

    #[test]
    fn attach_root_rejects_inner_nodes() {
        use crate::model::{Lattice, Profile, StructureSpec};
        let (mut graph, _) = chain(&["a", "b"]);
        let inputs = FitInputs::new(Profile::default(), StructureSpec::new(Lattice::Fcc, 3.52));
        assert!(graph.attach_root("b", inputs.clone(), Payload::new()).is_err());
        graph.attach_root("a", inputs, Payload::from([("a".into(), 3.52)])).unwrap();
        let root = graph.node_by_name("a").unwrap();
        assert!(root.inputs().is_some());
        assert_eq!(root.seed_payload().map(|p| p["a"]), Some(3.52));
    }
}
