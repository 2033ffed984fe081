//! Cycle check, levels and source routing.
//!
//! `prepare()` computes, for every node:
//!
//! - `level`: BFS distance from the nearest root
//! - `input_source`: the root that reached it first in a multi-source BFS;
//!   roots are enqueued in `RootTieBreak` order, so equal-distance ties go
//!   to the earlier root
//! - `payload_source`: the predecessor with the lowest level (or highest,
//!   under `PayloadSourcePolicy::Furthest`); ties go to the earliest edge

use std::collections::VecDeque;

use tracing::debug;

use crate::domain::{PayloadSourcePolicy, RootTieBreak};
use crate::error::AppError;
use crate::graph::{RefinementGraph, RefinementNode};

/// Precomputed routing tables, indexed by node position.
#[derive(Debug, Clone)]
pub(crate) struct Routes {
    pub(crate) level: Vec<usize>,
    pub(crate) input_source: Vec<usize>,
    pub(crate) payload_source: Vec<Option<usize>>,
    pub(crate) order: Vec<usize>,
}

impl RefinementGraph {
    /// Validate the topology and compute levels and source maps.
    pub fn prepare(&mut self) -> Result<(), AppError> {
        let order = self.kahn_order()?;
        let n = self.nodes.len();

        let mut roots: Vec<usize> = (0..n).filter(|&i| self.in_edges[i].is_empty()).collect();
        if n > 0 && roots.is_empty() {
            return Err(AppError::Topology("graph has no root node".into()));
        }
        if self.policy().root_tie_break == RootTieBreak::Name {
            roots.sort_by(|&a, &b| self.nodes[a].name.cmp(&self.nodes[b].name));
        }

        let mut level = vec![usize::MAX; n];
        let mut input_source = vec![usize::MAX; n];
        let mut queue = VecDeque::new();
        for &r in &roots {
            level[r] = 0;
            input_source[r] = r;
            queue.push_back(r);
        }
        while let Some(i) = queue.pop_front() {
            for &e in &self.out_edges[i] {
                let t = self.edges[e].target;
                if level[t] == usize::MAX {
                    level[t] = level[i] + 1;
                    input_source[t] = input_source[i];
                    queue.push_back(t);
                }
            }
        }

        // In an acyclic graph every node descends from some root.
        if let Some(orphan) = (0..n).find(|&i| level[i] == usize::MAX) {
            return Err(AppError::Topology(format!(
                "node '{}' is not reachable from any root",
                self.nodes[orphan].name
            )));
        }

        let policy = self.policy().payload_source;
        let payload_source = (0..n)
            .map(|i| {
                let mut best: Option<usize> = None;
                for &e in &self.in_edges[i] {
                    let s = self.edges[e].source;
                    best = match best {
                        None => Some(s),
                        Some(b) => {
                            let better = match policy {
                                PayloadSourcePolicy::Nearest => level[s] < level[b],
                                PayloadSourcePolicy::Furthest => level[s] > level[b],
                            };
                            Some(if better { s } else { b })
                        }
                    };
                }
                best
            })
            .collect();

        debug!(nodes = n, roots = roots.len(), "graph prepared");
        self.routes = Some(Routes {
            level,
            input_source,
            payload_source,
            order,
        });
        Ok(())
    }

    /// Nodes in a deterministic topological order (Kahn, insertion order
    /// among ready nodes).
    pub fn topological_order(&self) -> Result<Vec<&RefinementNode>, AppError> {
        let order = match &self.routes {
            Some(routes) => routes.order.clone(),
            None => self.kahn_order()?,
        };
        Ok(order.into_iter().map(|i| &self.nodes[i]).collect())
    }

    fn kahn_order(&self) -> Result<Vec<usize>, AppError> {
        let n = self.nodes.len();
        let mut indegree: Vec<usize> = self.in_edges.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &e in &self.out_edges[i] {
                let t = self.edges[e].target;
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    queue.push_back(t);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.nodes[i].name.as_str())
                .collect();
            return Err(AppError::Topology(format!(
                "graph contains a cycle through {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, GraphPolicy, NodeId};

    fn graph_with(nodes: &[&str], edges: &[(&str, &str)], policy: GraphPolicy) -> RefinementGraph {
        let mut graph = RefinementGraph::with_policy(policy);
        for n in nodes {
            graph
                .add_node_with(Some(NodeId::from(*n)), Some(*n), Action::parse(n))
                .unwrap();
        }
        for (s, t) in edges {
            graph.add_edge(&NodeId::from(*s), &NodeId::from(*t)).unwrap();
        }
        graph
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn cycle_is_a_topology_error() {
        let mut graph = graph_with(&["r", "a", "b"], &[("r", "a"), ("a", "b"), ("b", "a")], GraphPolicy::default());
        let err = graph.prepare().unwrap_err();
        assert!(matches!(err, AppError::Topology(_)));
        assert!(err.to_string().contains("cycle"));
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn levels_and_sources_on_a_merge() {
        // r1 -> x -> y -> m ; r2 -> m
        let mut graph = graph_with(
            &["r1", "x", "y", "r2", "m"],
            &[("r1", "x"), ("x", "y"), ("y", "m"), ("r2", "m")],
            GraphPolicy::default(),
        );
        graph.prepare().unwrap();
        assert_eq!(graph.level(&id("m")), Some(1));
        assert_eq!(graph.level(&id("y")), Some(2));
        assert_eq!(graph.input_source(&id("m")).map(|n| n.name()), Some("r2"));
        assert_eq!(graph.payload_source(&id("m")).map(|n| n.name()), Some("r2"));
        assert!(graph.payload_source(&id("r1")).is_none());

        let policy = GraphPolicy {
            payload_source: PayloadSourcePolicy::Furthest,
            ..GraphPolicy::default()
        };
        graph.set_policy(policy);
        graph.prepare().unwrap();
        assert_eq!(graph.payload_source(&id("m")).map(|n| n.name()), Some("y"));
    }

    #[test]
    fn root_tie_break_is_configurable() {
        // Both roots are one step from m.
        let edges = [("zeta", "m"), ("alpha", "m")];
        let mut graph = graph_with(&["zeta", "alpha", "m"], &edges, GraphPolicy::default());
        graph.prepare().unwrap();
        assert_eq!(graph.input_source(&id("m")).map(|n| n.name()), Some("zeta"));
        // Equal levels: the earliest edge supplies the payload.
        assert_eq!(graph.payload_source(&id("m")).map(|n| n.name()), Some("zeta"));

        graph.set_policy(GraphPolicy {
            root_tie_break: RootTieBreak::Name,
            ..GraphPolicy::default()
        });
        graph.prepare().unwrap();
        assert_eq!(graph.input_source(&id("m")).map(|n| n.name()), Some("alpha"));
    }

    #[test]
    fn topological_order_is_stable() {
        let mut graph = graph_with(
            &["r", "b1", "b2", "j"],
            &[("r", "b1"), ("r", "b2"), ("b1", "j"), ("b2", "j")],
            GraphPolicy::default(),
        );
        let names = |g: &RefinementGraph| -> Vec<String> {
            g.topological_order()
                .unwrap()
                .iter()
                .map(|n| n.name().to_string())
                .collect()
        };
        let before = names(&graph);
        graph.prepare().unwrap();
        let after = names(&graph);
        assert_eq!(before, vec!["r", "b1", "b2", "j"]);
        assert_eq!(before, after);
    }
}
