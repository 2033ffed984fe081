//! Graph construction helpers: linear strategies, clean copies, merges.

use crate::domain::{Action, NodeId};
use crate::error::AppError;
use crate::graph::node::RefinementNode;
use crate::graph::{RefinementGraph, START_NODE};

/// Options for `RefinementGraph::clean_copy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Give every node a new random id.
    pub fresh_ids: bool,
    /// Carry each node's completed payload into the copy as its seed.
    pub with_payload: bool,
}

impl RefinementGraph {
    /// Build a chain from a strategy such as `"a->scale->qdamp,Uiso_0->all"`.
    ///
    /// A `start` node with an empty action is prepended; it runs first and
    /// only publishes the seed payload. Parameter names are not checked here:
    /// the refinable set depends on the inputs, so validation happens when a
    /// run is seeded.
    pub fn build_linear(strategy: &str) -> Result<Self, AppError> {
        let mut graph = RefinementGraph::new();
        let mut prev = graph.add_node_with(None, Some(START_NODE), Action::noop())?;

        for (pos, group) in strategy.split("->").enumerate() {
            let action = Action::parse(group);
            if action.is_noop() {
                return Err(AppError::Topology(format!(
                    "empty action group at position {} in '{strategy}'",
                    pos + 1
                )));
            }
            let id = graph.add_node(action);
            graph.add_edge(&prev, &id)?;
            prev = id;
        }

        graph.prepare()?;
        Ok(graph)
    }

    /// Structurally identical graph with fresh runtime state.
    ///
    /// Root inputs, root seeds, names, policies and edge propagate functions
    /// are kept. Completed payloads are dropped unless `with_payload` is set,
    /// in which case they become the copy's seeds.
    pub fn clean_copy(&self, options: CopyOptions) -> RefinementGraph {
        let mut copy = RefinementGraph::with_policy(self.policy());

        for (i, node) in self.nodes.iter().enumerate() {
            let id = if options.fresh_ids {
                NodeId::fresh()
            } else {
                node.id.clone()
            };

            let is_root = self.in_edges[i].is_empty();
            let seed = if options.with_payload {
                node.completed_payload().cloned().or_else(|| node.seed.clone())
            } else if is_root {
                node.seed.clone()
            } else {
                None
            };

            let mut fresh = RefinementNode::new(id, node.name.clone(), node.action.clone());
            fresh.inputs = node.inputs.clone();
            fresh.seed = seed;
            copy.insert_node(fresh);
        }
        for edge in &self.edges {
            copy.push_edge(edge.source, edge.target, edge.propagate.clone());
        }
        // Same positions, same routes.
        copy.routes = self.routes.clone();
        copy
    }

    /// Splice a clean copy of `template` under `parent`.
    ///
    /// `parent` must be a leaf of this graph and `entry` a root of the
    /// template. Existing ids are untouched; template nodes get fresh ids and,
    /// where needed, suffixed names. Returns the new id of `entry`. The graph
    /// is prepared again before returning.
    pub fn merge(
        &mut self,
        template: &RefinementGraph,
        parent: &NodeId,
        entry: &NodeId,
    ) -> Result<NodeId, AppError> {
        let p = self.index_of(parent)?;
        if !self.out_edges[p].is_empty() {
            return Err(AppError::Topology(format!(
                "merge target '{}' is not a leaf",
                self.nodes[p].name
            )));
        }
        let e = template.index_of(entry)?;
        if !template.in_edges[e].is_empty() {
            return Err(AppError::Topology(format!(
                "merge entry '{}' is not a root of the template",
                template.nodes[e].name
            )));
        }

        let copy = template.clean_copy(CopyOptions {
            fresh_ids: true,
            with_payload: false,
        });
        let RefinementGraph { nodes, edges, .. } = copy;

        let offset = self.nodes.len();
        let mut new_entry = None;
        for (i, mut node) in nodes.into_iter().enumerate() {
            node.name = self.unique_name(&node.name);
            if i == e {
                // No longer a root: inherits from `parent`.
                node.inputs = None;
                node.seed = None;
                new_entry = Some(node.id.clone());
            }
            self.insert_node(node);
        }
        for edge in edges {
            self.push_edge(edge.source + offset, edge.target + offset, edge.propagate);
        }
        self.push_edge(p, e + offset, Default::default());

        self.prepare()?;
        new_entry.ok_or_else(|| AppError::Topology("merge entry vanished from the copy".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NodeStatus, Payload, RuntimeTag};
    use crate::model::{FitInputs, Lattice, Profile, StructureSpec};

    fn actions_in_order(graph: &RefinementGraph) -> Vec<String> {
        graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.action().label())
            .collect()
    }

    #[test]
    fn linear_strategy_builds_a_chain() {
        let graph = RefinementGraph::build_linear("a -> scale -> qdamp, Uiso_0 -> all").unwrap();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.names(), vec!["start", "a", "scale", "qdamp,Uiso_0", "all"]);
        assert_eq!(actions_in_order(&graph), vec!["", "a", "scale", "qdamp,Uiso_0", "all"]);
        assert_eq!(graph.root_nodes().len(), 1);
        assert_eq!(graph.leaf_nodes()[0].name(), "all");
        let leaf = graph.leaf_nodes()[0].id().clone();
        assert_eq!(graph.level(&leaf), Some(4));
    }

    #[test]
    fn linear_strategy_rejects_empty_groups() {
        assert!(matches!(
            RefinementGraph::build_linear("a->->all"),
            Err(AppError::Topology(_))
        ));
        assert!(RefinementGraph::build_linear(" , ").is_err());
    }

    #[test]
    fn repeated_groups_get_suffixed_names() {
        let graph = RefinementGraph::build_linear("foo->foo").unwrap();
        assert_eq!(graph.names(), vec!["start", "foo", "foo_1"]);
    }

    #[test]
    fn clean_copy_resets_runtime_state() {
        let mut graph = RefinementGraph::build_linear("a->scale").unwrap();
        let inputs = FitInputs::new(Profile::default(), StructureSpec::new(Lattice::Fcc, 3.52));
        graph
            .attach_root(START_NODE, inputs, Payload::from([("a".into(), 3.5)]))
            .unwrap();
        let start = graph.node_by_name(START_NODE).unwrap().id().clone();
        graph.mark(&start, RuntimeTag::HasPayload).unwrap();

        let same = graph.clean_copy(CopyOptions::default());
        assert!(same.is_prepared());
        assert_eq!(same.node_by_name(START_NODE).unwrap().id(), &start);
        assert!(same.is_marked(&start, NodeStatus::Pending));
        assert!(same.node(&start).unwrap().inputs().is_some());

        let fresh = graph.clean_copy(CopyOptions {
            fresh_ids: true,
            with_payload: false,
        });
        assert_ne!(fresh.node_by_name(START_NODE).unwrap().id(), &start);
        assert_eq!(fresh.names(), graph.names());
        assert_eq!(fresh.edges().count(), graph.edges().count());
        assert_eq!(
            fresh.node_by_name(START_NODE).unwrap().seed_payload().map(|p| p["a"]),
            Some(3.5)
        );
    }

    #[test]
    fn merge_splices_template_under_leaf() {
        let mut forest = RefinementGraph::build_linear("a->scale").unwrap();
        let before: Vec<NodeId> = forest.nodes().map(|n| n.id().clone()).collect();
        let template = RefinementGraph::build_linear("a->all").unwrap();
        let entry = template.node_by_name(START_NODE).unwrap().id().clone();
        let leaf = forest.node_by_name("scale").unwrap().id().clone();

        let new_entry = forest.merge(&template, &leaf, &entry).unwrap();

        assert_eq!(forest.len(), 6);
        for id in &before {
            assert!(forest.node(id).is_some());
        }
        assert_ne!(new_entry, entry);
        assert_eq!(forest.names(), vec!["start", "a", "scale", "start_1", "a_1", "all"]);
        assert_eq!(forest.root_nodes().len(), 1);
        assert_eq!(forest.level(&new_entry), Some(3));
        assert_eq!(forest.payload_source(&new_entry).map(|n| n.name()), Some("scale"));

        // The template itself is untouched.
        assert_eq!(template.len(), 3);
        assert!(template.node(&entry).is_some());
    }

    #[test]
    fn merge_requires_a_leaf_and_a_template_root() {
        let mut forest = RefinementGraph::build_linear("a->scale").unwrap();
        let template = RefinementGraph::build_linear("all").unwrap();
        let entry = template.node_by_name(START_NODE).unwrap().id().clone();
        let inner = forest.node_by_name("a").unwrap().id().clone();
        assert!(forest.merge(&template, &inner, &entry).is_err());

        let leaf = forest.node_by_name("scale").unwrap().id().clone();
        let not_root = template.node_by_name("all").unwrap().id().clone();
        assert!(forest.merge(&template, &leaf, &not_root).is_err());
        assert_eq!(forest.len(), 3);
    }
}
