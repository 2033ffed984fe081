//! JSON graph documents.
//!
//! Format:
//!
//! ```json
//! {
//!   "nodes": [{"id": "n1", "name": "a", "action": ["a"], "payload": {"a": 3.52}, "level": 1}],
//!   "edges": [{"source": "n0", "target": "n1"}]
//! }
//! ```
//!
//! On input, `action` may also be a comma-separated string (or the older
//! `value` key), and edges may be `[source, target]` pairs. `payload` is the
//! node's seed. Inputs and edge propagate functions are not persisted.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Action, GraphPolicy, NodeId, NodeStatus, Payload};
use crate::error::AppError;
use crate::graph::RefinementGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "value")]
    pub action: Action,
    #[serde(default)]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EdgeRepr")]
pub struct EdgeRecord {
    pub source: NodeId,
    pub target: NodeId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EdgeRepr {
    Pair(NodeId, NodeId),
    Object { source: NodeId, target: NodeId },
}

impl From<EdgeRepr> for EdgeRecord {
    fn from(repr: EdgeRepr) -> Self {
        match repr {
            EdgeRepr::Pair(source, target) | EdgeRepr::Object { source, target } => {
                EdgeRecord { source, target }
            }
        }
    }
}

impl RefinementGraph {
    /// Build and prepare a graph from a document.
    pub fn from_document(doc: &GraphDocument) -> Result<Self, AppError> {
        Self::from_document_with(doc, GraphPolicy::default())
    }

    pub fn from_document_with(doc: &GraphDocument, policy: GraphPolicy) -> Result<Self, AppError> {
        if doc.nodes.is_empty() {
            return Err(AppError::Topology("graph document has no nodes".into()));
        }
        let mut graph = RefinementGraph::with_policy(policy);
        for record in &doc.nodes {
            let id = graph.add_node_with(
                Some(record.id.clone()),
                record.name.as_deref(),
                record.action.clone(),
            )?;
            let idx = graph.index_of(&id)?;
            graph.nodes[idx].seed = record.payload.clone();
        }
        for edge in &doc.edges {
            graph.add_edge(&edge.source, &edge.target)?;
        }
        graph.prepare()?;
        Ok(graph)
    }

    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        let doc: GraphDocument = serde_json::from_str(text)?;
        Self::from_document(&doc)
    }

    pub fn from_json(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Snapshot of topology plus completed payloads (seed if not completed).
    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| NodeRecord {
                id: node.id.clone(),
                name: Some(node.name.clone()),
                action: node.action.clone(),
                payload: node.completed_payload().cloned().or_else(|| node.seed.clone()),
                level: self.routes.as_ref().map(|r| r.level[i]),
                status: Some(node.status()),
            })
            .collect();
        let edges = self
            .edges()
            .map(|(s, t)| EdgeRecord {
                source: s.clone(),
                target: t.clone(),
            })
            .collect();
        GraphDocument { nodes, edges }
    }

    pub fn to_json_string(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn to_json(&self, path: &Path) -> Result<(), AppError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| AppError::io(dir, e))?;
        }
        let text = self.to_json_string()?;
        fs::write(path, text).map_err(|e| AppError::io(path, e))
    }
}
