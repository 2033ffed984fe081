//! Shared domain types.
//!
//! These types are intentionally small and serializable so they can be:
//!
//! - threaded through the refinement graph during a run
//! - persisted as graph documents and payload files
//! - reloaded later to seed the next dataset

use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::params::{close_matches, is_parameter_slot, parameter_slots};
use crate::error::AppError;

/// Refined parameter values keyed by parameter name.
///
/// A `BTreeMap` keeps iteration (and therefore JSON output and solver vector
/// layout) deterministic.
pub type Payload = BTreeMap<String, f64>;

/// Action token that frees every refinable parameter.
pub const ALL_PARAMETERS: &str = "all";

/// Stable node identifier (string form, matches the persisted graph format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 64-bit hex id, used when instantiating a run from a template.
    pub fn fresh() -> Self {
        let bits: u64 = rand::thread_rng().r#gen();
        Self(format!("{bits:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One entry of a node action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionItem {
    /// Free every refinable parameter of the model.
    All,
    /// Free a single named parameter.
    Param(String),
}

impl ActionItem {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token == ALL_PARAMETERS {
            ActionItem::All
        } else {
            ActionItem::Param(token.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionItem::All => ALL_PARAMETERS,
            ActionItem::Param(name) => name,
        }
    }
}

/// Ordered set of parameter groups freed and fitted by one refinement step.
///
/// The empty action is the no-op carried by the synthetic `start` node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Action {
    items: Vec<ActionItem>,
}

impl Action {
    pub fn noop() -> Self {
        Self::default()
    }

    /// Parse a comma-separated group such as `"a, scale"`.
    pub fn parse(group: &str) -> Self {
        Self::from_names(group.split(','))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<ActionItem> = Vec::new();
        for name in names {
            if name.as_ref().trim().is_empty() {
                continue;
            }
            let item = ActionItem::parse(name.as_ref());
            if !items.contains(&item) {
                items.push(item);
            }
        }
        Self { items }
    }

    pub fn items(&self) -> &[ActionItem] {
        &self.items
    }

    pub fn is_noop(&self) -> bool {
        self.items.is_empty()
    }

    pub fn frees_all(&self) -> bool {
        self.items.contains(&ActionItem::All)
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|i| i.as_str().to_string()).collect()
    }

    /// Default node name: the items joined with `,`.
    pub fn label(&self) -> String {
        self.names().join(",")
    }

    /// Check every named parameter against the model's declared parameter set.
    ///
    /// A name from the slot vocabulary that the model does not expose is
    /// reported as not refinable; anything else is unknown and gets close-match
    /// hints from the model's parameters, then from the vocabulary.
    pub fn validate(&self, known: &[String]) -> Result<(), AppError> {
        let mut problems = Vec::new();
        for item in &self.items {
            let ActionItem::Param(name) = item else {
                continue;
            };
            if known.iter().any(|k| k == name) {
                continue;
            }
            if is_parameter_slot(name) {
                problems.push(format!("'{name}' is not refinable for this structure"));
                continue;
            }
            let mut hints = close_matches(name, known.iter().map(String::as_str), 3);
            if hints.is_empty() {
                let slots = parameter_slots();
                hints = close_matches(name, slots.iter().map(String::as_str), 3);
            }
            if hints.is_empty() {
                problems.push(format!("'{name}' is not a known parameter"));
            } else {
                problems.push(format!(
                    "'{name}' is not a known parameter (did you mean {}?)",
                    hints.join(", ")
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems.join("; ")))
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Group(String),
            List(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Group(group) => Action::parse(&group),
            Repr::List(names) => Action::from_names(names),
        })
    }
}

/// Entries of a node's append-only progress log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeTag {
    HasPayload,
    HasAdapter,
    Completed,
    Failed,
}

/// Published runtime status of a node.
///
/// `Initialized` is only reachable once both a payload and a fit model were
/// delivered; `Completed` only from `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Pending,
    HasPayload,
    HasAdapter,
    Initialized,
    Completed,
    Failed,
}

impl NodeStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            NodeStatus::Pending => 0,
            NodeStatus::HasPayload => 1,
            NodeStatus::HasAdapter => 2,
            NodeStatus::Initialized => 3,
            NodeStatus::Completed => 4,
            NodeStatus::Failed => 5,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NodeStatus::HasPayload,
            2 => NodeStatus::HasAdapter,
            3 => NodeStatus::Initialized,
            4 => NodeStatus::Completed,
            5 => NodeStatus::Failed,
            _ => NodeStatus::Pending,
        }
    }

    /// Apply one tag to the state machine. `None` means the transition is illegal.
    pub fn advance(self, tag: RuntimeTag) -> Option<NodeStatus> {
        use NodeStatus as S;
        use RuntimeTag as T;
        match (self, tag) {
            (S::Pending, T::HasPayload) => Some(S::HasPayload),
            (S::Pending, T::HasAdapter) => Some(S::HasAdapter),
            (S::HasAdapter, T::HasPayload) | (S::HasPayload, T::HasAdapter) => {
                Some(S::Initialized)
            }
            (S::Initialized, T::Completed) => Some(S::Completed),
            (S::Completed | S::Failed, _) => None,
            (_, T::Failed) => Some(S::Failed),
            _ => None,
        }
    }
}

/// How a plot consumes successive samples of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Each sample is a new point appended to the history.
    Append,
    /// Each sample replaces the previously shown one.
    Replace,
}

/// Where a watched value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    /// The node's completed payload (scalar parameter values).
    Payload,
    /// The live fit model's snapshot store (arrays from the last iterate).
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlotStyle {
    /// Markers, one per sample.
    Sparse,
    /// Continuous line.
    Dense,
}

/// Which root wins when several are at the same distance from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RootTieBreak {
    /// The root inserted first into the graph.
    #[default]
    InsertionOrder,
    /// The root whose name sorts first.
    Name,
}

/// Which predecessor supplies a multi-parent node's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadSourcePolicy {
    /// Predecessor with the lowest level.
    #[default]
    Nearest,
    /// Predecessor with the highest level.
    Furthest,
}

/// Source-resolution policies applied by `RefinementGraph::prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphPolicy {
    pub root_tie_break: RootTieBreak,
    pub payload_source: PayloadSourcePolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_trims_and_dedups() {
        let action = Action::parse(" a, scale ,a,, all ");
        assert_eq!(action.names(), vec!["a", "scale", "all"]);
        assert!(action.frees_all());
        assert_eq!(action.label(), "a,scale,all");
        assert!(Action::parse("").is_noop());
    }

    #[test]
    fn action_deserializes_from_string_or_list() {
        let a: Action = serde_json::from_str("\"a, scale\"").unwrap();
        let b: Action = serde_json::from_str("[\"a\", \"scale\"]").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "[\"a\",\"scale\"]");
    }

    #[test]
    fn validate_suggests_close_names() {
        let known = vec!["scale".to_string(), "qdamp".to_string(), "Uiso_0".to_string()];
        Action::parse("scale, all").validate(&known).unwrap();
        let err = Action::parse("scal").validate(&known).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'scal'"), "{msg}");
        assert!(msg.contains("scale"), "{msg}");
    }

    #[test]
    fn validate_separates_unrefinable_slots_from_unknown_names() {
        let known = vec!["scale".to_string(), "a".to_string(), "Uiso_0".to_string()];
        let msg = Action::parse("b").validate(&known).unwrap_err().to_string();
        assert!(msg.contains("'b' is not refinable for this structure"), "{msg}");

        let msg = Action::parse("U11_0").validate(&known).unwrap_err().to_string();
        assert!(msg.contains("not refinable"), "{msg}");

        // Nothing close among the model's names, so hints come from the slots.
        let msg = Action::parse("gama").validate(&known).unwrap_err().to_string();
        assert!(msg.contains("not a known parameter"), "{msg}");
        assert!(msg.contains("gamma"), "{msg}");

        let msg = Action::parse("zzzzzz").validate(&known).unwrap_err().to_string();
        assert!(msg.ends_with("'zzzzzz' is not a known parameter"), "{msg}");
    }

    #[test]
    fn status_machine_requires_both_tags() {
        let s = NodeStatus::Pending.advance(RuntimeTag::HasPayload).unwrap();
        assert_eq!(s, NodeStatus::HasPayload);
        assert_eq!(s.advance(RuntimeTag::HasPayload), None);
        assert_eq!(s.advance(RuntimeTag::Completed), None);
        let s = s.advance(RuntimeTag::HasAdapter).unwrap();
        assert_eq!(s, NodeStatus::Initialized);
        let s = s.advance(RuntimeTag::Completed).unwrap();
        assert_eq!(s, NodeStatus::Completed);
        assert_eq!(s.advance(RuntimeTag::Failed), None);
        assert_eq!(NodeStatus::from_u8(s.to_u8()), s);
    }

    #[test]
    fn fresh_ids_differ() {
        assert_ne!(NodeId::fresh(), NodeId::fresh());
    }
}
