use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::node::NodeId;
use crate::trigger::Action;

/// Nested record of a flow run.
///
/// Each entry names the node that ran and, per triggered action, the trees of
/// the successors that ran for it. An action with an empty list was
/// triggered but had nothing to run; `triggered: None` marks a node that
/// propagated nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTree {
    pub order: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub triggered: Option<Branches>,
}

/// Triggered actions of one node, in the order they were first triggered.
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Branches(Vec<(Action, Vec<ExecutionTree>)>);

impl Branches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children of `action`, creating the entry at the end if it is new.
    pub fn entry(&mut self, action: Action) -> &mut Vec<ExecutionTree> {
        let index = match self.0.iter().position(|(existing, _)| *existing == action) {
            Some(index) => index,
            None => {
                self.0.push((action, Vec::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[index].1
    }

    pub fn get(&self, action: &str) -> Option<&[ExecutionTree]> {
        self.0
            .iter()
            .find(|(existing, _)| existing == action)
            .map(|(_, children)| children.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Action, &Vec<ExecutionTree>)> {
        self.0.iter().map(|(action, children)| (action, children))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Branches {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for Branches {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BranchesVisitor;

        impl<'de> Visitor<'de> for BranchesVisitor {
            type Value = Branches;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from action to child trees")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Branches, A::Error> {
                let mut branches = Branches::new();
                while let Some((action, children)) = map.next_entry::<Action, Vec<ExecutionTree>>()? {
                    branches.entry(action).extend(children);
                }
                Ok(branches)
            }
        }

        deserializer.deserialize_map(BranchesVisitor)
    }
}

impl ExecutionTree {
    pub fn new(order: NodeId, node_type: impl Into<String>) -> Self {
        Self {
            order,
            node_type: node_type.into(),
            triggered: None,
        }
    }

    /// Builder used mostly by tests to spell out expected trees.
    pub fn with_branch(mut self, action: impl Into<Action>, children: Vec<ExecutionTree>) -> Self {
        self.triggered
            .get_or_insert_with(Branches::new)
            .entry(action.into())
            .extend(children);
        self
    }

    pub fn actions(&self) -> Vec<&str> {
        self.triggered
            .iter()
            .flat_map(|triggered| triggered.iter().map(|(action, _)| action.as_str()))
            .collect()
    }

    pub fn children(&self, action: &str) -> &[ExecutionTree] {
        self.triggered
            .as_ref()
            .and_then(|triggered| triggered.get(action))
            .unwrap_or_default()
    }

    pub fn is_leaf(&self) -> bool {
        self.triggered.is_none()
    }

    /// Total number of node runs recorded in the tree.
    pub fn visit_count(&self) -> usize {
        1 + self
            .triggered
            .iter()
            .flat_map(|triggered| triggered.iter().flat_map(|(_, children)| children))
            .map(ExecutionTree::visit_count)
            .sum::<usize>()
    }

    fn fmt_branches(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        let Some(triggered) = &self.triggered else {
            return Ok(());
        };
        for (i, (action, children)) in triggered.iter().enumerate() {
            let (connector, indent) = tree_glyphs(i + 1 == triggered.len());
            if children.is_empty() {
                writeln!(f, "{prefix}{connector}{action} (end)")?;
                continue;
            }
            writeln!(f, "{prefix}{connector}{action}")?;
            let action_prefix = format!("{prefix}{indent}");
            for (j, child) in children.iter().enumerate() {
                let (connector, indent) = tree_glyphs(j + 1 == children.len());
                writeln!(f, "{action_prefix}{connector}{}#{}", child.node_type, child.order)?;
                child.fmt_branches(f, &format!("{action_prefix}{indent}"))?;
            }
        }
        Ok(())
    }
}

fn tree_glyphs(last: bool) -> (&'static str, &'static str) {
    if last {
        ("└── ", "    ")
    } else {
        ("├── ", "│   ")
    }
}

impl fmt::Display for ExecutionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}#{}", self.node_type, self.order)?;
        self.fmt_branches(f, "")
    }
}
