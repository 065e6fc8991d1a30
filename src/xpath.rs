//! The XPath evaluator contract (spec.md §6). The evaluator and path parser
//! are external collaborators; this module only defines the interface the
//! engine calls through.

use crate::error::Result;
use crate::value_tree::{NodeId, ValueTree};

/// A pre-parsed XPath expression, produced by the (out-of-scope) path
/// parser. Opaque to this crate beyond carrying the source text for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPathPcb {
    pub source: String,
}

impl XPathPcb {
    pub fn parse(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

/// The result of evaluating an XPath expression, per spec §6.
#[derive(Debug, Clone)]
pub enum XPathValue {
    NodeSet(NodeSet),
    Bool(bool),
    Num(f64),
    Str(String),
}

impl XPathValue {
    pub fn as_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(ns) => !ns.is_empty(),
            XPathValue::Bool(b) => *b,
            XPathValue::Num(n) => *n != 0.0,
            XPathValue::Str(s) => !s.is_empty(),
        }
    }
}

/// A node-set result, ordered by document order.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<NodeId>,
}

impl NodeSet {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Removes any node that is an ancestor-or-self or descendant-or-self of
    /// another node already in the set, per spec §4.2's pruning rule. See
    /// `crate::lock::prune_nodeset` for the concrete ancestor/descendant
    /// absorb-and-drop algorithm this delegates to.
    pub fn prune(self, tree: &ValueTree) -> Self {
        crate::lock::prune_nodeset(tree, self.nodes)
    }

    pub fn union(mut self, other: NodeSet) -> Self {
        self.nodes.extend(other.nodes);
        self
    }
}

/// Evaluate `pcb` against `context` within `root`. `config_only` restricts
/// traversal to `config true` nodes, as required by partial-lock `select`
/// evaluation (spec §4.2).
pub trait XPathEvaluator: Send + Sync {
    fn evaluate(&self, pcb: &XPathPcb, context: NodeId, root: NodeId, tree: &ValueTree, config_only: bool) -> Result<XPathValue>;
}
