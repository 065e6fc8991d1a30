//! The `Value` node type (spec.md §3).

use derive_more::{Display, From};
use smallvec::SmallVec;

use crate::error::DatastoreErrorCode;
use crate::schema::SchemaRef;
use crate::xpath::XPathPcb;

/// An index into a [`ValueTree`](super::ValueTree)'s arena. Stable across a
/// node's lifetime; never reused while the node is live. Design note (spec
/// §9): arena allocation with node indices is used in place of the source's
/// owning-parent/weak-child-back-edge scheme, which avoids needing a weak
/// reference type at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From)]
pub struct NodeId(pub u32);

/// A dot-free, slash-joined instance path, used only for diagnostics and
/// rpc-error reporting (spec §6).
#[derive(Debug, Clone, Default, PartialEq, Eq, Display)]
#[display(fmt = "/{}", "segments.join(\"/\")")]
pub struct NodePath {
    pub segments: Vec<String>,
}

impl NodePath {
    pub fn push(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }
}

/// An opaque leaf/leaf-list scalar. The concrete YANG type system lives in
/// the schema compiler (out of scope, spec §1); this crate only needs
/// equality, ordering, and a display form to drive keys, `unique`, and
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scalar(pub String);

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The effective operation for one node within a transaction (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditOp {
    #[default]
    None,
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    Commit,
    Load,
}

/// `insertop` value for ordered-by-user `list`/`leaf-list` edits (spec §4.1,
/// §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOp {
    First,
    Last,
    Before,
    After,
}

/// Transient editing state, valid only during a transaction (spec §3).
#[derive(Debug, Clone, Default)]
pub struct EditVars {
    pub insertop: Option<InsertOp>,
    /// The key tuple (for `list`) or value (for `leaf-list`) of the sibling
    /// named by `insert="before"/"after"`.
    pub insertkey: Option<SmallVec<[Scalar; 4]>>,
    /// Resolved sibling, once `insertkey` has been looked up.
    pub insertref: Option<NodeId>,
}

/// Sticky per-node flags (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub dirty: bool,
    pub subtree_dirty: bool,
    /// Logically removed but still linked so rollback/SIL-commit can see it
    /// (spec §3 invariant 4, §9 "deleted markers").
    pub deleted: bool,
    /// True if this leaf's value equals its schema default and was not
    /// explicitly supplied by a client edit.
    pub default: bool,
    /// Sticky validation error, set by phase V and consulted by phase A
    /// under `--startup-error=continue` (spec §7).
    pub res: Option<DatastoreErrorCode>,
}

/// The node's content, tagged by [`SchemaKind`](crate::schema::SchemaKind).
#[derive(Debug, Clone)]
pub enum NodeContent {
    Leaf(Scalar),
    Container(Vec<NodeId>),
    List(Vec<NodeId>),
    LeafList(Vec<Scalar>),
}

impl NodeContent {
    pub fn children(&self) -> &[NodeId] {
        match self {
            NodeContent::Container(c) | NodeContent::List(c) => c,
            NodeContent::Leaf(_) | NodeContent::LeafList(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            NodeContent::Container(c) | NodeContent::List(c) => Some(c),
            NodeContent::Leaf(_) | NodeContent::LeafList(_) => None,
        }
    }
}

/// A node in the datastore tree (spec §3).
#[derive(Debug, Clone)]
pub struct Value {
    pub schema: SchemaRef,
    pub name: String,
    pub namespace: String,
    pub parent: Option<NodeId>,
    pub content: NodeContent,
    pub editop: EditOp,
    pub editvars: EditVars,
    pub flags: Flags,
    /// Sticky across reads, recomputed whenever the node's leafref/
    /// instance-identifier expression text changes; `None` for nodes whose
    /// type is not leafref/instance-identifier.
    pub xpath_pcb: Option<XPathPcb>,
    /// True if reads/writes of this leaf are backed by a SIL getter/setter
    /// rather than stored content (spec §4.1 "Virtual leaves").
    pub is_virtual: bool,
}

impl Value {
    pub fn new_container(schema: SchemaRef, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Value {
            schema,
            name: name.into(),
            namespace: namespace.into(),
            parent: None,
            content: NodeContent::Container(Vec::new()),
            editop: EditOp::default(),
            editvars: EditVars::default(),
            flags: Flags::default(),
            xpath_pcb: None,
            is_virtual: false,
        }
    }

    pub fn new_leaf(schema: SchemaRef, name: impl Into<String>, namespace: impl Into<String>, value: Scalar) -> Self {
        Value {
            schema,
            name: name.into(),
            namespace: namespace.into(),
            parent: None,
            content: NodeContent::Leaf(value),
            editop: EditOp::default(),
            editvars: EditVars::default(),
            flags: Flags::default(),
            xpath_pcb: None,
            is_virtual: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.content, NodeContent::Leaf(_))
    }

    pub fn leaf_value(&self) -> Option<&Scalar> {
        match &self.content {
            NodeContent::Leaf(v) => Some(v),
            _ => None,
        }
    }
}
