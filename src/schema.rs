//! The schema data model (spec.md §3, "SchemaObject").
//!
//! `SchemaObject` is produced by the schema compiler / model loader, which is
//! out of scope for this crate (spec.md §1). What lives here is the shape the
//! engine needs: enough of a YANG schema node to drive the edit pipeline and
//! commit checks. A real embedder constructs a tree of these once at startup
//! and treats it as read-only thereafter.

use std::sync::Arc;

use crate::xpath::XPathPcb;

/// The kind of schema node, mirroring the YANG statement it was compiled
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Container,
    Leaf,
    LeafList,
    List,
    Choice,
    Case,
    Anyxml,
    Rpc,
    RpcIo,
    Notification,
    Augment,
    Uses,
    Refine,
    Root,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFlag {
    Config,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderedBy {
    System,
    User,
}

/// Precomputed commit-check applicability for a schema node, per spec §4.5.
/// `must` is never pruned; the rest gate whether [`CommitChecker`]
/// (crate::commit_check::CommitChecker) needs to visit a node at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitTestFlags {
    pub min_elems: bool,
    pub max_elems: bool,
    pub mandatory: bool,
    pub choice: bool,
    pub must: bool,
    pub unique: bool,
    pub xpath_type: bool,
    pub when: bool,
    pub identity: bool,
}

/// A `must`-stmt or `when`-stmt attached to a schema node. The expression
/// text is opaque here; evaluating it is the XPath evaluator's job (spec
/// §6, "XPath evaluator contract").
#[derive(Debug, Clone)]
pub struct XPathExpr {
    pub text: String,
    pub pcb: XPathPcb,
}

/// A read-only, post-schema-compilation node description.
///
/// A distinguished `root` object (kind = [`SchemaKind::Root`]) represents the
/// conceptual datastore root; it has no `must`/`when` and is never itself a
/// target of edit or commit-check.
#[derive(Debug, Clone)]
pub struct SchemaObject {
    pub module: String,
    pub name: String,
    pub kind: SchemaKind,
    pub config: ConfigFlag,
    pub mandatory: bool,
    pub default: Option<String>,
    pub min_elements: u32,
    pub max_elements: Option<u32>,
    pub ordered_by: OrderedBy,
    pub must: Vec<XPathExpr>,
    pub when: Option<XPathExpr>,
    /// Key leaf names, in declaration order, for `kind == List`.
    pub keys: Vec<String>,
    /// `unique` tuples: each entry is a set of relative leaf paths that must
    /// be jointly unique across sibling list entries.
    pub unique: Vec<Vec<String>>,
    pub test_flags: CommitTestFlags,
    /// True if a SIL callback set is registered for this node (spec §4.7).
    pub has_sil: bool,
    /// True if a `delete` must recurse child-first before this node's own
    /// SIL delete callback fires (spec §4.7).
    pub sil_delete_children_first: bool,
    /// For NP-containers: true if every mandatory descendant is guarded by a
    /// `when` (spec §4.5 "Mandatory/min-elements suppression").
    pub np_container_all_mandatory_guarded: bool,
    /// `Some((choice, case))` if this node is (or is directly inside) one
    /// case of a `choice` statement; used by `add_child` to enforce
    /// case-exclusivity (spec §4.1).
    pub choice_case: Option<(String, String)>,
    /// Names of `choice` statements directly under this (container/list/
    /// root) node that are themselves `mandatory` (spec §4.5 "choice/case
    /// consistency"); checked against the choice names actually present
    /// among this node's children.
    pub mandatory_choices: Vec<String>,
    /// For an `identityref`-typed leaf: the full set of identity names
    /// (base plus every derived identity) the schema compiler resolved as
    /// valid, out of scope here (spec §1) beyond consuming its result.
    /// `None` for non-identityref leaves.
    pub identity_base: Option<Vec<String>>,
}

pub type SchemaRef = Arc<SchemaObject>;

impl SchemaObject {
    pub fn root() -> SchemaRef {
        Arc::new(SchemaObject {
            module: String::new(),
            name: String::new(),
            kind: SchemaKind::Root,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: Vec::new(),
            unique: Vec::new(),
            test_flags: CommitTestFlags::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        })
    }

    pub fn is_writable_leaf_list_or_list(&self) -> bool {
        matches!(self.kind, SchemaKind::List | SchemaKind::LeafList) && self.ordered_by == OrderedBy::User
    }
}
