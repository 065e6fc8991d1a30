//! `SilRegistry`: callback dispatch keyed by schema node × phase × operation
//! (spec.md §4.7), and the SIL callback contract (spec §6).

use std::collections::HashMap;
use std::sync::Arc;

use enum_map::{Enum, EnumMap};

use crate::error::Result;
use crate::lock::SessionId;
use crate::value_tree::{EditOp, NodeId, ValueTree};

/// The four phases a SIL callback set may hook, per spec §4.4/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum Phase {
    Validate,
    Apply,
    Commit,
    Rollback,
}

/// `Ok` vs `Skipped` must be distinguishable (spec §6): a `Skipped` commit
/// means the SIL chose not to act (e.g. no external resource exists yet for
/// this node), which is not the same as a successful side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilOutcome {
    Ok,
    Skipped,
}

pub struct SilCallContext<'a> {
    pub session: SessionId,
    pub txid: u64,
    pub phase: Phase,
    pub op: EditOp,
    pub new_node: Option<NodeId>,
    pub cur_node: Option<NodeId>,
    pub tree: &'a ValueTree,
}

/// `fn cb(session, txn, phase, op, new_node, cur_node) -> Status` from spec
/// §6. Implementations must be total and must not mutate the tree from
/// `validate`.
pub trait SilCallback: Send + Sync {
    fn call(&self, ctx: &SilCallContext<'_>) -> Result<SilOutcome>;
}

type PhaseSlots = EnumMap<Phase, Option<Arc<dyn SilCallback>>>;

#[derive(Default, Clone)]
pub struct SilCallbacks {
    slots: PhaseSlots,
}

impl SilCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, phase: Phase, cb: Arc<dyn SilCallback>) -> Self {
        self.slots[phase] = Some(cb);
        self
    }

    fn get(&self, phase: Phase) -> Option<&Arc<dyn SilCallback>> {
        self.slots[phase].as_ref()
    }
}

/// Whether a SIL dispatch found a registered handler, and if so what it
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilDispatch {
    NoHandler,
    Invoked(SilOutcome),
}

/// `(module, path) -> { validate?, apply?, commit?, rollback? }` (spec
/// §4.7). Keyed by `(module, name)` to match [`SchemaObject`] identity;
/// lookup walks the tree from a node upward until a registered ancestor is
/// found ("nearest ancestor wins", spec §9).
#[derive(Default)]
pub struct SilRegistry {
    callbacks: HashMap<(String, String), SilCallbacks>,
}

impl SilRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl Into<String>, name: impl Into<String>, callbacks: SilCallbacks) {
        self.callbacks.insert((module.into(), name.into()), callbacks);
    }

    /// Walk from `start` up through its ancestors (inclusive) looking for a
    /// schema node with registered callbacks.
    fn lookup_for_node(&self, tree: &ValueTree, start: NodeId) -> Option<&SilCallbacks> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let v = tree.get(id)?;
            if v.schema.has_sil {
                if let Some(cbs) = self.callbacks.get(&(v.schema.module.clone(), v.schema.name.clone())) {
                    return Some(cbs);
                }
            }
            cur = tree.parent_of(id);
        }
        None
    }

    /// Dispatch `phase`/`op` for the node pair `(new_node, cur_node)`,
    /// walking up from whichever is present (preferring `new_node`, as it is
    /// the one being materialized).
    pub fn dispatch(
        &self,
        phase: Phase,
        op: EditOp,
        session: SessionId,
        txid: u64,
        new_node: Option<NodeId>,
        cur_node: Option<NodeId>,
        tree: &ValueTree,
    ) -> Result<SilDispatch> {
        let start = new_node.or(cur_node);
        let Some(start) = start else {
            return Ok(SilDispatch::NoHandler);
        };
        let Some(cbs) = self.lookup_for_node(tree, start) else {
            return Ok(SilDispatch::NoHandler);
        };
        let Some(cb) = cbs.get(phase) else {
            return Ok(SilDispatch::NoHandler);
        };
        let ctx = SilCallContext {
            session,
            txid,
            phase,
            op,
            new_node,
            cur_node,
            tree,
        };
        cb.call(&ctx).map(SilDispatch::Invoked)
    }

    /// True if `node`'s schema requests child-first delete dispatch (spec
    /// §4.7 "Priority check").
    pub fn deletes_children_first(&self, tree: &ValueTree, node: NodeId) -> bool {
        tree.get(node).is_some_and(|v| v.schema.sil_delete_children_first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaObject;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCb(Arc<AtomicUsize>);
    impl SilCallback for CountingCb {
        fn call(&self, _ctx: &SilCallContext<'_>) -> Result<SilOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SilOutcome::Ok)
        }
    }

    #[test]
    fn nearest_ancestor_wins() {
        let mut root_schema = (*SchemaObject::root()).clone();
        root_schema.has_sil = true;
        let mut tree = ValueTree::new(Arc::new(root_schema));
        let root = tree.root();

        let mut registry = SilRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("", "", SilCallbacks::new().with(Phase::Apply, Arc::new(CountingCb(counter.clone()))));

        let dispatch = registry
            .dispatch(Phase::Apply, EditOp::Merge, SessionId(1), 1, Some(root), None, &tree)
            .unwrap();
        assert_eq!(dispatch, SilDispatch::Invoked(SilOutcome::Ok));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_handler_is_reported() {
        let tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let registry = SilRegistry::new();
        let dispatch = registry
            .dispatch(Phase::Apply, EditOp::Merge, SessionId(1), 1, Some(root), None, &tree)
            .unwrap();
        assert_eq!(dispatch, SilDispatch::NoHandler);
    }
}
