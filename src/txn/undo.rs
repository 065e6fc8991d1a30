//! `UndoLog` (spec.md §4.3): one [`UndoRec`] per mutation performed in the
//! apply phase, in apply order, plus `reverse_edit` for SIL-call purposes
//! during rollback (tree-level reversal is separate, see
//! [`super::pipeline::EditPipeline::rollback`]).

use crate::sil::SilOutcome;
use crate::value_tree::{EditOp, NodeId};

/// What kind of mutation a [`UndoRec`] reverses (spec §4.3 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Add,
    Set,
    Move,
    Replace,
    Delete,
    DeleteDefault,
}

/// One reversible mutation record (spec §3 `UndoRec`).
#[derive(Debug, Clone)]
pub struct UndoRec {
    pub edit_action: EditAction,
    /// The node that was inserted/merged-into/swapped-in, if any.
    pub new_node: Option<NodeId>,
    /// The pre-existing node this mutation acted on, if any.
    pub cur_node: Option<NodeId>,
    /// A deep clone of `cur_node`'s pre-mutation content, used to restore a
    /// `Set` on rollback (spec §4.3: `Set -> set(new_node <- cur_clone)`).
    pub cur_clone: Option<NodeId>,
    /// The deleted-marker node swapped in for `cur_node` by a `Delete`/
    /// `Replace` (spec §9 "deleted markers").
    pub cur_marker: Option<NodeId>,
    /// The operation in effect when this record was produced; carried
    /// through to the reversing SIL call for `Set`/`Move` (spec §4.3).
    pub original_op: EditOp,
    /// Set once Phase C2 processes this record: `Ok` once its SIL commit
    /// callback has run, `Skipped` if the commit loop stopped before
    /// reaching it (spec §4.4 Phase C2/R).
    pub commit_res: Option<SilOutcome>,
}

impl UndoRec {
    pub fn new(edit_action: EditAction, original_op: EditOp) -> Self {
        UndoRec {
            edit_action,
            new_node: None,
            cur_node: None,
            cur_clone: None,
            cur_marker: None,
            original_op,
            commit_res: None,
        }
    }
}

/// The reversing SIL call implied by `reverse_edit(rec)` (spec §4.3 table).
/// Tree-level reversal of the record is handled separately in Phase R; this
/// only decides which SIL phase(s) to invoke and on which node.
#[derive(Debug, Clone, Copy)]
pub enum ReverseSilCall {
    Delete { node: NodeId },
    Set { node: NodeId, restore_from: NodeId, op: EditOp },
    Move { node: NodeId, op: EditOp },
    Replace { node: NodeId },
    Create { node: NodeId },
    NoOp,
}

/// `reverse_edit(rec)` from spec §4.3.
pub fn reverse_edit(rec: &UndoRec) -> ReverseSilCall {
    match rec.edit_action {
        EditAction::Add => rec
            .new_node
            .map(|node| ReverseSilCall::Delete { node })
            .unwrap_or(ReverseSilCall::NoOp),
        EditAction::Set => match (rec.new_node, rec.cur_clone) {
            (Some(node), Some(restore_from)) => ReverseSilCall::Set {
                node,
                restore_from,
                op: rec.original_op,
            },
            _ => ReverseSilCall::NoOp,
        },
        EditAction::Move => rec
            .new_node
            .map(|node| ReverseSilCall::Move { node, op: rec.original_op })
            .unwrap_or(ReverseSilCall::NoOp),
        EditAction::Replace => rec
            .cur_node
            .map(|node| ReverseSilCall::Replace { node })
            .unwrap_or(ReverseSilCall::NoOp),
        EditAction::Delete => rec
            .cur_node
            .map(|node| ReverseSilCall::Create { node })
            .unwrap_or(ReverseSilCall::NoOp),
        // "if original default restored: create(cur_node) else no-op"
        EditAction::DeleteDefault => match rec.cur_node {
            Some(node) => ReverseSilCall::Create { node },
            None => ReverseSilCall::NoOp,
        },
    }
}

/// Ordered record of every mutation performed by one transaction's apply
/// phase, plus the choice/case siblings it deleted as a side effect of
/// `add_child` (spec §4.1, §4.3).
#[derive(Debug, Default)]
pub struct UndoLog {
    records: Vec<UndoRec>,
    extra_deleted: Vec<NodeId>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rec: UndoRec) {
        self.records.push(rec);
    }

    pub fn extend_extra_deleted(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.extra_deleted.extend(nodes);
    }

    pub fn records(&self) -> &[UndoRec] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [UndoRec] {
        &mut self.records
    }

    pub fn extra_deleted(&self) -> &[NodeId] {
        &self.extra_deleted
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.extra_deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_add_is_delete() {
        let mut rec = UndoRec::new(EditAction::Add, EditOp::Merge);
        rec.new_node = Some(NodeId(3));
        assert!(matches!(reverse_edit(&rec), ReverseSilCall::Delete { node } if node == NodeId(3)));
    }

    #[test]
    fn reverse_delete_default_with_no_restore_is_noop() {
        let rec = UndoRec::new(EditAction::DeleteDefault, EditOp::Delete);
        assert!(matches!(reverse_edit(&rec), ReverseSilCall::NoOp));
    }

    #[test]
    fn reverse_set_pairs_new_and_clone() {
        let mut rec = UndoRec::new(EditAction::Set, EditOp::Merge);
        rec.new_node = Some(NodeId(1));
        rec.cur_clone = Some(NodeId(2));
        match reverse_edit(&rec) {
            ReverseSilCall::Set { node, restore_from, .. } => {
                assert_eq!(node, NodeId(1));
                assert_eq!(restore_from, NodeId(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn arbitrary_action(i: u8) -> EditAction {
        match i % 6 {
            0 => EditAction::Add,
            1 => EditAction::Set,
            2 => EditAction::Move,
            3 => EditAction::Replace,
            4 => EditAction::Delete,
            _ => EditAction::DeleteDefault,
        }
    }

    proptest::proptest! {
        /// `reverse_edit` (spec §4.3 table) is total over every `EditAction`
        /// and any combination of present/absent node fields: it never
        /// panics, and it falls back to `NoOp` whenever the field the table
        /// names for that action is missing.
        #[test]
        fn reverse_edit_is_total_and_noops_on_missing_fields(
            action_idx in 0u8..6,
            has_new in proptest::prelude::any::<bool>(),
            has_cur in proptest::prelude::any::<bool>(),
            has_clone in proptest::prelude::any::<bool>(),
        ) {
            let action = arbitrary_action(action_idx);
            let mut rec = UndoRec::new(action, EditOp::Merge);
            if has_new { rec.new_node = Some(NodeId(1)); }
            if has_cur { rec.cur_node = Some(NodeId(2)); }
            if has_clone { rec.cur_clone = Some(NodeId(3)); }

            let reverse = reverse_edit(&rec);
            let required_present = match action {
                EditAction::Add | EditAction::Move => has_new,
                EditAction::Set => has_new && has_clone,
                EditAction::Replace | EditAction::Delete | EditAction::DeleteDefault => has_cur,
            };
            if !required_present {
                proptest::prop_assert!(matches!(reverse, ReverseSilCall::NoOp));
            } else {
                proptest::prop_assert!(!matches!(reverse, ReverseSilCall::NoOp));
            }
        }
    }
}
