//! `EditPipeline` (spec.md §4.4): recursive descent over `(new_node,
//! cur_node)` pairs driving validate, apply, dead-node sweep, commit and
//! rollback.

use crate::acm::AccessControl;
use crate::config::EngineConfig;
use crate::error::{DatastoreError, Result, TreeError};
use crate::lock::{LockTable, SessionId};
use crate::sil::{Phase as SilPhase, SilDispatch, SilOutcome, SilRegistry};
use crate::value_tree::{EditOp, EditVars, InsertOp, NodeContent, NodeId, Scalar, ValueTree};
use crate::xpath::{XPathEvaluator, XPathValue};

use super::undo::{reverse_edit, EditAction, ReverseSilCall, UndoRec};
use super::Transaction;

/// Drives one transaction's phases against one datastore's tree.
///
/// `is_running_target` gates SIL apply dispatch and audit emission (spec
/// §4.4 Phase A: "only when the target is `running`").
pub struct EditPipeline<'a> {
    pub tree: &'a mut ValueTree,
    pub locks: &'a LockTable,
    pub sil: &'a SilRegistry,
    pub acm: &'a dyn AccessControl,
    pub evaluator: &'a dyn XPathEvaluator,
    pub config: &'a EngineConfig,
    pub is_running_target: bool,
}

impl<'a> EditPipeline<'a> {
    /// RFC 6241 §7.2 effective-operation table, reduced to its three
    /// inputs: an explicit `operation` attribute wins; otherwise the
    /// nearest ancestor's operation is inherited; otherwise the edit's
    /// `default-operation` applies.
    fn effective_op(explicit_op: Option<EditOp>, parent_op: EditOp, default_op: EditOp) -> EditOp {
        explicit_op.unwrap_or(if parent_op != EditOp::None { parent_op } else { default_op })
    }

    /// Phase V, one node. Returns the effective operation so the caller can
    /// recurse with it as the next level's `parent_op`.
    pub fn validate(
        &mut self,
        txn: &Transaction,
        new_node: NodeId,
        cur_node: Option<NodeId>,
        parent_op: EditOp,
        default_op: EditOp,
    ) -> Result<EditOp> {
        let explicit_op = {
            let v = self.tree.get(new_node).expect("new_node must be live");
            if v.editop == EditOp::None { None } else { Some(v.editop) }
        };
        let effective_op = Self::effective_op(explicit_op, parent_op, default_op);

        let path = self.tree.path_of(cur_node.unwrap_or(new_node));
        if !self.acm.acm_allowed(txn.session, &path, effective_op) {
            return Err(DatastoreError::AccessDenied { session: txn.session, path });
        }

        if let Some(cur) = cur_node {
            self.locks.write_ok(&*self.tree, cur, txn.session)?;
        }

        let schema = self.tree.get(new_node).expect("new_node must be live").schema.clone();
        if schema.config == crate::schema::ConfigFlag::State && effective_op != EditOp::None {
            return Err(DatastoreError::AccessDenied { session: txn.session, path: self.tree.path_of(new_node) });
        }

        let editvars = self.tree.get(new_node).expect("new_node must be live").editvars.clone();
        if editvars.insertop.is_some() && !schema.is_writable_leaf_list_or_list() {
            return Err(TreeError::UnexpectedInsertAttrs.into());
        }
        if let Some(InsertOp::Before) | Some(InsertOp::After) = editvars.insertop {
            if editvars.insertref.is_none() {
                if let Some(key) = editvars.insertkey.clone() {
                    if let Some(found) = self.resolve_insert_ref(new_node, &schema, &key) {
                        self.tree.get_mut(new_node).expect("new_node must be live").editvars.insertref = Some(found);
                    }
                }
            }
            let insertref = self.tree.get(new_node).expect("new_node must be live").editvars.insertref;
            if insertref.is_none() {
                return Err(TreeError::InsertMissingInstance.into());
            }
        }

        if schema.kind == crate::schema::SchemaKind::List {
            for key in &schema.keys {
                if self.tree.find_child(new_node, &schema.module, key).is_none() {
                    return Err(TreeError::MissingKey.into());
                }
            }
        }

        self.sil.dispatch(SilPhase::Validate, effective_op, txn.session, txn.txid, Some(new_node), cur_node, &*self.tree)?;

        // Recurse into children, pairing each new child with its current
        // counterpart by schema identity (and, for lists, key tuple).
        // Validation errors accumulate across siblings rather than aborting
        // the scan (spec §7 policy 1): every child is visited regardless of
        // an earlier sibling's failure, the failing child is marked via
        // `Flags.res`, and only the first error is actually propagated, and
        // only when `continue_on_validation_error` is not set.
        let new_children = self.tree.all_children(new_node);
        let mut first_err = None;
        for new_child in new_children {
            let child_schema = self.tree.get(new_child).expect("live").schema.clone();
            let cur_child = cur_node.and_then(|cur| self.pair_child(cur, new_child, &child_schema));
            if let Err(e) = self.validate(txn, new_child, cur_child, effective_op, default_op) {
                let code = e.to_rpc_error().code;
                if let Some(v) = self.tree.get_mut(new_child) {
                    v.flags.res = Some(code);
                }
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(e) = first_err {
            if !self.config.continue_on_validation_error {
                return Err(e);
            }
            log::warn!("validation error recorded on a child and scanning continued (--startup-error=continue): {e}");
        }

        self.tree.get_mut(new_node).expect("live").editop = effective_op;
        Ok(effective_op)
    }

    /// Resolve `insert="before"/"after"`'s `insertkey` (spec §4.4 step 5)
    /// against `new_node`'s prospective siblings: the key tuple (`list`) or
    /// scalar value (`leaf-list`) named by `insertkey`, searched among the
    /// visible children of `new_node`'s own parent — the same parent
    /// `add_child` will search when it actually places the node. Parallels
    /// `key_tuple_of` in `value_tree::arena`.
    fn resolve_insert_ref(&self, new_node: NodeId, schema: &crate::schema::SchemaRef, insertkey: &[Scalar]) -> Option<NodeId> {
        let parent = self.tree.parent_of(new_node)?;
        self.tree.visible_children(parent).into_iter().find(|&sib| {
            if sib == new_node {
                return false;
            }
            let Some(sib_value) = self.tree.get(sib) else { return false };
            if !std::sync::Arc::ptr_eq(&sib_value.schema, schema) {
                return false;
            }
            if schema.kind == crate::schema::SchemaKind::List {
                let key: Vec<Scalar> = schema
                    .keys
                    .iter()
                    .filter_map(|k| {
                        self.tree
                            .find_child(sib, &schema.module, k)
                            .and_then(|n| self.tree.get(n))
                            .and_then(|n| n.leaf_value())
                            .cloned()
                    })
                    .collect();
                key == insertkey
            } else {
                sib_value.leaf_value().is_some_and(|v| insertkey.first() == Some(v))
            }
        })
    }

    /// Find `new_child`'s counterpart among `cur`'s visible children: same
    /// schema object, and for `list`/`leaf-list` entries, the same key
    /// tuple (spec §4.4, pairing "aligned by schema").
    fn pair_child(&self, cur: NodeId, new_child: NodeId, schema: &crate::schema::SchemaRef) -> Option<NodeId> {
        if schema.kind == crate::schema::SchemaKind::List {
            self.tree.visible_children(cur).into_iter().find(|&c| {
                let cv = self.tree.get(c).unwrap();
                std::sync::Arc::ptr_eq(&cv.schema, schema)
                    && schema.keys.iter().all(|k| {
                        let a = self.tree.find_child(new_child, &schema.module, k).and_then(|n| self.tree.get(n)).and_then(|n| n.leaf_value());
                        let b = self.tree.find_child(c, &schema.module, k).and_then(|n| self.tree.get(n)).and_then(|n| n.leaf_value());
                        a == b
                    })
            })
        } else {
            self.tree.first_child_match(cur, schema)
        }
    }

    /// `applyhere` predicate (spec §4.4 Phase A): never at the conceptual
    /// root; for `commit` only where `dirty`; for `delete`/`remove` always;
    /// else whenever the op actually materializes something (anything but
    /// `None`).
    fn applyhere(&self, new_node: NodeId, is_root: bool, op: EditOp) -> bool {
        if is_root {
            return false;
        }
        match op {
            EditOp::Commit => self.tree.get(new_node).is_some_and(|v| v.flags.dirty || v.flags.subtree_dirty),
            EditOp::Delete | EditOp::Remove => true,
            EditOp::None => false,
            _ => true,
        }
    }

    /// Phase A, one node. `parent` is `cur_node`'s (or the eventual new
    /// parent's) container in the target tree.
    pub fn apply(
        &mut self,
        txn: &mut Transaction,
        parent: NodeId,
        new_node: NodeId,
        cur_node: Option<NodeId>,
        op: EditOp,
        is_root: bool,
    ) -> Result<()> {
        if self.applyhere(new_node, is_root, op) {
            self.apply_here(txn, parent, new_node, cur_node, op)?;
        } else {
            // Not materialized at this level; recurse so descendants with
            // their own explicit operation can still apply.
            let new_children = self.tree.all_children(new_node);
            for new_child in new_children {
                let child_schema = self.tree.get(new_child).expect("live").schema.clone();
                let cur_child = cur_node.and_then(|cur| self.pair_child(cur, new_child, &child_schema));
                let child_op = self.tree.get(new_child).expect("live").editop;
                self.apply(txn, cur_node.unwrap_or(parent), new_child, cur_child, child_op, false)?;
            }
        }
        Ok(())
    }

    /// End-to-end entry point for one transaction's root-level edit targets
    /// (spec §4.4 Phases V then A, run in that order over the whole edit
    /// before either phase touches the next). `new_children` are edit nodes
    /// already bridged into this pipeline's own arena (e.g. via
    /// `ValueTree::clone_subtree_into`) but not yet linked under
    /// `target_root` — the same floating-node shape `apply_here`'s `Add` arm
    /// expects, just at the top level instead of a nested recursion step.
    /// Siblings accumulate validation errors exactly like the nested
    /// recursion in [`Self::validate`] does, gated by
    /// `config.continue_on_validation_error`.
    pub fn run_top_level_edits(
        &mut self,
        txn: &mut Transaction,
        target_root: NodeId,
        new_children: &[NodeId],
        default_op: EditOp,
    ) -> Result<()> {
        let mut pairs = Vec::with_capacity(new_children.len());
        let mut first_err = None;
        for &new_child in new_children {
            let schema = self.tree.get(new_child).expect("live").schema.clone();
            let cur_child = self.pair_child(target_root, new_child, &schema);
            match self.validate(txn, new_child, cur_child, EditOp::None, default_op) {
                Ok(effective_op) => pairs.push((new_child, cur_child, effective_op)),
                Err(e) => {
                    let code = e.to_rpc_error().code;
                    if let Some(v) = self.tree.get_mut(new_child) {
                        v.flags.res = Some(code);
                    }
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_err {
            if !self.config.continue_on_validation_error {
                return Err(e);
            }
            log::warn!("validation error recorded on a root-level edit target and scanning continued: {e}");
        }
        for (new_child, cur_child, effective_op) in pairs {
            self.apply(txn, target_root, new_child, cur_child, effective_op, false)?;
        }
        Ok(())
    }

    fn apply_here(&mut self, txn: &mut Transaction, parent: NodeId, new_node: NodeId, cur_node: Option<NodeId>, op: EditOp) -> Result<()> {
        let is_leaf = self.tree.get(new_node).expect("live").is_leaf();
        let cur_is_default = cur_node.is_some_and(|c| self.tree.get(c).expect("live").flags.default);

        let rec = match (op, cur_node) {
            // `<commit>` materializes only where `applyhere` already found
            // the node dirty; a leaf's changed content is merged in exactly
            // like an explicit `merge`/`replace`, but the audit trail and
            // reversing SIL call record the conversion as a `replace` (spec
            // §8 scenario 1: "audit log shows one replace record (effective
            // op conversion from commit)"), not as `commit` itself. A
            // container with no existing counterpart is copied in whole.
            (EditOp::Commit, Some(cur)) if is_leaf => self.merge_leaf(cur, new_node, EditOp::Replace)?,
            (EditOp::Merge | EditOp::Load | EditOp::Commit, None) | (EditOp::Replace, None) => {
                let mut rec = UndoRec::new(EditAction::Add, op);
                self.tree.get_mut(new_node).expect("live").parent = Some(parent);
                let editvars = self.tree.get(new_node).expect("live").editvars.clone();
                let extra = self.tree.add_child(parent, new_node, &editvars)?;
                txn.undo.extend_extra_deleted(extra);
                rec.new_node = Some(new_node);
                Some(rec)
            }
            (EditOp::Merge, Some(cur)) if is_leaf => self.merge_leaf(cur, new_node, op)?,
            (EditOp::Merge, Some(cur)) => {
                let mut rec = UndoRec::new(EditAction::Move, op);
                let editvars = self.tree.get(new_node).expect("live").editvars.clone();
                self.reposition(cur, &editvars);
                rec.new_node = Some(cur);
                Some(rec)
            }
            (EditOp::Replace, Some(cur)) if is_leaf => self.merge_leaf(cur, new_node, op)?,
            (EditOp::Replace, Some(cur)) => {
                let mut rec = UndoRec::new(EditAction::Replace, op);
                self.tree.swap(cur, new_node);
                self.tree.mark_deleted(cur);
                rec.new_node = Some(new_node);
                rec.cur_node = Some(cur);
                rec.cur_marker = Some(cur);
                Some(rec)
            }
            (EditOp::Create, Some(cur)) if cur_is_default && is_leaf => self.merge_leaf(cur, new_node, op)?,
            (EditOp::Create, Some(_)) => return Err(TreeError::DataExists.into()),
            (EditOp::Create, None) => {
                let mut rec = UndoRec::new(EditAction::Add, op);
                self.tree.get_mut(new_node).expect("live").parent = Some(parent);
                let editvars = self.tree.get(new_node).expect("live").editvars.clone();
                let extra = self.tree.add_child(parent, new_node, &editvars)?;
                txn.undo.extend_extra_deleted(extra);
                rec.new_node = Some(new_node);
                Some(rec)
            }
            (EditOp::Delete, None) => return Err(TreeError::DataMissing.into()),
            (EditOp::Remove, None) => None,
            (EditOp::Delete | EditOp::Remove, Some(cur)) => {
                let schema = self.tree.get(cur).expect("live").schema.clone();
                if op == EditOp::Delete && is_leaf && schema.default.is_some() {
                    let cur_clone = self.tree.clone_subtree(cur);
                    if let Some(default) = &schema.default {
                        self.tree.get_mut(cur).expect("live").content = NodeContent::Leaf(Scalar(default.clone()));
                        self.tree.get_mut(cur).expect("live").flags.default = true;
                    }
                    let mut rec = UndoRec::new(EditAction::DeleteDefault, op);
                    rec.cur_node = Some(cur);
                    rec.cur_clone = Some(cur_clone);
                    Some(rec)
                } else {
                    self.tree.mark_deleted(cur);
                    let mut rec = UndoRec::new(EditAction::Delete, op);
                    rec.cur_node = Some(cur);
                    Some(rec)
                }
            }
            (EditOp::None | EditOp::Commit, _) => None,
        };

        if let Some(rec) = rec {
            if self.is_running_target {
                // Apply failures are fatal for the transaction (spec §4.4);
                // `?` propagates straight out of the recursive apply walk.
                self.sil
                    .dispatch(SilPhase::Apply, op, txn.session, txn.txid, rec.new_node, rec.cur_node, &*self.tree)?;
            }
            if let Some(target) = rec.new_node.or(rec.cur_node) {
                self.tree.set_dirty(target);
            }
            txn.undo.push(rec);
        }

        // Recurse into containers/lists whose own op didn't already
        // subsume children's handling (merge/none let children carry
        // their own explicit operation).
        if matches!(op, EditOp::Merge | EditOp::None | EditOp::Commit) {
            let new_children = self.tree.all_children(new_node);
            let effective_parent = cur_node.unwrap_or(new_node);
            for new_child in new_children {
                let child_schema = self.tree.get(new_child).expect("live").schema.clone();
                let cur_child = cur_node.and_then(|cur| self.pair_child(cur, new_child, &child_schema));
                let child_op = self.tree.get(new_child).expect("live").editop;
                self.apply(txn, effective_parent, new_child, cur_child, child_op, false)?;
            }
        }

        Ok(())
    }

    fn merge_leaf(&mut self, cur: NodeId, new_node: NodeId, op: EditOp) -> Result<Option<UndoRec>> {
        let cur_clone = self.tree.clone_subtree(cur);
        let new_value = self.tree.get(new_node).expect("live").leaf_value().cloned();
        if let Some(value) = new_value {
            self.tree.get_mut(cur).expect("live").content = NodeContent::Leaf(value);
            self.tree.get_mut(cur).expect("live").flags.default = false;
        }
        let mut rec = UndoRec::new(EditAction::Set, op);
        rec.new_node = Some(cur);
        rec.cur_node = Some(cur);
        rec.cur_clone = Some(cur_clone);
        Ok(Some(rec))
    }

    fn reposition(&mut self, cur: NodeId, editvars: &EditVars) {
        let parent = match self.tree.parent_of(cur) {
            Some(p) => p,
            None => return,
        };
        // Remove then reinsert per insertop; cheap given arena child lists.
        if let Some(children) = self.tree.get_mut(parent).and_then(|v| v.content.children_mut()) {
            children.retain(|&c| c != cur);
        }
        let temp_vars = EditVars {
            insertop: editvars.insertop,
            insertkey: editvars.insertkey.clone(),
            insertref: editvars.insertref,
        };
        let _ = self.tree.add_child(parent, cur, &temp_vars);
    }

    /// Phase V2 (spec §4.4): repeatedly evaluate every `when` in the
    /// post-apply tree, marking newly-false nodes deleted, until a pass
    /// removes nothing.
    pub fn dead_node_sweep(&mut self, txn: &mut Transaction) -> Result<Vec<NodeId>> {
        let mut dead_nodes = Vec::new();
        loop {
            let mut removed_any = false;
            for id in self.tree.all_live_ids() {
                let Some(v) = self.tree.get(id) else { continue };
                if v.flags.deleted {
                    continue;
                }
                let Some(when) = v.schema.when.clone() else { continue };
                let root = self.tree.root();
                let value = self.evaluator.evaluate(&when.pcb, id, root, &*self.tree, true)?;
                if !value.as_bool() {
                    self.locks.write_ok(&*self.tree, id, txn.session)?;
                    let path = self.tree.path_of(id);
                    if !self.acm.acm_allowed(txn.session, &path, EditOp::Delete) {
                        return Err(DatastoreError::AccessDenied { session: txn.session, path });
                    }
                    self.tree.mark_deleted(id);
                    let mut rec = UndoRec::new(EditAction::Delete, EditOp::Delete);
                    rec.cur_node = Some(id);
                    txn.undo.push(rec);
                    dead_nodes.push(id);
                    removed_any = true;
                }
            }
            if !removed_any {
                break;
            }
        }
        Ok(dead_nodes)
    }

    /// Phase C2 (spec §4.4): invoke SIL commit for every UndoRec in order;
    /// on the first rejection stop, leave the remainder `Skipped`, and run
    /// Phase R. On full success perform the deferred structural cleanup.
    pub fn commit(&mut self, txn: &mut Transaction) -> Result<()> {
        let mut stopped_at = None;
        for i in 0..txn.undo.records().len() {
            let (new_node, cur_node) = {
                let rec = &txn.undo.records()[i];
                (rec.new_node, rec.cur_node)
            };
            match self.sil.dispatch(SilPhase::Commit, EditOp::Commit, txn.session, txn.txid, new_node, cur_node, &*self.tree) {
                Ok(SilDispatch::Invoked(outcome)) => txn.undo.records_mut()[i].commit_res = Some(outcome),
                Ok(SilDispatch::NoHandler) => txn.undo.records_mut()[i].commit_res = Some(SilOutcome::Ok),
                Err(e) => {
                    log::warn!("SIL commit rejected transaction {} at record {i}: {e}", txn.txid);
                    stopped_at = Some(i);
                    break;
                }
            }
        }

        if let Some(i) = stopped_at {
            for rec in &mut txn.undo.records_mut()[i..] {
                rec.commit_res = Some(SilOutcome::Skipped);
            }
            self.rollback(txn)?;
            return Err(crate::error::SilError::OperationFailed.into());
        }

        self.finish_commit(txn);
        Ok(())
    }

    fn finish_commit(&mut self, txn: &mut Transaction) {
        for rec in txn.undo.records() {
            if let Some(marker) = rec.cur_marker {
                self.tree.free_subtree(marker);
            }
        }
        for &id in txn.undo.extra_deleted() {
            self.tree.free_subtree(id);
        }
        for rec in txn.undo.records() {
            if let Some(target) = rec.new_node.or(rec.cur_node) {
                if self.tree.get(target).is_none() {
                    continue;
                }
                if self.is_running_target {
                    self.tree.clear_dirty(target);
                } else {
                    self.tree.set_dirty(target);
                }
                if self.is_running_target && rec.original_op != EditOp::Load {
                    let path = self.tree.path_of(target);
                    txn.audit.push(crate::audit::AuditRec {
                        txid: txn.txid,
                        session: txn.session,
                        path,
                        op: rec.original_op,
                    });
                }
            }
        }
    }

    /// Phase R (spec §4.4): replay the undo log in reverse.
    pub fn rollback(&mut self, txn: &mut Transaction) -> Result<()> {
        let records: Vec<UndoRec> = txn.undo.records().to_vec();
        for rec in records.iter().rev() {
            match rec.commit_res {
                Some(SilOutcome::Ok) => {
                    let reverse = reverse_edit(rec);
                    if let Err(e) = self.replay_reverse_sil(txn, reverse) {
                        log::warn!("SIL rejected best-effort reverse during rollback: {e}");
                    }
                }
                _ => {
                    let _ = self.sil.dispatch(SilPhase::Rollback, rec.original_op, txn.session, txn.txid, rec.new_node, rec.cur_node, &*self.tree);
                    self.undo_tree_mutation(rec);
                }
            }
        }
        for &id in txn.undo.extra_deleted() {
            self.tree.unmark_deleted(id);
        }
        Ok(())
    }

    fn replay_reverse_sil(&mut self, txn: &Transaction, reverse: ReverseSilCall) -> Result<()> {
        let (phase, new_node, cur_node) = match reverse {
            ReverseSilCall::Delete { node } => (SilPhase::Apply, None, Some(node)),
            ReverseSilCall::Set { node, restore_from, .. } => (SilPhase::Apply, Some(node), Some(restore_from)),
            ReverseSilCall::Move { node, .. } => (SilPhase::Apply, Some(node), None),
            ReverseSilCall::Replace { node } => (SilPhase::Apply, None, Some(node)),
            ReverseSilCall::Create { node } => (SilPhase::Apply, Some(node), None),
            ReverseSilCall::NoOp => return Ok(()),
        };
        self.sil.dispatch(phase, EditOp::None, txn.session, txn.txid, new_node, cur_node, &*self.tree)?;
        self.sil.dispatch(SilPhase::Commit, EditOp::None, txn.session, txn.txid, new_node, cur_node, &*self.tree)?;
        Ok(())
    }

    fn undo_tree_mutation(&mut self, rec: &UndoRec) {
        match rec.edit_action {
            EditAction::Add => {
                if let Some(new_node) = rec.new_node {
                    if let Some(parent) = self.tree.parent_of(new_node) {
                        if let Some(children) = self.tree.get_mut(parent).and_then(|v| v.content.children_mut()) {
                            children.retain(|&c| c != new_node);
                        }
                    }
                    self.tree.free_subtree(new_node);
                }
            }
            EditAction::Set | EditAction::DeleteDefault => {
                if let (Some(node), Some(clone)) = (rec.cur_node, rec.cur_clone) {
                    if let Some(cloned_value) = self.tree.get(clone) {
                        let content = cloned_value.content.clone();
                        let was_default = cloned_value.flags.default;
                        if let Some(v) = self.tree.get_mut(node) {
                            v.content = content;
                            v.flags.default = was_default;
                        }
                    }
                    self.tree.free_subtree(clone);
                }
            }
            EditAction::Delete => {
                if let Some(node) = rec.cur_node {
                    self.tree.unmark_deleted(node);
                }
            }
            EditAction::Replace => {
                if let (Some(cur), Some(new_node)) = (rec.cur_node, rec.new_node) {
                    self.tree.unmark_deleted(cur);
                    self.tree.swap(new_node, cur);
                    self.tree.free_subtree(new_node);
                }
            }
            EditAction::Move => {
                if let Some(node) = rec.new_node {
                    self.tree.unmark_deleted(node);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acm::AllowAll;
    use crate::lock::LockTable;
    use crate::schema::{ConfigFlag, OrderedBy, SchemaKind, SchemaObject};
    use crate::sil::SilRegistry;
    use crate::txn::EditType;
    use crate::value_tree::Value;
    use crate::xpath::{NodeSet, XPathPcb};
    use std::sync::Arc;

    struct NoXPath;
    impl XPathEvaluator for NoXPath {
        fn evaluate(&self, _pcb: &XPathPcb, _context: NodeId, _root: NodeId, _tree: &ValueTree, _config_only: bool) -> Result<XPathValue> {
            Ok(XPathValue::NodeSet(NodeSet::default()))
        }
    }

    fn leaf_schema(name: &str) -> Arc<SchemaObject> {
        Arc::new(SchemaObject {
            module: "m".into(),
            name: name.into(),
            kind: SchemaKind::Leaf,
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
            test_flags: Default::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        })
    }

    #[test]
    fn merge_new_leaf_into_empty_tree_adds_it() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let config = EngineConfig::default();

        let new_leaf = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("7".into())));
        tree.insert_ordered(new_leaf, root);
        tree.get_mut(new_leaf).unwrap().editop = EditOp::Merge;

        let mut txn = Transaction::new(1, SessionId(1), EditType::Partial);
        let mut pipeline = EditPipeline {
            tree: &mut tree,
            locks: &locks,
            sil: &sil,
            acm: &acm,
            evaluator: &evaluator,
            config: &config,
            is_running_target: true,
        };
        pipeline.apply(&mut txn, root, new_leaf, None, EditOp::Merge, false).unwrap();
        assert_eq!(txn.undo.records().len(), 1);
        assert_eq!(txn.undo.records()[0].edit_action, EditAction::Add);
    }

    #[test]
    fn rollback_restores_deleted_node() {
        use pretty_assertions::assert_eq;

        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let config = EngineConfig::default();

        let leaf = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("7".into())));
        tree.insert_ordered(leaf, root);
        let before: Vec<NodeId> = tree.visible_children(root);

        let mut txn = Transaction::new(1, SessionId(1), EditType::Partial);
        {
            let mut pipeline = EditPipeline {
                tree: &mut tree,
                locks: &locks,
                sil: &sil,
                acm: &acm,
                evaluator: &evaluator,
                config: &config,
                is_running_target: false,
            };
            pipeline.apply_here(&mut txn, root, leaf, Some(leaf), EditOp::Delete).unwrap();
        }
        assert!(tree.find_child(root, "m", "c").is_none());

        {
            let mut pipeline = EditPipeline {
                tree: &mut tree,
                locks: &locks,
                sil: &sil,
                acm: &acm,
                evaluator: &evaluator,
                config: &config,
                is_running_target: false,
            };
            // commit_res left None => treated as Skipped by rollback.
            pipeline.rollback(&mut txn).unwrap();
        }
        let after: Vec<NodeId> = tree.visible_children(root);
        assert_eq!(before, after);
    }

    /// `<commit>` (spec §8 scenario 1): a leaf whose effective op resolves
    /// to `Commit` against an existing counterpart actually merges the new
    /// value in, and the resulting `UndoRec` carries `original_op ==
    /// Replace` ("effective op conversion from commit"), not `Commit`.
    #[test]
    fn commit_op_materializes_dirty_leaf_as_replace() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let config = EngineConfig::default();

        let cur = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("5".into())));
        tree.insert_ordered(cur, root);
        let new_leaf = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("7".into())));
        tree.get_mut(new_leaf).unwrap().flags.dirty = true;

        let mut txn = Transaction::new(1, SessionId(1), EditType::Full);
        let mut pipeline = EditPipeline {
            tree: &mut tree,
            locks: &locks,
            sil: &sil,
            acm: &acm,
            evaluator: &evaluator,
            config: &config,
            is_running_target: true,
        };
        pipeline.apply_here(&mut txn, root, new_leaf, Some(cur), EditOp::Commit).unwrap();

        assert_eq!(txn.undo.records().len(), 1);
        let rec = &txn.undo.records()[0];
        assert_eq!(rec.edit_action, EditAction::Set);
        assert_eq!(rec.original_op, EditOp::Replace);
        assert_eq!(tree.get(cur).unwrap().leaf_value(), Some(&Scalar("7".into())));
    }

    /// A `commit`-op container with no existing counterpart is copied in
    /// whole, same as `merge`/`load` (spec §4.4 Phase A table).
    #[test]
    fn commit_op_with_no_counterpart_adds_whole_subtree() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let config = EngineConfig::default();

        let new_leaf = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("7".into())));
        tree.get_mut(new_leaf).unwrap().flags.dirty = true;

        let mut txn = Transaction::new(1, SessionId(1), EditType::Full);
        let mut pipeline = EditPipeline {
            tree: &mut tree,
            locks: &locks,
            sil: &sil,
            acm: &acm,
            evaluator: &evaluator,
            config: &config,
            is_running_target: true,
        };
        pipeline.apply_here(&mut txn, root, new_leaf, None, EditOp::Commit).unwrap();
        assert_eq!(txn.undo.records()[0].edit_action, EditAction::Add);
        assert!(tree.find_child(root, "m", "c").is_some());
    }

    /// Validation errors on siblings accumulate rather than aborting the
    /// scan (spec §7 policy 1): a failing first child doesn't stop the
    /// second child from being visited, and `Flags.res` is set on the
    /// failing one.
    #[test]
    fn validate_accumulates_sibling_errors_instead_of_short_circuiting() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let mut config = EngineConfig::default();
        config.continue_on_validation_error = true;

        // A `list` entry missing its key leaf fails validation (`MissingKey`).
        let list_schema = Arc::new(SchemaObject {
            module: "m".into(),
            name: "users".into(),
            kind: SchemaKind::List,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: vec!["id".into()],
            unique: Vec::new(),
            test_flags: Default::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        });
        let bad_entry = tree.alloc(Value::new_container(list_schema.clone(), "users", "m"));
        tree.insert_ordered(bad_entry, root);
        tree.get_mut(bad_entry).unwrap().editop = EditOp::Merge;

        let good_leaf = tree.alloc(Value::new_leaf(leaf_schema("c"), "c", "m", Scalar("7".into())));
        tree.insert_ordered(good_leaf, root);
        tree.get_mut(good_leaf).unwrap().editop = EditOp::Merge;

        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let mut pipeline = EditPipeline {
            tree: &mut tree,
            locks: &locks,
            sil: &sil,
            acm: &acm,
            evaluator: &evaluator,
            config: &config,
            is_running_target: false,
        };
        let result = pipeline.validate(&txn, root, Some(root), EditOp::None, EditOp::Merge);
        assert!(result.is_ok(), "continue_on_validation_error must suppress the propagated error");
        assert!(tree.get(bad_entry).unwrap().flags.res.is_some());
        // The second sibling was still visited and got its effective op set.
        assert_eq!(tree.get(good_leaf).unwrap().editop, EditOp::Merge);
    }

    /// `insert="before"` with only `insertkey` set (no `insertref` yet)
    /// resolves against the existing sibling with that key (spec §4.4 step
    /// 5), instead of unconditionally failing `InsertMissingInstance`.
    #[test]
    fn validate_resolves_insertkey_to_insertref() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let locks = LockTable::new();
        let sil = SilRegistry::new();
        let acm = AllowAll;
        let evaluator = NoXPath;
        let config = EngineConfig::default();

        let ll_schema = Arc::new(SchemaObject {
            module: "m".into(),
            name: "items".into(),
            kind: SchemaKind::LeafList,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::User,
            must: Vec::new(),
            when: None,
            keys: Vec::new(),
            unique: Vec::new(),
            test_flags: Default::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        });

        let existing = tree.alloc(Value::new_leaf(ll_schema.clone(), "items", "m", Scalar("a".into())));
        tree.insert_ordered(existing, root);

        let new_item = tree.alloc(Value::new_leaf(ll_schema, "items", "m", Scalar("b".into())));
        tree.insert_ordered(new_item, root);
        {
            let v = tree.get_mut(new_item).unwrap();
            v.editop = EditOp::Merge;
            v.editvars.insertop = Some(InsertOp::Before);
            v.editvars.insertkey = Some(smallvec::smallvec![Scalar("a".into())]);
        }

        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let mut pipeline = EditPipeline {
            tree: &mut tree,
            locks: &locks,
            sil: &sil,
            acm: &acm,
            evaluator: &evaluator,
            config: &config,
            is_running_target: false,
        };
        pipeline.validate(&txn, new_item, None, EditOp::None, EditOp::Merge).unwrap();
        assert_eq!(tree.get(new_item).unwrap().editvars.insertref, Some(existing));
    }
}
