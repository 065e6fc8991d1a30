//! `DatastoreMgr` (spec.md §4.7, §5): owns the three named datastores, their
//! state machines, and the process-wide txid counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::acm::AccessControl;
use crate::commit_check::CommitChecker;
use crate::config::EngineConfig;
use crate::confirmed_commit::ConfirmedCommit;
use crate::error::{DatastoreError, Result};
use crate::lock::{LockTable, SessionId};
use crate::schema::SchemaRef;
use crate::sil::SilRegistry;
use crate::txn::{EditPipeline, EditType, Transaction};
use crate::value_tree::{EditOp, NodeId, ValueTree};
use crate::xpath::XPathEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatastoreId {
    Running,
    Candidate,
    Startup,
}

/// A datastore's lifecycle state (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreState {
    Init,
    Ready,
    PartialLocked,
    FullLocked,
    Cleanup,
}

impl DatastoreState {
    fn allows_read(self) -> bool {
        !matches!(self, DatastoreState::Init | DatastoreState::Cleanup)
    }

    fn allows_write(self, caller_holds_full_lock: bool) -> bool {
        match self {
            DatastoreState::Ready | DatastoreState::PartialLocked => true,
            DatastoreState::FullLocked => caller_holds_full_lock,
            DatastoreState::Init | DatastoreState::Cleanup => false,
        }
    }
}

/// One named configuration tree plus its lock table and lifecycle state
/// (spec §3 `Datastore`).
pub struct Datastore {
    pub id: DatastoreId,
    pub tree: ValueTree,
    pub locks: LockTable,
    pub state: DatastoreState,
    pub last_change: Option<std::time::Instant>,
    pub last_txid: u64,
}

impl Datastore {
    fn new(id: DatastoreId, root_schema: SchemaRef) -> Self {
        Datastore {
            id,
            tree: ValueTree::new(root_schema),
            locks: LockTable::new(),
            state: DatastoreState::Init,
            last_change: None,
            last_txid: 0,
        }
    }

    /// `apply_load_root(ds, root)` from spec §6: accepts a validated tree
    /// from the (out-of-scope) loader, used once at boot, and transitions
    /// `Init -> Ready`.
    pub fn apply_load_root(&mut self, tree: ValueTree) -> Result<()> {
        if self.state != DatastoreState::Init {
            return Err(DatastoreError::WrongState);
        }
        self.tree = tree;
        self.state = DatastoreState::Ready;
        Ok(())
    }

    pub fn ensure_readable(&self) -> Result<()> {
        if self.state.allows_read() {
            Ok(())
        } else {
            Err(DatastoreError::WrongState)
        }
    }

    pub fn ensure_writable(&self, caller_holds_full_lock: bool) -> Result<()> {
        if self.state.allows_write(caller_holds_full_lock) {
            Ok(())
        } else {
            Err(DatastoreError::WrongState)
        }
    }

    pub fn enter_full_lock(&mut self) -> Result<()> {
        match self.state {
            DatastoreState::Ready => {
                self.state = DatastoreState::FullLocked;
                Ok(())
            }
            _ => Err(DatastoreError::WrongState),
        }
    }

    pub fn exit_full_lock(&mut self) -> Result<()> {
        match self.state {
            DatastoreState::FullLocked => {
                self.state = DatastoreState::Ready;
                Ok(())
            }
            _ => Err(DatastoreError::WrongState),
        }
    }

    pub fn enter_partial_locked(&mut self) {
        if self.state == DatastoreState::Ready {
            self.state = DatastoreState::PartialLocked;
        }
    }

    pub fn exit_partial_locked_if_empty(&mut self) {
        if self.state == DatastoreState::PartialLocked && self.locks.partial_lock_count() == 0 {
            self.state = DatastoreState::Ready;
        }
    }

    pub fn begin_shutdown(&mut self) {
        self.state = DatastoreState::Cleanup;
    }

    pub fn next_txid(&mut self, txid: u64) {
        debug_assert!(txid > self.last_txid, "txid must be monotonic (spec §5)");
        self.last_txid = txid;
        self.last_change = Some(std::time::Instant::now());
    }
}

/// Owns `running`, `candidate`, `startup`, the SIL registry, and the
/// process-wide txid counter (spec §4.7, §9 "a single shared context passed
/// into every entry point is preferred over globals").
///
/// `<commit>` takes `candidate`'s mutex then `running`'s, in that fixed
/// order, to avoid deadlocking against a concurrent `candidate` edit (spec
/// §5).
pub struct DatastoreMgr {
    pub running: Arc<Mutex<Datastore>>,
    pub candidate: Arc<Mutex<Datastore>>,
    pub startup: Arc<Mutex<Datastore>>,
    pub sil: SilRegistry,
    pub confirmed_commit: Mutex<ConfirmedCommit>,
    pub config: EngineConfig,
    next_txid: AtomicU64,
}

impl DatastoreMgr {
    pub fn new(root_schema: SchemaRef, sil: SilRegistry, config: EngineConfig) -> Self {
        DatastoreMgr {
            running: Arc::new(Mutex::new(Datastore::new(DatastoreId::Running, root_schema.clone()))),
            candidate: Arc::new(Mutex::new(Datastore::new(DatastoreId::Candidate, root_schema.clone()))),
            startup: Arc::new(Mutex::new(Datastore::new(DatastoreId::Startup, root_schema))),
            sil,
            confirmed_commit: Mutex::new(ConfirmedCommit::new()),
            config,
            next_txid: AtomicU64::new(1),
        }
    }

    pub fn datastore(&self, id: DatastoreId) -> &Arc<Mutex<Datastore>> {
        match id {
            DatastoreId::Running => &self.running,
            DatastoreId::Candidate => &self.candidate,
            DatastoreId::Startup => &self.startup,
        }
    }

    /// `txid` is monotonic across *all* transactions on a datastore (spec
    /// §5), drawn from one process-wide counter.
    pub fn alloc_txid(&self) -> u64 {
        self.next_txid.fetch_add(1, Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.running.lock().begin_shutdown();
        self.candidate.lock().begin_shutdown();
        self.startup.lock().begin_shutdown();
    }

    /// `<edit-config>` / `<validate>` (spec §4.4 Phases V -> A -> V2 ->
    /// optional C1), run end to end against one datastore. `edit_tree`'s
    /// root's children are the parsed PDU edit targets (the wire codec that
    /// produces them is out of scope, spec §1); they are bridged into
    /// `target`'s own arena via `ValueTree::clone_subtree_into` before
    /// validate/apply run, since `apply_here`'s swap/add_child calls require
    /// `new_node` and `cur_node` to share one arena.
    ///
    /// On any phase error the transaction is rolled back before the error
    /// is returned, so the caller never observes a half-applied edit.
    pub fn edit_config(
        &self,
        target: DatastoreId,
        session: SessionId,
        edit_type: EditType,
        default_op: EditOp,
        rootcheck: bool,
        acm: &dyn AccessControl,
        evaluator: &dyn XPathEvaluator,
        edit_tree: &ValueTree,
    ) -> Result<Transaction> {
        let txid = self.alloc_txid();
        let mut txn = Transaction::for_datastore(txid, session, target, edit_type, rootcheck);

        let mut ds = self.datastore(target).lock();
        ds.ensure_writable(false)?;

        let target_root = ds.tree.root();
        let bridged: Vec<NodeId> = edit_tree
            .all_children(edit_tree.root())
            .into_iter()
            .map(|child| edit_tree.clone_subtree_into(&mut ds.tree, child))
            .collect();

        let is_running_target = target == DatastoreId::Running;
        let mut pipeline = EditPipeline {
            tree: &mut ds.tree,
            locks: &ds.locks,
            sil: &self.sil,
            acm,
            evaluator,
            config: &self.config,
            is_running_target,
        };

        let outcome = run_validate_apply_and_rootcheck(&mut pipeline, &mut txn, target_root, &bridged, default_op, rootcheck, evaluator);

        match outcome {
            Ok(()) => {
                pipeline.commit(&mut txn)?;
                ds.next_txid(txid);
                Ok(txn)
            }
            Err(e) => {
                let _ = pipeline.rollback(&mut txn);
                Err(e)
            }
        }
    }

    /// `<commit>` (spec §4.4, §5): bridges every dirty top-level node of
    /// `candidate` into `running`'s arena with `EditOp::Commit`, then runs
    /// the same Phase A -> V2 -> C1 -> C2/R sequence as `edit_config` against
    /// `running`, with `rootcheck` always set. Acquires `candidate`'s mutex
    /// then `running`'s, in that fixed order, to avoid deadlocking against a
    /// concurrent `candidate` edit (spec §5).
    pub fn commit(&self, session: SessionId, acm: &dyn AccessControl, evaluator: &dyn XPathEvaluator) -> Result<Transaction> {
        let txid = self.alloc_txid();
        let mut txn = Transaction::for_datastore(txid, session, DatastoreId::Running, EditType::Full, true);

        let candidate = self.candidate.lock();
        let mut running = self.running.lock();
        running.ensure_writable(false)?;

        let running_root = running.tree.root();
        let bridged: Vec<NodeId> = candidate
            .tree
            .visible_children(candidate.tree.root())
            .into_iter()
            .filter(|&c| {
                candidate
                    .tree
                    .get(c)
                    .is_some_and(|v| v.flags.dirty || v.flags.subtree_dirty)
            })
            .map(|child| {
                let new_id = candidate.tree.clone_subtree_into(&mut running.tree, child);
                mark_commit_op(&mut running.tree, new_id);
                new_id
            })
            .collect();

        let mut pipeline = EditPipeline {
            tree: &mut running.tree,
            locks: &running.locks,
            sil: &self.sil,
            acm,
            evaluator,
            config: &self.config,
            is_running_target: true,
        };

        let outcome = run_validate_apply_and_rootcheck(&mut pipeline, &mut txn, running_root, &bridged, EditOp::Commit, true, evaluator);

        match outcome {
            Ok(()) => {
                pipeline.commit(&mut txn)?;
                running.next_txid(txid);
                Ok(txn)
            }
            Err(e) => {
                let _ = pipeline.rollback(&mut txn);
                Err(e)
            }
        }
    }
}

/// Shared tail of `edit_config`/`commit` (spec §4.4 Phases V -> A -> V2 ->
/// optional C1): run the root-level edit set, sweep dead nodes, and
/// (when `rootcheck`) the commit-check pass, recording `txn.dead_nodes`
/// along the way. The caller is responsible for commit-vs-rollback once
/// this returns.
fn run_validate_apply_and_rootcheck(
    pipeline: &mut EditPipeline<'_>,
    txn: &mut Transaction,
    target_root: NodeId,
    bridged: &[NodeId],
    default_op: EditOp,
    rootcheck: bool,
    evaluator: &dyn XPathEvaluator,
) -> Result<()> {
    pipeline.run_top_level_edits(txn, target_root, bridged, default_op)?;
    txn.dead_nodes = pipeline.dead_node_sweep(txn)?;
    if rootcheck {
        let checker = CommitChecker::new(pipeline.tree, evaluator);
        if let Some(first) = checker.check(txn)?.into_iter().next() {
            return Err(first.into());
        }
    }
    Ok(())
}

/// Set `editop = Commit` on `id` and every descendant still present in its
/// content (spec §4.4 Phase A: "for `commit` op only where `dirty`" reads
/// `editop` per node during recursion, not just at the bridged root).
fn mark_commit_op(tree: &mut ValueTree, id: NodeId) {
    if let Some(v) = tree.get_mut(id) {
        v.editop = EditOp::Commit;
    }
    for child in tree.all_children(id) {
        mark_commit_op(tree, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acm::AllowAll;
    use crate::schema::{ConfigFlag, OrderedBy, SchemaKind, SchemaObject};
    use crate::value_tree::{Scalar, Value};
    use crate::xpath::{NodeSet, XPathPcb, XPathValue};

    struct NoXPath;
    impl XPathEvaluator for NoXPath {
        fn evaluate(&self, _pcb: &XPathPcb, _context: NodeId, _root: NodeId, _tree: &ValueTree, _config_only: bool) -> Result<XPathValue> {
            Ok(XPathValue::NodeSet(NodeSet::default()))
        }
    }

    fn leaf_schema(name: &str) -> SchemaRef {
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

    fn floating_leaf_edit(name: &str, value: &str, op: EditOp) -> ValueTree {
        let mut edit_tree = ValueTree::new(SchemaObject::root());
        let edit_root = edit_tree.root();
        let leaf = edit_tree.alloc(Value::new_leaf(leaf_schema(name), name, "m", Scalar(value.into())));
        edit_tree.insert_ordered(leaf, edit_root);
        edit_tree.get_mut(leaf).unwrap().editop = op;
        edit_tree
    }

    /// `<edit-config>` (spec §8 scenario 1, "Merge new leaf"): a freshly
    /// parsed PDU edit tree bridges into `candidate`'s own arena and the new
    /// leaf lands as one of `candidate`'s visible children.
    #[test]
    fn edit_config_merges_new_leaf_into_candidate() {
        let mgr = DatastoreMgr::new(SchemaObject::root(), SilRegistry::new(), EngineConfig::default());
        mgr.candidate.lock().apply_load_root(ValueTree::new(SchemaObject::root())).unwrap();

        let edit_tree = floating_leaf_edit("c", "7", EditOp::Merge);
        let acm = AllowAll;
        let evaluator = NoXPath;

        let txn = mgr
            .edit_config(DatastoreId::Candidate, SessionId(1), EditType::Partial, EditOp::Merge, false, &acm, &evaluator, &edit_tree)
            .unwrap();
        assert_eq!(txn.undo.records().len(), 1);

        let candidate = mgr.candidate.lock();
        let root = candidate.tree.root();
        let found = candidate.tree.find_child(root, "m", "c").expect("leaf merged into candidate");
        assert_eq!(candidate.tree.get(found).unwrap().leaf_value(), Some(&Scalar("7".into())));
    }

    /// `<commit>` (spec §8 scenario 1 end to end): a leaf merged into
    /// `candidate` is dirty, so `<commit>` bridges it into `running` and
    /// materializes it there too.
    #[test]
    fn commit_moves_dirty_candidate_leaf_into_running() {
        let mgr = DatastoreMgr::new(SchemaObject::root(), SilRegistry::new(), EngineConfig::default());
        mgr.candidate.lock().apply_load_root(ValueTree::new(SchemaObject::root())).unwrap();
        mgr.running.lock().apply_load_root(ValueTree::new(SchemaObject::root())).unwrap();

        let edit_tree = floating_leaf_edit("c", "7", EditOp::Merge);
        let acm = AllowAll;
        let evaluator = NoXPath;

        mgr.edit_config(DatastoreId::Candidate, SessionId(1), EditType::Partial, EditOp::Merge, false, &acm, &evaluator, &edit_tree)
            .unwrap();

        mgr.commit(SessionId(1), &acm, &evaluator).unwrap();

        let running = mgr.running.lock();
        let root = running.tree.root();
        let found = running.tree.find_child(root, "m", "c").expect("leaf committed into running");
        assert_eq!(running.tree.get(found).unwrap().leaf_value(), Some(&Scalar("7".into())));
    }

    /// `<edit-config>` with `operation="create"` against an already-present
    /// leaf (spec §8 scenario 2, "Create existing") fails commit-check-free,
    /// straight out of Phase A, and leaves `candidate` untouched.
    #[test]
    fn edit_config_create_against_existing_leaf_fails() {
        let mgr = DatastoreMgr::new(SchemaObject::root(), SilRegistry::new(), EngineConfig::default());
        mgr.candidate.lock().apply_load_root(ValueTree::new(SchemaObject::root())).unwrap();

        let acm = AllowAll;
        let evaluator = NoXPath;
        let first = floating_leaf_edit("c", "7", EditOp::Merge);
        mgr.edit_config(DatastoreId::Candidate, SessionId(1), EditType::Partial, EditOp::Merge, false, &acm, &evaluator, &first)
            .unwrap();

        let second = floating_leaf_edit("c", "9", EditOp::Create);
        let err = mgr
            .edit_config(DatastoreId::Candidate, SessionId(1), EditType::Partial, EditOp::Merge, false, &acm, &evaluator, &second)
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Tree(crate::error::TreeError::DataExists)));

        let candidate = mgr.candidate.lock();
        let root = candidate.tree.root();
        let found = candidate.tree.find_child(root, "m", "c").unwrap();
        assert_eq!(candidate.tree.get(found).unwrap().leaf_value(), Some(&Scalar("7".into())));
    }

    #[test]
    fn txids_are_monotonic_across_datastores() {
        let mgr = DatastoreMgr::new(SchemaObject::root(), SilRegistry::new(), EngineConfig::default());
        let a = mgr.alloc_txid();
        let b = mgr.alloc_txid();
        assert!(b > a);
    }

    #[test]
    fn write_requires_ready_or_own_full_lock() {
        let mut ds = Datastore::new(DatastoreId::Running, SchemaObject::root());
        assert!(ds.ensure_writable(false).is_err());
        ds.apply_load_root(ValueTree::new(SchemaObject::root())).unwrap();
        assert!(ds.ensure_writable(false).is_ok());
        ds.enter_full_lock().unwrap();
        assert!(ds.ensure_writable(false).is_err());
        assert!(ds.ensure_writable(true).is_ok());
    }

    proptest::proptest! {
        /// `alloc_txid` (spec §5: "txid is monotonic across all transactions
        /// on a datastore"): for any number of draws, each one is strictly
        /// greater than every one drawn before it.
        #[test]
        fn alloc_txid_strictly_increasing_over_n_draws(n in 1usize..200) {
            let mgr = DatastoreMgr::new(SchemaObject::root(), SilRegistry::new(), EngineConfig::default());
            let mut last = 0u64;
            for _ in 0..n {
                let txid = mgr.alloc_txid();
                proptest::prop_assert!(txid > last);
                last = txid;
            }
        }
    }
}
