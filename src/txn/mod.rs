//! Transaction / TxCb (spec.md §3, §4.4): one edit session against one
//! datastore, carrying its undo log and audit buffer.

pub mod pipeline;
pub mod undo;

pub use pipeline::EditPipeline;
pub use undo::{reverse_edit, EditAction, ReverseSilCall, UndoLog, UndoRec};

use crate::audit::AuditRec;
use crate::datastore::DatastoreId;
use crate::error::DatastoreError;
use crate::lock::SessionId;
use crate::value_tree::NodeId;

/// Scope of a transaction's validation/commit-check pass (spec §4.5
/// "pruning rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditType {
    /// `<edit-config>` against `candidate`: only schemas touched by the
    /// undo log need rechecking.
    Partial,
    /// `<validate>` / `<copy-config>` / top-level replace: check
    /// everything.
    Full,
}

/// One edit session against one datastore (spec §3 `Transaction`).
#[derive(Debug)]
pub struct Transaction {
    pub txid: u64,
    pub session: SessionId,
    /// Datastore this transaction is running against.
    pub target: DatastoreId,
    pub edit_type: EditType,
    /// True once Phase C1 (commit-check) must run: set for `<validate>`,
    /// `<commit>`, `<copy-config>`, and top-level replace (spec §4.4 Phase
    /// C1).
    pub rootcheck: bool,
    pub undo: UndoLog,
    pub audit: Vec<AuditRec>,
    /// Nodes removed by the Phase V2 dead-node sweep (spec §3, §4.4).
    pub dead_nodes: Vec<NodeId>,
    pub apply_res: Option<Result<(), DatastoreError>>,
    pub commit_res: Option<Result<(), DatastoreError>>,
    pub rollback_res: Option<Result<(), DatastoreError>>,
}

impl Transaction {
    pub fn new(txid: u64, session: SessionId, edit_type: EditType) -> Self {
        Transaction {
            txid,
            session,
            target: DatastoreId::Candidate,
            edit_type,
            rootcheck: false,
            undo: UndoLog::new(),
            audit: Vec::new(),
            dead_nodes: Vec::new(),
            apply_res: None,
            commit_res: None,
            rollback_res: None,
        }
    }

    /// Builder used by [`crate::datastore::DatastoreMgr`]'s end-to-end
    /// drivers to set the fields `new` defaults for ad hoc unit tests.
    pub fn for_datastore(txid: u64, session: SessionId, target: DatastoreId, edit_type: EditType, rootcheck: bool) -> Self {
        Transaction {
            target,
            rootcheck,
            ..Transaction::new(txid, session, edit_type)
        }
    }
}
