//! Audit trail (spec.md §4.4, §5): one record per applied edit against
//! `running`, emitted in apply order only after a successful commit.

use crate::lock::SessionId;
use crate::value_tree::{EditOp, NodePath};

#[derive(Debug, Clone)]
pub struct AuditRec {
    pub txid: u64,
    pub session: SessionId,
    pub path: NodePath,
    pub op: EditOp,
}
