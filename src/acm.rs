//! The access-control contract (spec.md §6). Session management,
//! authentication, and the access-control model itself are external
//! collaborators; this module only defines the interface the engine calls
//! through.

use crate::lock::SessionId;
use crate::value_tree::{EditOp, NodePath};

/// Access-control decision point, consulted once per node per phase (spec
/// §6).
pub trait AccessControl: Send + Sync {
    /// `acm_allowed(session, path, op) -> bool` from spec §4.2 step 2.
    fn acm_allowed(&self, session: SessionId, path: &NodePath, op: EditOp) -> bool;
}

/// An `AccessControl` that allows everything; useful for tests and for
/// embedders that enforce ACM entirely upstream of this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn acm_allowed(&self, _session: SessionId, _path: &NodePath, _op: EditOp) -> bool {
        true
    }
}
