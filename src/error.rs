//! Error types surfaced by the engine, and their mapping onto the wire-level
//! rpc-error shape described in spec.md §6.

use enum_as_inner::EnumAsInner;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::lock::SessionId;
use crate::value_tree::NodePath;

/// The `layer` tag attached to every rpc-error per RFC 6241 / spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorLayer {
    Operation,
    Content,
    Rpc,
    Transport,
}

/// Errors raised while walking and mutating the [`ValueTree`](crate::value_tree::ValueTree).
#[derive(Error, Debug, EnumAsInner)]
pub enum TreeError {
    #[error("insert-ref did not resolve to an existing sibling instance")]
    InsertMissingInstance,
    #[error("list entry is missing required key(s)")]
    MissingKey,
    #[error("operation attribute is incompatible with the inherited default-operation")]
    BadAttribute,
    #[error("node already exists")]
    DataExists,
    #[error("node targeted by delete does not exist")]
    DataMissing,
    #[error("with-defaults attribute does not match the schema default")]
    UnexpectedInsertAttrs,
    #[error("choice has no selected case but one is mandatory")]
    MissingChoice,
    #[error("more than one case of the same choice is present")]
    ExtraChoice,
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Errors raised by the lock manager (spec §4.2, §5).
#[derive(Error, Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum LockError {
    #[error("datastore is already locked or a partial lock is outstanding")]
    InUse,
    #[error("node is locked by session {owner}")]
    LockDenied { owner: SessionId },
    #[error("a commit is already in progress against this datastore")]
    InUseCommit,
    #[error("session does not hold the lock it attempted to release")]
    NotOwner,
}

/// Errors raised by [`CommitChecker`](crate::commit_check::CommitChecker).
#[derive(Error, Debug, Clone, EnumAsInner)]
pub enum CommitCheckError {
    #[error("min-elements violated at {path}")]
    MinElemsViolation { path: NodePath },
    #[error("max-elements violated at {path}")]
    MaxElemsViolation { path: NodePath },
    #[error("mandatory instance missing at {path}")]
    MissingValInst { path: NodePath },
    #[error("unexpected extra instance at {path}")]
    ExtraValInst { path: NodePath },
    #[error("unique test failed between {path_a} and {path_b}")]
    UniqueTestFailed { path_a: NodePath, path_b: NodePath },
    #[error("must-stmt failed at {path}: {expr}")]
    MustTestFailed { path: NodePath, expr: String },
    #[error("rpc input when-stmt failed: {expr}")]
    RpcWhenFailed { expr: String },
    #[error("xpath expression did not evaluate to a node-set")]
    XPathNotNodeset,
    #[error("xpath expression evaluated to an empty node-set")]
    XPathNodesetEmpty,
    #[error("leafref or instance-identifier target not found at {path}")]
    InvalidValue { path: NodePath },
    #[error("choice has no selected case but one is mandatory at {path}")]
    MissingChoice { path: NodePath },
    #[error("more than one case of the same choice is present at {path}")]
    ExtraChoice { path: NodePath },
}

/// Errors raised by SIL callback dispatch (spec §4.7, §6).
#[derive(Error, Debug, Clone, EnumAsInner)]
pub enum SilError {
    #[error("SIL callback rejected the operation")]
    OperationFailed,
    #[error("server resources exhausted while invoking SIL")]
    ResourceDenied,
}

/// The symbolic error code surfaced to the wire layer, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum DatastoreErrorCode {
    InUse,
    LockDenied,
    InUseCommit,
    AccessDenied,
    InvalidValue,
    MissingKey,
    MissingChoice,
    ExtraChoice,
    UnexpectedInsertAttrs,
    InsertMissingInstance,
    DataExists,
    DataMissing,
    MinElemsViolation,
    MaxElemsViolation,
    MissingValInst,
    ExtraValInst,
    UniqueTestFailed,
    MustTestFailed,
    RpcWhenFailed,
    XPathNotNodeset,
    XPathNodesetEmpty,
    ResourceDenied,
    OperationFailed,
}

/// The rpc-error representation handed to the (out-of-scope) wire codec.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: DatastoreErrorCode,
    pub layer: ErrorLayer,
    pub node_type: Option<String>,
    pub path: Option<NodePath>,
}

/// Top-level error type for the engine.
#[derive(Error, Debug, EnumAsInner)]
pub enum DatastoreError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    CommitCheck(#[from] CommitCheckError),
    #[error(transparent)]
    Sil(#[from] SilError),
    #[error("access denied for session {session} on {path}")]
    AccessDenied { session: SessionId, path: NodePath },
    #[error("datastore is not in a state that accepts this operation")]
    WrongState,
    #[error("internal invariant violated: {0}")]
    Internal(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatastoreError {
    /// `SET_ERROR(InternalVal)` from spec §7: log and return cleanly instead
    /// of panicking on an invariant violation.
    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("internal datastore invariant violated: {msg}");
        DatastoreError::Internal(msg)
    }

    /// Map this error onto the wire-level rpc-error shape (spec §6).
    pub fn to_rpc_error(&self) -> RpcError {
        use DatastoreErrorCode as C;
        let (code, layer, path) = match self {
            DatastoreError::Tree(TreeError::InsertMissingInstance) => {
                (C::InsertMissingInstance, ErrorLayer::Content, None)
            }
            DatastoreError::Tree(TreeError::MissingKey) => (C::MissingKey, ErrorLayer::Content, None),
            DatastoreError::Tree(TreeError::BadAttribute) => (C::UnexpectedInsertAttrs, ErrorLayer::Operation, None),
            DatastoreError::Tree(TreeError::DataExists) => (C::DataExists, ErrorLayer::Content, None),
            DatastoreError::Tree(TreeError::DataMissing) => (C::DataMissing, ErrorLayer::Content, None),
            DatastoreError::Tree(TreeError::UnexpectedInsertAttrs) => {
                (C::UnexpectedInsertAttrs, ErrorLayer::Operation, None)
            }
            DatastoreError::Tree(TreeError::MissingChoice) => (C::MissingChoice, ErrorLayer::Content, None),
            DatastoreError::Tree(TreeError::ExtraChoice) => (C::ExtraChoice, ErrorLayer::Content, None),
            DatastoreError::Tree(TreeError::Lock(LockError::LockDenied { .. })) => {
                (C::LockDenied, ErrorLayer::Operation, None)
            }
            DatastoreError::Tree(TreeError::Lock(_)) => (C::InUse, ErrorLayer::Operation, None),
            DatastoreError::Lock(LockError::InUse) => (C::InUse, ErrorLayer::Operation, None),
            DatastoreError::Lock(LockError::LockDenied { .. }) => (C::LockDenied, ErrorLayer::Operation, None),
            DatastoreError::Lock(LockError::InUseCommit) => (C::InUseCommit, ErrorLayer::Operation, None),
            DatastoreError::Lock(LockError::NotOwner) => (C::LockDenied, ErrorLayer::Operation, None),
            DatastoreError::CommitCheck(CommitCheckError::MinElemsViolation { path }) => {
                (C::MinElemsViolation, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::MaxElemsViolation { path }) => {
                (C::MaxElemsViolation, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::MissingValInst { path }) => {
                (C::MissingValInst, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::ExtraValInst { path }) => {
                (C::ExtraValInst, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::UniqueTestFailed { path_a, .. }) => {
                (C::UniqueTestFailed, ErrorLayer::Content, Some(path_a.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::MustTestFailed { path, .. }) => {
                (C::MustTestFailed, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::RpcWhenFailed { .. }) => {
                (C::RpcWhenFailed, ErrorLayer::Rpc, None)
            }
            DatastoreError::CommitCheck(CommitCheckError::XPathNotNodeset) => {
                (C::XPathNotNodeset, ErrorLayer::Content, None)
            }
            DatastoreError::CommitCheck(CommitCheckError::XPathNodesetEmpty) => {
                (C::XPathNodesetEmpty, ErrorLayer::Content, None)
            }
            DatastoreError::CommitCheck(CommitCheckError::InvalidValue { path }) => {
                (C::InvalidValue, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::MissingChoice { path }) => {
                (C::MissingChoice, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::CommitCheck(CommitCheckError::ExtraChoice { path }) => {
                (C::ExtraChoice, ErrorLayer::Content, Some(path.clone()))
            }
            DatastoreError::Sil(SilError::OperationFailed) => (C::OperationFailed, ErrorLayer::Operation, None),
            DatastoreError::Sil(SilError::ResourceDenied) => (C::ResourceDenied, ErrorLayer::Operation, None),
            DatastoreError::AccessDenied { path, .. } => (C::AccessDenied, ErrorLayer::Operation, Some(path.clone())),
            DatastoreError::WrongState => (C::OperationFailed, ErrorLayer::Operation, None),
            DatastoreError::Internal(_) | DatastoreError::Other(_) => (C::OperationFailed, ErrorLayer::Operation, None),
        };
        RpcError {
            code,
            layer,
            node_type: None,
            path,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatastoreError>;
