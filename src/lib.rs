//! A transactional configuration datastore engine for a NETCONF-style
//! server: the `running`/`candidate`/`startup` datastore trio, their edit
//! pipeline (validate/apply/dead-node-sweep/commit/rollback), partial- and
//! global-locking, commit-check validation, confirmed-commit, and SIL
//! callback dispatch.
//!
//! Schema compilation, the XPath parser/evaluator, access control, and the
//! wire codec are external collaborators; this crate defines the trait
//! seams they plug into ([`xpath::XPathEvaluator`], [`acm::AccessControl`])
//! and consumes a [`schema::SchemaObject`] tree built elsewhere.

pub mod acm;
pub mod audit;
pub mod commit_check;
pub mod config;
pub mod confirmed_commit;
pub mod datastore;
pub mod error;
pub mod lock;
pub mod schema;
pub mod sil;
pub mod txn;
pub mod value_tree;
pub mod xpath;

pub use config::EngineConfig;
pub use datastore::{Datastore, DatastoreId, DatastoreMgr, DatastoreState};
pub use error::{DatastoreError, Result};
pub use lock::{LockId, LockTable, SessionId};
pub use schema::{SchemaObject, SchemaRef};
pub use txn::{EditPipeline, EditType, Transaction};
pub use value_tree::{NodeId, NodePath, ValueTree};
