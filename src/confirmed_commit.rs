//! `ConfirmedCommit` (spec.md §4.6): two-phase `<commit>` that auto-reverts
//! unless confirmed within a deadline.

use std::time::{Duration, Instant};

use crate::lock::SessionId;
use crate::value_tree::NodeId;

/// Parameters of a `<commit confirmed>` request.
#[derive(Debug, Clone)]
pub struct ConfirmedCommitRequest {
    pub timeout: Duration,
    pub persist: bool,
    pub persist_id: Option<String>,
}

#[derive(Debug)]
struct Active {
    session: SessionId,
    persist_id: Option<String>,
    deadline: Instant,
    /// Snapshot of `running`'s root, taken when confirmed-commit began
    /// (spec §4.6 `backup_root`), restored verbatim on timeout.
    backup_root: NodeId,
}

/// Per-datastore confirmed-commit state (spec §4.6). `backup_root` lives in
/// the same arena as the datastore it backs up: it is a [`ValueTree::clone_subtree`]
/// snapshot kept alive (and freed) by whoever drives the timeout.
#[derive(Debug, Default)]
pub struct ConfirmedCommit {
    active: Option<Active>,
}

pub enum CommitOutcome {
    /// First `<commit confirmed>`: `backup_root` was just taken.
    Started,
    /// A subsequent `<commit confirmed>` extending the deadline.
    Extended,
    /// A plain `<commit>` (no `confirmed` flag) while active: finalises.
    Finalized,
}

impl ConfirmedCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn backup_root(&self) -> Option<NodeId> {
        self.active.as_ref().map(|a| a.backup_root)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.deadline)
    }

    /// `commit(confirmed, timeout, persist, persist_id)` from spec §4.6.
    /// `snapshot_root` is the caller-supplied [`NodeId`] of a just-taken
    /// `clone_subtree` of `running`'s root.
    pub fn commit(
        &mut self,
        session: SessionId,
        confirmed: bool,
        req: ConfirmedCommitRequest,
        snapshot_root: impl FnOnce() -> NodeId,
    ) -> CommitOutcome {
        match &mut self.active {
            None => {
                if confirmed {
                    let backup_root = snapshot_root();
                    self.active = Some(Active {
                        session,
                        persist_id: if req.persist { req.persist_id.clone() } else { None },
                        deadline: Instant::now() + req.timeout,
                        backup_root,
                    });
                }
                CommitOutcome::Started
            }
            Some(active) => {
                let matches = match &active.persist_id {
                    Some(pid) => req.persist_id.as_deref() == Some(pid.as_str()),
                    None => active.session == session,
                };
                if !matches {
                    // A commit from an unrelated session/persist-id while
                    // one is active is treated as a fresh one-shot finalize
                    // by the caller; state here is left untouched.
                    return CommitOutcome::Finalized;
                }
                if confirmed {
                    active.deadline = Instant::now() + req.timeout;
                    CommitOutcome::Extended
                } else {
                    self.active = None;
                    CommitOutcome::Finalized
                }
            }
        }
    }

    /// `check_timeout()` from spec §4.6: returns the backup root to roll
    /// back to, clearing state, if the deadline has passed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<NodeId> {
        match &self.active {
            Some(active) if now >= active.deadline => {
                let backup = active.backup_root;
                self.active = None;
                Some(backup)
            }
            _ => None,
        }
    }

    /// Session exit (spec §4.6): cancel immediately unless persisted.
    pub fn on_session_exit(&mut self, session: SessionId) -> Option<NodeId> {
        match &self.active {
            Some(active) if active.session == session && active.persist_id.is_none() => {
                let backup = active.backup_root;
                self.active = None;
                Some(backup)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_then_extends_then_finalizes() {
        let mut cc = ConfirmedCommit::new();
        let session = SessionId(1);
        let req = ConfirmedCommitRequest {
            timeout: Duration::from_secs(60),
            persist: false,
            persist_id: None,
        };
        let outcome = cc.commit(session, true, req.clone(), || NodeId(42));
        assert!(matches!(outcome, CommitOutcome::Started));
        assert!(cc.is_active());

        let outcome = cc.commit(session, true, req.clone(), || NodeId(99));
        assert!(matches!(outcome, CommitOutcome::Extended));
        assert_eq!(cc.backup_root(), Some(NodeId(42)));

        let outcome = cc.commit(session, false, req, || NodeId(0));
        assert!(matches!(outcome, CommitOutcome::Finalized));
        assert!(!cc.is_active());
    }

    #[test]
    fn timeout_returns_backup_and_clears() {
        let mut cc = ConfirmedCommit::new();
        let req = ConfirmedCommitRequest {
            timeout: Duration::from_secs(0),
            persist: false,
            persist_id: None,
        };
        cc.commit(SessionId(1), true, req, || NodeId(7));
        let backup = cc.check_timeout(Instant::now() + Duration::from_millis(1));
        assert_eq!(backup, Some(NodeId(7)));
        assert!(!cc.is_active());
    }

    #[test]
    fn session_exit_without_persist_cancels() {
        let mut cc = ConfirmedCommit::new();
        let req = ConfirmedCommitRequest {
            timeout: Duration::from_secs(60),
            persist: false,
            persist_id: None,
        };
        cc.commit(SessionId(1), true, req, || NodeId(3));
        let backup = cc.on_session_exit(SessionId(1));
        assert_eq!(backup, Some(NodeId(3)));
        assert!(!cc.is_active());
    }
}
