//! Engine-wide tunables. The source exposes these as compile-time constants
//! or CLI flags; here they are fields on a config struct constructed by the
//! embedder, per the "single shared context over globals" guidance in
//! spec.md §9.

use std::time::Duration;

/// Controls how a `with-defaults` read trims leaves whose value equals the
/// schema default (supplemental behavior, see SPEC_FULL.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithDefaultsMode {
    ReportAll,
    Trim,
    Explicit,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default `<confirmed-commit>` timeout when the client omits one.
    pub default_confirmed_commit_timeout: Duration,
    /// Upper bound on concurrently outstanding partial locks per session.
    /// `None` means unbounded, matching the source.
    pub max_partial_locks_per_session: Option<u32>,
    /// If true, a validation error on one sibling does not abort scanning the
    /// rest of the edit (`--startup-error=continue`, spec §7).
    pub continue_on_validation_error: bool,
    /// Default `with-defaults basic-mode` applied when a read request omits
    /// an explicit `with-defaults` parameter.
    pub default_with_defaults_mode: WithDefaultsMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_confirmed_commit_timeout: Duration::from_secs(600),
            max_partial_locks_per_session: None,
            continue_on_validation_error: false,
            default_with_defaults_mode: WithDefaultsMode::Trim,
        }
    }
}
