//! Shared state for the scratch manager.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::config::ScratchConfig;
use crate::error::ScratchError;
use crate::ledger::DeletionLedger;
use crate::sandbox::{platform_immutable_flag, SandboxAllocator, SessionId};

/// Internal state for the scratch manager.
pub struct ManagerState {
    /// The configuration the manager was built with.
    pub config: ScratchConfig,

    /// Session to sandbox mapping.
    pub allocator: SandboxAllocator,

    /// Pending deletions.
    pub ledger: DeletionLedger,

    /// Last time each session was seen by this process.
    activity: RwLock<HashMap<SessionId, SystemTime>>,
}

impl ManagerState {
    /// Create the state, creating the scratch root if needed.
    pub fn new(config: ScratchConfig) -> Result<Self, ScratchError> {
        config.validate()?;

        let allocator = SandboxAllocator::new(&config.resolved_root(), &config.directory_prefix)?;
        let ledger = DeletionLedger::new(platform_immutable_flag(config.immutable_sidecars));

        Ok(Self {
            config,
            allocator,
            ledger,
            activity: RwLock::new(HashMap::new()),
        })
    }

    /// Canonical scratch root.
    pub fn root(&self) -> &Path {
        self.allocator.root()
    }

    /// Record that a session was seen at `at`.
    pub fn touch(&self, session: &SessionId, at: SystemTime) {
        self.activity.write().insert(session.clone(), at);
    }

    /// Drop a session from the activity registry.
    pub fn forget(&self, session: &SessionId) {
        self.activity.write().remove(session);
    }

    /// Whether a session was seen within `window` before `now`.
    pub fn is_recently_active(&self, session: &SessionId, now: SystemTime, window: Duration) -> bool {
        self.activity
            .read()
            .get(session)
            .map(|seen| now.duration_since(*seen).unwrap_or_default() <= window)
            .unwrap_or(false)
    }

    /// Drop every session not seen within `window` before `now`.
    pub fn prune(&self, now: SystemTime, window: Duration) {
        self.activity
            .write()
            .retain(|_, seen| now.duration_since(*seen).unwrap_or_default() <= window);
    }

    /// Forget all sessions.
    pub fn clear_activity(&self) {
        self.activity.write().clear();
    }

    /// Number of sessions currently tracked.
    pub fn active_sessions(&self) -> usize {
        self.activity.read().len()
    }
}
