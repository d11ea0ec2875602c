//! Per-request context passed explicitly into the request hooks.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::sandbox::SessionId;

/// Session state the host carries between requests, plus the files the
/// current request produced.
///
/// The host owns persistence (a session cookie, for instance): it builds a
/// context from what it stored, hands it to the manager for the duration of
/// the request, and stores `session()` and `last_activity()` back afterwards.
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    session: Option<SessionId>,
    authenticated: bool,
    last_activity: Option<SystemTime>,
    pending_cleanup: Vec<PathBuf>,
}

impl RequestContext {
    /// Context for a visitor without a session yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context restored from a stored session.
    pub fn with_session(
        session: SessionId,
        authenticated: bool,
        last_activity: Option<SystemTime>,
    ) -> Self {
        Self {
            session: Some(session),
            authenticated,
            last_activity,
            pending_cleanup: Vec::new(),
        }
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn last_activity(&self) -> Option<SystemTime> {
        self.last_activity
    }

    pub(crate) fn touch(&mut self, now: SystemTime) {
        self.last_activity = Some(now);
    }

    /// Schedule a sandbox file for deferred deletion when the request ends.
    pub fn register_cleanup(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.pending_cleanup.contains(&path) {
            self.pending_cleanup.push(path);
        }
    }

    pub fn pending_cleanup(&self) -> &[PathBuf] {
        &self.pending_cleanup
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.pending_cleanup)
    }

    /// Current session, generating a fresh one when there is none.
    pub(crate) fn ensure_session(&mut self) -> SessionId {
        self.session.get_or_insert_with(SessionId::generate).clone()
    }

    /// Forget the session id so it is never reused.
    pub(crate) fn drop_session(&mut self) {
        self.session = None;
        self.last_activity = None;
    }

    /// Reset everything, as on logout.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
