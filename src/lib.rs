//! Session Scratch - per-session, self-destructing scratch storage.
//!
//! Each session gets a private directory under a shared scratch root:
//! - Artifacts are marked for deferred deletion and securely erased once
//!   their download window has passed
//! - A session's sandbox is purged at once when the session ends
//! - Sandboxes left behind by abandoned sessions are swept periodically
//!
//! Untrusted filenames are resolved through a path guard that never lets a
//! name escape its sandbox.

pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod sandbox;
pub mod utils;

pub use config::ScratchConfig;
pub use error::{ConfigError, Result, ScratchError};
pub use ledger::{DeletionLedger, DeletionRecord};
pub use manager::{BackgroundSweep, RequestContext, ScratchManager};
pub use sandbox::{SandboxAllocator, SandboxUsage, SessionId};

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::config::ScratchConfig;
    pub use crate::error::{Result, ScratchError};
    pub use crate::manager::{BackgroundSweep, RequestContext, ScratchManager};
    pub use crate::sandbox::SessionId;
}
