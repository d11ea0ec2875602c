//! Utility modules.

pub mod debug;
pub mod erase;
pub mod path;

pub use debug::{init_debug_logging, SCRATCH_DEBUG_ENV};
pub use erase::secure_erase;
pub use path::{
    is_symlink, is_traversal_attempt, is_within, locate_entry, path_tag, resolve_and_verify,
    sanitize_filename, verify_direct_child,
};
