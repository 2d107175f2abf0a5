//! Shared types for the VFS recovery engine.
//!
//! This crate defines the identifiers, flags, configuration and error
//! taxonomy used by `vfs-log`, `vfs-snapshot` and `vfs-recovery-engine`.
//! It has no dependency on any of them: everything here is a plain value
//! type, not a component.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod ids;

pub use config::{ConfigError, RecoveryConfig};
pub use error::{LogError, RecoveryError, RecoveryResult};
pub use ids::{
    AttrKey, FileId, NameId, PayloadRef, RecordFlags, RecoveryState, CHILDREN_ATTR,
    LEGACY_SUPER_ROOT_PARENT, NO_CONTENT, SUPER_ROOT,
};
