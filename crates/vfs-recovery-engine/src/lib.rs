//! Reconstructing a corrupted VFS metadata cache from its operation log.
//!
//! - `records`: `RecordsStore`, the destination-side fixed-stride table
//!   of file records recovery writes.
//! - `attributes`: the narrow `AttributeEnumerator`/`AttributeWriter`
//!   traits recovery uses to reach the host's attribute subsystem.
//! - `point_finder`: `find_closest_preceding_clean_point`,
//!   `recovery_points_prior_to`, `thin_out` — picking a safe cut point.
//! - `swap`: the swap-marker protocol that hands the rebuilt cache back
//!   to the host on next start.
//! - `orchestrator`: `recover_from_point`, the four-stage pipeline that
//!   ties every other module together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attributes;
pub mod orchestrator;
pub mod point_finder;
pub mod records;
pub mod swap;

pub use attributes::{AttributeDescriptor, AttributeEnumerator, AttributeWriter};
pub use orchestrator::{recover_from_point, ProgressCallback};
pub use point_finder::{
    find_closest_preceding_clean_point, recovery_points_prior_to, thin_out, RecoveryPoint,
    RecoveryPointIter, ThinOut,
};
pub use records::{FileRecord, RecordsStore};
pub use swap::{apply_pending_swap, read_marker, write_marker, SwapError, BACKUP_DIR_NAME, MARKER_FILE_NAME};
