//! # vfs-recovery
//!
//! Forensic reconstruction of a VFS metadata cache from its append-only
//! operation log.
//!
//! A virtual filesystem keeps its authoritative state in a chunked,
//! crash-safe operation log and a fast on-disk cache derived from it. When
//! the cache is lost or suspected corrupt, this crate replays the log —
//! from an arbitrary cut point back to the last point a clean window of
//! records precedes it — into a brand new cache directory, then hands the
//! new directory back to the host through a swap-marker file.
//!
//! # Quick Start
//!
//! ```no_run
//! use vfs_recovery::{recover_from_point, AttrKey, AttributeDescriptor, FileId, RecoveryConfig};
//!
//! struct HostEnumerator;
//! impl vfs_recovery::AttributeEnumerator for HostEnumerator {
//!     fn descriptor(&self, _attr_key: AttrKey) -> Option<AttributeDescriptor> {
//!         Some(AttributeDescriptor { version_prefix: None })
//!     }
//! }
//!
//! struct HostWriter;
//! impl vfs_recovery::AttributeWriter for HostWriter {
//!     fn write_attribute(&mut self, _file_id: FileId, _attr_key: AttrKey, _bytes: &[u8]) -> std::io::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RecoveryConfig::default();
//! let enumerator = HostEnumerator;
//! let mut writer = HostWriter;
//!
//! let result = recover_from_point(
//!     0,
//!     std::path::Path::new("/var/vfs/cache"),
//!     std::path::Path::new("/var/vfs/cache/new-cache"),
//!     &config,
//!     &enumerator,
//!     &mut writer,
//!     None,
//! )?;
//! println!("recovered {} files", result.connected_count);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `vfs-core` | Identifiers, flags, configuration, error taxonomy — shared value types with no dependency on the others |
//! | `vfs-log` | The chunked append-only operation log: codec, framing, storage, iteration, content-addressed payload store |
//! | `vfs-snapshot` | Backward-walk reconstruction of file state from a log range, plus the children-attribute codecs |
//! | `vfs-recovery-engine` | The destination-side records table, the recovery-point finder, the swap-marker protocol, and the orchestrator tying them together |
//!
//! Only the names re-exported here are part of the stable public surface;
//! reach into the sub-crates directly only for the narrow extension points
//! (`AttributeEnumerator`, `AttributeWriter`) a host must implement.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use vfs_core::{
    AttrKey, ConfigError, FileId, LogError, NameId, PayloadRef, RecordFlags, RecoveryConfig,
    RecoveryError, RecoveryResult, RecoveryState, CHILDREN_ATTR, LEGACY_SUPER_ROOT_PARENT,
    NO_CONTENT, SUPER_ROOT,
};
pub use vfs_log::{
    CodecError, InvalidReason, LogIterator, LogStorage, Operation, OperationReadResult,
    OperationStatus, PayloadStore, TagMask, WriteSlot,
};
pub use vfs_recovery_engine::attributes;
pub use vfs_recovery_engine::{
    apply_pending_swap, find_closest_preceding_clean_point, read_marker,
    recover_from_point, recovery_points_prior_to, thin_out, write_marker, AttributeDescriptor,
    AttributeEnumerator, AttributeWriter, FileRecord, ProgressCallback, RecordsStore,
    RecoveryPoint, RecoveryPointIter, SwapError, ThinOut, BACKUP_DIR_NAME, MARKER_FILE_NAME,
};
pub use vfs_snapshot::{
    decode_children_by_id, decode_super_root_children, encode_children_by_id,
    encode_super_root_children, ChildrenCodecError, Constraint, Filler, FileSnapshotRow, Mode,
    NotAvailableReason, Property, PropertySelection, SnapshotEngine, VfsSnapshot,
};
