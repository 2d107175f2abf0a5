//! Reconstructing a queryable snapshot of file state from a backward
//! walk of the operation log.
//!
//! - `filler`: `Filler`, `PropertySelection`, `Constraint` — composable
//!   policy for which properties to reconstruct, scoped to which files.
//! - `snapshot`: `VfsSnapshot`, `FileSnapshotRow`, `Property` — the
//!   reconstructed, queryable result.
//! - `engine`: `SnapshotEngine`, the backward-walk algorithm that
//!   applies a filler against a log range.
//! - `children`: delta-compressed codecs for the `CHILDREN_ATTR`
//!   attribute payload, both the super-root's named-pair form and an
//!   ordinary parent's bare fileId-set form.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod children;
pub mod engine;
pub mod filler;
pub mod snapshot;

pub use children::{
    decode_children_by_id, decode_super_root_children, encode_children_by_id,
    encode_super_root_children, ChildrenCodecError,
};
pub use engine::SnapshotEngine;
pub use filler::{Constraint, Filler, Mode, PropertySelection};
pub use snapshot::{FileSnapshotRow, NotAvailableReason, Property, VfsSnapshot};
