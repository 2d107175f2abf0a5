//! Append-only operation log storage.
//!
//! - `codec`: per-tag serializer/deserializer for operation descriptors
//!   (`Operation`, `OperationStatus`, tag constants).
//! - `format`: on-disk descriptor framing, chunk/size-file paths, and
//!   the `Complete`/`Incomplete`/`Invalid` read classification.
//! - `storage`: `LogStorage`, the chunked append-only log with reserved
//!   write slots and a backpressured write worker pool.
//! - `iterator`: `LogIterator`, a bidirectional, optionally filtered
//!   cursor over a log.
//! - `payload_store`: `PayloadStore`, the content-addressed blob store
//!   paired with the log's `ContentOperation` entries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod format;
pub mod iterator;
pub mod payload_store;
pub mod storage;

pub use codec::{CodecError, Operation, OperationStatus};
pub use format::{InvalidReason, OperationReadResult};
pub use iterator::{LogIterator, TagMask};
pub use payload_store::PayloadStore;
pub use storage::{LogStorage, WriteSlot};
