//! Error taxonomy for the log storage and recovery pipeline.
//!
//! Two error types cover the whole system:
//!
//! - [`LogError`] — I/O and boundary failures reading or appending to the
//!   log itself. Framing inconsistencies are *not* represented here; they
//!   are a per-record classification (`OperationReadResult::Invalid` /
//!   `Incomplete`), not an exception, because a corrupt byte range is an
//!   expected outcome of reading a crash-damaged log.
//! - [`RecoveryError`] — fatal conditions that abort a recovery attempt
//!   before it can commit. Everything else recovery encounters (a missing
//!   property, a failed attribute write, a duplicate child) is non-fatal
//!   and tallied into [`RecoveryResult`] instead of being thrown.

use crate::ids::FileId;
use std::path::PathBuf;

/// Errors from reading or appending to the operation log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The underlying file I/O failed.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested position precedes the log's current start offset
    /// (it was dropped by a prior `clearUpTo`).
    #[error("position {position} precedes the log start offset {start_offset}")]
    BeforeStartOffset {
        /// The position that was requested.
        position: u64,
        /// The log's current start offset.
        start_offset: u64,
    },

    /// The requested position is at or beyond the persistent end of the
    /// log.
    #[error("position {position} is at or beyond the persistent log size {size}")]
    AtOrBeyondEnd {
        /// The position that was requested.
        position: u64,
        /// The log's current persistent size.
        size: u64,
    },

    /// A tag outside `[1, MAX_TAG]` was encountered where a valid tag was
    /// required (e.g. as an argument to `appendReservation`).
    #[error("tag {0} is outside the valid range")]
    InvalidTag(u8),
}

/// Fatal conditions that abort an in-flight recovery. Every variant here
/// unwinds the pipeline and leaves the destination directory for the
/// caller to clean up; no swap marker is written.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The underlying file I/O failed.
    #[error("recovery I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The destination directory already contains files.
    #[error("destination directory {0:?} is not empty")]
    DestinationNotEmpty(PathBuf),

    /// A required interner file (name enumerator or attribute enumerator)
    /// is missing from the source directory.
    #[error("source directory is missing required file {0:?}")]
    EnumeratorMissing(PathBuf),

    /// The source log directory and the destination directory resolve to
    /// the same path.
    #[error("log directory and destination directory are the same path")]
    LogDirEqualsDestination,

    /// Writing the patched creation timestamp into the new records header
    /// failed.
    #[error("failed to patch creation timestamp: {0}")]
    TimestampPatchFailed(std::io::Error),

    /// The new records handle reported an error through its error
    /// channel.
    #[error("new records handle reported an error: {0}")]
    RecordsHandle(String),

    /// An attribute write failed with an I/O-class error, which is
    /// promoted to fatal rather than counted as `BOTCHED`.
    #[error("attribute write failed fatally for file {file_id}: {source}")]
    AttributeWriteFatal {
        /// The file whose attribute write failed.
        file_id: FileId,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The point finder found no window of `clean_window` consecutive
    /// complete, non-exceptional records before the supplied point.
    #[error("no clean recovery point exists before the supplied point")]
    NoCleanRecoveryPoint,

    /// A log-level error surfaced while recovery was reading the source
    /// log.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The recovery was cancelled from within a progress callback.
    #[error("recovery cancelled: {0}")]
    Cancelled(String),
}

impl RecoveryError {
    /// All `RecoveryError` variants are fatal by construction — this
    /// exists so call sites can write `if err.is_fatal()` without special
    /// casing, matching the taxonomy's intent that non-fatal conditions
    /// never reach this type.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

/// Accumulated, non-fatal outcome of a full recovery pass.
///
/// Every counter here corresponds to a condition the taxonomy marks
/// non-fatal: a missing property, a lost content blob, a duplicate child,
/// a per-attribute failure. A `RecoveryResult` is always produced
/// together with `Ok(())` from the orchestrator; fatal conditions instead
/// produce `Err(RecoveryError)` and no result at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryResult {
    /// Number of fileIds ending `INITIALIZED` (residual — only the
    /// super-root should remain here at completion).
    pub initialized_count: u64,
    /// Number of fileIds that ended `CONNECTED`.
    pub connected_count: u64,
    /// Number of fileIds that ended `UNUSED`.
    pub unused_count: u64,
    /// Number of fileIds that ended `BOTCHED`.
    pub botched_count: u64,
    /// Number of content payloads successfully copied forward.
    pub recovered_contents_count: u64,
    /// Number of content payloads referenced by a record but unavailable
    /// in the payload store.
    pub lost_contents_count: u64,
    /// Number of attribute blobs successfully rewritten.
    pub recovered_attributes_count: u64,
    /// Number of attribute blobs that failed to rewrite (non-fatally).
    pub botched_attributes_count: u64,
    /// Total number of duplicate-named children encountered across all
    /// parents.
    pub duplicate_children_count: u64,
    /// Number of duplicate-named groups resolved via the historical
    /// children attribute (kept exactly one candidate).
    pub duplicate_children_deduplicated: u64,
    /// Number of duplicate-named groups dropped entirely (no single
    /// historical match).
    pub duplicate_children_lost: u64,
    /// The last content id recovered during stage 1, i.e. the highest
    /// densely-allocated payload id.
    pub last_recovered_content_id: crate::ids::PayloadRef,
    /// The highest fileId the orchestrator allocated.
    pub last_allocated_record: FileId,
    /// Wall-clock duration of the recovery pass.
    pub duration: std::time::Duration,
    /// Free-form detail for diagnostics (e.g. the first ten duplicate
    /// child offenders).
    pub detail: String,
}

impl RecoveryResult {
    /// Total number of fileIds accounted for across every terminal state.
    pub fn total_accounted(&self) -> u64 {
        self.connected_count + self.unused_count + self.botched_count
    }

    /// Append a line of free-form detail, keeping prior detail intact.
    pub fn push_detail(&mut self, line: impl AsRef<str>) {
        if !self.detail.is_empty() {
            self.detail.push('\n');
        }
        self.detail.push_str(line.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_result_totals() {
        let result = RecoveryResult {
            connected_count: 3,
            unused_count: 2,
            botched_count: 1,
            ..Default::default()
        };
        assert_eq!(result.total_accounted(), 6);
    }

    #[test]
    fn push_detail_joins_with_newline() {
        let mut result = RecoveryResult::default();
        result.push_detail("first");
        result.push_detail("second");
        assert_eq!(result.detail, "first\nsecond");
    }

    #[test]
    fn recovery_error_is_always_fatal() {
        let err = RecoveryError::LogDirEqualsDestination;
        assert!(err.is_fatal());
    }

    #[test]
    fn log_error_displays_position_context() {
        let err = LogError::BeforeStartOffset {
            position: 10,
            start_offset: 20,
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("20"));
    }
}
