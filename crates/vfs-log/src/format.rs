//! On-disk descriptor framing and chunk/size-file layout.
//!
//! A descriptor is `tag:u8 | payload[value_len(tag)] | tag:u8`. A failed
//! write leaves the head byte as the two's-complement negation of the
//! tag (`256 - tag`) while the tail byte is still the true tag — this is
//! the only signal a reader has that a record was torn mid-write.

use crate::codec::{self, CodecError, Operation};
use std::path::{Path, PathBuf};

/// Directory name, relative to the VFS log root, holding chunk files.
pub const OPERATIONS_DIR: &str = "operations";

/// File name, inside the operations directory, holding the 8-byte LE
/// persistent size.
pub const SIZE_FILE_NAME: &str = "size";

/// Default on-disk chunk granularity (64 MiB). Only the tail chunk is
/// ever open for writing.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Width, in decimal digits, of a chunk's file name.
const CHUNK_NAME_WIDTH: usize = 10;

/// The path of the chunk file holding `chunk_index`.
pub fn chunk_path(operations_dir: &Path, chunk_index: u64) -> PathBuf {
    operations_dir.join(format!("{:0width$}", chunk_index, width = CHUNK_NAME_WIDTH))
}

/// The path of the persistent-size marker file.
pub fn size_file_path(operations_dir: &Path) -> PathBuf {
    operations_dir.join(SIZE_FILE_NAME)
}

/// Read the persistent size marker, defaulting to `0` if the file does
/// not exist (a freshly created log).
pub fn read_persistent_size(operations_dir: &Path) -> std::io::Result<u64> {
    let path = size_file_path(operations_dir);
    match std::fs::read(&path) {
        Ok(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
        Ok(_) => Ok(0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Overwrite the persistent size marker. Used both by the live
/// [`crate::storage::LogStorage`] writer and, directly, by recovery's
/// stage 0 when it truncates the copied log to the recovery cut-point.
pub fn write_persistent_size(operations_dir: &Path, size: u64) -> std::io::Result<()> {
    std::fs::create_dir_all(operations_dir)?;
    let path = size_file_path(operations_dir);
    std::fs::write(path, size.to_le_bytes())
}

/// The head byte written for a record whose appender failed mid-write:
/// the two's-complement negation of `tag`.
pub fn torn_head_byte(tag: u8) -> u8 {
    tag.wrapping_neg()
}

/// Build the complete on-disk bytes for a successfully written
/// descriptor: head tag, payload, tail tag.
pub fn frame_complete(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 2);
    bytes.push(tag);
    bytes.extend_from_slice(payload);
    bytes.push(tag);
    bytes
}

/// Build the complete on-disk bytes for a torn write: negated head,
/// zero-filled payload, true tail tag.
pub fn frame_torn(tag: u8) -> Vec<u8> {
    let len = codec::value_len(tag).unwrap_or(0);
    let mut bytes = Vec::with_capacity(len + 2);
    bytes.push(torn_head_byte(tag));
    bytes.resize(len + 1, 0);
    bytes.push(tag);
    bytes
}

/// Why a descriptor read was classified `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// The head byte (or its negation) does not name a known tag.
    #[error("tag byte {0} is out of the valid range")]
    TagOutOfRange(u8),
    /// The tail byte did not match the tag implied by the head byte.
    #[error("descriptor tail byte {tail} does not match head-implied tag {tag}")]
    TailMismatch {
        /// The tag implied by the head byte.
        tag: u8,
        /// The tail byte actually read.
        tail: u8,
    },
    /// The framing bytes matched but the payload would not decode.
    #[error("payload decode failed for tag {tag}: {source}")]
    DecodeFailed {
        /// The tag the payload was decoded against.
        tag: u8,
        /// The underlying codec error.
        source: CodecError,
    },
}

/// The outcome of reading one descriptor from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationReadResult {
    /// Both framing bytes matched and the payload decoded.
    Complete(Operation),
    /// The record was torn (negated head, true tail) or was skipped by a
    /// filtered read whose mask excluded its tag.
    Incomplete(u8),
    /// The framing bytes are inconsistent; this position is not a valid
    /// record boundary.
    Invalid(InvalidReason),
}

impl OperationReadResult {
    /// The operation, if this result is `Complete`.
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            OperationReadResult::Complete(op) => Some(op),
            _ => None,
        }
    }

    /// Whether this result poisons an iterator traversing in the
    /// direction that produced it.
    pub fn is_invalid(&self) -> bool {
        matches!(self, OperationReadResult::Invalid(_))
    }
}

/// Classify a descriptor given its already-read head byte, value bytes
/// and tail byte. `decode_payload` controls whether a `Complete` frame's
/// bytes are actually decoded (the filtered fast path skips this for
/// tags outside the requested mask).
pub fn classify(head: u8, value: &[u8], tail: u8, decode_payload: bool) -> OperationReadResult {
    if (1..=codec::MAX_TAG).contains(&head) {
        let tag = head;
        if tail != tag {
            return OperationReadResult::Invalid(InvalidReason::TailMismatch { tag, tail });
        }
        if !decode_payload {
            return OperationReadResult::Incomplete(tag);
        }
        return match codec::decode(tag, value) {
            Ok(op) => OperationReadResult::Complete(op),
            Err(source) => OperationReadResult::Invalid(InvalidReason::DecodeFailed { tag, source }),
        };
    }

    let presumed_tag = head.wrapping_neg();
    if (1..=codec::MAX_TAG).contains(&presumed_tag) {
        if tail != presumed_tag {
            return OperationReadResult::Invalid(InvalidReason::TailMismatch {
                tag: presumed_tag,
                tail,
            });
        }
        return OperationReadResult::Incomplete(presumed_tag);
    }

    OperationReadResult::Invalid(InvalidReason::TagOutOfRange(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Operation, OperationStatus, TAG_EVENT_START};

    #[test]
    fn complete_frame_round_trips() {
        let op = Operation::EventStart { timestamp: 42 };
        let payload = codec::encode(&op);
        let framed = frame_complete(TAG_EVENT_START, &payload);
        assert_eq!(framed[0], TAG_EVENT_START);
        assert_eq!(*framed.last().unwrap(), TAG_EVENT_START);
        let result = classify(
            framed[0],
            &framed[1..framed.len() - 1],
            *framed.last().unwrap(),
            true,
        );
        assert_eq!(result, OperationReadResult::Complete(op));
    }

    #[test]
    fn torn_frame_is_incomplete() {
        let framed = frame_torn(TAG_EVENT_START);
        assert_eq!(framed[0], TAG_EVENT_START.wrapping_neg());
        let result = classify(
            framed[0],
            &framed[1..framed.len() - 1],
            *framed.last().unwrap(),
            true,
        );
        assert_eq!(result, OperationReadResult::Incomplete(TAG_EVENT_START));
    }

    #[test]
    fn mismatched_tail_is_invalid() {
        let result = classify(TAG_EVENT_START, &[0u8; 8], TAG_EVENT_START + 1, true);
        assert!(result.is_invalid());
    }

    #[test]
    fn tag_zero_is_invalid() {
        let result = classify(0, &[], 0, true);
        assert_eq!(
            result,
            OperationReadResult::Invalid(InvalidReason::TagOutOfRange(0))
        );
    }

    #[test]
    fn filtered_skip_returns_incomplete_without_decoding() {
        let op = Operation::SetFlags {
            file_id: 1,
            flags: 0,
            status: OperationStatus::Success,
        };
        let payload = codec::encode(&op);
        let framed = frame_complete(op.tag(), &payload);
        let result = classify(
            framed[0],
            &framed[1..framed.len() - 1],
            *framed.last().unwrap(),
            false,
        );
        assert_eq!(result, OperationReadResult::Incomplete(op.tag()));
    }
}
