//! Per-tag serializer/deserializer for operation descriptors.
//!
//! Every [`Operation`] variant corresponds to exactly one tag, and the
//! encoded value size for a tag is fixed — the descriptor framing in
//! [`crate::format`] relies on this to know how many bytes to read before
//! the closing tag byte. Content bytes themselves are never inlined into
//! the log: `AppendContent` only carries the payload reference and byte
//! length, the bytes live in [`crate::payload_store::PayloadStore`].

use vfs_core::{AttrKey, FileId, NameId, PayloadRef};

/// Tag byte for `SetParent`.
pub const TAG_SET_PARENT: u8 = 1;
/// Tag byte for `SetName`.
pub const TAG_SET_NAME: u8 = 2;
/// Tag byte for `SetLength`.
pub const TAG_SET_LENGTH: u8 = 3;
/// Tag byte for `SetTimestamp`.
pub const TAG_SET_TIMESTAMP: u8 = 4;
/// Tag byte for `SetFlags`.
pub const TAG_SET_FLAGS: u8 = 5;
/// Tag byte for `SetContentRecordId`.
pub const TAG_SET_CONTENT_RECORD_ID: u8 = 6;
/// Tag byte for `SetAttribute`.
pub const TAG_SET_ATTRIBUTE: u8 = 7;
/// Tag byte for `AppendContent`.
pub const TAG_APPEND_CONTENT: u8 = 8;
/// Tag byte for `EventStart`.
pub const TAG_EVENT_START: u8 = 9;

/// The highest valid tag. Tag `0` is reserved as "invalid".
pub const MAX_TAG: u8 = TAG_EVENT_START;

/// Whether an operation completed or its source operation failed.
///
/// Exceptional operations are skipped by every snapshot filler: they
/// never contribute a property value, even though the descriptor itself
/// is a well-framed `Complete` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// The operation completed and its value is authoritative.
    Success,
    /// The source operation raised an exception; the value (if any) must
    /// not be trusted.
    Exception,
}

impl OperationStatus {
    fn to_byte(self) -> u8 {
        match self {
            OperationStatus::Success => 0,
            OperationStatus::Exception => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(OperationStatus::Success),
            1 => Ok(OperationStatus::Exception),
            other => Err(CodecError::InvalidStatusByte(other)),
        }
    }
}

/// A decoded log operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Updates a record's `parentId`.
    SetParent {
        /// The file whose parent changed.
        file_id: FileId,
        /// The new parent id (`0` marks the legacy super-root quirk).
        new_parent_id: FileId,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Updates a record's `nameId`.
    SetName {
        /// The file whose name changed.
        file_id: FileId,
        /// The new interned name id.
        name_id: NameId,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Updates a record's `length`.
    SetLength {
        /// The file whose length changed.
        file_id: FileId,
        /// The new length in bytes.
        length: u64,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Updates a record's `timestamp`.
    SetTimestamp {
        /// The file whose timestamp changed.
        file_id: FileId,
        /// The new timestamp, milliseconds since epoch.
        timestamp: u64,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Updates a record's `flags`.
    SetFlags {
        /// The file whose flags changed.
        file_id: FileId,
        /// The new flag bits.
        flags: u32,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Updates a record's `contentId`.
    SetContentRecordId {
        /// The file whose content reference changed.
        file_id: FileId,
        /// The new content id (`0` = no content).
        content_id: PayloadRef,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Writes a per-file attribute blob.
    SetAttribute {
        /// The file the attribute belongs to.
        file_id: FileId,
        /// The enumerated attribute key.
        attr_key: AttrKey,
        /// The payload handle the attribute's bytes are stored under.
        payload_ref: PayloadRef,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Appends a content blob. The bytes themselves live in the payload
    /// store; this descriptor only records the reference and length so
    /// its on-disk size stays fixed.
    AppendContent {
        /// The payload handle the appended bytes were stored under.
        payload_ref: PayloadRef,
        /// Length of the appended blob, in bytes.
        byte_len: u64,
        /// Outcome of the write.
        status: OperationStatus,
    },
    /// Delimits a coarse-grained, user-visible event. Recovery points
    /// must land immediately after one of these.
    EventStart {
        /// Event start time, milliseconds since epoch.
        timestamp: u64,
    },
}

impl Operation {
    /// The tag byte this operation encodes as.
    pub fn tag(&self) -> u8 {
        match self {
            Operation::SetParent { .. } => TAG_SET_PARENT,
            Operation::SetName { .. } => TAG_SET_NAME,
            Operation::SetLength { .. } => TAG_SET_LENGTH,
            Operation::SetTimestamp { .. } => TAG_SET_TIMESTAMP,
            Operation::SetFlags { .. } => TAG_SET_FLAGS,
            Operation::SetContentRecordId { .. } => TAG_SET_CONTENT_RECORD_ID,
            Operation::SetAttribute { .. } => TAG_SET_ATTRIBUTE,
            Operation::AppendContent { .. } => TAG_APPEND_CONTENT,
            Operation::EventStart { .. } => TAG_EVENT_START,
        }
    }

    /// The file this operation concerns, if any. `EventStart` and
    /// `AppendContent` are not file-scoped.
    pub fn file_id(&self) -> Option<FileId> {
        match *self {
            Operation::SetParent { file_id, .. }
            | Operation::SetName { file_id, .. }
            | Operation::SetLength { file_id, .. }
            | Operation::SetTimestamp { file_id, .. }
            | Operation::SetFlags { file_id, .. }
            | Operation::SetContentRecordId { file_id, .. }
            | Operation::SetAttribute { file_id, .. } => Some(file_id),
            Operation::AppendContent { .. } | Operation::EventStart { .. } => None,
        }
    }

    /// The outcome of this operation, if it carries one. `EventStart` is
    /// a pure marker and has none.
    pub fn status(&self) -> Option<OperationStatus> {
        match *self {
            Operation::SetParent { status, .. }
            | Operation::SetName { status, .. }
            | Operation::SetLength { status, .. }
            | Operation::SetTimestamp { status, .. }
            | Operation::SetFlags { status, .. }
            | Operation::SetContentRecordId { status, .. }
            | Operation::SetAttribute { status, .. }
            | Operation::AppendContent { status, .. } => Some(status),
            Operation::EventStart { .. } => None,
        }
    }

    /// Whether this operation's source write failed. Exceptional
    /// operations are skipped by snapshot fillers and never contribute a
    /// property.
    pub fn is_exceptional(&self) -> bool {
        matches!(self.status(), Some(OperationStatus::Exception))
    }
}

/// Errors from decoding an operation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The tag is outside `[1, MAX_TAG]`.
    #[error("tag {0} is not a known operation tag")]
    UnknownTag(u8),
    /// Fewer bytes were supplied than the tag's fixed value size.
    #[error("payload for tag {tag} expected {expected} bytes, got {got}")]
    TruncatedPayload {
        /// The tag being decoded.
        tag: u8,
        /// The expected payload length.
        expected: usize,
        /// The payload length actually supplied.
        got: usize,
    },
    /// The trailing status byte was neither 0 (success) nor 1
    /// (exception).
    #[error("invalid operation status byte {0}")]
    InvalidStatusByte(u8),
}

/// The fixed value size (descriptor length minus the two framing bytes)
/// for a tag, or `None` if the tag is unknown.
pub fn value_len(tag: u8) -> Option<usize> {
    match tag {
        TAG_SET_PARENT => Some(4 + 4 + 1),
        TAG_SET_NAME => Some(4 + 4 + 1),
        TAG_SET_LENGTH => Some(4 + 8 + 1),
        TAG_SET_TIMESTAMP => Some(4 + 8 + 1),
        TAG_SET_FLAGS => Some(4 + 4 + 1),
        TAG_SET_CONTENT_RECORD_ID => Some(4 + 4 + 1),
        TAG_SET_ATTRIBUTE => Some(4 + 2 + 4 + 1),
        TAG_APPEND_CONTENT => Some(4 + 8 + 1),
        TAG_EVENT_START => Some(8),
        _ => None,
    }
}

/// The full on-disk descriptor length for a tag (value size plus the two
/// framing tag bytes), or `None` if the tag is unknown.
pub fn descriptor_len(tag: u8) -> Option<usize> {
    value_len(tag).map(|len| len + 2)
}

/// Encode an operation's value bytes (not including the framing tag
/// bytes — see [`crate::format::frame_complete`]).
pub fn encode(op: &Operation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value_len(op.tag()).unwrap_or(0));
    match *op {
        Operation::SetParent {
            file_id,
            new_parent_id,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&new_parent_id.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetName {
            file_id,
            name_id,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&name_id.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetLength {
            file_id,
            length,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&length.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetTimestamp {
            file_id,
            timestamp,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&timestamp.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetFlags {
            file_id,
            flags,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&flags.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetContentRecordId {
            file_id,
            content_id,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&content_id.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::SetAttribute {
            file_id,
            attr_key,
            payload_ref,
            status,
        } => {
            buf.extend_from_slice(&file_id.to_le_bytes());
            buf.extend_from_slice(&attr_key.to_le_bytes());
            buf.extend_from_slice(&payload_ref.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::AppendContent {
            payload_ref,
            byte_len,
            status,
        } => {
            buf.extend_from_slice(&payload_ref.to_le_bytes());
            buf.extend_from_slice(&byte_len.to_le_bytes());
            buf.push(status.to_byte());
        }
        Operation::EventStart { timestamp } => {
            buf.extend_from_slice(&timestamp.to_le_bytes());
        }
    }
    buf
}

/// Decode an operation's value bytes given its tag.
pub fn decode(tag: u8, bytes: &[u8]) -> Result<Operation, CodecError> {
    let expected = value_len(tag).ok_or(CodecError::UnknownTag(tag))?;
    if bytes.len() != expected {
        return Err(CodecError::TruncatedPayload {
            tag,
            expected,
            got: bytes.len(),
        });
    }
    Ok(match tag {
        TAG_SET_PARENT => Operation::SetParent {
            file_id: read_u32(bytes, 0),
            new_parent_id: read_u32(bytes, 4),
            status: OperationStatus::from_byte(bytes[8])?,
        },
        TAG_SET_NAME => Operation::SetName {
            file_id: read_u32(bytes, 0),
            name_id: read_u32(bytes, 4),
            status: OperationStatus::from_byte(bytes[8])?,
        },
        TAG_SET_LENGTH => Operation::SetLength {
            file_id: read_u32(bytes, 0),
            length: read_u64(bytes, 4),
            status: OperationStatus::from_byte(bytes[12])?,
        },
        TAG_SET_TIMESTAMP => Operation::SetTimestamp {
            file_id: read_u32(bytes, 0),
            timestamp: read_u64(bytes, 4),
            status: OperationStatus::from_byte(bytes[12])?,
        },
        TAG_SET_FLAGS => Operation::SetFlags {
            file_id: read_u32(bytes, 0),
            flags: read_u32(bytes, 4),
            status: OperationStatus::from_byte(bytes[8])?,
        },
        TAG_SET_CONTENT_RECORD_ID => Operation::SetContentRecordId {
            file_id: read_u32(bytes, 0),
            content_id: read_u32(bytes, 4),
            status: OperationStatus::from_byte(bytes[8])?,
        },
        TAG_SET_ATTRIBUTE => Operation::SetAttribute {
            file_id: read_u32(bytes, 0),
            attr_key: read_u16(bytes, 4),
            payload_ref: read_u32(bytes, 6),
            status: OperationStatus::from_byte(bytes[10])?,
        },
        TAG_APPEND_CONTENT => Operation::AppendContent {
            payload_ref: read_u32(bytes, 0),
            byte_len: read_u64(bytes, 4),
            status: OperationStatus::from_byte(bytes[12])?,
        },
        TAG_EVENT_START => Operation::EventStart {
            timestamp: read_u64(bytes, 0),
        },
        other => return Err(CodecError::UnknownTag(other)),
    })
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<Operation> {
        vec![
            Operation::SetParent {
                file_id: 2,
                new_parent_id: 1,
                status: OperationStatus::Success,
            },
            Operation::SetName {
                file_id: 2,
                name_id: 77,
                status: OperationStatus::Success,
            },
            Operation::SetLength {
                file_id: 2,
                length: 10,
                status: OperationStatus::Success,
            },
            Operation::SetTimestamp {
                file_id: 2,
                timestamp: 100,
                status: OperationStatus::Exception,
            },
            Operation::SetFlags {
                file_id: 2,
                flags: 0,
                status: OperationStatus::Success,
            },
            Operation::SetContentRecordId {
                file_id: 2,
                content_id: 0,
                status: OperationStatus::Success,
            },
            Operation::SetAttribute {
                file_id: 5,
                attr_key: 3,
                payload_ref: 9,
                status: OperationStatus::Success,
            },
            Operation::AppendContent {
                payload_ref: 1,
                byte_len: 1024,
                status: OperationStatus::Success,
            },
            Operation::EventStart { timestamp: 5000 },
        ]
    }

    #[test]
    fn every_operation_round_trips() {
        for op in sample_ops() {
            let tag = op.tag();
            let encoded = encode(&op);
            assert_eq!(encoded.len(), value_len(tag).unwrap());
            let decoded = decode(tag, &encoded).unwrap();
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn exceptional_status_is_detected() {
        let op = Operation::SetTimestamp {
            file_id: 2,
            timestamp: 100,
            status: OperationStatus::Exception,
        };
        assert!(op.is_exceptional());
    }

    #[test]
    fn event_start_has_no_file_id_or_status() {
        let op = Operation::EventStart { timestamp: 1 };
        assert_eq!(op.file_id(), None);
        assert_eq!(op.status(), None);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = decode(TAG_SET_PARENT, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedPayload { .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(value_len(0), None);
        assert_eq!(value_len(MAX_TAG + 1), None);
        assert!(matches!(decode(0, &[]), Err(CodecError::UnknownTag(0))));
    }

    fn arb_status() -> impl proptest::strategy::Strategy<Value = OperationStatus> {
        proptest::prop_oneof![
            proptest::strategy::Just(OperationStatus::Success),
            proptest::strategy::Just(OperationStatus::Exception),
        ]
    }

    fn arb_operation() -> impl proptest::strategy::Strategy<Value = Operation> {
        use proptest::prelude::*;
        prop_oneof![
            (any::<FileId>(), any::<FileId>(), arb_status()).prop_map(
                |(file_id, new_parent_id, status)| Operation::SetParent {
                    file_id,
                    new_parent_id,
                    status
                }
            ),
            (any::<FileId>(), any::<NameId>(), arb_status()).prop_map(
                |(file_id, name_id, status)| Operation::SetName {
                    file_id,
                    name_id,
                    status
                }
            ),
            (any::<FileId>(), any::<u64>(), arb_status()).prop_map(
                |(file_id, length, status)| Operation::SetLength {
                    file_id,
                    length,
                    status
                }
            ),
            (any::<FileId>(), any::<u64>(), arb_status()).prop_map(
                |(file_id, timestamp, status)| Operation::SetTimestamp {
                    file_id,
                    timestamp,
                    status
                }
            ),
            (any::<FileId>(), any::<u32>(), arb_status()).prop_map(
                |(file_id, flags, status)| Operation::SetFlags {
                    file_id,
                    flags,
                    status
                }
            ),
            (any::<FileId>(), any::<PayloadRef>(), arb_status()).prop_map(
                |(file_id, content_id, status)| Operation::SetContentRecordId {
                    file_id,
                    content_id,
                    status
                }
            ),
            (
                any::<FileId>(),
                any::<AttrKey>(),
                any::<PayloadRef>(),
                arb_status()
            )
                .prop_map(|(file_id, attr_key, payload_ref, status)| Operation::SetAttribute {
                    file_id,
                    attr_key,
                    payload_ref,
                    status
                }),
            (any::<PayloadRef>(), any::<u64>(), arb_status()).prop_map(
                |(payload_ref, byte_len, status)| Operation::AppendContent {
                    payload_ref,
                    byte_len,
                    status
                }
            ),
            any::<u64>().prop_map(|timestamp| Operation::EventStart { timestamp }),
        ]
    }

    proptest::proptest! {
        #[test]
        fn every_arbitrary_operation_round_trips(op in arb_operation()) {
            let tag = op.tag();
            let encoded = encode(&op);
            proptest::prop_assert_eq!(encoded.len(), value_len(tag).unwrap());
            let decoded = decode(tag, &encoded).unwrap();
            proptest::prop_assert_eq!(decoded, op);
        }
    }
}
