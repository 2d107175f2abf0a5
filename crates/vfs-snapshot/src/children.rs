//! Delta-compressed encodings for the `CHILDREN_ATTR` attribute payload.
//!
//! Two distinct shapes are in play: the super-root's children list pairs
//! `(nameId, fileId)` since its children are named mount points, while an
//! ordinary parent's children list is a bare sorted set of `fileId`s (the
//! child's own name already lives on its own record). Both are encoded as
//! a one-byte format version, a `u32` count, and a run of `i64` LE deltas
//! — each value is the running sum of every earlier delta.

use vfs_core::{FileId, NameId};

const FORMAT_VERSION: u8 = 1;

/// Errors decoding a `CHILDREN_ATTR` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChildrenCodecError {
    /// The payload is shorter than its declared header.
    #[error("children payload truncated: need at least {need} bytes, got {got}")]
    Truncated {
        /// Minimum byte length implied by the header.
        need: usize,
        /// Actual payload length.
        got: usize,
    },
    /// The leading version byte is not one this codec understands.
    #[error("unsupported children payload version {0}")]
    UnsupportedVersion(u8),
    /// A running-sum delta underflowed or overflowed its target width.
    #[error("children delta out of range")]
    DeltaOutOfRange,
}

/// Encode an ordinary parent's children as fileId-only deltas: the first
/// delta is `children[0] - parent_id`, each later delta is
/// `children[i] - children[i-1]`. `children` must already be sorted
/// ascending.
pub fn encode_children_by_id(parent_id: FileId, children: &[FileId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + children.len() * 8);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&(children.len() as u32).to_le_bytes());
    let mut previous = parent_id as i64;
    for &child in children {
        let delta = child as i64 - previous;
        out.extend_from_slice(&delta.to_le_bytes());
        previous = child as i64;
    }
    out
}

/// Decode an ordinary parent's children list produced by
/// [`encode_children_by_id`].
pub fn decode_children_by_id(
    parent_id: FileId,
    bytes: &[u8],
) -> Result<Vec<FileId>, ChildrenCodecError> {
    let count = read_header(bytes)?;
    let mut children = Vec::with_capacity(count);
    let mut previous = parent_id as i64;
    for i in 0..count {
        let delta = read_i64(bytes, 5 + i * 8)?;
        let value = previous + delta;
        children.push(to_file_id(value)?);
        previous = value;
    }
    Ok(children)
}

/// Encode the super-root's children as `(nameId, fileId)` pairs, each
/// field independently delta-compressed against its own previous value.
pub fn encode_super_root_children(children: &[(NameId, FileId)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + children.len() * 16);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&(children.len() as u32).to_le_bytes());
    let mut prev_name = 0i64;
    let mut prev_id = 0i64;
    for &(name_id, file_id) in children {
        out.extend_from_slice(&(name_id as i64 - prev_name).to_le_bytes());
        out.extend_from_slice(&(file_id as i64 - prev_id).to_le_bytes());
        prev_name = name_id as i64;
        prev_id = file_id as i64;
    }
    out
}

/// Decode the super-root's children list produced by
/// [`encode_super_root_children`].
pub fn decode_super_root_children(
    bytes: &[u8],
) -> Result<Vec<(NameId, FileId)>, ChildrenCodecError> {
    let count = read_header(bytes)?;
    let mut pairs = Vec::with_capacity(count);
    let mut prev_name = 0i64;
    let mut prev_id = 0i64;
    for i in 0..count {
        let base = 5 + i * 16;
        let name_delta = read_i64(bytes, base)?;
        let id_delta = read_i64(bytes, base + 8)?;
        let name_value = prev_name + name_delta;
        let id_value = prev_id + id_delta;
        pairs.push((to_name_id(name_value)?, to_file_id(id_value)?));
        prev_name = name_value;
        prev_id = id_value;
    }
    Ok(pairs)
}

fn read_header(bytes: &[u8]) -> Result<usize, ChildrenCodecError> {
    if bytes.len() < 5 {
        return Err(ChildrenCodecError::Truncated {
            need: 5,
            got: bytes.len(),
        });
    }
    if bytes[0] != FORMAT_VERSION {
        return Err(ChildrenCodecError::UnsupportedVersion(bytes[0]));
    }
    Ok(u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize)
}

fn read_i64(bytes: &[u8], at: usize) -> Result<i64, ChildrenCodecError> {
    let slice = bytes
        .get(at..at + 8)
        .ok_or(ChildrenCodecError::Truncated {
            need: at + 8,
            got: bytes.len(),
        })?;
    Ok(i64::from_le_bytes(slice.try_into().unwrap()))
}

fn to_file_id(value: i64) -> Result<FileId, ChildrenCodecError> {
    FileId::try_from(value).map_err(|_| ChildrenCodecError::DeltaOutOfRange)
}

fn to_name_id(value: i64) -> Result<NameId, ChildrenCodecError> {
    NameId::try_from(value).map_err(|_| ChildrenCodecError::DeltaOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_by_id_round_trips() {
        let parent = 10;
        let children = vec![11, 15, 16, 100];
        let encoded = encode_children_by_id(parent, &children);
        let decoded = decode_children_by_id(parent, &encoded).unwrap();
        assert_eq!(decoded, children);
    }

    #[test]
    fn empty_children_round_trips() {
        let encoded = encode_children_by_id(1, &[]);
        let decoded = decode_children_by_id(1, &encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn super_root_pairs_round_trip() {
        let pairs = vec![(3u32, 2u32), (1, 50), (9, 51)];
        let encoded = encode_super_root_children(&pairs);
        let decoded = decode_super_root_children(&encoded).unwrap();
        assert_eq!(decoded, pairs);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = decode_children_by_id(1, &[1, 2, 0]).unwrap_err();
        assert!(matches!(err, ChildrenCodecError::Truncated { .. }));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut encoded = encode_children_by_id(1, &[2]);
        encoded[0] = 99;
        let err = decode_children_by_id(1, &encoded).unwrap_err();
        assert_eq!(err, ChildrenCodecError::UnsupportedVersion(99));
    }
}
