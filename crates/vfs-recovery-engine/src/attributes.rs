//! Narrow interfaces onto the host's attribute subsystem.
//!
//! The attribute-name enumerator and the per-file attribute accessor are
//! deliberately out of scope: the enumerator file is copied verbatim at
//! stage 0, and the accessor is whatever storage the host VFS actually
//! uses to persist attribute bytes. Recovery only needs to resolve an
//! [`AttrKey`] to its descriptor and hand off stripped bytes — both
//! narrow enough to model as traits the host implements.

use std::io;
use vfs_core::{AttrKey, FileId};

/// How an attribute's stored bytes are framed, as resolved from the
/// (externally owned) attribute-name enumerator.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    /// If set, a payload beginning with exactly these bytes has them
    /// stripped before being handed to the accessor.
    pub version_prefix: Option<Vec<u8>>,
}

/// Resolves an enumerated attribute key to its descriptor. Backed by
/// whichever enumerator file stage 0 copied from the source directory.
pub trait AttributeEnumerator {
    /// The descriptor for `attr_key`, or `None` if the key is unknown to
    /// the enumerator (treated as a logic error, not fatal).
    fn descriptor(&self, attr_key: AttrKey) -> Option<AttributeDescriptor>;
}

/// Writes a single file's attribute bytes through the host's live
/// accessor. An `Err` here is promoted to a fatal recovery error only
/// when it is I/O-class; callers decide that distinction by how they
/// construct the error (recovery treats every `Err` from this trait as
/// I/O-class, matching the taxonomy's `AttributeWriteFailure`).
pub trait AttributeWriter {
    /// Persist `bytes` (already stripped of any version prefix) as the
    /// value of `attr_key` on `file_id`.
    fn write_attribute(&mut self, file_id: FileId, attr_key: AttrKey, bytes: &[u8]) -> io::Result<()>;
}

/// Strip `descriptor`'s version prefix from `payload` if present.
/// Returns the payload unchanged if the attribute is unversioned or the
/// payload does not carry the expected prefix.
pub fn strip_version_prefix<'a>(descriptor: &AttributeDescriptor, payload: &'a [u8]) -> &'a [u8] {
    match &descriptor.version_prefix {
        Some(prefix) if payload.starts_with(prefix) => &payload[prefix.len()..],
        _ => payload,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeEnumerator {
        pub descriptors: HashMap<AttrKey, AttributeDescriptor>,
    }

    impl AttributeEnumerator for FakeEnumerator {
        fn descriptor(&self, attr_key: AttrKey) -> Option<AttributeDescriptor> {
            self.descriptors.get(&attr_key).cloned()
        }
    }

    #[derive(Default)]
    pub struct FakeWriter {
        pub written: HashMap<(FileId, AttrKey), Vec<u8>>,
        pub fail_for: Option<(FileId, AttrKey)>,
    }

    impl AttributeWriter for FakeWriter {
        fn write_attribute(
            &mut self,
            file_id: FileId,
            attr_key: AttrKey,
            bytes: &[u8],
        ) -> io::Result<()> {
            if self.fail_for == Some((file_id, attr_key)) {
                return Err(io::Error::new(io::ErrorKind::Other, "forced failure"));
            }
            self.written.insert((file_id, attr_key), bytes.to_vec());
            Ok(())
        }
    }
}
