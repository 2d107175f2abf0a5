//! Bidirectional cursor over a [`LogStorage`](crate::storage::LogStorage).

use crate::format::OperationReadResult;
use crate::storage::LogStorage;
use vfs_core::LogError;

/// A bitset over the nine operation tags, used by the filtered iterator
/// variants to skip payload decoding for tags the caller does not care
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagMask(u16);

impl TagMask {
    /// A mask that accepts every valid tag.
    pub fn all() -> Self {
        TagMask((1u16 << (crate::codec::MAX_TAG + 1)) - 2)
    }

    /// A mask that accepts only the listed tags.
    pub fn only(tags: &[u8]) -> Self {
        let mut bits = 0u16;
        for &tag in tags {
            bits |= 1u16 << tag;
        }
        TagMask(bits)
    }

    /// Combine two masks, accepting a tag if either accepts it.
    pub fn union(self, other: TagMask) -> TagMask {
        TagMask(self.0 | other.0)
    }

    /// Whether `tag` is accepted by this mask.
    pub fn contains(&self, tag: u8) -> bool {
        tag <= crate::codec::MAX_TAG && (self.0 & (1u16 << tag)) != 0
    }
}

/// Bidirectional cursor over a log's descriptors.
///
/// Reading an `Invalid` descriptor poisons the iterator: subsequent
/// `has_next`/`has_previous` calls return `false` so a caller cannot
/// keep walking into a corrupt region.
pub struct LogIterator {
    storage: LogStorage,
    begin: u64,
    end: u64,
    position: u64,
    poisoned: bool,
}

impl LogIterator {
    /// An iterator over the whole unconstrained log, `[start_offset,
    /// size)`, positioned at the start.
    pub fn unconstrained(storage: LogStorage) -> Self {
        let begin = storage.start_offset();
        let end = storage.size();
        LogIterator {
            storage,
            begin,
            end,
            position: begin,
            poisoned: false,
        }
    }

    /// An iterator over the unconstrained log positioned at its end,
    /// ready for backward traversal.
    pub fn unconstrained_at_end(storage: LogStorage) -> Self {
        let mut iter = Self::unconstrained(storage);
        iter.position = iter.end;
        iter
    }

    /// An iterator fixed to `[begin, end)`, snapshotted once so that
    /// later appends cannot shift the range out from under a caller
    /// mid-traversal.
    pub fn constrained(storage: LogStorage, begin: u64, end: u64) -> Self {
        LogIterator {
            storage,
            begin,
            end,
            position: begin,
            poisoned: false,
        }
    }

    /// An iterator fixed to `[begin, end)`, positioned at `end` and
    /// ready for backward traversal. Used by the recovery point finder,
    /// which needs to scan backward from an arbitrary candidate rather
    /// than from the log's live end.
    pub fn constrained_ending_at(storage: LogStorage, begin: u64, end: u64) -> Self {
        let mut iter = Self::constrained(storage, begin, end);
        iter.position = end;
        iter
    }

    /// Build a forward/backward pair over the same constrained range,
    /// captured atomically from the log's current `(start_offset,
    /// size)`. Recovery uses this so a backward snapshot walk and any
    /// companion forward walk agree on the exact same window even if the
    /// live log keeps growing underneath them.
    pub fn constrained_pair(storage: &LogStorage) -> (LogIterator, LogIterator) {
        let begin = storage.start_offset();
        let end = storage.size();
        let forward = LogIterator::constrained(storage.clone(), begin, end);
        let mut backward = LogIterator::constrained(storage.clone(), begin, end);
        backward.position = end;
        (forward, backward)
    }

    /// The cursor's current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// An independent cursor over the same range, at the same position.
    pub fn copy(&self) -> LogIterator {
        LogIterator {
            storage: self.storage.clone(),
            begin: self.begin,
            end: self.end,
            position: self.position,
            poisoned: self.poisoned,
        }
    }

    /// Whether a forward read is possible.
    pub fn has_next(&self) -> bool {
        !self.poisoned && self.position < self.end
    }

    /// Whether a backward read is possible.
    pub fn has_previous(&self) -> bool {
        !self.poisoned && self.position > self.begin
    }

    /// Read the next descriptor and advance the cursor past it.
    pub fn next(&mut self) -> Option<Result<OperationReadResult, LogError>> {
        self.next_filtered(None)
    }

    /// Read the previous descriptor and move the cursor back before it.
    pub fn previous(&mut self) -> Option<Result<OperationReadResult, LogError>> {
        self.previous_filtered(None)
    }

    /// Filtered forward read: records whose tag is outside `mask` are
    /// returned as `Incomplete(tag)` without being decoded.
    pub fn next_filtered(
        &mut self,
        mask: Option<&TagMask>,
    ) -> Option<Result<OperationReadResult, LogError>> {
        if !self.has_next() {
            return None;
        }
        let result = self.storage.read_at_filtered(self.position, mask);
        match &result {
            Ok(OperationReadResult::Invalid(_)) => {
                self.poisoned = true;
                return Some(result);
            }
            Ok(r) => {
                let tag = tag_of(r);
                self.position += crate::codec::descriptor_len(tag).unwrap_or(1) as u64;
            }
            Err(_) => {
                self.poisoned = true;
            }
        }
        Some(result)
    }

    /// Filtered backward read: the backward counterpart of
    /// [`LogIterator::next_filtered`].
    pub fn previous_filtered(
        &mut self,
        mask: Option<&TagMask>,
    ) -> Option<Result<OperationReadResult, LogError>> {
        if !self.has_previous() {
            return None;
        }
        let result = self
            .storage
            .read_preceding_filtered(self.position, mask);
        match &result {
            Ok(OperationReadResult::Invalid(_)) => {
                self.poisoned = true;
                return Some(result);
            }
            Ok(r) => {
                let tag = tag_of(r);
                self.position -= crate::codec::descriptor_len(tag).unwrap_or(1) as u64;
            }
            Err(_) => {
                self.poisoned = true;
            }
        }
        Some(result)
    }
}

fn tag_of(result: &OperationReadResult) -> u8 {
    match result {
        OperationReadResult::Complete(op) => op.tag(),
        OperationReadResult::Incomplete(tag) => *tag,
        OperationReadResult::Invalid(_) => 0,
    }
}
