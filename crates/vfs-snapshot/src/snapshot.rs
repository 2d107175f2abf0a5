//! The reconstructed, queryable view produced by a backward walk of the
//! operation log: for each file, the newest surviving value of each
//! scalar property, plus the accumulated set of attributes.

use std::collections::HashMap;
use std::sync::Arc;
use vfs_core::{AttrKey, FileId, NameId, PayloadRef};

/// Why a property has no value, as distinct from simply never having
/// been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAvailableReason {
    /// No surviving operation ever set this property within the walked
    /// range.
    NeverWritten,
    /// The only operations that set this property all carried an
    /// exceptional status and were skipped.
    AllExceptional,
}

/// A property's reconstructed state: either a value recovered from the
/// newest non-exceptional operation that set it, or a reason none was
/// found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property<T> {
    /// A value was recovered.
    Ready(T),
    /// No value could be recovered.
    NotAvailable(NotAvailableReason),
}

impl<T> Property<T> {
    /// The value, if ready.
    pub fn value(&self) -> Option<&T> {
        match self {
            Property::Ready(v) => Some(v),
            Property::NotAvailable(_) => None,
        }
    }

    /// Whether a value was recovered.
    pub fn is_ready(&self) -> bool {
        matches!(self, Property::Ready(_))
    }
}

/// The reconstructed scalar state of a single file, plus its accumulated
/// attribute map. Fields start `NotAvailable(NeverWritten)` and are
/// filled in as the backward walk encounters the newest surviving
/// operation for each.
#[derive(Debug, Clone)]
pub struct FileSnapshotRow {
    /// Reconstructed `parentId`.
    pub parent_id: Property<FileId>,
    /// Reconstructed `nameId`.
    pub name_id: Property<NameId>,
    /// Reconstructed `length`.
    pub length: Property<u64>,
    /// Reconstructed `timestamp`.
    pub timestamp: Property<u64>,
    /// Reconstructed `flags`.
    pub flags: Property<u32>,
    /// Reconstructed `contentId`.
    pub content_id: Property<PayloadRef>,
    /// Accumulated attribute map: each key's newest surviving payload
    /// reference. Unlike the scalar fields, every distinct key gets its
    /// own independently-latched slot.
    pub attributes: HashMap<AttrKey, PayloadRef>,
}

impl FileSnapshotRow {
    /// Fill every `NotAvailable` scalar field, and every attribute key
    /// absent from this row, from `older` — the per-property fallback
    /// `VfsSnapshot::row` uses to walk its `precededBy` chain. Fields
    /// already `Ready` in `self` are left untouched.
    fn merge_older(mut self, older: &FileSnapshotRow) -> Self {
        fn fallback<T: Clone>(slot: Property<T>, older: &Property<T>) -> Property<T> {
            if slot.is_ready() {
                slot
            } else {
                older.clone()
            }
        }
        self.parent_id = fallback(self.parent_id, &older.parent_id);
        self.name_id = fallback(self.name_id, &older.name_id);
        self.length = fallback(self.length, &older.length);
        self.timestamp = fallback(self.timestamp, &older.timestamp);
        self.flags = fallback(self.flags, &older.flags);
        self.content_id = fallback(self.content_id, &older.content_id);
        for (key, value) in &older.attributes {
            self.attributes.entry(*key).or_insert(*value);
        }
        self
    }
}

impl Default for FileSnapshotRow {
    fn default() -> Self {
        FileSnapshotRow {
            parent_id: Property::NotAvailable(NotAvailableReason::NeverWritten),
            name_id: Property::NotAvailable(NotAvailableReason::NeverWritten),
            length: Property::NotAvailable(NotAvailableReason::NeverWritten),
            timestamp: Property::NotAvailable(NotAvailableReason::NeverWritten),
            flags: Property::NotAvailable(NotAvailableReason::NeverWritten),
            content_id: Property::NotAvailable(NotAvailableReason::NeverWritten),
            attributes: HashMap::new(),
        }
    }
}

/// A reconstructed view over a range of files, the output of a
/// [`crate::engine::SnapshotEngine`] walk. Queries that miss fall
/// through to an optional preceding snapshot (`precededBy`
/// composition), so a caller can layer a narrow, freshly-computed
/// snapshot over a broader one computed earlier in the same backward
/// walk without redoing the whole range.
#[derive(Debug, Clone)]
pub struct VfsSnapshot {
    rows: HashMap<FileId, FileSnapshotRow>,
    preceded_by: Option<Arc<VfsSnapshot>>,
}

impl VfsSnapshot {
    /// An empty snapshot with no fallback.
    pub fn empty() -> Self {
        VfsSnapshot {
            rows: HashMap::new(),
            preceded_by: None,
        }
    }

    /// Build a snapshot directly from already-computed rows.
    pub fn from_rows(rows: HashMap<FileId, FileSnapshotRow>) -> Self {
        VfsSnapshot {
            rows,
            preceded_by: None,
        }
    }

    /// Layer `self` over `older`: a file missing from `self` falls back
    /// to `older`'s row for that file.
    pub fn preceded_by(mut self, older: Arc<VfsSnapshot>) -> Self {
        self.preceded_by = Some(older);
        self
    }

    /// The row for `file_id`, with every `NotAvailable` property (and
    /// every attribute key this snapshot's own row lacks) falling
    /// through to the `precededBy` chain — not merely falling back when
    /// this layer has no row at all.
    pub fn row(&self, file_id: FileId) -> Option<FileSnapshotRow> {
        let own = self.rows.get(&file_id).cloned();
        let older = || self.preceded_by.as_ref().and_then(|p| p.row(file_id));
        match own {
            None => older(),
            Some(row) => match older() {
                Some(fallback) => Some(row.merge_older(&fallback)),
                None => Some(row),
            },
        }
    }

    /// File ids this snapshot (not counting its fallback chain) holds a
    /// row for.
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.rows.keys().copied()
    }

    /// Insert or fetch-and-mutate the row for `file_id` in this
    /// snapshot's own layer.
    pub(crate) fn row_mut(&mut self, file_id: FileId) -> &mut FileSnapshotRow {
        self.rows.entry(file_id).or_default()
    }
}
