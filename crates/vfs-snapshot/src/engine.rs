//! Backward-walk reconstruction: apply a [`Filler`] against a log range,
//! newest operation first, latching each property the first time it is
//! set.

use crate::filler::Filler;
use crate::snapshot::{FileSnapshotRow, NotAvailableReason, Property, VfsSnapshot};
use std::collections::{HashMap, HashSet};
use vfs_core::{FileId, LogError};
use vfs_log::{LogIterator, Operation, OperationReadResult};

/// Walks a log range backward, applying a [`Filler`], and produces the
/// resulting [`VfsSnapshot`].
pub struct SnapshotEngine;

impl SnapshotEngine {
    /// Walk `iterator` from its current position back to its range's
    /// start, applying `filler` to every accepted operation, and return
    /// the resulting snapshot.
    ///
    /// Stops early (without error) at the first `Invalid` descriptor —
    /// the snapshot reflects everything recovered up to that point, and
    /// the corruption itself is the caller's concern (surfaced via the
    /// iterator's own poisoning).
    pub fn run(mut iterator: LogIterator, filler: &Filler) -> Result<VfsSnapshot, LogError> {
        let mask = filler.tag_mask();
        let mut rows: HashMap<FileId, FileSnapshotRow> = HashMap::new();
        let mut touched_never_exceptional: HashSet<(FileId, PropertyField)> = HashSet::new();

        while let Some(result) = iterator.previous_filtered(Some(&mask)) {
            match result? {
                OperationReadResult::Complete(op) => {
                    apply(&mut rows, &mut touched_never_exceptional, filler, &op);
                }
                OperationReadResult::Incomplete(_) => {}
                OperationReadResult::Invalid(reason) => {
                    tracing::debug!(
                        ?reason,
                        position = iterator.position(),
                        "snapshot walk stopped at invalid descriptor"
                    );
                    break;
                }
            }
        }

        let exceptional_candidates = touched_never_exceptional.len();
        for (file_id, field) in touched_never_exceptional {
            mark_exceptional_if_untouched(&mut rows, file_id, field);
        }
        if exceptional_candidates > 0 {
            tracing::debug!(
                exceptional_candidates,
                file_count = rows.len(),
                "snapshot walk finished"
            );
        }

        Ok(VfsSnapshot::from_rows(rows))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PropertyField {
    ParentId,
    NameId,
    Length,
    Timestamp,
    Flags,
    ContentId,
}

fn apply(
    rows: &mut HashMap<FileId, FileSnapshotRow>,
    exceptional_seen: &mut HashSet<(FileId, PropertyField)>,
    filler: &Filler,
    op: &Operation,
) {
    let Some(file_id) = op.file_id() else {
        return;
    };
    if !filler.in_scope(op) {
        return;
    }

    if op.is_exceptional() {
        if let Some(field) = field_for(op) {
            exceptional_seen.insert((file_id, field));
        }
        return;
    }

    // A field whose most-recent (i.e. first-seen, walking backward) write
    // was exceptional must resolve to `NotAvailable`, never fall through
    // to an older successful write — see `mark_exceptional_if_untouched`.
    if let Some(field) = field_for(op) {
        if exceptional_seen.contains(&(file_id, field)) {
            return;
        }
    }

    let row = rows.entry(file_id).or_default();
    match *op {
        Operation::SetParent { new_parent_id, .. } => {
            latch(&mut row.parent_id, new_parent_id);
        }
        Operation::SetName { name_id, .. } => {
            latch(&mut row.name_id, name_id);
        }
        Operation::SetLength { length, .. } => {
            latch(&mut row.length, length);
        }
        Operation::SetTimestamp { timestamp, .. } => {
            latch(&mut row.timestamp, timestamp);
        }
        Operation::SetFlags { flags, .. } => {
            latch(&mut row.flags, flags);
        }
        Operation::SetContentRecordId { content_id, .. } => {
            latch(&mut row.content_id, content_id);
        }
        Operation::SetAttribute {
            attr_key,
            payload_ref,
            ..
        } => {
            row.attributes.entry(attr_key).or_insert(payload_ref);
        }
        Operation::AppendContent { .. } | Operation::EventStart { .. } => {}
    }
}

fn latch<T>(slot: &mut Property<T>, value: T) {
    if !slot.is_ready() {
        *slot = Property::Ready(value);
    }
}

fn mark_exceptional_if_untouched(
    rows: &mut HashMap<FileId, FileSnapshotRow>,
    file_id: FileId,
    field: PropertyField,
) {
    let row = rows.entry(file_id).or_default();
    let slot_is_never_written = match field {
        PropertyField::ParentId => matches!(
            row.parent_id,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
        PropertyField::NameId => matches!(
            row.name_id,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
        PropertyField::Length => matches!(
            row.length,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
        PropertyField::Timestamp => matches!(
            row.timestamp,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
        PropertyField::Flags => matches!(
            row.flags,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
        PropertyField::ContentId => matches!(
            row.content_id,
            Property::NotAvailable(NotAvailableReason::NeverWritten)
        ),
    };
    if !slot_is_never_written {
        return;
    }
    tracing::warn!(file_id, ?field, "every write to this property was exceptional");
    let replacement = Property::NotAvailable(NotAvailableReason::AllExceptional);
    match field {
        PropertyField::ParentId => row.parent_id = replacement,
        PropertyField::NameId => row.name_id = replacement,
        PropertyField::Length => row.length = replacement,
        PropertyField::Timestamp => row.timestamp = replacement,
        PropertyField::Flags => row.flags = replacement,
        PropertyField::ContentId => row.content_id = replacement,
    }
}

fn field_for(op: &Operation) -> Option<PropertyField> {
    Some(match op {
        Operation::SetParent { .. } => PropertyField::ParentId,
        Operation::SetName { .. } => PropertyField::NameId,
        Operation::SetLength { .. } => PropertyField::Length,
        Operation::SetTimestamp { .. } => PropertyField::Timestamp,
        Operation::SetFlags { .. } => PropertyField::Flags,
        Operation::SetContentRecordId { .. } => PropertyField::ContentId,
        Operation::SetAttribute { .. } | Operation::AppendContent { .. } | Operation::EventStart { .. } => {
            return None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filler::{Constraint, PropertySelection};
    use vfs_core::RecoveryConfig;
    use vfs_log::codec::OperationStatus;
    use vfs_log::LogStorage;

    fn test_storage() -> (tempfile::TempDir, LogStorage) {
        let dir = tempfile::tempdir().unwrap();
        let config = RecoveryConfig::for_testing();
        let storage = LogStorage::open(dir.path(), &config).unwrap();
        (dir, storage)
    }

    #[test]
    fn newest_write_wins_for_scalar_fields() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetLength {
                file_id: 5,
                length: 10,
                status: OperationStatus::Success,
            })
            .unwrap();
        storage
            .append_blocking(&Operation::SetLength {
                file_id: 5,
                length: 20,
                status: OperationStatus::Success,
            })
            .unwrap();

        let iterator = LogIterator::unconstrained_at_end(storage);
        let filler = Filler::for_properties(PropertySelection::LENGTH);
        let snapshot = SnapshotEngine::run(iterator, &filler).unwrap();
        assert_eq!(snapshot.row(5).unwrap().length, Property::Ready(20));
    }

    #[test]
    fn exceptional_write_shadows_an_older_successful_one() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetFlags {
                file_id: 1,
                flags: 7,
                status: OperationStatus::Success,
            })
            .unwrap();
        storage
            .append_blocking(&Operation::SetFlags {
                file_id: 1,
                flags: 99,
                status: OperationStatus::Exception,
            })
            .unwrap();

        let iterator = LogIterator::unconstrained_at_end(storage);
        let filler = Filler::for_properties(PropertySelection::FLAGS);
        let snapshot = SnapshotEngine::run(iterator, &filler).unwrap();
        assert_eq!(
            snapshot.row(1).unwrap().flags,
            Property::NotAvailable(NotAvailableReason::AllExceptional)
        );
    }

    #[test]
    fn all_exceptional_yields_all_exceptional_reason() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetFlags {
                file_id: 1,
                flags: 99,
                status: OperationStatus::Exception,
            })
            .unwrap();

        let iterator = LogIterator::unconstrained_at_end(storage);
        let filler = Filler::for_properties(PropertySelection::FLAGS);
        let snapshot = SnapshotEngine::run(iterator, &filler).unwrap();
        assert_eq!(
            snapshot.row(1).unwrap().flags,
            Property::NotAvailable(NotAvailableReason::AllExceptional)
        );
    }

    #[test]
    fn attributes_accumulate_independently_per_key() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetAttribute {
                file_id: 2,
                attr_key: 1,
                payload_ref: 10,
                status: OperationStatus::Success,
            })
            .unwrap();
        storage
            .append_blocking(&Operation::SetAttribute {
                file_id: 2,
                attr_key: 2,
                payload_ref: 20,
                status: OperationStatus::Success,
            })
            .unwrap();
        storage
            .append_blocking(&Operation::SetAttribute {
                file_id: 2,
                attr_key: 1,
                payload_ref: 99,
                status: OperationStatus::Success,
            })
            .unwrap();

        let iterator = LogIterator::unconstrained_at_end(storage);
        let filler = Filler::for_properties(PropertySelection::ATTRIBUTES);
        let snapshot = SnapshotEngine::run(iterator, &filler).unwrap();
        let row = snapshot.row(2).unwrap();
        assert_eq!(row.attributes.get(&1), Some(&99));
        assert_eq!(row.attributes.get(&2), Some(&20));
    }

    #[test]
    fn constraint_excludes_out_of_range_files() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetName {
                file_id: 3,
                name_id: 1,
                status: OperationStatus::Success,
            })
            .unwrap();
        storage
            .append_blocking(&Operation::SetName {
                file_id: 300,
                name_id: 2,
                status: OperationStatus::Success,
            })
            .unwrap();

        let iterator = LogIterator::unconstrained_at_end(storage);
        let filler = Filler::for_properties(PropertySelection::NAME_ID)
            .constrain(Constraint::Range { lo: 1, hi: 10 });
        let snapshot = SnapshotEngine::run(iterator, &filler).unwrap();
        assert!(snapshot.row(3).is_some());
        assert!(snapshot.row(300).is_none());
    }
}
