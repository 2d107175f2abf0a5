//! The four-stage reconstruction pipeline: setup, content recovery,
//! record initialization, and tree reconstruction, followed by
//! finalization and the swap marker.

use crate::attributes::{strip_version_prefix, AttributeEnumerator, AttributeWriter};
use crate::records::{FileRecord, RecordsStore};
use crate::swap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use vfs_core::{
    FileId, NameId, RecordFlags, RecoveryConfig, RecoveryError, RecoveryResult, RecoveryState,
    CHILDREN_ATTR, LEGACY_SUPER_ROOT_PARENT, NO_CONTENT, SUPER_ROOT,
};
use vfs_log::codec::OperationStatus;
use vfs_log::{LogIterator, LogStorage, Operation, OperationReadResult, PayloadStore};
use vfs_snapshot::{
    decode_children_by_id, decode_super_root_children, encode_children_by_id,
    encode_super_root_children, Constraint, Filler, PropertySelection, SnapshotEngine,
};

const NAMES_FILE_NAME: &str = "names";
const ATTR_ENUM_FILE_NAME: &str = "attributes_enums";
const RECORDS_FILE_NAME: &str = "records";
const LOG_DIR_NAME: &str = "vfslog";
const MAX_DUPLICATE_DETAIL_LINES: usize = 10;

/// Progress callback: fraction complete in `[0, 1]` plus a short label.
/// Returning `Err` cancels the recovery; the message becomes the
/// `RecoveryError::Cancelled` payload.
pub type ProgressCallback<'a> = dyn FnMut(f64, &str) -> Result<(), String> + 'a;

/// Reconstruct a fresh cache directory at `new_dir` from `old_dir`'s
/// operation log, cut at `cut_point`, and write the swap marker into
/// `old_dir` so the next process start picks it up.
///
/// `new_dir` is expected to be a sibling directory of `old_dir` (inside
/// its parent) — the relative path the swap marker names is computed
/// under that assumption.
pub fn recover_from_point(
    cut_point: u64,
    old_dir: &Path,
    new_dir: &Path,
    config: &RecoveryConfig,
    attribute_enumerator: &dyn AttributeEnumerator,
    attribute_writer: &mut dyn AttributeWriter,
    progress: Option<&mut ProgressCallback>,
) -> Result<RecoveryResult, RecoveryError> {
    let result = run_recovery(
        cut_point,
        old_dir,
        new_dir,
        config,
        attribute_enumerator,
        attribute_writer,
        progress,
    );
    if let Err(ref err) = result {
        tracing::error!(old_dir = ?old_dir, error = %err, "recovery aborted with a fatal error");
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn run_recovery(
    cut_point: u64,
    old_dir: &Path,
    new_dir: &Path,
    config: &RecoveryConfig,
    attribute_enumerator: &dyn AttributeEnumerator,
    attribute_writer: &mut dyn AttributeWriter,
    mut progress: Option<&mut ProgressCallback>,
) -> Result<RecoveryResult, RecoveryError> {
    let start = std::time::Instant::now();
    let mut result = RecoveryResult::default();

    if old_dir == new_dir {
        return Err(RecoveryError::LogDirEqualsDestination);
    }

    report(&mut progress, 0.0, "setup")?;
    let (new_log, new_payloads, mut records) =
        stage0_setup(old_dir, new_dir, cut_point, config)?;
    let source_log = LogStorage::open(&old_dir.join(LOG_DIR_NAME), config)?;
    let source_payloads = PayloadStore::open(&old_dir.join(LOG_DIR_NAME))?;

    report(&mut progress, 0.2, "content recovery")?;
    let last_recovered_content_id = stage1_content_recovery(&source_payloads, &new_payloads)?;
    result.last_recovered_content_id = last_recovered_content_id;

    report(&mut progress, 0.4, "record initialization")?;
    let max_file_id = compute_max_file_id(&source_log, cut_point)?;
    result.last_allocated_record = max_file_id;
    let mut states: HashMap<FileId, RecoveryState> = HashMap::new();
    states.insert(SUPER_ROOT, RecoveryState::Initialized);
    stage2_record_init(
        &source_log,
        cut_point,
        config,
        max_file_id,
        last_recovered_content_id,
        &new_log,
        &mut records,
        &mut states,
        attribute_enumerator,
        &new_payloads,
        attribute_writer,
        &mut result,
    )?;

    report(&mut progress, 0.7, "tree reconstruction")?;
    stage3_tree_reconstruction(
        &source_log,
        cut_point,
        max_file_id,
        last_recovered_content_id,
        &new_payloads,
        &mut records,
        &mut states,
        attribute_writer,
        &mut result,
    )?;

    report(&mut progress, 0.9, "mark unused")?;
    stage4_mark_unused(max_file_id, &mut records, &mut states)?;

    finalize(old_dir, new_dir, &mut records, &mut states, &mut result)?;
    new_log.flush()?;
    new_payloads.flush()?;
    records.flush()?;

    result.duration = start.elapsed();
    tracing::info!(
        connected = result.connected_count,
        unused = result.unused_count,
        botched = result.botched_count,
        duplicate_children_lost = result.duplicate_children_lost,
        duration_ms = result.duration.as_millis() as u64,
        "recovery finished"
    );
    report(&mut progress, 1.0, "done")?;
    Ok(result)
}

fn report(
    progress: &mut Option<&mut ProgressCallback>,
    fraction: f64,
    label: &str,
) -> Result<(), RecoveryError> {
    tracing::info!(fraction, stage = label, "entering recovery stage");
    if let Some(cb) = progress.as_mut() {
        cb(fraction, label).map_err(RecoveryError::Cancelled)?;
    }
    Ok(())
}

fn stage0_setup(
    old_dir: &Path,
    new_dir: &Path,
    cut_point: u64,
    config: &RecoveryConfig,
) -> Result<(LogStorage, PayloadStore, RecordsStore), RecoveryError> {
    if new_dir.exists() && std::fs::read_dir(new_dir)?.next().is_some() {
        return Err(RecoveryError::DestinationNotEmpty(new_dir.to_path_buf()));
    }
    std::fs::create_dir_all(new_dir)?;

    for name in [NAMES_FILE_NAME, ATTR_ENUM_FILE_NAME] {
        let source = old_dir.join(name);
        if !source.exists() {
            return Err(RecoveryError::EnumeratorMissing(source));
        }
        std::fs::copy(&source, new_dir.join(name))?;
    }

    copy_dir_recursive(&old_dir.join(LOG_DIR_NAME), &new_dir.join(LOG_DIR_NAME))?;
    let new_log_dir = new_dir.join(LOG_DIR_NAME);
    vfs_log::format::write_persistent_size(&new_log_dir.join("operations"), cut_point)?;

    let new_log = LogStorage::open(&new_log_dir, config)?;
    let new_payloads = PayloadStore::open(&new_log_dir)?;
    let records = RecordsStore::create(&new_dir.join(RECORDS_FILE_NAME))?;
    Ok((new_log, new_payloads, records))
}

fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn stage1_content_recovery(
    source: &PayloadStore,
    dest: &PayloadStore,
) -> Result<vfs_core::PayloadRef, RecoveryError> {
    let mut last_recovered = 0;
    let mut id = 1;
    loop {
        match source.read(id)? {
            Some(bytes) => {
                let new_id = dest.append(&bytes)?;
                debug_assert_eq!(new_id, id, "payload ids must be assigned densely");
                last_recovered = id;
                id += 1;
            }
            None => break,
        }
    }
    Ok(last_recovered)
}

fn compute_max_file_id(storage: &LogStorage, end: u64) -> Result<FileId, vfs_core::LogError> {
    let mut iter = LogIterator::constrained(storage.clone(), storage.start_offset(), end);
    let mut max_id = SUPER_ROOT;
    while let Some(result) = iter.next() {
        match result? {
            OperationReadResult::Complete(op) => {
                if let Some(fid) = op.file_id() {
                    max_id = max_id.max(fid);
                }
            }
            OperationReadResult::Incomplete(_) => {}
            OperationReadResult::Invalid(_) => break,
        }
    }
    Ok(max_id)
}

#[allow(clippy::too_many_arguments)]
fn stage2_record_init(
    source_log: &LogStorage,
    cut_point: u64,
    config: &RecoveryConfig,
    max_file_id: FileId,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_log: &LogStorage,
    records: &mut RecordsStore,
    states: &mut HashMap<FileId, RecoveryState>,
    attribute_enumerator: &dyn AttributeEnumerator,
    new_payloads: &PayloadStore,
    attribute_writer: &mut dyn AttributeWriter,
    result: &mut RecoveryResult,
) -> Result<(), RecoveryError> {
    let chunk_size = config.records_init_chunk_size.max(1);
    let mut lo = 1u32;
    while lo <= max_file_id {
        let hi = lo.saturating_add(chunk_size - 1).min(max_file_id);
        let filler = Filler::for_properties(PropertySelection::ALL)
            .constrain(Constraint::Range { lo, hi });
        let iter =
            LogIterator::constrained_ending_at(source_log.clone(), source_log.start_offset(), cut_point);
        let snapshot = SnapshotEngine::run(iter, &filler)?;

        for fid in lo..=hi {
            if fid == SUPER_ROOT {
                states.insert(fid, RecoveryState::Initialized);
                continue;
            }
            process_one_record(
                fid,
                &snapshot,
                last_recovered_content_id,
                new_log,
                records,
                states,
                attribute_enumerator,
                new_payloads,
                attribute_writer,
                result,
            )?;
        }
        lo = hi + 1;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_one_record(
    fid: FileId,
    snapshot: &vfs_snapshot::VfsSnapshot,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_log: &LogStorage,
    records: &mut RecordsStore,
    states: &mut HashMap<FileId, RecoveryState>,
    attribute_enumerator: &dyn AttributeEnumerator,
    new_payloads: &PayloadStore,
    attribute_writer: &mut dyn AttributeWriter,
    result: &mut RecoveryResult,
) -> Result<(), RecoveryError> {
    let Some(row) = snapshot.row(fid) else {
        tracing::warn!(file_id = fid, "no snapshot row, marking botched");
        states.insert(fid, RecoveryState::Botched);
        return Ok(());
    };
    let (Some(&parent_id), Some(&name_id), Some(&length), Some(&timestamp), Some(&flags_bits), Some(&content_id)) = (
        row.parent_id.value(),
        row.name_id.value(),
        row.length.value(),
        row.timestamp.value(),
        row.flags.value(),
        row.content_id.value(),
    ) else {
        tracing::warn!(file_id = fid, "a mandatory property never appeared, marking botched");
        states.insert(fid, RecoveryState::Botched);
        return Ok(());
    };

    let flags = RecordFlags::from_bits(flags_bits);
    if flags.contains(RecordFlags::FREE_RECORD) {
        records.fill_record(
            fid,
            FileRecord {
                parent_id,
                name_id,
                length,
                timestamp,
                flags,
                content_id,
            },
        )?;
        states.insert(fid, RecoveryState::Unused);
        return Ok(());
    }

    let mut new_flags = flags;
    let mut final_content_id = content_id;
    if content_id != NO_CONTENT {
        if content_id <= last_recovered_content_id {
            result.recovered_contents_count += 1;
        } else {
            new_flags = new_flags
                .with(RecordFlags::MUST_RELOAD_CONTENT)
                .with(RecordFlags::MUST_RELOAD_LENGTH);
            final_content_id = NO_CONTENT;
            result.lost_contents_count += 1;
            new_log.append_blocking(&Operation::SetContentRecordId {
                file_id: fid,
                content_id: NO_CONTENT,
                status: OperationStatus::Success,
            })?;
            new_log.append_blocking(&Operation::SetFlags {
                file_id: fid,
                flags: new_flags.bits(),
                status: OperationStatus::Success,
            })?;
        }
    }

    records.fill_record(
        fid,
        FileRecord {
            parent_id,
            name_id,
            length,
            timestamp,
            flags: new_flags,
            content_id: final_content_id,
        },
    )?;
    states.insert(fid, RecoveryState::Initialized);

    for (&attr_key, &payload_ref) in &row.attributes {
        if attr_key == CHILDREN_ATTR {
            continue;
        }
        match recover_one_attribute(
            fid,
            attr_key,
            payload_ref,
            last_recovered_content_id,
            new_payloads,
            attribute_enumerator,
            attribute_writer,
        ) {
            Ok(true) => result.recovered_attributes_count += 1,
            Ok(false) => result.botched_attributes_count += 1,
            Err(source) => {
                return Err(RecoveryError::AttributeWriteFatal { file_id: fid, source })
            }
        }
    }
    Ok(())
}

/// Returns `Ok(true)` if recovered, `Ok(false)` if non-fatally botched,
/// `Err` only for an I/O-class failure (promoted to fatal).
fn recover_one_attribute(
    fid: FileId,
    attr_key: vfs_core::AttrKey,
    payload_ref: vfs_core::PayloadRef,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_payloads: &PayloadStore,
    attribute_enumerator: &dyn AttributeEnumerator,
    attribute_writer: &mut dyn AttributeWriter,
) -> Result<bool, io::Error> {
    let Some(descriptor) = attribute_enumerator.descriptor(attr_key) else {
        return Ok(false);
    };
    if payload_ref == 0 || payload_ref > last_recovered_content_id {
        return Ok(false);
    }
    let Some(bytes) = new_payloads.read(payload_ref)? else {
        return Ok(false);
    };
    let stripped = strip_version_prefix(&descriptor, &bytes);
    attribute_writer.write_attribute(fid, attr_key, stripped)?;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn stage3_tree_reconstruction(
    source_log: &LogStorage,
    cut_point: u64,
    max_file_id: FileId,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_payloads: &PayloadStore,
    records: &mut RecordsStore,
    states: &mut HashMap<FileId, RecoveryState>,
    attribute_writer: &mut dyn AttributeWriter,
    result: &mut RecoveryResult,
) -> Result<(), RecoveryError> {
    let mut children_of: HashMap<FileId, Vec<FileId>> = HashMap::new();
    for fid in 1..=max_file_id {
        if fid == SUPER_ROOT || states.get(&fid) != Some(&RecoveryState::Initialized) {
            continue;
        }
        let record = records.get(fid)?.unwrap_or_default();
        children_of.entry(record.parent_id).or_default().push(fid);
    }

    let super_root_pairs = read_super_root_children(
        source_log,
        cut_point,
        last_recovered_content_id,
        new_payloads,
    )?;
    let explicit_children: HashSet<FileId> = super_root_pairs.iter().map(|&(_, fid)| fid).collect();
    let legacy_or_canonical: HashSet<FileId> = children_of
        .get(&SUPER_ROOT)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .chain(children_of.get(&LEGACY_SUPER_ROOT_PARENT).cloned().unwrap_or_default())
        .collect();
    let seed: Vec<FileId> = explicit_children
        .iter()
        .copied()
        .filter(|fid| legacy_or_canonical.contains(fid))
        .collect();

    let super_root_bytes = encode_super_root_children(&super_root_pairs);
    attribute_writer
        .write_attribute(SUPER_ROOT, CHILDREN_ATTR, &super_root_bytes)
        .map_err(|source| RecoveryError::AttributeWriteFatal {
            file_id: SUPER_ROOT,
            source,
        })?;

    states.insert(SUPER_ROOT, RecoveryState::Connected);
    let mut queue: VecDeque<FileId> = VecDeque::new();
    for fid in seed {
        states.insert(fid, RecoveryState::Connected);
        queue.push_back(fid);
    }

    while let Some(parent_fid) = queue.pop_front() {
        let candidates: Vec<FileId> = children_of
            .get(&parent_fid)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| states.get(c) == Some(&RecoveryState::Initialized))
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let mut by_name: HashMap<NameId, Vec<FileId>> = HashMap::new();
        for &c in &candidates {
            let name_id = records.get(c)?.unwrap_or_default().name_id;
            by_name.entry(name_id).or_default().push(c);
        }

        let mut surviving = Vec::new();
        for group in by_name.into_values() {
            if group.len() == 1 {
                surviving.push(group[0]);
                continue;
            }
            result.duplicate_children_count += group.len() as u64;
            let historical: HashSet<FileId> = read_historical_children(
                source_log,
                cut_point,
                parent_fid,
                last_recovered_content_id,
                new_payloads,
            )?
            .into_iter()
            .collect();
            let intersection: Vec<FileId> =
                group.iter().copied().filter(|c| historical.contains(c)).collect();
            if intersection.len() == 1 {
                surviving.push(intersection[0]);
                result.duplicate_children_deduplicated += 1;
                if result.duplicate_children_deduplicated + result.duplicate_children_lost
                    <= MAX_DUPLICATE_DETAIL_LINES as u64
                {
                    result.push_detail(format!(
                        "parent {parent_fid}: deduplicated to {}",
                        intersection[0]
                    ));
                }
            } else {
                tracing::warn!(
                    parent_id = parent_fid,
                    group = ?group,
                    "dropping ambiguously-named duplicate children"
                );
                result.duplicate_children_lost += 1;
                if result.duplicate_children_deduplicated + result.duplicate_children_lost
                    <= MAX_DUPLICATE_DETAIL_LINES as u64
                {
                    result.push_detail(format!(
                        "parent {parent_fid}: dropped ambiguous group {:?}",
                        group
                    ));
                }
            }
        }
        if result.duplicate_children_deduplicated + result.duplicate_children_lost
            == MAX_DUPLICATE_DETAIL_LINES as u64 + 1
        {
            result.push_detail("...and more");
        }

        surviving.sort_unstable();
        let bytes = encode_children_by_id(parent_fid, &surviving);
        attribute_writer
            .write_attribute(parent_fid, CHILDREN_ATTR, &bytes)
            .map_err(|source| RecoveryError::AttributeWriteFatal {
                file_id: parent_fid,
                source,
            })?;

        for &c in &surviving {
            states.insert(c, RecoveryState::Connected);
            queue.push_back(c);
        }
    }
    Ok(())
}

fn read_super_root_children(
    source_log: &LogStorage,
    cut_point: u64,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_payloads: &PayloadStore,
) -> Result<Vec<(NameId, FileId)>, vfs_core::LogError> {
    let filler =
        Filler::for_properties(PropertySelection::ATTRIBUTES).constrain(Constraint::SuperRootOnly);
    let iter =
        LogIterator::constrained_ending_at(source_log.clone(), source_log.start_offset(), cut_point);
    let snapshot = SnapshotEngine::run(iter, &filler)?;
    let Some(row) = snapshot.row(SUPER_ROOT) else {
        return Ok(Vec::new());
    };
    let Some(&payload_ref) = row.attributes.get(&CHILDREN_ATTR) else {
        return Ok(Vec::new());
    };
    if payload_ref == 0 || payload_ref > last_recovered_content_id {
        return Ok(Vec::new());
    }
    let bytes = new_payloads.read(payload_ref)?.unwrap_or_default();
    Ok(decode_super_root_children(&bytes).unwrap_or_default())
}

fn read_historical_children(
    source_log: &LogStorage,
    cut_point: u64,
    parent_fid: FileId,
    last_recovered_content_id: vfs_core::PayloadRef,
    new_payloads: &PayloadStore,
) -> Result<Vec<FileId>, vfs_core::LogError> {
    let filler = Filler::for_properties(PropertySelection::ATTRIBUTES)
        .constrain(Constraint::Range { lo: parent_fid, hi: parent_fid });
    let iter =
        LogIterator::constrained_ending_at(source_log.clone(), source_log.start_offset(), cut_point);
    let snapshot = SnapshotEngine::run(iter, &filler)?;
    let Some(row) = snapshot.row(parent_fid) else {
        return Ok(Vec::new());
    };
    let Some(&payload_ref) = row.attributes.get(&CHILDREN_ATTR) else {
        return Ok(Vec::new());
    };
    if payload_ref == 0 || payload_ref > last_recovered_content_id {
        return Ok(Vec::new());
    }
    let bytes = new_payloads.read(payload_ref)?.unwrap_or_default();
    Ok(decode_children_by_id(parent_fid, &bytes).unwrap_or_default())
}

fn stage4_mark_unused(
    max_file_id: FileId,
    records: &mut RecordsStore,
    states: &mut HashMap<FileId, RecoveryState>,
) -> Result<(), RecoveryError> {
    for fid in 1..=max_file_id {
        let state = states.get(&fid).copied().unwrap_or(RecoveryState::Undefined);
        if matches!(state, RecoveryState::Connected | RecoveryState::Botched) {
            continue;
        }
        let Some(mut record) = records.get(fid)? else {
            states.insert(fid, RecoveryState::Unused);
            continue;
        };
        record.flags = record.flags.with(RecordFlags::FREE_RECORD);
        match records.fill_record(fid, record) {
            Ok(()) => {
                states.insert(fid, RecoveryState::Unused);
            }
            Err(_) => {
                tracing::warn!(file_id = fid, "failed to write free-record flag, marking botched");
                states.insert(fid, RecoveryState::Botched);
            }
        }
    }
    Ok(())
}

fn finalize(
    old_dir: &Path,
    new_dir: &Path,
    records: &mut RecordsStore,
    states: &mut HashMap<FileId, RecoveryState>,
    result: &mut RecoveryResult,
) -> Result<(), RecoveryError> {
    let source_records = old_dir.join(RECORDS_FILE_NAME);
    if source_records.exists() {
        let timestamp = RecordsStore::read_creation_timestamp(&source_records)
            .map_err(RecoveryError::TimestampPatchFailed)?;
        records
            .patch_creation_timestamp(timestamp)
            .map_err(RecoveryError::TimestampPatchFailed)?;
    }

    for (state, counter) in [
        (RecoveryState::Initialized, &mut result.initialized_count),
        (RecoveryState::Connected, &mut result.connected_count),
        (RecoveryState::Unused, &mut result.unused_count),
        (RecoveryState::Botched, &mut result.botched_count),
    ] {
        *counter = states.values().filter(|&&s| s == state).count() as u64;
    }

    let new_cache_name = new_dir
        .file_name()
        .expect("new_dir must name a directory")
        .to_string_lossy()
        .into_owned();
    let relative = Path::new("..").join(new_cache_name);
    swap::write_marker(old_dir, &relative)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::test_support::{FakeEnumerator, FakeWriter};

    /// Appends a clean, fully-connected replay: file 2 parented directly
    /// under the super-root, with the super-root's children attribute
    /// naming it. Returns the cut point to recover up to.
    fn write_clean_replay_log(vfslog_dir: &Path, config: &RecoveryConfig) -> u64 {
        let storage = LogStorage::open(vfslog_dir, config).unwrap();
        let payloads = PayloadStore::open(vfslog_dir).unwrap();

        let payload_ref = payloads
            .append(&encode_super_root_children(&[(77, 2)]))
            .unwrap();
        payloads.flush().unwrap();

        for op in [
            Operation::SetParent {
                file_id: 2,
                new_parent_id: SUPER_ROOT,
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
                status: OperationStatus::Success,
            },
            Operation::SetFlags {
                file_id: 2,
                flags: 0,
                status: OperationStatus::Success,
            },
            Operation::SetContentRecordId {
                file_id: 2,
                content_id: NO_CONTENT,
                status: OperationStatus::Success,
            },
            Operation::SetAttribute {
                file_id: SUPER_ROOT,
                attr_key: CHILDREN_ATTR,
                payload_ref,
                status: OperationStatus::Success,
            },
        ] {
            storage.append_blocking(&op).unwrap();
        }
        storage.flush().unwrap();
        let cut_point = storage.size();
        vfs_log::format::write_persistent_size(&vfslog_dir.join("operations"), cut_point).unwrap();
        cut_point
    }

    #[test]
    fn clean_replay_connects_reachable_file() {
        let root = tempfile::tempdir().unwrap();
        let old_dir = root.path().join("old");
        let new_dir = root.path().join("new");
        std::fs::create_dir_all(&old_dir).unwrap();

        let config = RecoveryConfig::for_testing();
        let cut_point = write_clean_replay_log(&old_dir.join(LOG_DIR_NAME), &config);

        std::fs::write(old_dir.join(NAMES_FILE_NAME), b"").unwrap();
        std::fs::write(old_dir.join(ATTR_ENUM_FILE_NAME), b"").unwrap();

        let enumerator = FakeEnumerator::default();
        let mut writer = FakeWriter::default();

        let result = recover_from_point(
            cut_point,
            &old_dir,
            &new_dir,
            &config,
            &enumerator,
            &mut writer,
            None,
        )
        .unwrap();

        assert_eq!(result.connected_count, 2);
        assert_eq!(result.initialized_count, 0);
        assert_eq!(result.unused_count, 0);
        assert_eq!(result.botched_count, 0);
        assert_eq!(result.recovered_contents_count, 0);
        assert_eq!(result.lost_contents_count, 0);
        assert_eq!(result.last_recovered_content_id, 1);
        assert_eq!(result.last_allocated_record, 2);
        assert_eq!(result.duplicate_children_count, 0);

        assert_eq!(
            writer.written.get(&(SUPER_ROOT, CHILDREN_ATTR)),
            Some(&encode_super_root_children(&[(77, 2)]))
        );

        let mut records = RecordsStore::open(&new_dir.join(RECORDS_FILE_NAME)).unwrap();
        let record = records.get(2).unwrap().unwrap();
        assert_eq!(record.parent_id, SUPER_ROOT);
        assert_eq!(record.name_id, 77);
        assert_eq!(record.length, 10);
        assert_eq!(record.flags, RecordFlags::NONE);
    }

    #[test]
    fn destination_must_be_empty() {
        let root = tempfile::tempdir().unwrap();
        let old_dir = root.path().join("old");
        let new_dir = root.path().join("new");
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::create_dir_all(&new_dir).unwrap();
        std::fs::write(new_dir.join("stale"), b"x").unwrap();

        let config = RecoveryConfig::for_testing();
        let cut_point = write_clean_replay_log(&old_dir.join(LOG_DIR_NAME), &config);
        std::fs::write(old_dir.join(NAMES_FILE_NAME), b"").unwrap();
        std::fs::write(old_dir.join(ATTR_ENUM_FILE_NAME), b"").unwrap();

        let enumerator = FakeEnumerator::default();
        let mut writer = FakeWriter::default();
        let err = recover_from_point(
            cut_point,
            &old_dir,
            &new_dir,
            &config,
            &enumerator,
            &mut writer,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RecoveryError::DestinationNotEmpty(_)));
    }

    #[test]
    fn unreachable_file_is_marked_unused() {
        let root = tempfile::tempdir().unwrap();
        let old_dir = root.path().join("old");
        let new_dir = root.path().join("new");
        std::fs::create_dir_all(&old_dir).unwrap();

        let config = RecoveryConfig::for_testing();
        let vfslog_dir = old_dir.join(LOG_DIR_NAME);
        let cut_point = {
            let storage = LogStorage::open(&vfslog_dir, &config).unwrap();
            let payloads = PayloadStore::open(&vfslog_dir).unwrap();
            let _ = payloads.flush();

            // File 2 gets a full set of mandatory properties but is never
            // named as anyone's child, so stage 3's BFS never reaches it.
            for op in [
                Operation::SetParent {
                    file_id: 2,
                    new_parent_id: SUPER_ROOT,
                    status: OperationStatus::Success,
                },
                Operation::SetName {
                    file_id: 2,
                    name_id: 5,
                    status: OperationStatus::Success,
                },
                Operation::SetLength {
                    file_id: 2,
                    length: 0,
                    status: OperationStatus::Success,
                },
                Operation::SetTimestamp {
                    file_id: 2,
                    timestamp: 1,
                    status: OperationStatus::Success,
                },
                Operation::SetFlags {
                    file_id: 2,
                    flags: 0,
                    status: OperationStatus::Success,
                },
                Operation::SetContentRecordId {
                    file_id: 2,
                    content_id: NO_CONTENT,
                    status: OperationStatus::Success,
                },
            ] {
                storage.append_blocking(&op).unwrap();
            }
            storage.flush().unwrap();
            let cut_point = storage.size();
            vfs_log::format::write_persistent_size(&vfslog_dir.join("operations"), cut_point)
                .unwrap();
            cut_point
        };

        std::fs::write(old_dir.join(NAMES_FILE_NAME), b"").unwrap();
        std::fs::write(old_dir.join(ATTR_ENUM_FILE_NAME), b"").unwrap();

        let enumerator = FakeEnumerator::default();
        let mut writer = FakeWriter::default();
        let result = recover_from_point(
            cut_point,
            &old_dir,
            &new_dir,
            &config,
            &enumerator,
            &mut writer,
            None,
        )
        .unwrap();

        assert_eq!(result.connected_count, 1);
        assert_eq!(result.unused_count, 1);
        assert_eq!(result.botched_count, 0);

        let mut records = RecordsStore::open(&new_dir.join(RECORDS_FILE_NAME)).unwrap();
        let record = records.get(2).unwrap().unwrap();
        assert!(record.flags.contains(RecordFlags::FREE_RECORD));
    }
}
