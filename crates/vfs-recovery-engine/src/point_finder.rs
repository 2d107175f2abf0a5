//! Scans the log for safe resume points: a clean window preceding a
//! candidate cut, and a rate-limited menu of event boundaries a user can
//! pick from.

use vfs_core::LogError;
use vfs_log::codec::TAG_EVENT_START;
use vfs_log::{LogIterator, LogStorage, Operation, OperationReadResult, TagMask};

/// A candidate recovery point: an `EventStart` boundary and its log
/// position (immediately after the event-start descriptor, i.e. a valid
/// cut-point).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPoint {
    /// The event's start time, milliseconds since epoch.
    pub timestamp: u64,
    /// The log position immediately preceding the `EventStart` record,
    /// i.e. where `previous_filtered` left the cursor after reading it.
    pub position: u64,
}

/// Scan backward from `point`, accepting the first candidate preceded by
/// `min_clean_window` consecutive `Complete`, non-exceptional records.
/// Any `Incomplete` or exceptional record within the window resets the
/// candidate to just before the offending record and restarts the scan.
/// Returns `Ok(None)` if the log's start is reached before a full window
/// is ever found.
pub fn find_closest_preceding_clean_point(
    storage: &LogStorage,
    point: u64,
    min_clean_window: u32,
) -> Result<Option<u64>, LogError> {
    let mut candidate = point;
    loop {
        let mut iter =
            LogIterator::constrained_ending_at(storage.clone(), storage.start_offset(), candidate);
        let mut clean_count = 0u32;
        let mut reset_to = None;
        let mut exhausted = false;

        while clean_count < min_clean_window {
            match iter.previous() {
                None => {
                    exhausted = true;
                    break;
                }
                Some(Ok(OperationReadResult::Complete(op))) => {
                    if op.is_exceptional() {
                        reset_to = Some(iter.position());
                        break;
                    }
                    clean_count += 1;
                }
                Some(Ok(OperationReadResult::Incomplete(_)))
                | Some(Ok(OperationReadResult::Invalid(_))) => {
                    reset_to = Some(iter.position());
                    break;
                }
                Some(Err(e)) => return Err(e),
            }
        }

        if clean_count >= min_clean_window {
            return Ok(Some(candidate));
        }
        if exhausted {
            return Ok(None);
        }
        candidate = reset_to.expect("loop only exits early via reset_to or exhaustion");
    }
}

/// Lazily yields every `EventStart` boundary walking backward from
/// `point`, newest first.
pub struct RecoveryPointIter {
    iter: LogIterator,
    mask: TagMask,
}

impl Iterator for RecoveryPointIter {
    type Item = Result<RecoveryPoint, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.iter.previous_filtered(Some(&self.mask))? {
                Ok(OperationReadResult::Complete(Operation::EventStart { timestamp })) => {
                    return Some(Ok(RecoveryPoint {
                        timestamp,
                        position: self.iter.position(),
                    }));
                }
                Ok(OperationReadResult::Complete(_)) | Ok(OperationReadResult::Incomplete(_)) => {
                    continue;
                }
                Ok(OperationReadResult::Invalid(_)) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Every `EventStart` boundary preceding `point`, newest first.
pub fn recovery_points_prior_to(storage: &LogStorage, point: u64) -> RecoveryPointIter {
    let iter = LogIterator::constrained_ending_at(storage.clone(), storage.start_offset(), point);
    RecoveryPointIter {
        iter,
        mask: TagMask::only(&[TAG_EVENT_START]),
    }
}

/// Rate-limit an ordered (newest-first) sequence of recovery points: the
/// first point always passes, and every later point passes only if it is
/// at least `skip` milliseconds earlier than the last point yielded;
/// `skip` grows by `multiplier` after each emission, capped at roughly
/// five years to avoid overflow.
pub fn thin_out<I>(points: I, initial_skip_ms: u64, multiplier: f64) -> ThinOut<I>
where
    I: Iterator<Item = Result<RecoveryPoint, LogError>>,
{
    ThinOut {
        inner: points,
        skip_ms: initial_skip_ms,
        multiplier,
        last_timestamp: None,
    }
}

const MAX_SKIP_MS: f64 = 5.0 * 365.0 * 24.0 * 3600.0 * 1000.0;

/// Iterator adapter produced by [`thin_out`].
pub struct ThinOut<I> {
    inner: I,
    skip_ms: u64,
    multiplier: f64,
    last_timestamp: Option<u64>,
}

impl<I> Iterator for ThinOut<I>
where
    I: Iterator<Item = Result<RecoveryPoint, LogError>>,
{
    type Item = Result<RecoveryPoint, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let point = match self.inner.next()? {
                Ok(p) => p,
                Err(e) => return Some(Err(e)),
            };
            match self.last_timestamp {
                None => {
                    self.last_timestamp = Some(point.timestamp);
                    return Some(Ok(point));
                }
                Some(last) => {
                    if last.saturating_sub(point.timestamp) >= self.skip_ms {
                        self.last_timestamp = Some(point.timestamp);
                        self.skip_ms = ((self.skip_ms as f64) * self.multiplier).min(MAX_SKIP_MS) as u64;
                        return Some(Ok(point));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfs_core::RecoveryConfig;
    use vfs_log::codec::OperationStatus;

    fn test_storage() -> (tempfile::TempDir, LogStorage) {
        let dir = tempfile::tempdir().unwrap();
        let config = RecoveryConfig::for_testing();
        let storage = LogStorage::open(dir.path(), &config).unwrap();
        (dir, storage)
    }

    #[test]
    fn clean_window_accepts_point_with_enough_clean_history() {
        let (_dir, storage) = test_storage();
        for _ in 0..10 {
            storage
                .append_blocking(&Operation::EventStart { timestamp: 1 })
                .unwrap();
        }
        let end = storage.size();
        let found = find_closest_preceding_clean_point(&storage, end, 5).unwrap();
        assert_eq!(found, Some(end));
    }

    #[test]
    fn exceptional_record_resets_the_candidate() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::SetFlags {
                file_id: 1,
                flags: 0,
                status: OperationStatus::Exception,
            })
            .unwrap();
        let after_exceptional = storage.size();
        storage
            .append_blocking(&Operation::EventStart { timestamp: 2 })
            .unwrap();
        storage
            .append_blocking(&Operation::EventStart { timestamp: 3 })
            .unwrap();

        let end = storage.size();
        let found = find_closest_preceding_clean_point(&storage, end, 2).unwrap();
        assert_eq!(found, Some(after_exceptional));
    }

    #[test]
    fn no_window_returns_none() {
        let (_dir, storage) = test_storage();
        storage
            .append_blocking(&Operation::EventStart { timestamp: 1 })
            .unwrap();
        let end = storage.size();
        let found = find_closest_preceding_clean_point(&storage, end, 100).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn thin_out_matches_exponential_schedule() {
        let (_dir, storage) = test_storage();
        let timestamps = [0u64, 5000, 20000, 40000, 100000, 400000, 1000000, 10000000];
        for &ts in &timestamps {
            storage.append_blocking(&Operation::EventStart { timestamp: ts }).unwrap();
        }
        let end = storage.size();
        let points = recovery_points_prior_to(&storage, end);
        let thinned: Vec<u64> = thin_out(points, 30_000, 2.0)
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(thinned, vec![10_000_000, 1_000_000, 400_000, 100_000]);
    }

    #[test]
    fn recovery_points_are_newest_first() {
        let (_dir, storage) = test_storage();
        storage.append_blocking(&Operation::EventStart { timestamp: 10 }).unwrap();
        storage.append_blocking(&Operation::EventStart { timestamp: 20 }).unwrap();
        let end = storage.size();
        let points: Vec<u64> = recovery_points_prior_to(&storage, end)
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(points, vec![20, 10]);
    }

    fn descending_timestamps() -> impl proptest::strategy::Strategy<Value = Vec<u64>> {
        proptest::collection::vec(0u64..1_000_000, 0..40).prop_map(|mut ts| {
            ts.sort_unstable_by(|a, b| b.cmp(a));
            ts.dedup();
            ts
        })
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

        /// `thin_out` never reorders its input, and every gap between
        /// consecutive emissions is at least as large as the schedule's
        /// current skip at the time that emission passed.
        #[test]
        fn thin_out_preserves_order_and_respects_schedule(
            timestamps in descending_timestamps(),
            initial_skip in 1u64..100_000,
            multiplier in 1.0f64..3.0,
        ) {
            let points = timestamps
                .iter()
                .enumerate()
                .map(|(i, &timestamp)| Ok(RecoveryPoint { timestamp, position: i as u64 }));
            let emitted: Vec<RecoveryPoint> = thin_out(points, initial_skip, multiplier)
                .map(|r| r.unwrap())
                .collect();

            // Order preserved: emitted is a (not necessarily contiguous)
            // subsequence of the input, in the same relative order.
            let mut cursor = 0usize;
            for point in &emitted {
                while cursor < timestamps.len() && timestamps[cursor] != point.timestamp {
                    cursor += 1;
                }
                proptest::prop_assert!(cursor < timestamps.len());
                cursor += 1;
            }

            // Gaps only grow: each consecutive emitted pair is separated
            // by at least the schedule's current skip, mirroring the
            // same integer truncation `ThinOut::next` applies.
            let mut skip_ms = initial_skip;
            for pair in emitted.windows(2) {
                let gap = pair[0].timestamp.saturating_sub(pair[1].timestamp);
                proptest::prop_assert!(gap >= skip_ms);
                skip_ms = ((skip_ms as f64) * multiplier).min(1.0e15) as u64;
            }
        }
    }
}
