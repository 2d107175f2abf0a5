//! Durable, append-only, chunked operation log.
//!
//! [`LogStorage`] owns the log file set and its tail-write bookkeeping.
//! Appends are wait-free: `reserve` is a single compare-and-swap loop
//! against the reservation offset, independent of how long the caller
//! then takes to serialize its payload. The actual byte write is handed
//! to a small worker pool fed by a bounded channel; if the channel is
//! full the caller performs the write itself inline, which is explicit
//! backpressure rather than a dropped write.

use crate::format::{self, InvalidReason, OperationReadResult};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use vfs_core::{LogError, RecoveryConfig};

/// Number of background threads draining the write-submission channel.
const WRITE_WORKER_COUNT: usize = 2;

type Job = Box<dyn FnOnce() + Send>;

struct Inner {
    operations_dir: PathBuf,
    chunk_size: u64,
    chunks: Mutex<HashMap<u64, Arc<File>>>,
    start_offset: AtomicU64,
    /// Persisted (known-durable-on-disk) contiguous prefix.
    persistent_size: AtomicU64,
    /// Next free reservation offset — the "emerging" size.
    reservation: AtomicU64,
    /// Completed-but-not-yet-contiguous reservations, keyed by start
    /// offset, so `persistent_size` can advance once its predecessor
    /// closes even when slots finish out of order.
    pending: Mutex<HashMap<u64, u64>>,
    sender: SyncSender<Job>,
    /// First I/O error observed by a worker or inline write. Surfaced by
    /// `LogStorage::check_health`.
    failure: Mutex<Option<String>>,
}

/// Durable, append-only, chunked operation log.
///
/// Cloning a `LogStorage` handle is cheap (it is an `Arc` under the
/// hood); every clone shares the same chunk files, reservation counter
/// and worker pool.
#[derive(Clone)]
pub struct LogStorage {
    inner: Arc<Inner>,
}

/// A reserved, not-yet-written slot in the log.
///
/// Dropping a slot without calling [`WriteSlot::commit`] writes a torn
/// frame (negated head byte, true tail byte) so a reader never mistakes
/// an abandoned reservation for a gap.
pub struct WriteSlot {
    storage: LogStorage,
    position: u64,
    tag: u8,
    committed: bool,
}

impl LogStorage {
    /// Open (creating if necessary) the log rooted at `log_dir`, whose
    /// operations subdirectory holds chunk files and the persistent size
    /// marker.
    pub fn open(log_dir: &Path, config: &RecoveryConfig) -> io::Result<Self> {
        let operations_dir = log_dir.join(format::OPERATIONS_DIR);
        std::fs::create_dir_all(&operations_dir)?;
        let persistent_size = format::read_persistent_size(&operations_dir)?;

        let (sender, receiver) = sync_channel::<Job>(config.log_write_buffer_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..WRITE_WORKER_COUNT {
            spawn_worker(Arc::clone(&receiver));
        }

        let inner = Arc::new(Inner {
            operations_dir,
            chunk_size: config.log_chunk_size,
            chunks: Mutex::new(HashMap::new()),
            start_offset: AtomicU64::new(0),
            persistent_size: AtomicU64::new(persistent_size),
            reservation: AtomicU64::new(persistent_size),
            pending: Mutex::new(HashMap::new()),
            sender,
            failure: Mutex::new(None),
        });
        tracing::debug!(?log_dir, persistent_size, "opened log storage");
        Ok(LogStorage { inner })
    }

    /// The persisted, contiguous size of the log: every position below
    /// this is guaranteed to have a complete, durable descriptor on
    /// disk (modulo torn/invalid classification of its contents).
    pub fn size(&self) -> u64 {
        self.inner.persistent_size.load(Ordering::Acquire)
    }

    /// The reservation front: bytes below this have been claimed by some
    /// writer, but may not yet be durable.
    pub fn emerging_size(&self) -> u64 {
        self.inner.reservation.load(Ordering::Acquire)
    }

    /// The logical start of the log. Positions before this are no
    /// longer valid (dropped by [`LogStorage::clear_up_to`]).
    pub fn start_offset(&self) -> u64 {
        self.inner.start_offset.load(Ordering::Acquire)
    }

    /// Any I/O failure observed by an asynchronous write worker since
    /// the log was opened.
    pub fn check_health(&self) -> Result<(), LogError> {
        if let Some(msg) = self.inner.failure.lock().clone() {
            return Err(LogError::Io(io::Error::new(io::ErrorKind::Other, msg)));
        }
        Ok(())
    }

    /// Reserve space for an operation tagged `tag`. The returned slot
    /// must be filled and committed, or it will be written as a torn
    /// record when dropped.
    pub fn reserve(&self, tag: u8) -> Result<WriteSlot, LogError> {
        let len = crate::codec::descriptor_len(tag).ok_or(LogError::InvalidTag(tag))?;
        let chunk_size = self.inner.chunk_size;
        loop {
            let current = self.inner.reservation.load(Ordering::Acquire);
            let offset_in_chunk = current % chunk_size;
            let remaining = chunk_size - offset_in_chunk;
            let start = if (len as u64) <= remaining {
                current
            } else {
                let chunk_index = current / chunk_size;
                (chunk_index + 1) * chunk_size
            };
            let next = start + len as u64;
            if self
                .inner
                .reservation
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if start > current {
                    // The chunk-boundary skip between `current` and `start`
                    // is reserved but will never be written by any slot;
                    // close it immediately so `persistent_size` can still
                    // advance past it.
                    self.mark_closed(current, start);
                }
                return Ok(WriteSlot {
                    storage: self.clone(),
                    position: start,
                    tag,
                    committed: false,
                });
            }
        }
    }

    /// Read the descriptor starting at `position`.
    pub fn read_at(&self, position: u64) -> Result<OperationReadResult, LogError> {
        self.read_at_filtered(position, None)
    }

    /// Read the descriptor starting at `position`, skipping payload
    /// decode (and returning `Incomplete(tag)`) when `mask` is present
    /// and excludes the record's tag.
    pub fn read_at_filtered(
        &self,
        position: u64,
        mask: Option<&crate::iterator::TagMask>,
    ) -> Result<OperationReadResult, LogError> {
        self.bounds_check(position)?;
        let head = self.read_byte(position)?;
        let presumed_tag = if (1..=crate::codec::MAX_TAG).contains(&head) {
            head
        } else {
            head.wrapping_neg()
        };
        let value_len = match crate::codec::value_len(presumed_tag) {
            Some(len) => len,
            None => {
                return Ok(OperationReadResult::Invalid(InvalidReason::TagOutOfRange(
                    head,
                )))
            }
        };
        let mut value = vec![0u8; value_len];
        self.read_exact_at(position + 1, &mut value)?;
        let tail = self.read_byte(position + 1 + value_len as u64)?;
        let decode = mask.map(|m| m.contains(presumed_tag)).unwrap_or(true);
        Ok(format::classify(head, &value, tail, decode))
    }

    /// Read the descriptor whose tail byte is at `position - 1`, i.e.
    /// the record that ends exactly at `position`.
    pub fn read_preceding(&self, position: u64) -> Result<OperationReadResult, LogError> {
        self.read_preceding_filtered(position, None)
    }

    /// Backward counterpart of [`LogStorage::read_at_filtered`].
    pub fn read_preceding_filtered(
        &self,
        position: u64,
        mask: Option<&crate::iterator::TagMask>,
    ) -> Result<OperationReadResult, LogError> {
        if position == 0 {
            return Err(LogError::BeforeStartOffset {
                position: 0,
                start_offset: self.start_offset(),
            });
        }
        let tail_pos = position - 1;
        self.bounds_check(tail_pos)?;
        let tail = self.read_byte(tail_pos)?;
        if !(1..=crate::codec::MAX_TAG).contains(&tail) {
            return Ok(OperationReadResult::Invalid(InvalidReason::TagOutOfRange(
                tail,
            )));
        }
        let value_len = crate::codec::value_len(tail).unwrap();
        let descriptor_len = value_len as u64 + 2;
        if descriptor_len > position {
            return Ok(OperationReadResult::Invalid(InvalidReason::TagOutOfRange(
                tail,
            )));
        }
        let start = position - descriptor_len;
        self.bounds_check(start)?;
        let head = self.read_byte(start)?;
        let mut value = vec![0u8; value_len];
        self.read_exact_at(start + 1, &mut value)?;
        let decode = mask.map(|m| m.contains(tail)).unwrap_or(true);
        Ok(format::classify(head, &value, tail, decode))
    }

    /// Append an operation and wait for it to become durable. Thin
    /// convenience wrapper over [`LogStorage::reserve`] for callers that
    /// do not need to overlap serialization with reservation (recovery's
    /// synthetic bookkeeping appends use this).
    pub fn append_blocking(&self, op: &crate::codec::Operation) -> Result<u64, LogError> {
        let slot = self.reserve(op.tag())?;
        let position = slot.position();
        let payload = crate::codec::encode(op);
        slot.commit(&payload)?;
        self.flush()?;
        Ok(position)
    }

    /// Block until every currently-outstanding write reaches disk and
    /// `fsync` every open chunk file.
    pub fn flush(&self) -> Result<(), LogError> {
        // Spin until no reservations remain unclosed. This is a
        // correctness aid for tests and for recovery's synchronous
        // append path, not a hot-path operation.
        while self.emerging_size() != self.size() {
            std::thread::yield_now();
        }
        let chunks = self.inner.chunks.lock();
        for file in chunks.values() {
            file.sync_data()?;
        }
        self.check_health()
    }

    /// Advance the log's start offset, logically dropping everything
    /// before `position`. Positions before the new start offset become
    /// invalid to read. This is an in-process notion only; it is not
    /// persisted (compare with [`format::write_persistent_size`], which
    /// is what recovery uses to truncate the *end* of a copied log).
    pub fn clear_up_to(&self, position: u64) -> Result<(), LogError> {
        let size = self.size();
        if position > size {
            return Err(LogError::AtOrBeyondEnd { position, size });
        }
        self.inner.start_offset.store(position, Ordering::Release);
        Ok(())
    }

    fn bounds_check(&self, position: u64) -> Result<(), LogError> {
        let start = self.start_offset();
        if position < start {
            return Err(LogError::BeforeStartOffset {
                position,
                start_offset: start,
            });
        }
        let size = self.size();
        if position >= size {
            return Err(LogError::AtOrBeyondEnd { position, size });
        }
        Ok(())
    }

    fn chunk_for(&self, chunk_index: u64) -> io::Result<Arc<File>> {
        let mut chunks = self.inner.chunks.lock();
        if let Some(file) = chunks.get(&chunk_index) {
            return Ok(Arc::clone(file));
        }
        let path = format::chunk_path(&self.inner.operations_dir, chunk_index);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() < self.inner.chunk_size {
            file.set_len(self.inner.chunk_size)?;
        }
        let file = Arc::new(file);
        chunks.insert(chunk_index, Arc::clone(&file));
        Ok(file)
    }

    fn read_byte(&self, position: u64) -> Result<u8, LogError> {
        let mut buf = [0u8; 1];
        self.read_exact_at(position, &mut buf)?;
        Ok(buf[0])
    }

    fn read_exact_at(&self, position: u64, buf: &mut [u8]) -> Result<(), LogError> {
        let chunk_size = self.inner.chunk_size;
        let chunk_index = position / chunk_size;
        let offset_in_chunk = position % chunk_size;
        let file = self.chunk_for(chunk_index)?;
        file.read_exact_at(buf, offset_in_chunk)?;
        Ok(())
    }

    fn write_at(&self, position: u64, bytes: &[u8]) -> io::Result<()> {
        let chunk_size = self.inner.chunk_size;
        let chunk_index = position / chunk_size;
        let offset_in_chunk = position % chunk_size;
        debug_assert!(
            offset_in_chunk + bytes.len() as u64 <= chunk_size,
            "descriptor must not cross a chunk boundary"
        );
        let file = self.chunk_for(chunk_index)?;
        file.write_all_at(bytes, offset_in_chunk)
    }

    fn record_failure(&self, err: &io::Error) {
        tracing::warn!(error = %err, "log write worker failed");
        *self.inner.failure.lock() = Some(err.to_string());
    }

    fn mark_closed(&self, start: u64, end: u64) {
        let mut pending = self.inner.pending.lock();
        pending.insert(start, end);
        loop {
            let current = self.inner.persistent_size.load(Ordering::Acquire);
            match pending.remove(&current) {
                Some(new_end) => {
                    self.inner
                        .persistent_size
                        .store(new_end, Ordering::Release);
                }
                None => break,
            }
        }
    }

    fn submit(&self, job: Job) {
        match self.inner.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => job(),
            Err(TrySendError::Disconnected(job)) => job(),
        }
    }
}

impl WriteSlot {
    /// The reserved absolute position of this slot.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The tag this slot was reserved for.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Serialize `payload` into the slot and submit it for durable
    /// writing. `payload` must be exactly `value_len(tag)` bytes.
    pub fn commit(mut self, payload: &[u8]) -> Result<(), LogError> {
        let expected = crate::codec::value_len(self.tag).ok_or(LogError::InvalidTag(self.tag))?;
        if payload.len() != expected {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "commit payload for tag {} expected {} bytes, got {}",
                    self.tag,
                    expected,
                    payload.len()
                ),
            )));
        }
        let frame = format::frame_complete(self.tag, payload);
        self.committed = true;
        self.submit_frame(frame);
        Ok(())
    }

    fn submit_frame(&mut self, frame: Vec<u8>) {
        let storage = self.storage.clone();
        let position = self.position;
        let len = frame.len() as u64;
        storage.submit(Box::new(move || {
            if let Err(err) = storage.write_at(position, &frame) {
                storage.record_failure(&err);
            }
            storage.mark_closed(position, position + len);
        }));
    }
}

impl Drop for WriteSlot {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let frame = format::frame_torn(self.tag);
        self.submit_frame(frame);
    }
}

fn spawn_worker(receiver: Arc<Mutex<Receiver<Job>>>) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let job = {
            let guard = receiver.lock();
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    })
}
