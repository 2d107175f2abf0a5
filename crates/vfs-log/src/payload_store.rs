//! Content-addressed blob store.
//!
//! Paired with [`LogStorage`](crate::storage::LogStorage): a
//! `ContentOperation` in the log carries only a payload reference and
//! byte length so its descriptor stays fixed-size, while the actual
//! bytes live here, appended in the same order as their log operations.
//! Ids are assigned densely, starting at `1`; id `0` always means "no
//! content".

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use vfs_core::PayloadRef;

const DATA_FILE_NAME: &str = "payloads.dat";

struct Entry {
    offset: u64,
    len: u64,
}

struct State {
    file: File,
    index: Vec<Entry>,
    next_offset: u64,
}

/// Append-only, content-addressed blob store.
pub struct PayloadStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl PayloadStore {
    /// Open (creating if necessary) the payload store rooted at `dir`,
    /// rebuilding its in-memory index by scanning the existing data
    /// file once.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DATA_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut index = Vec::new();
        let mut offset = 0u64;
        file.seek(SeekFrom::Start(0))?;
        loop {
            let mut len_bytes = [0u8; 8];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u64::from_le_bytes(len_bytes);
            file.seek(SeekFrom::Current(len as i64))?;
            index.push(Entry {
                offset: offset + 8,
                len,
            });
            offset += 8 + len;
        }

        tracing::debug!(?path, entries = index.len(), "opened payload store");
        Ok(PayloadStore {
            path,
            state: Mutex::new(State {
                file,
                index,
                next_offset: offset,
            }),
        })
    }

    /// The path of the underlying data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of payloads currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id that would be assigned to the next appended payload.
    pub fn next_id(&self) -> PayloadRef {
        self.len() as PayloadRef + 1
    }

    /// Append `bytes` and return the dense id it was assigned.
    pub fn append(&self, bytes: &[u8]) -> io::Result<PayloadRef> {
        let mut state = self.state.lock();
        let header_offset = state.next_offset;
        let mut frame = Vec::with_capacity(8 + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        frame.extend_from_slice(bytes);
        state.file.seek(SeekFrom::Start(header_offset))?;
        state.file.write_all(&frame)?;
        state.file.flush()?;
        state.index.push(Entry {
            offset: header_offset + 8,
            len: bytes.len() as u64,
        });
        state.next_offset = header_offset + frame.len() as u64;
        Ok(state.index.len() as PayloadRef)
    }

    /// Read the payload stored under `id`, or `None` if `id` is `0` or
    /// has no entry (not yet available).
    pub fn read(&self, id: PayloadRef) -> io::Result<Option<Vec<u8>>> {
        if id == 0 {
            return Ok(None);
        }
        let state = self.state.lock();
        let Some(entry) = state.index.get(id as usize - 1) else {
            return Ok(None);
        };
        let mut buf = vec![0u8; entry.len as usize];
        state.file.read_exact_at(&mut buf, entry.offset)?;
        Ok(Some(buf))
    }

    /// Durably sync the data file.
    pub fn flush(&self) -> io::Result<()> {
        self.state.lock().file.sync_data()
    }
}
