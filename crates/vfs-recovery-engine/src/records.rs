//! The `records` file: a fixed-format header followed by a fixed-stride
//! table holding one row per allocated `fileId`.
//!
//! This is the destination-side counterpart of the source VFS's own
//! records store. Recovery only ever writes it forward (by fileId, in
//! increasing order as stages discover higher ids) and never needs
//! random deletes — a freed record stays in the table with
//! `FREE_RECORD` set.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use vfs_core::{FileId, NameId, PayloadRef, RecordFlags};

const MAGIC: &[u8; 4] = b"VFSR";
const VERSION: u32 = 1;

/// Byte offset, within the header, of the 8-byte creation timestamp.
/// Exposed because finalization patches this field directly with the
/// source records header's own timestamp.
pub const HEADER_TIMESTAMP_OFFSET: usize = 8;

const HEADER_LEN: usize = 32;
const RECORD_STRIDE: usize = 4 + 4 + 8 + 8 + 4 + 4; // parent, name, length, timestamp, flags, content

/// One row of the records table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileRecord {
    /// `parentId`, or `0` for the legacy super-root quirk.
    pub parent_id: FileId,
    /// Interned name index.
    pub name_id: NameId,
    /// File length in bytes.
    pub length: u64,
    /// Last-write timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Bit flags.
    pub flags: RecordFlags,
    /// Content payload handle, `0` if none.
    pub content_id: PayloadRef,
}

impl FileRecord {
    fn to_bytes(self) -> [u8; RECORD_STRIDE] {
        let mut buf = [0u8; RECORD_STRIDE];
        buf[0..4].copy_from_slice(&self.parent_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.name_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[24..28].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[28..32].copy_from_slice(&self.content_id.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; RECORD_STRIDE]) -> Self {
        FileRecord {
            parent_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            name_id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            length: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            flags: RecordFlags::from_bits(u32::from_le_bytes(buf[24..28].try_into().unwrap())),
            content_id: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }
}

/// The destination `records` file: header plus fixed-stride table.
pub struct RecordsStore {
    file: File,
    max_file_id: FileId,
}

impl RecordsStore {
    /// Create a fresh, empty records file at `path`.
    pub fn create(path: &std::path::Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.flush()?;
        tracing::debug!(?path, "created records store");
        Ok(RecordsStore {
            file,
            max_file_id: 0,
        })
    }

    /// Open an existing records file, inferring the highest allocated
    /// fileId from its length.
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        let max_file_id = if len > HEADER_LEN {
            ((len - HEADER_LEN) / RECORD_STRIDE) as FileId
        } else {
            0
        };
        tracing::debug!(?path, max_file_id, "opened records store");
        Ok(RecordsStore { file, max_file_id })
    }

    /// The highest fileId this store has a row for.
    pub fn max_file_id(&self) -> FileId {
        self.max_file_id
    }

    fn offset_for(file_id: FileId) -> u64 {
        HEADER_LEN as u64 + (file_id as u64 - 1) * RECORD_STRIDE as u64
    }

    /// Ensure the table has rows up to and including `file_id`,
    /// zero-filling any gap, and return its (possibly just-allocated)
    /// row.
    pub fn allocate(&mut self, file_id: FileId) -> io::Result<FileRecord> {
        if file_id > self.max_file_id {
            let end = Self::offset_for(file_id) + RECORD_STRIDE as u64;
            self.file.set_len(end)?;
            self.max_file_id = file_id;
            return Ok(FileRecord::default());
        }
        self.get(file_id)
            .map(|r| r.unwrap_or_default())
    }

    /// Read the row for `file_id`, or `None` if it has never been
    /// allocated.
    pub fn get(&mut self, file_id: FileId) -> io::Result<Option<FileRecord>> {
        if file_id == 0 || file_id > self.max_file_id {
            return Ok(None);
        }
        let mut buf = [0u8; RECORD_STRIDE];
        self.file.seek(SeekFrom::Start(Self::offset_for(file_id)))?;
        self.file.read_exact(&mut buf)?;
        Ok(Some(FileRecord::from_bytes(&buf)))
    }

    /// Overwrite every scalar field of `file_id`'s row.
    pub fn fill_record(&mut self, file_id: FileId, record: FileRecord) -> io::Result<()> {
        self.allocate(file_id)?;
        self.file.seek(SeekFrom::Start(Self::offset_for(file_id)))?;
        self.file.write_all(&record.to_bytes())?;
        Ok(())
    }

    /// Overwrite only `flags` for an already-allocated row.
    pub fn set_flags(&mut self, file_id: FileId, flags: RecordFlags) -> io::Result<()> {
        let mut record = self.get(file_id)?.unwrap_or_default();
        record.flags = flags;
        self.fill_record(file_id, record)
    }

    /// Overwrite only `content_id` for an already-allocated row.
    pub fn set_content_id(&mut self, file_id: FileId, content_id: PayloadRef) -> io::Result<()> {
        let mut record = self.get(file_id)?.unwrap_or_default();
        record.content_id = content_id;
        self.fill_record(file_id, record)
    }

    /// Overwrite the 8-byte creation timestamp in the header, preserving
    /// VFS identity across the swap.
    pub fn patch_creation_timestamp(&mut self, timestamp: u64) -> io::Result<()> {
        self.file
            .seek(SeekFrom::Start(HEADER_TIMESTAMP_OFFSET as u64))?;
        self.file.write_all(&timestamp.to_le_bytes())?;
        Ok(())
    }

    /// Read the 8-byte creation timestamp from an already-written header
    /// (used to read it off the *source* records file at stage 0).
    pub fn read_creation_timestamp(path: &std::path::Path) -> io::Result<u64> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(HEADER_TIMESTAMP_OFFSET as u64))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Flush buffered writes to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
