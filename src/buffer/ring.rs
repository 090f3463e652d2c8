//! Persistent ring buffer engine
//!
//! This module implements a single-writer, single-reader FIFO queue of binary
//! records over a memory-mapped file. The buffer survives process restarts
//! because both cursors are persisted in the header of the mapping itself;
//! reopening the file with the same parameters resumes exactly where the
//! previous owner left off.
//!
//! Core behaviors:
//!
//! - One slot's worth of space is always left unallocated, so the read and
//!   write cursors are equal only when the buffer is empty
//! - When a record does not fit, the oldest unread records are silently
//!   evicted until it does; newest data always wins
//! - Records never straddle the end of the data region. A write that would
//!   not fit before the end wraps to the start, stamping a skip marker so the
//!   reader can follow
//! - Every mutation persists both cursors to the header before returning;
//!   syncing the mapping to stable storage is a separate, explicit
//!   [`flush`](MemMapRingBuffer::flush)
//!
//! The engine takes `&mut self` for every mutation: the single-owner rule is
//! enforced by the borrow checker rather than by internal locking.

use crate::buffer::{
    read_u32, write_u32, BufferHeader, RecordMode, HEADER_LEN, LEN_PREFIX, SKIP_MARKER,
};
use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Error type for ring buffer operations.
#[derive(Debug)]
pub enum BufferError {
    /// An I/O error occurred while opening, sizing, mapping, or flushing the
    /// backing file.
    Io(io::Error),
    /// `get` or `peek` was called on an empty buffer. This is the normal
    /// "nothing to read" signal, not a fault.
    BufferEmpty,
    /// The encoded record can never fit within the buffer capacity.
    RecordTooLarge {
        /// Payload size that was rejected.
        size: usize,
        /// Capacity of the data region.
        capacity: usize,
    },
    /// A fixed-size buffer was given a payload of the wrong length.
    SizeMismatch {
        /// Payload size that was rejected.
        size: usize,
        /// Record size the buffer was opened with.
        item_size: usize,
    },
}

impl From<io::Error> for BufferError {
    fn from(error: io::Error) -> Self {
        BufferError::Io(error)
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Io(e) => write!(f, "I/O error: {e}"),
            BufferError::BufferEmpty => write!(f, "buffer is empty"),
            BufferError::RecordTooLarge { size, capacity } => {
                write!(f, "record of {size} bytes exceeds buffer capacity of {capacity} bytes")
            }
            BufferError::SizeMismatch { size, item_size } => {
                write!(f, "payload of {size} bytes does not match fixed record size {item_size}")
            }
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for ring buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// A persistent FIFO queue of binary records over a memory-mapped file.
///
/// The file layout is a fixed header (see [`BufferHeader`]) followed by a
/// data region of `capacity` bytes, plus one reserved byte in
/// [`RecordMode::Variable`] mode. Both cursors are absolute byte offsets into
/// the mapping and are rewritten to the header by every mutating call.
///
/// The buffer provides persistence, not synchronization: exactly one logical
/// owner may mutate it at a time, which the `&mut self` receivers make a
/// compile-time guarantee within a single process.
pub struct MemMapRingBuffer {
    /// Path to the backing file.
    path: PathBuf,
    /// The mapped region.
    mmap: MmapMut,
    /// Record encoding.
    mode: RecordMode,
    /// Size of the data region available for records, in bytes.
    capacity: usize,
    /// Total size of the mapping: header, data region, and in variable mode
    /// one reserved byte.
    buffer_size: usize,
    /// Offset of the next record to read.
    read_pos: usize,
    /// Offset where the next record will be written.
    write_pos: usize,
}

impl MemMapRingBuffer {
    /// Open or create a ring buffer file at the given path.
    ///
    /// The file is padded to the exact region size and memory-mapped. If the
    /// file already carries a valid header its cursors are recovered,
    /// otherwise both cursors start at the beginning of the data region. The
    /// header is rewritten either way so a fresh file is marked initialized.
    ///
    /// # Panics
    ///
    /// Panics when the capacity cannot hold a single record: in variable mode
    /// `capacity` must exceed the length prefix, and in fixed mode the region
    /// must hold at least two records so that one slot can stay open.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize, mode: RecordMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let buffer_size = match mode {
            RecordMode::Variable => {
                assert!(capacity > LEN_PREFIX, "capacity must exceed the length prefix");
                // One reserved byte keeps the cursors from coinciding on a
                // full buffer.
                HEADER_LEN + capacity + 1
            }
            RecordMode::Fixed(item_size) => {
                assert!(item_size > 0, "item size must be non-zero");
                assert!(item_size < capacity, "item size must be smaller than capacity");
                assert!(
                    2 * item_size <= capacity,
                    "fixed-size buffer must hold at least two records"
                );
                HEADER_LEN + capacity
            }
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if file.metadata()?.len() != buffer_size as u64 {
            file.set_len(buffer_size as u64)?;
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let header = match BufferHeader::load(&mmap) {
            Some(header) => {
                debug!(
                    path = %path.display(),
                    read_pos = header.read_pos,
                    write_pos = header.write_pos,
                    "recovered ring buffer header"
                );
                header
            }
            None => {
                debug!(path = %path.display(), "initializing fresh ring buffer");
                BufferHeader::new()
            }
        };

        let mut buffer = Self {
            path,
            mmap,
            mode,
            capacity,
            buffer_size,
            read_pos: header.read_pos as usize,
            write_pos: header.write_pos as usize,
        };

        // Normalize the header so a fresh or partially written file becomes a
        // valid one.
        buffer.store_header();
        Ok(buffer)
    }

    /// Path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the data region available for records, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record encoding this buffer was opened with.
    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    /// `true` when no unread records are stored.
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// `true` when inserting one more record would evict the oldest one.
    ///
    /// Only meaningful in [`RecordMode::Fixed`] mode; a variable-size buffer
    /// always makes room by evicting, so it never reports full.
    pub fn is_full(&self) -> bool {
        match self.mode {
            RecordMode::Variable => false,
            RecordMode::Fixed(item_size) => {
                !self.is_empty() && self.advance_fixed(self.write_pos, item_size) == self.read_pos
            }
        }
    }

    /// Number of whole records currently stored.
    ///
    /// Constant time in fixed mode; in variable mode this walks the length
    /// prefixes from the read cursor to the write cursor.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        match self.mode {
            RecordMode::Fixed(item_size) => {
                let slots = self.capacity / item_size;
                let slot = |pos: usize| (pos - HEADER_LEN) / item_size;
                (slot(self.write_pos) + slots - slot(self.read_pos)) % slots
            }
            RecordMode::Variable => {
                let mut pos = self.read_pos;
                let mut count = 0;
                while pos != self.write_pos {
                    pos = self.resolve(pos);
                    if pos == self.write_pos {
                        break;
                    }
                    let len = read_u32(&self.mmap, pos) as usize;
                    count += 1;
                    pos += LEN_PREFIX + len;
                }
                count
            }
        }
    }

    /// Insert a record at the write cursor, evicting the oldest unread
    /// records if there is not enough room.
    ///
    /// In variable mode the payload may be any size whose encoded form fits
    /// within the capacity; larger payloads fail with
    /// [`BufferError::RecordTooLarge`] and leave the cursors untouched. In
    /// fixed mode the payload must be exactly the configured record size or
    /// the call fails with [`BufferError::SizeMismatch`].
    ///
    /// Both cursors are persisted to the header before returning.
    pub fn put(&mut self, payload: &[u8]) -> Result<()> {
        self.check_payload(payload)?;
        match self.mode {
            RecordMode::Variable => self.put_variable(payload),
            RecordMode::Fixed(item_size) => self.put_fixed(payload, item_size),
        }
        self.store_header();
        Ok(())
    }

    /// Remove and return the oldest record.
    ///
    /// Fails with [`BufferError::BufferEmpty`] when there is nothing to read.
    /// The returned payload is a copy, independent of later mutation of the
    /// buffer. Both cursors are persisted to the header before returning.
    pub fn get(&mut self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(BufferError::BufferEmpty);
        }

        let pos = self.resolve(self.read_pos);
        let (payload, next) = self.record_at(pos);
        self.read_pos = next;
        self.store_header();
        Ok(payload)
    }

    /// Return a copy of the oldest record without consuming it.
    ///
    /// Fails with [`BufferError::BufferEmpty`] when there is nothing to read.
    pub fn peek(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Err(BufferError::BufferEmpty);
        }

        let pos = self.resolve(self.read_pos);
        let (payload, _) = self.record_at(pos);
        Ok(payload)
    }

    /// Remove all records and zero the entire backing region.
    ///
    /// Both cursors return to the start of the data region and the header is
    /// rewritten.
    pub fn clear(&mut self) {
        self.mmap.fill(0);
        self.read_pos = HEADER_LEN;
        self.write_pos = HEADER_LEN;
        self.store_header();
        debug!(path = %self.path.display(), "cleared ring buffer");
    }

    /// Force pending mutations of the mapped region to stable storage.
    ///
    /// Mutations land in the mapping immediately, but a caller that needs
    /// crash durability must flush after each mutating call.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn put_variable(&mut self, payload: &[u8]) {
        // Checked by `put` before any cursor moves.
        let span = LEN_PREFIX + payload.len();

        let was_empty = self.is_empty();
        if !was_empty {
            self.read_pos = self.resolve(self.read_pos);
        }
        let prev_write = self.write_pos;

        // Wrap check: the record must fit contiguously before the end of the
        // region, with the reserved byte keeping write from landing on read.
        if self.write_pos + span + 1 > self.buffer_size {
            if self.write_pos + LEN_PREFIX + 1 <= self.buffer_size {
                // A reader arriving here would expect a length prefix; stamp
                // the skip marker so it follows the wrap instead.
                write_u32(&mut self.mmap, self.write_pos, SKIP_MARKER);
            }
            self.write_pos = HEADER_LEN;
            trace!(prev_write, "write cursor wrapped to start of data region");

            if was_empty {
                // Re-synchronize rather than leave a stale read cursor past
                // the new write cursor.
                self.read_pos = HEADER_LEN;
            } else if self.read_pos > prev_write || self.read_pos == HEADER_LEN {
                // The wrap jumped the write cursor past (or onto) the read
                // cursor; evict the record it now overlaps.
                self.read_pos = HEADER_LEN;
                self.evict_oldest();
            }
        }

        // Evict oldest records until the gap ahead of the writer exceeds the
        // record span. Stopping at an exact fit would let the cursors collide
        // and mis-signal empty.
        while !self.is_empty() {
            self.read_pos = self.resolve(self.read_pos);
            if self.read_pos > self.write_pos && self.read_pos - self.write_pos <= span {
                self.evict_oldest();
            } else {
                break;
            }
        }

        write_u32(&mut self.mmap, self.write_pos, payload.len() as u32);
        let data_start = self.write_pos + LEN_PREFIX;
        self.mmap[data_start..data_start + payload.len()].copy_from_slice(payload);
        self.write_pos += span;
    }

    fn put_fixed(&mut self, payload: &[u8], item_size: usize) {
        let was_empty = self.is_empty();
        let was_full = self.is_full();

        // Recovered cursors are taken on trust, so re-check the slot fits
        // before the end of the region.
        if self.write_pos + item_size > self.buffer_size {
            self.write_pos = HEADER_LEN;
            if was_empty {
                self.read_pos = HEADER_LEN;
            }
        }

        let start = self.write_pos;
        self.mmap[start..start + item_size].copy_from_slice(payload);
        self.write_pos = self.advance_fixed(start, item_size);

        if was_full {
            trace!(read_pos = self.read_pos, "evicting oldest record");
            self.read_pos = self.advance_fixed(self.read_pos, item_size);
        }
    }

    /// Advance the read cursor past the oldest record, discarding it.
    ///
    /// The caller must ensure the buffer is non-empty.
    fn evict_oldest(&mut self) {
        let pos = self.resolve(self.read_pos);
        match self.mode {
            RecordMode::Variable => {
                let len = read_u32(&self.mmap, pos) as usize;
                trace!(read_pos = pos, len, "evicting oldest record");
                self.read_pos = pos + LEN_PREFIX + len;
            }
            RecordMode::Fixed(item_size) => {
                trace!(read_pos = pos, "evicting oldest record");
                self.read_pos = self.advance_fixed(pos, item_size);
            }
        }
    }

    /// Copy out the record starting at `pos`, returning the payload and the
    /// cursor position just past it.
    fn record_at(&self, pos: usize) -> (Vec<u8>, usize) {
        match self.mode {
            RecordMode::Variable => {
                let len = read_u32(&self.mmap, pos) as usize;
                let data_start = pos + LEN_PREFIX;
                let payload = self.mmap[data_start..data_start + len].to_vec();
                (payload, data_start + len)
            }
            RecordMode::Fixed(item_size) => {
                let payload = self.mmap[pos..pos + item_size].to_vec();
                (payload, self.advance_fixed(pos, item_size))
            }
        }
    }

    /// Map a raw cursor position to the start of the record it denotes,
    /// following a wrap at the end of the data region.
    ///
    /// A position too close to the end to hold even an empty record, or one
    /// holding the skip marker a wrapping writer left behind, resolves to the
    /// start of the data region. Only meaningful while the buffer is
    /// non-empty.
    fn resolve(&self, pos: usize) -> usize {
        match self.mode {
            RecordMode::Variable => {
                if pos + LEN_PREFIX + 1 > self.buffer_size {
                    return HEADER_LEN;
                }
                if read_u32(&self.mmap, pos) == SKIP_MARKER {
                    return HEADER_LEN;
                }
                pos
            }
            RecordMode::Fixed(item_size) => {
                if pos + item_size > self.buffer_size {
                    HEADER_LEN
                } else {
                    pos
                }
            }
        }
    }

    /// Next slot position after a fixed-size record at `pos`, wrapping when
    /// no whole record fits before the end of the region.
    fn advance_fixed(&self, pos: usize, item_size: usize) -> usize {
        let next = pos + item_size;
        if next + item_size > self.buffer_size {
            HEADER_LEN
        } else {
            next
        }
    }

    fn store_header(&mut self) {
        BufferHeader {
            read_pos: self.read_pos as u64,
            write_pos: self.write_pos as u64,
        }
        .store(&mut self.mmap);
    }

    /// Validate the payload size for the configured record mode.
    fn check_payload(&self, payload: &[u8]) -> Result<()> {
        match self.mode {
            RecordMode::Variable => {
                if LEN_PREFIX + payload.len() > self.capacity {
                    return Err(BufferError::RecordTooLarge {
                        size: payload.len(),
                        capacity: self.capacity,
                    });
                }
            }
            RecordMode::Fixed(item_size) => {
                if payload.len() != item_size {
                    return Err(BufferError::SizeMismatch {
                        size: payload.len(),
                        item_size,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_buffer.dat");

        let buffer = MemMapRingBuffer::open(&path, 1024, RecordMode::Variable).unwrap();
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.path(), path);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);

        // Header plus data region plus the reserved byte.
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), (HEADER_LEN + 1024 + 1) as u64);
    }

    #[test]
    fn test_fifo_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fifo.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 1024, RecordMode::Variable).unwrap();
        for word in ["vanilla", "tandoor", "sunsets"] {
            buffer.put(word.as_bytes()).unwrap();
        }
        assert_eq!(buffer.len(), 3);

        for word in ["vanilla", "tandoor", "sunsets"] {
            assert_eq!(buffer.get().unwrap(), word.as_bytes());
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_get_on_empty_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 64, RecordMode::Variable).unwrap();
        assert!(matches!(buffer.get(), Err(BufferError::BufferEmpty)));
        assert!(matches!(buffer.peek(), Err(BufferError::BufferEmpty)));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oversized.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 16, RecordMode::Variable).unwrap();
        buffer.put(b"ok").unwrap();

        let big = vec![0u8; 13]; // 4 + 13 > 16
        assert!(matches!(
            buffer.put(&big),
            Err(BufferError::RecordTooLarge { size: 13, capacity: 16 })
        ));

        // Cursors untouched: the earlier record is still the only one.
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get().unwrap(), b"ok");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_wrap_leaves_skip_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skip.dat");

        // Region of 101 bytes. Two 36-byte spans end at offset 72; a 46-byte
        // span then wraps, leaving a 29-byte tail that gets the marker.
        let mut buffer = MemMapRingBuffer::open(&path, 100, RecordMode::Variable).unwrap();
        buffer.put(&[b'a'; 32]).unwrap();
        buffer.put(&[b'b'; 32]).unwrap();
        assert_eq!(buffer.get().unwrap(), vec![b'a'; 32]);

        buffer.put(&[b'c'; 42]).unwrap();

        // "b" was evicted to make room across the wrap; "c" survives.
        assert_eq!(buffer.get().unwrap(), vec![b'c'; 42]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reader_follows_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("follow.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 100, RecordMode::Variable).unwrap();
        buffer.put(&[b'a'; 16]).unwrap(); // [0, 20)
        buffer.put(&[b'b'; 16]).unwrap(); // [20, 40)
        buffer.put(&[b'c'; 46]).unwrap(); // [40, 90), tail of 11 bytes

        // Forces a wrap; "a" and "b" are evicted across it.
        buffer.put(&[b'd'; 16]).unwrap();

        assert_eq!(buffer.get().unwrap(), vec![b'c'; 46]);
        assert_eq!(buffer.get().unwrap(), vec![b'd'; 16]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fixed_mode_eviction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixed.dat");

        // Three slots, one kept open: two records fit.
        let mut buffer = MemMapRingBuffer::open(&path, 12, RecordMode::Fixed(4)).unwrap();
        assert!(!buffer.is_full());

        buffer.put(b"abcd").unwrap();
        assert!(!buffer.is_full());
        buffer.put(b"efgh").unwrap();
        assert_eq!(buffer.len(), 2);
        assert!(buffer.is_full());

        // Full: inserting evicts the oldest.
        buffer.put(b"ijkl").unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get().unwrap(), b"efgh");
        assert_eq!(buffer.get().unwrap(), b"ijkl");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fixed_mode_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mismatch.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 64, RecordMode::Fixed(8)).unwrap();
        assert!(matches!(
            buffer.put(b"short"),
            Err(BufferError::SizeMismatch { size: 5, item_size: 8 })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("peek.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 64, RecordMode::Variable).unwrap();
        buffer.put(b"front").unwrap();
        buffer.put(b"back").unwrap();

        assert_eq!(buffer.peek().unwrap(), b"front");
        assert_eq!(buffer.peek().unwrap(), b"front");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get().unwrap(), b"front");
        assert_eq!(buffer.get().unwrap(), b"back");
    }

    #[test]
    fn test_garbage_file_treated_as_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.dat");

        // A file full of non-zero bytes fails the header checksum and is
        // reinitialized instead of being trusted.
        std::fs::write(&path, vec![0xAB; HEADER_LEN + 64 + 1]).unwrap();

        let mut buffer = MemMapRingBuffer::open(&path, 64, RecordMode::Variable).unwrap();
        assert!(buffer.is_empty());
        assert!(matches!(buffer.get(), Err(BufferError::BufferEmpty)));

        buffer.put(b"first").unwrap();
        assert_eq!(buffer.get().unwrap(), b"first");
    }

    #[test]
    fn test_clear_zeroes_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clear.dat");

        let mut buffer = MemMapRingBuffer::open(&path, 64, RecordMode::Variable).unwrap();
        buffer.put(b"vanilla").unwrap();
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert!(matches!(buffer.get(), Err(BufferError::BufferEmpty)));
    }
}
