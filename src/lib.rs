//! mmring - a persistent, single-writer ring buffer backed by a
//! memory-mapped file.
//!
//! # Overview
//!
//! The buffer is a fixed-size byte region on disk behaving as a FIFO queue of
//! binary records. It survives process restarts because the read and write
//! cursors live in a header at the start of the mapped region rather than in
//! process memory: reopening the file with the same parameters resumes
//! exactly where the previous owner left off.
//!
//! # Key Features
//!
//! - Memory-mapped I/O for efficient disk persistence
//! - Cursors persisted on every mutation, recovered on reopen
//! - Oldest-record eviction when capacity is exhausted: newest data wins
//! - Variable-size (length-prefixed) or fixed-size record encodings behind
//!   one configuration switch
//! - Header integrity guarded by a magic number and CRC32 checksum
//!
//! # Usage
//!
//! ```no_run
//! use mmring::{MemMapRingBuffer, RecordMode};
//!
//! let mut buffer = MemMapRingBuffer::open("queue.dat", 1024, RecordMode::Variable)?;
//! buffer.put(b"hello")?;
//! assert_eq!(buffer.get()?, b"hello");
//! # Ok::<(), mmring::BufferError>(())
//! ```
//!
//! The buffer provides persistence, not synchronization: exactly one logical
//! owner may mutate it at a time. Every mutating operation takes `&mut self`,
//! so within a process that rule is enforced at compile time; the global
//! handle below serializes callers behind a mutex instead.

#![deny(missing_docs)]

mod buffer;

pub use buffer::ring::{BufferError, MemMapRingBuffer, Result};
pub use buffer::{BufferHeader, RecordMode, HEADER_LEN, LEN_PREFIX};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Global instance of the ring buffer for process-wide access
static GLOBAL_BUFFER: OnceCell<Arc<Mutex<MemMapRingBuffer>>> = OnceCell::new();

/// Initialize the global ring buffer with the given path and configuration.
///
/// The first call opens (or creates) the buffer and installs it as the
/// process-wide instance; subsequent calls return the already-installed
/// buffer regardless of their arguments.
///
/// # Arguments
///
/// * `path` - Path to the buffer file
/// * `capacity` - Size of the data region in bytes
/// * `mode` - Record encoding for the buffer
pub fn init_buffer<P: AsRef<Path>>(
    path: P,
    capacity: usize,
    mode: RecordMode,
) -> Result<Arc<Mutex<MemMapRingBuffer>>> {
    if let Some(buffer) = GLOBAL_BUFFER.get() {
        return Ok(buffer.clone());
    }

    let buffer = MemMapRingBuffer::open(path, capacity, mode)?;
    Ok(GLOBAL_BUFFER
        .get_or_init(|| Arc::new(Mutex::new(buffer)))
        .clone())
}

/// Get a reference to the global ring buffer, if one has been initialized.
pub fn global_buffer() -> Option<Arc<Mutex<MemMapRingBuffer>>> {
    GLOBAL_BUFFER.get().cloned()
}
