//! On-disk format for the persistent ring buffer
//!
//! This module defines the binary layout shared by every buffer file:
//!
//! - A fixed-size header at the start of the mapping holding the persisted
//!   read/write cursors, guarded by a magic number, a format version, and a
//!   CRC32 checksum
//! - The record encoding configuration (`RecordMode`) selected at
//!   construction time
//!
//! All header fields are little-endian and live at fixed offsets, so a buffer
//! file can be reopened by any process that knows the format. The checksum
//! lets a reopening process tell a header it wrote itself from a freshly
//! zeroed (or foreign) file; cursor values inside a verified header are
//! trusted as-is.

pub mod ring;

use crc32fast::Hasher;

/// Length in bytes of the persisted buffer header.
///
/// The data region starts immediately after the header, so this is also the
/// smallest valid cursor value.
pub const HEADER_LEN: usize = 32;

/// Width in bytes of the length prefix preceding each variable-length record.
pub const LEN_PREFIX: usize = 4;

/// Length-prefix value marking an unused tail at the end of the data region.
///
/// When a variable-length write wraps around, the writer stamps this marker
/// at the old write position so a reader arriving there knows to continue
/// from the start of the data region. The value can never collide with a real
/// record length, which is bounded by the buffer capacity.
pub const SKIP_MARKER: u32 = u32::MAX;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const READ_POS_OFFSET: usize = 8;
const WRITE_POS_OFFSET: usize = 16;
const CRC_OFFSET: usize = 24;

/// Record encoding used by a buffer, chosen when the buffer is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Length-prefixed records of arbitrary size.
    ///
    /// Each record is stored as a [`LEN_PREFIX`]-byte little-endian length
    /// followed by that many payload bytes.
    Variable,
    /// Records of exactly the given size, stored without a prefix.
    Fixed(usize),
}

/// The two persisted cursors, plus the codec that moves them to and from the
/// fixed offsets at the start of the mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHeader {
    /// Absolute byte offset of the next record to read.
    pub read_pos: u64,
    /// Absolute byte offset where the next record will be written.
    pub write_pos: u64,
}

impl BufferHeader {
    /// Magic number identifying the buffer format (`b"MMRB"`).
    pub const MAGIC: u32 = u32::from_le_bytes(*b"MMRB");

    /// Current buffer format version.
    pub const VERSION: u32 = 1;

    /// Header for a fresh buffer, both cursors at the start of the data
    /// region.
    pub fn new() -> Self {
        Self {
            read_pos: HEADER_LEN as u64,
            write_pos: HEADER_LEN as u64,
        }
    }

    /// Deserialize the header from the start of the mapped region.
    ///
    /// Returns `None` when the magic number, version, or checksum does not
    /// match, which is how a zeroed or foreign file presents itself. A stored
    /// cursor of `0` inside a valid header is mapped to the start of the data
    /// region; `0` lies inside the header and can only mean the field was
    /// never written.
    pub fn load(region: &[u8]) -> Option<Self> {
        let magic = read_u32(region, MAGIC_OFFSET);
        let version = read_u32(region, VERSION_OFFSET);
        if magic != Self::MAGIC || version != Self::VERSION {
            return None;
        }

        let stored_crc = read_u32(region, CRC_OFFSET);
        if stored_crc != checksum(&region[..CRC_OFFSET]) {
            return None;
        }

        let normalize = |pos: u64| {
            if pos == 0 {
                HEADER_LEN as u64
            } else {
                pos
            }
        };

        Some(Self {
            read_pos: normalize(read_u64(region, READ_POS_OFFSET)),
            write_pos: normalize(read_u64(region, WRITE_POS_OFFSET)),
        })
    }

    /// Serialize the header to the start of the mapped region.
    pub fn store(&self, region: &mut [u8]) {
        write_u32(region, MAGIC_OFFSET, Self::MAGIC);
        write_u32(region, VERSION_OFFSET, Self::VERSION);
        write_u64(region, READ_POS_OFFSET, self.read_pos);
        write_u64(region, WRITE_POS_OFFSET, self.write_pos);
        let crc = checksum(&region[..CRC_OFFSET]);
        write_u32(region, CRC_OFFSET, crc);
        // Reserved padding up to HEADER_LEN stays zero.
        region[CRC_OFFSET + 4..HEADER_LEN].fill(0);
    }
}

impl Default for BufferHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub(crate) fn read_u32(region: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&region[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn write_u32(region: &mut [u8], offset: usize, value: u32) {
    region[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u64(region: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&region[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn write_u64(region: &mut [u8], offset: usize, value: u64) {
    region[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
