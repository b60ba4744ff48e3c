//! On-media layout: partition and sector headers.
//!
//! Every partition starts with a boot header, and every logical sector starts
//! with a sector header that *is* a partition header followed by the
//! per-block message index. Both live in the first 512-byte block of their
//! region and are accessed through zero-copy views over the volume's scratch
//! buffer; no other module indexes header bytes.
//!
//! Byte placement (little-endian, normative for media compatibility):
//!
//! | offset | field                                        |
//! |--------|----------------------------------------------|
//! | 0      | flag byte (four 2-bit lanes, see [`HeaderFlags`]) |
//! | 1–3    | reserved                                     |
//! | 4      | `partition_size` (units of [`PARTITION_STRIDE`]; 0 means 1) |
//! | 5      | `sector_size` (units of [`SECTOR_STRIDE`]; 0 means 1) |
//! | 6      | `partition_id`                               |
//! | 7      | reserved                                     |
//! | 8–11   | `last_block`                                 |
//! | 12–15  | `message_id`                                 |
//! | 16–23  | reserved                                     |
//! | 24–31  | `magic_number`                               |
//! | 32–35  | `first_message` (sector headers only)        |
//! | 36–511 | `sector_message_index[]` (sector headers only) |

use bitflags::bitflags;
use magnon_core::static_assert;

/// Size of one device block in bytes.
pub const BLOCK_BYTES: usize = 512;

/// Blocks per `partition_size` unit (256 MiB of 512-byte blocks).
pub const PARTITION_STRIDE: u32 = (256 * 1024 * 1024) / BLOCK_BYTES as u32;

/// Blocks per `sector_size` unit (128 KiB of 512-byte blocks).
pub const SECTOR_STRIDE: u32 = (128 * 1024) / BLOCK_BYTES as u32;

/// Data blocks covered by one `sector_message_index` entry.
pub const BLOCKS_PER_INDEX_ENTRY: u32 = 1;

/// Header magic number ("LFS001" to a hex-dump reader).
pub const MAGIC: u64 = 0xFFFF_FFFE_FDFD_FBFB;

/// Header field offsets. The values are the on-media contract; everything
/// else in this module derives from them.
mod field {
    pub(super) const FLAGS: usize = 0;
    pub(super) const PARTITION_SIZE: usize = 4;
    pub(super) const SECTOR_SIZE: usize = 5;
    pub(super) const PARTITION_ID: usize = 6;
    pub(super) const LAST_BLOCK: usize = 8;
    pub(super) const MESSAGE_ID: usize = 12;
    pub(super) const MAGIC: usize = 24;
    pub(super) const FIRST_MESSAGE: usize = 32;
    pub(super) const INDEX: usize = 36;
}

/// Maximum number of `sector_message_index` entries a header can hold.
pub const INDEX_CAPACITY: usize = BLOCK_BYTES - field::INDEX;

static_assert!(field::MAGIC + 8 == field::FIRST_MESSAGE);
static_assert!(INDEX_CAPACITY == 476);

bitflags! {
    /// Header flag byte.
    ///
    /// Four 2-bit lanes, least significant first: `jump_to_next_partition`
    /// (bits 0–1), `jump_to_next_sector` (bits 2–3), `card_full` (bits 4–5),
    /// `message_rotate` (bits 6–7). A writer sets only the low bit of a lane;
    /// a reader treats a lane with either bit set as set (the original media
    /// format stores C bit-field truth values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// Partition is sealed; appends continue in the next partition.
        const JUMP_TO_NEXT_PARTITION = 1 << 0;
        /// Sector is sealed; appends continue in the next sector.
        const JUMP_TO_NEXT_SECTOR = 1 << 2;
        /// Every block on the device has been consumed.
        const CARD_FULL = 1 << 4;
        /// On exhaustion, wrap to partition 0 and overwrite from the start.
        const MESSAGE_ROTATE = 1 << 6;
    }
}

impl HeaderFlags {
    /// Decodes the flag byte, folding each 2-bit lane to its low bit.
    #[must_use]
    pub fn from_media(byte: u8) -> Self {
        let mut flags = Self::empty();
        for lane in [
            Self::JUMP_TO_NEXT_PARTITION,
            Self::JUMP_TO_NEXT_SECTOR,
            Self::CARD_FULL,
            Self::MESSAGE_ROTATE,
        ] {
            if byte & (lane.bits() | lane.bits() << 1) != 0 {
                flags |= lane;
            }
        }
        flags
    }

    /// Encodes the flags as the on-media byte (low lane bits only).
    #[must_use]
    pub fn to_media(self) -> u8 {
        self.bits()
    }
}

/// Returns `size` with the on-media "0 means 1" default applied.
fn size_or_default(size: u8) -> u8 {
    if size == 0 { 1 } else { size }
}

/// Read-only view of a partition header inside a block buffer.
pub struct PartitionHeader<'a> {
    buf: &'a [u8; BLOCK_BYTES],
}

impl<'a> PartitionHeader<'a> {
    /// Creates a view over `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8; BLOCK_BYTES]) -> Self {
        Self { buf }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.buf[offset..offset + 4].try_into().unwrap())
    }

    /// Header flags.
    #[must_use]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_media(self.buf[field::FLAGS])
    }

    /// Partition size in units of [`PARTITION_STRIDE`] blocks (never 0).
    #[must_use]
    pub fn partition_size(&self) -> u8 {
        size_or_default(self.buf[field::PARTITION_SIZE])
    }

    /// Sector size in units of [`SECTOR_STRIDE`] blocks (never 0).
    #[must_use]
    pub fn sector_size(&self) -> u8 {
        size_or_default(self.buf[field::SECTOR_SIZE])
    }

    /// Partition identifier.
    #[must_use]
    pub fn partition_id(&self) -> u8 {
        self.buf[field::PARTITION_ID]
    }

    /// LBA of the last data block written in this partition.
    #[must_use]
    pub fn last_block(&self) -> u32 {
        self.read_u32(field::LAST_BLOCK)
    }

    /// Id one past the last message written while this header was active.
    #[must_use]
    pub fn message_id(&self) -> u32 {
        self.read_u32(field::MESSAGE_ID)
    }

    /// Header magic number.
    #[must_use]
    pub fn magic(&self) -> u64 {
        u64::from_le_bytes(self.buf[field::MAGIC..field::MAGIC + 8].try_into().unwrap())
    }

    /// Whether the magic number matches [`MAGIC`].
    #[must_use]
    pub fn is_formatted(&self) -> bool {
        self.magic() == MAGIC
    }
}

/// Mutable view of a partition header inside a block buffer.
pub struct PartitionHeaderMut<'a> {
    buf: &'a mut [u8; BLOCK_BYTES],
}

impl<'a> PartitionHeaderMut<'a> {
    /// Creates a mutable view over `buf`.
    pub fn new(buf: &'a mut [u8; BLOCK_BYTES]) -> Self {
        Self { buf }
    }

    /// Read-only view of the same header.
    #[must_use]
    pub fn as_view(&self) -> PartitionHeader<'_> {
        PartitionHeader { buf: &*self.buf }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Replaces the flag byte.
    pub fn set_flags(&mut self, flags: HeaderFlags) {
        self.buf[field::FLAGS] = flags.to_media();
    }

    /// Sets the given flags, leaving the others untouched.
    pub fn insert_flags(&mut self, flags: HeaderFlags) {
        let current = self.as_view().flags();
        self.set_flags(current | flags);
    }

    /// Clears the given flags, leaving the others untouched.
    pub fn remove_flags(&mut self, flags: HeaderFlags) {
        let current = self.as_view().flags();
        self.set_flags(current - flags);
    }

    /// Sets the partition size in units of [`PARTITION_STRIDE`] blocks.
    pub fn set_partition_size(&mut self, size: u8) {
        self.buf[field::PARTITION_SIZE] = size_or_default(size);
    }

    /// Sets the sector size in units of [`SECTOR_STRIDE`] blocks.
    pub fn set_sector_size(&mut self, size: u8) {
        self.buf[field::SECTOR_SIZE] = size_or_default(size);
    }

    /// Sets the partition identifier.
    pub fn set_partition_id(&mut self, id: u8) {
        self.buf[field::PARTITION_ID] = id;
    }

    /// Sets the last-written data block LBA.
    pub fn set_last_block(&mut self, lba: u32) {
        self.write_u32(field::LAST_BLOCK, lba);
    }

    /// Sets the message id watermark.
    pub fn set_message_id(&mut self, id: u32) {
        self.write_u32(field::MESSAGE_ID, id);
    }

    /// Writes the header magic number.
    pub fn set_magic(&mut self) {
        self.buf[field::MAGIC..field::MAGIC + 8].copy_from_slice(&MAGIC.to_le_bytes());
    }
}

/// Read-only view of a sector header (partition header + per-block index).
pub struct SectorHeader<'a> {
    buf: &'a [u8; BLOCK_BYTES],
}

impl<'a> SectorHeader<'a> {
    /// Creates a view over `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8; BLOCK_BYTES]) -> Self {
        Self { buf }
    }

    /// The embedded partition header fields.
    #[must_use]
    pub fn header(&self) -> PartitionHeader<'_> {
        PartitionHeader { buf: self.buf }
    }

    /// Id of the first message stored in this sector.
    #[must_use]
    pub fn first_message(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[field::FIRST_MESSAGE..field::FIRST_MESSAGE + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Number of messages recorded for the `i`-th data block group.
    ///
    /// # Panics
    ///
    /// Panics if `i >= INDEX_CAPACITY`.
    #[must_use]
    pub fn index_entry(&self, i: usize) -> u8 {
        self.buf[field::INDEX + i]
    }

    /// Sum of the first `entries` index slots.
    #[must_use]
    pub fn index_sum(&self, entries: usize) -> u32 {
        self.buf[field::INDEX..field::INDEX + entries]
            .iter()
            .map(|&count| u32::from(count))
            .sum()
    }
}

/// Mutable view of a sector header.
pub struct SectorHeaderMut<'a> {
    buf: &'a mut [u8; BLOCK_BYTES],
}

impl<'a> SectorHeaderMut<'a> {
    /// Creates a mutable view over `buf`.
    pub fn new(buf: &'a mut [u8; BLOCK_BYTES]) -> Self {
        Self { buf }
    }

    /// Read-only view of the same sector header.
    #[must_use]
    pub fn as_view(&self) -> SectorHeader<'_> {
        SectorHeader { buf: &*self.buf }
    }

    /// Mutable view of the embedded partition header fields.
    pub fn header(&mut self) -> PartitionHeaderMut<'_> {
        PartitionHeaderMut {
            buf: &mut *self.buf,
        }
    }

    /// Sets the id of the first message stored in this sector.
    pub fn set_first_message(&mut self, id: u32) {
        self.buf[field::FIRST_MESSAGE..field::FIRST_MESSAGE + 4]
            .copy_from_slice(&id.to_le_bytes());
    }

    /// Records the message count for the `i`-th data block group.
    ///
    /// # Panics
    ///
    /// Panics if `i >= INDEX_CAPACITY`.
    pub fn set_index_entry(&mut self, i: usize, count: u8) {
        self.buf[field::INDEX + i] = count;
    }

    /// Zeroes the whole index.
    pub fn clear_index(&mut self) {
        self.buf[field::INDEX..].fill(0);
    }
}
