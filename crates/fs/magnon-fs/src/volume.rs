//! The message-log volume: formatter, mount/recovery, append engine and
//! read resolver.
//!
//! A [`Volume`] owns its block device and a single sector-sized scratch
//! buffer through which all device I/O flows. The cursor (active partition,
//! sector header LBA, data block LBA, block index and message id) lives in
//! RAM and is re-derived at mount by following the chain of sealed headers.
//!
//! `Volume` itself is single-task: every operation takes `&mut self` and
//! must not be interleaved. Tasks share a volume through
//! [`SharedVolume`](crate::SharedVolume).

use alloc::boxed::Box;

use log::{debug, info, warn};
use magnon_driver_api::block::BlockDevice;

use crate::error::FsError;
use crate::id::MessageId;
use crate::layout::{
    BLOCK_BYTES, BLOCKS_PER_INDEX_ENTRY, HeaderFlags, INDEX_CAPACITY, PARTITION_STRIDE,
    PartitionHeader, PartitionHeaderMut, SECTOR_STRIDE, SectorHeader, SectorHeaderMut,
};
use crate::slot;

/// Geometry and mode for [`Volume::format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatConfig {
    /// Partition size in units of [`PARTITION_STRIDE`] blocks; 0 means 1.
    pub partition_size: u8,
    /// Logical sector size in units of [`SECTOR_STRIDE`] blocks; 0 means 1.
    pub sector_size: u8,
    /// Wrap to the start and overwrite once the device is exhausted.
    pub message_rotate: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            partition_size: 1,
            sector_size: 1,
            message_rotate: false,
        }
    }
}

/// Resolved coordinates of one stored message.
struct SlotLocation {
    /// LBA of the data block holding the slot.
    block: u32,
    /// Payload length in bytes.
    payload_len: usize,
    /// Payload offset within the block.
    payload_offset: usize,
}

/// An append-only message log over a block device.
pub struct Volume<D: BlockDevice> {
    device: D,
    /// Scratch buffer for all sector I/O; aliased as partition header,
    /// sector header or raw data block depending on what was last loaded.
    buf: Box<[u8; BLOCK_BYTES]>,
    /// Partition size in units of [`PARTITION_STRIDE`] blocks.
    partition_size: u8,
    /// Logical sector size in units of [`SECTOR_STRIDE`] blocks.
    sector_size: u8,
    /// Index of the active partition.
    current_partition: u8,
    /// LBA of the active sector header.
    current_sector: u32,
    /// LBA the append engine is positioned at.
    current_block: u32,
    /// LBA of the data block currently accepting appends.
    last_block: u32,
    /// Position of the active data block within the sector index.
    block_index: u32,
    /// Messages stored in the active data block.
    messages_in_block: u8,
    /// Id the next write will be assigned.
    message_id: u32,
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts a formatted device.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFormatted`] if the boot sector magic does not match,
    /// [`FsError::DeviceFull`] if the volume was exhausted,
    /// [`FsError::InvalidArgument`] if the device's sector size is not 512.
    pub async fn mount(device: D) -> Result<Self, FsError> {
        Self::mount_inner(device, None).await
    }

    /// Mounts a device, formatting it first if the boot magic is missing.
    ///
    /// # Errors
    ///
    /// As [`mount`](Self::mount), except that an unformatted device is
    /// formatted with `config` instead of failing.
    pub async fn mount_or_format(device: D, config: FormatConfig) -> Result<Self, FsError> {
        Self::mount_inner(device, Some(config)).await
    }

    async fn mount_inner(device: D, format: Option<FormatConfig>) -> Result<Self, FsError> {
        if device.sector_size() != BLOCK_BYTES {
            return Err(FsError::InvalidArgument);
        }

        let mut vol = Self {
            device,
            buf: Box::new([0u8; BLOCK_BYTES]),
            partition_size: 1,
            sector_size: 1,
            current_partition: 0,
            current_sector: 0,
            current_block: 1,
            last_block: 1,
            block_index: 0,
            messages_in_block: 0,
            message_id: 0,
        };

        vol.load_block(0).await?;
        if !vol.header().is_formatted() {
            let Some(config) = format else {
                return Err(FsError::NotFormatted);
            };
            vol.format(config).await?;
            return Ok(vol);
        }

        vol.recover().await?;
        Ok(vol)
    }

    /// Releases the volume and hands the device back.
    pub fn unmount(self) -> D {
        self.device
    }

    /// Id the next successful write will be assigned.
    #[must_use]
    pub fn next_message_id(&self) -> MessageId {
        MessageId::new(self.message_id)
    }

    // ── Scratch-buffer I/O ───────────────────────────────────────────────

    async fn load_block(&mut self, lba: u32) -> Result<(), FsError> {
        self.device
            .read_sector(u64::from(lba), &mut self.buf[..])
            .await?;
        Ok(())
    }

    async fn store_block(&mut self, lba: u32) -> Result<(), FsError> {
        self.device
            .write_sector(u64::from(lba), &self.buf[..])
            .await?;
        Ok(())
    }

    /// Zeroes `count` blocks starting at `start`, clobbering the scratch buffer.
    async fn erase_blocks(&mut self, start: u32, count: u32) -> Result<(), FsError> {
        self.buf.fill(0);
        for lba in start..start.saturating_add(count) {
            self.device.write_sector(u64::from(lba), &self.buf[..]).await?;
        }
        Ok(())
    }

    fn header(&self) -> PartitionHeader<'_> {
        PartitionHeader::new(&self.buf)
    }

    fn sector(&self) -> SectorHeader<'_> {
        SectorHeader::new(&self.buf)
    }

    // ── Geometry ─────────────────────────────────────────────────────────

    fn capacity(&self) -> u32 {
        self.device.sector_count().min(u64::from(u32::MAX)) as u32
    }

    fn partition_blocks(&self) -> u32 {
        u32::from(self.partition_size) * PARTITION_STRIDE
    }

    fn sector_blocks(&self) -> u32 {
        u32::from(self.sector_size) * SECTOR_STRIDE
    }

    fn index_entries(&self) -> usize {
        (self.sector_blocks() / BLOCKS_PER_INDEX_ENTRY) as usize
    }

    // ── Formatter ────────────────────────────────────────────────────────

    /// Initializes partition headers across the whole device.
    ///
    /// Touches every partition header and the data area of each partition's
    /// first sector (stale magic numbers there would confuse mount), but not
    /// the rest of the data blocks — those are zeroed lazily on first use.
    /// Leaves the cursor at `(partition 0, sector 0, block 1, id 0)`.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] for geometry the media cannot represent:
    /// a device sector size other than 512, a capacity below one logical
    /// sector, a per-block index that does not fit the sector header, or
    /// more than 256 partitions.
    pub async fn format(&mut self, config: FormatConfig) -> Result<(), FsError> {
        let partition_size = if config.partition_size == 0 { 1 } else { config.partition_size };
        let sector_size = if config.sector_size == 0 { 1 } else { config.sector_size };

        if self.device.sector_size() != BLOCK_BYTES {
            return Err(FsError::InvalidArgument);
        }

        let capacity = self.capacity();
        let partition_blocks = u32::from(partition_size) * PARTITION_STRIDE;
        let sector_blocks = u32::from(sector_size) * SECTOR_STRIDE;
        let index_entries = sector_blocks / BLOCKS_PER_INDEX_ENTRY;

        if capacity < sector_blocks || index_entries as usize > INDEX_CAPACITY {
            return Err(FsError::InvalidArgument);
        }
        if u64::from(capacity).div_ceil(u64::from(partition_blocks)) > 256 {
            return Err(FsError::InvalidArgument);
        }

        let mut partition_id: u32 = 0;
        let mut lba = 0u32;
        while lba < capacity {
            let erase = sector_blocks.min(capacity - lba);
            self.erase_blocks(lba, erase).await?;

            debug!("creating partition {partition_id} at block {lba}");
            self.buf.fill(0);
            {
                let mut sector = SectorHeaderMut::new(&mut self.buf);
                sector.set_first_message(0);
                let mut hdr = sector.header();
                hdr.set_flags(if config.message_rotate {
                    HeaderFlags::MESSAGE_ROTATE
                } else {
                    HeaderFlags::empty()
                });
                hdr.set_partition_size(partition_size);
                hdr.set_sector_size(sector_size);
                hdr.set_partition_id(partition_id as u8);
                hdr.set_last_block(1);
                hdr.set_message_id(0);
                hdr.set_magic();
            }
            self.store_block(lba).await?;

            partition_id += 1;
            lba = lba.saturating_add(partition_blocks);
        }
        info!("created {partition_id} partition(s) of {partition_blocks} blocks");

        self.partition_size = partition_size;
        self.sector_size = sector_size;
        self.current_partition = 0;
        self.current_sector = 0;
        self.current_block = 1;
        self.last_block = 1;
        self.block_index = 0;
        self.messages_in_block = 0;
        self.message_id = 0;
        Ok(())
    }

    // ── Mount / recovery ─────────────────────────────────────────────────

    /// Re-derives the cursor by following the chain of sealed headers.
    ///
    /// Expects the boot header in the scratch buffer.
    async fn recover(&mut self) -> Result<(), FsError> {
        let flags = self.header().flags();
        if flags.contains(HeaderFlags::CARD_FULL) {
            return Err(FsError::DeviceFull);
        }
        self.partition_size = self.header().partition_size();
        self.sector_size = self.header().sector_size();
        if self.index_entries() > INDEX_CAPACITY {
            // Formatted elsewhere with a per-block index the header cannot hold.
            return Err(FsError::InvalidArgument);
        }
        info!(
            "found boot partition (partition_size={}, sector_size={})",
            self.partition_size, self.sector_size
        );

        let capacity = self.capacity();
        let partition_blocks = self.partition_blocks();
        let sector_blocks = self.sector_blocks();

        // Follow sealed partitions to the active one.
        self.current_partition = 0;
        let mut lba = 0u32;
        while self
            .header()
            .flags()
            .contains(HeaderFlags::JUMP_TO_NEXT_PARTITION)
        {
            let next = u32::from(self.current_partition)
                .checked_add(1)
                .and_then(|p| p.checked_mul(partition_blocks))
                .ok_or(FsError::DeviceFull)?;
            if next >= capacity {
                return Err(FsError::DeviceFull);
            }
            self.current_partition = self
                .current_partition
                .checked_add(1)
                .ok_or(FsError::DeviceFull)?;
            lba = next;
            self.load_block(lba).await?;
        }

        // Follow sealed sectors to the active one.
        while self
            .header()
            .flags()
            .contains(HeaderFlags::JUMP_TO_NEXT_SECTOR)
        {
            lba = lba.checked_add(sector_blocks).ok_or(FsError::DeviceFull)?;
            if lba >= capacity {
                return Err(FsError::DeviceFull);
            }
            self.load_block(lba).await?;
        }
        self.current_sector = lba;

        self.last_block = self.header().last_block();
        self.message_id = self.header().message_id();

        // Highest index entry whose successor is still zero marks the
        // active data block.
        let entries = self.index_entries();
        let (block_index, messages_in_block) = {
            let sector = self.sector();
            let mut i = 0usize;
            while i + 1 < entries && sector.index_entry(i + 1) > 0 {
                i += 1;
            }
            (i as u32, sector.index_entry(i))
        };
        self.block_index = block_index;
        self.messages_in_block = messages_in_block;
        self.current_block = self.last_block;

        // A write that persisted its payload but lost the header update
        // leaves the message unindexed; re-scan the active block and adopt
        // the in-band count. Persisted by the next successful write.
        let last_block = self.last_block;
        self.load_block(last_block).await?;
        let stored = slot::count(&self.buf);
        if stored > self.messages_in_block {
            let orphans = stored - self.messages_in_block;
            warn!("block {last_block} holds {orphans} unindexed message(s), adopting");
            self.message_id += u32::from(orphans);
            self.messages_in_block = stored;
        }

        info!(
            "mounted: partition {}, sector {}, block {}, next message {}",
            self.current_partition, self.current_sector, self.last_block, self.message_id
        );
        Ok(())
    }

    // ── Append engine ────────────────────────────────────────────────────

    /// Appends one message and returns its assigned id.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidSize`] unless `1 <= payload.len() <= 509`;
    /// [`FsError::DeviceFull`] when no free block remains and rotation is
    /// disabled; [`FsError::Io`] on device failures (the cursor is not
    /// rolled back — media state is whatever was last flushed).
    pub async fn write(&mut self, payload: &[u8]) -> Result<MessageId, FsError> {
        let len = payload.len();
        if !(slot::MIN_MESSAGE_LEN..=slot::MAX_MESSAGE_LEN).contains(&len) {
            return Err(FsError::InvalidSize);
        }

        loop {
            self.current_block = self.last_block;
            let block = self.current_block;
            self.load_block(block).await?;

            let offset = slot::free_offset(&self.buf);
            if (BLOCK_BYTES - 3).saturating_sub(offset) < len {
                self.next_block().await?;
                continue;
            }

            slot::encode(&mut self.buf, offset, payload);
            self.store_block(block).await?;

            self.messages_in_block += 1;
            let id = MessageId::new(self.message_id);
            self.message_id += 1;
            self.update_table().await?;
            return Ok(id);
        }
    }

    /// Persists the active sector header: `last_block`, the message id
    /// watermark, and the active block's message count.
    async fn update_table(&mut self) -> Result<(), FsError> {
        let sector_lba = self.current_sector;
        self.load_block(sector_lba).await?;

        self.last_block = self.current_block;
        let (last_block, message_id) = (self.last_block, self.message_id);
        let (block_index, messages_in_block) = (self.block_index, self.messages_in_block);
        {
            let mut sector = SectorHeaderMut::new(&mut self.buf);
            sector.set_index_entry(block_index as usize, messages_in_block);
            let mut hdr = sector.header();
            hdr.set_last_block(last_block);
            hdr.set_message_id(message_id);
        }
        self.store_block(sector_lba).await
    }

    /// Advances the cursor to the next data block, rolling sectors and
    /// partitions (and rotating, if enabled) as boundaries are crossed.
    async fn next_block(&mut self) -> Result<(), FsError> {
        let capacity = self.capacity();
        loop {
            self.current_block += 1;
            if self.current_block >= capacity {
                self.exhausted().await?;
                continue;
            }

            let block = self.current_block;
            self.erase_blocks(block, 1).await?;

            if block % self.partition_blocks() == 0 {
                self.seal_partition().await?;
            }
            if block % self.sector_blocks() == 0 {
                self.create_sector().await?;
                // The new sector's first data block is the one after its header.
                continue;
            }

            self.last_block = block;
            if self.messages_in_block > 0 {
                self.block_index += 1;
            }
            self.messages_in_block = 0;
            return Ok(());
        }
    }

    /// Seals the active partition's boot header and moves to the next.
    async fn seal_partition(&mut self) -> Result<(), FsError> {
        let lba = u32::from(self.current_partition) * self.partition_blocks();
        info!("sealing partition {} at block {lba}", self.current_partition);
        self.load_block(lba).await?;
        PartitionHeaderMut::new(&mut self.buf).insert_flags(HeaderFlags::JUMP_TO_NEXT_PARTITION);
        self.store_block(lba).await?;
        self.current_partition = self
            .current_partition
            .checked_add(1)
            .ok_or(FsError::DeviceFull)?;
        Ok(())
    }

    /// Seals the active sector header and creates a fresh one at
    /// `current_block`.
    async fn create_sector(&mut self) -> Result<(), FsError> {
        let old = self.current_sector;
        self.load_block(old).await?;
        SectorHeaderMut::new(&mut self.buf)
            .header()
            .insert_flags(HeaderFlags::JUMP_TO_NEXT_SECTOR);
        self.store_block(old).await?;

        debug!("creating sector at block {}", self.current_block);

        // The sealed header's buffer becomes the new header: geometry and
        // rotate flag carry over, sector-local fields are reset.
        let (first_message, partition_id) = (self.message_id, self.current_partition);
        {
            let mut sector = SectorHeaderMut::new(&mut self.buf);
            sector.set_first_message(first_message);
            sector.clear_index();
            let mut hdr = sector.header();
            hdr.remove_flags(HeaderFlags::JUMP_TO_NEXT_SECTOR);
            hdr.set_partition_id(partition_id);
            hdr.set_magic();
        }
        self.current_sector = self.current_block;
        self.messages_in_block = 0;
        self.block_index = 0;
        let lba = self.current_sector;
        self.store_block(lba).await
    }

    /// Handles running off the end of the device: records `card_full` on the
    /// boot header and, in rotate mode, restarts the log at partition 0.
    async fn exhausted(&mut self) -> Result<(), FsError> {
        warn!("device exhausted at block {}", self.current_block);
        self.load_block(0).await?;
        let rotate = {
            let mut hdr = PartitionHeaderMut::new(&mut self.buf);
            hdr.insert_flags(HeaderFlags::CARD_FULL);
            hdr.remove_flags(HeaderFlags::JUMP_TO_NEXT_SECTOR);
            hdr.as_view().flags().contains(HeaderFlags::MESSAGE_ROTATE)
        };
        self.store_block(0).await?;

        if !rotate {
            return Err(FsError::DeviceFull);
        }

        info!("rotating: restarting log at partition 0");
        // Re-open the boot header as an empty sector header; the id space
        // restarts with the overwritten log.
        {
            let mut sector = SectorHeaderMut::new(&mut self.buf);
            sector.set_first_message(0);
            sector.clear_index();
            let mut hdr = sector.header();
            hdr.remove_flags(HeaderFlags::JUMP_TO_NEXT_PARTITION);
            hdr.set_last_block(1);
            hdr.set_message_id(0);
        }
        self.store_block(0).await?;

        self.current_partition = 0;
        self.current_sector = 0;
        self.current_block = 0;
        self.last_block = 1;
        self.block_index = 0;
        self.messages_in_block = 0;
        self.message_id = 0;
        Ok(())
    }

    // ── Read resolver ────────────────────────────────────────────────────

    /// Reads message `id` into `out`, returning the payload length.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if `id` has not been written;
    /// [`FsError::InvalidArgument`] if `out` is shorter than the payload.
    pub async fn read(&mut self, id: MessageId, out: &mut [u8]) -> Result<usize, FsError> {
        let loc = self.locate(id.as_u32()).await?;
        if out.len() < loc.payload_len {
            return Err(FsError::InvalidArgument);
        }
        out[..loc.payload_len]
            .copy_from_slice(&self.buf[loc.payload_offset..loc.payload_offset + loc.payload_len]);
        Ok(loc.payload_len)
    }

    /// Returns the payload length of message `id` without copying it.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] if `id` has not been written.
    pub async fn message_len(&mut self, id: MessageId) -> Result<usize, FsError> {
        Ok(self.locate(id.as_u32()).await?.payload_len)
    }

    /// Blanks message `id` in place: the payload bytes are zeroed, the slot
    /// and every later message keep their positions.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] if `id` is out of range.
    pub async fn erase(&mut self, id: MessageId) -> Result<(), FsError> {
        if id.as_u32() >= self.message_id {
            return Err(FsError::InvalidArgument);
        }
        let loc = self.locate(id.as_u32()).await?;
        self.buf[loc.payload_offset..loc.payload_offset + loc.payload_len].fill(0);
        self.store_block(loc.block).await
    }

    /// Overwrites message `id` in place with `payload`.
    ///
    /// The slot's encoded size cannot change, so `payload` must have exactly
    /// the original length.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] if `id` is out of range;
    /// [`FsError::InvalidSize`] if the length differs from the original.
    pub async fn update(&mut self, id: MessageId, payload: &[u8]) -> Result<(), FsError> {
        if id.as_u32() >= self.message_id {
            return Err(FsError::InvalidArgument);
        }
        let loc = self.locate(id.as_u32()).await?;
        if payload.len() != loc.payload_len {
            return Err(FsError::InvalidSize);
        }
        self.buf[loc.payload_offset..loc.payload_offset + loc.payload_len].copy_from_slice(payload);
        self.store_block(loc.block).await
    }

    /// Translates a message id into its data block and in-block coordinates
    /// via the layered index, leaving the data block in the scratch buffer.
    ///
    /// Descends purely by the seal chain: partitions advance while sealed
    /// and the next partition's `first_message` does not pass the target,
    /// sectors advance while sealed and the sector's sealed population ends
    /// before the target. Header id watermarks go stale after later-sector
    /// seals and are never consulted.
    async fn locate(&mut self, id: u32) -> Result<SlotLocation, FsError> {
        if id >= self.message_id {
            return Err(FsError::NotFound);
        }

        let capacity = self.capacity();
        let partition_blocks = self.partition_blocks();
        let sector_blocks = self.sector_blocks();
        let entries = self.index_entries();

        // Partition descent.
        let mut partition_lba = 0u32;
        self.load_block(0).await?;
        while self
            .header()
            .flags()
            .contains(HeaderFlags::JUMP_TO_NEXT_PARTITION)
        {
            let Some(next) = partition_lba
                .checked_add(partition_blocks)
                .filter(|&l| l < capacity)
            else {
                break;
            };
            self.load_block(next).await?;
            if self.sector().first_message() <= id {
                partition_lba = next;
                continue;
            }
            // Target is in the partition we just stepped past.
            self.load_block(partition_lba).await?;
            break;
        }

        // Sector descent within the partition.
        let mut sector_lba = partition_lba;
        loop {
            let (sealed, first, population) = {
                let sector = self.sector();
                (
                    sector
                        .header()
                        .flags()
                        .contains(HeaderFlags::JUMP_TO_NEXT_SECTOR),
                    sector.first_message(),
                    sector.index_sum(entries),
                )
            };
            if !sealed || id < first.wrapping_add(population) {
                break;
            }
            let Some(next) = sector_lba.checked_add(sector_blocks).filter(|&l| l < capacity)
            else {
                break;
            };
            sector_lba = next;
            self.load_block(sector_lba).await?;
        }

        // Per-block walk through the sector's message index.
        let (blocks_in, old_message_base) = {
            let sector = self.sector();
            let mut message_base = sector.first_message();
            let mut old_base;
            let mut i = 0usize;
            loop {
                old_base = message_base;
                message_base = message_base.wrapping_add(u32::from(sector.index_entry(i)));
                i += 1;
                if !(message_base <= id && i < entries && sector.index_entry(i) != 0) {
                    break;
                }
            }
            (i as u32, old_base)
        };
        let data_block = sector_lba + 1 + blocks_in * BLOCKS_PER_INDEX_ENTRY - 1;
        self.load_block(data_block).await?;

        // Step over the earlier slots in the block.
        let mut offset = 0usize;
        for _ in 0..id.wrapping_sub(old_message_base) {
            if offset + 2 > BLOCK_BYTES {
                return Err(FsError::NotFound);
            }
            offset += slot::size_at(&self.buf, offset);
        }
        if offset + 2 > BLOCK_BYTES {
            return Err(FsError::NotFound);
        }
        let (payload_len, payload_offset) = slot::decode(&self.buf, offset);
        if payload_offset + payload_len > BLOCK_BYTES {
            return Err(FsError::NotFound);
        }

        Ok(SlotLocation {
            block: data_block,
            payload_len,
            payload_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnon_core::task::block_on;
    use magnon_drivers::block::RamDisk;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fresh_volume(blocks: u64) -> Volume<RamDisk> {
        let disk = RamDisk::new(blocks, 512);
        block_on(Volume::mount_or_format(disk, FormatConfig::default()))
            .expect("mount should succeed")
    }

    fn rotating_volume(blocks: u64) -> Volume<RamDisk> {
        let disk = RamDisk::new(blocks, 512);
        let config = FormatConfig {
            message_rotate: true,
            ..FormatConfig::default()
        };
        block_on(Volume::mount_or_format(disk, config)).expect("mount should succeed")
    }

    fn block_of(vol: &Volume<RamDisk>, lba: u32) -> [u8; BLOCK_BYTES] {
        vol.device
            .snapshot(u64::from(lba))
            .try_into()
            .expect("sector is 512 bytes")
    }

    fn pattern(len: usize, seed: usize) -> alloc::vec::Vec<u8> {
        (0..len)
            .map(|i| ((seed * 7 + i * 13) % 251) as u8)
            .collect()
    }

    fn read_vec(vol: &mut Volume<RamDisk>, id: u32) -> alloc::vec::Vec<u8> {
        let mut buf = [0u8; BLOCK_BYTES];
        let len = block_on(vol.read(MessageId::new(id), &mut buf)).expect("read");
        buf[..len].to_vec()
    }

    #[test]
    fn format_positions_cursor() {
        let vol = fresh_volume(8192);
        assert_eq!(vol.current_partition, 0);
        assert_eq!(vol.current_sector, 0);
        assert_eq!(vol.current_block, 1);
        assert_eq!(vol.last_block, 1);
        assert_eq!(vol.block_index, 0);
        assert_eq!(vol.messages_in_block, 0);
        assert_eq!(vol.next_message_id(), MessageId::new(0));

        let boot = block_of(&vol, 0);
        let hdr = PartitionHeader::new(&boot);
        assert!(hdr.is_formatted());
        assert_eq!(hdr.flags(), HeaderFlags::empty());
        assert_eq!(hdr.partition_id(), 0);
        assert_eq!(hdr.last_block(), 1);
        assert_eq!(hdr.message_id(), 0);
    }

    #[test]
    fn format_rejects_bad_geometry() {
        // Sector size other than 512.
        let disk = RamDisk::new(256, 4096);
        assert_eq!(
            block_on(Volume::mount_or_format(disk, FormatConfig::default())).err(),
            Some(FsError::InvalidArgument)
        );

        // Capacity below one logical sector.
        let disk = RamDisk::new(64, 512);
        assert_eq!(
            block_on(Volume::mount_or_format(disk, FormatConfig::default())).err(),
            Some(FsError::InvalidArgument)
        );

        // Per-block index does not fit a 512-byte sector header.
        let disk = RamDisk::new(8192, 512);
        let config = FormatConfig {
            sector_size: 2,
            ..FormatConfig::default()
        };
        assert_eq!(
            block_on(Volume::mount_or_format(disk, config)).err(),
            Some(FsError::InvalidArgument)
        );
    }

    #[test]
    fn mount_unformatted_fails() {
        let disk = RamDisk::new(8192, 512);
        assert_eq!(
            block_on(Volume::mount(disk)).err(),
            Some(FsError::NotFormatted)
        );
    }

    #[test]
    fn hello_roundtrip_and_layout() {
        let mut vol = fresh_volume(8192);
        let id = block_on(vol.write(b"hello")).expect("write");
        assert_eq!(id, MessageId::new(0));
        assert_eq!(vol.next_message_id(), MessageId::new(1));

        let mut buf = [0u8; 16];
        assert_eq!(block_on(vol.read(id, &mut buf)), Ok(5));
        assert_eq!(&buf[..5], b"hello");

        // Data block 1: slot size byte then the payload.
        let block = block_of(&vol, 1);
        assert_eq!(block[0], 0x06);
        assert_eq!(&block[1..6], b"hello");

        // Sector header records the append.
        let boot = block_of(&vol, 0);
        assert_eq!(PartitionHeader::new(&boot).last_block(), 1);
        assert_eq!(PartitionHeader::new(&boot).message_id(), 1);
        assert_eq!(SectorHeader::new(&boot).index_entry(0), 1);
    }

    #[test]
    fn mixed_lengths_roll_to_next_block() {
        let mut vol = fresh_volume(8192);
        block_on(vol.write(&pattern(100, 1))).expect("write 100");
        block_on(vol.write(&pattern(254, 2))).expect("write 254");
        block_on(vol.write(&pattern(255, 3))).expect("write 255");

        // Block 1 holds the first two messages and a short unused tail.
        let block1 = block_of(&vol, 1);
        assert_eq!(block1[0], 0x65);
        assert_eq!(block1[101], 0xFF);
        assert_eq!(&block1[356..358], &[0, 0]);

        // The 255-byte message did not fit (slot 257 > 509 - 356) and went
        // to block 2 in long form.
        let block2 = block_of(&vol, 2);
        assert_eq!(block2[0], 0x00);
        assert_eq!(block2[1], 0x01);

        assert_eq!(read_vec(&mut vol, 0), pattern(100, 1));
        assert_eq!(read_vec(&mut vol, 1), pattern(254, 2));
        assert_eq!(read_vec(&mut vol, 2), pattern(255, 3));

        let boot = block_of(&vol, 0);
        assert_eq!(SectorHeader::new(&boot).index_entry(0), 2);
        assert_eq!(SectorHeader::new(&boot).index_entry(1), 1);
        assert_eq!(PartitionHeader::new(&boot).last_block(), 2);
        assert_eq!(PartitionHeader::new(&boot).message_id(), 3);
    }

    #[test]
    fn write_rejects_out_of_range_sizes() {
        let mut vol = fresh_volume(8192);
        assert_eq!(block_on(vol.write(&[])), Err(FsError::InvalidSize));
        // 510 is the nominal block payload ceiling but is unencodable in the
        // long slot form; the volume rejects it rather than eat the device.
        assert_eq!(block_on(vol.write(&[0u8; 510])), Err(FsError::InvalidSize));
        assert_eq!(block_on(vol.write(&[0u8; 511])), Err(FsError::InvalidSize));
        assert!(block_on(vol.write(&[0u8; 509])).is_ok());
    }

    #[test]
    fn roundtrip_every_length() {
        let mut vol = fresh_volume(8192);
        for len in 1..=slot::MAX_MESSAGE_LEN {
            let id = block_on(vol.write(&pattern(len, len))).expect("write");
            assert_eq!(id, MessageId::new(len as u32 - 1));
        }
        for len in 1..=slot::MAX_MESSAGE_LEN {
            assert_eq!(read_vec(&mut vol, len as u32 - 1), pattern(len, len));
        }
    }

    #[test]
    fn sector_crossover_seals_and_reindexes() {
        let mut vol = fresh_volume(8192);
        // One 500-byte message per data block; blocks 1..=255 fill sector 0.
        for seq in 0..255 {
            block_on(vol.write(&pattern(500, seq))).expect("write");
        }
        assert_eq!(vol.current_sector, 0);

        // The next write crosses into a new sector at block 256.
        block_on(vol.write(&pattern(500, 255))).expect("crossing write");
        assert_eq!(vol.current_sector, 256);
        assert_eq!(vol.last_block, 257);
        assert_eq!(vol.block_index, 0);
        assert_eq!(vol.messages_in_block, 1);

        let old = block_of(&vol, 0);
        assert!(
            PartitionHeader::new(&old)
                .flags()
                .contains(HeaderFlags::JUMP_TO_NEXT_SECTOR)
        );

        let new = block_of(&vol, 256);
        let sector = SectorHeader::new(&new);
        assert!(sector.header().is_formatted());
        assert!(
            !sector
                .header()
                .flags()
                .contains(HeaderFlags::JUMP_TO_NEXT_SECTOR)
        );
        assert_eq!(sector.first_message(), 255);
        assert_eq!(sector.header().partition_id(), 0);

        assert_eq!(read_vec(&mut vol, 254), pattern(500, 254));
        assert_eq!(read_vec(&mut vol, 255), pattern(500, 255));
    }

    #[test]
    fn sealed_sector_index_is_consistent() {
        let mut vol = fresh_volume(8192);
        // 509-byte messages occupy exactly one block each.
        for seq in 0..=255 {
            block_on(vol.write(&pattern(509, seq))).expect("write");
        }

        // Sector 0 is sealed: first_message + sum(index) equals the next
        // sector's first message, and each data block holds exactly the
        // recorded count.
        let sealed = block_of(&vol, 0);
        let sector = SectorHeader::new(&sealed);
        assert_eq!(sector.first_message(), 0);
        assert_eq!(sector.index_sum(256), 255);
        for i in 0..255 {
            assert_eq!(sector.index_entry(i), 1);
            let data = block_of(&vol, 1 + i as u32);
            assert_eq!(slot::count(&data), 1);
        }

        let next = block_of(&vol, 256);
        assert_eq!(SectorHeader::new(&next).first_message(), 255);
    }

    #[test]
    fn mount_resumes_without_id_gaps() {
        let mut rng = StdRng::seed_from_u64(0x6d61676e_6f6e);
        let mut vol = fresh_volume(8192);
        let mut messages = alloc::vec::Vec::new();
        for seq in 0..300 {
            let len = rng.gen_range(1..=509);
            let payload = pattern(len, seq);
            block_on(vol.write(&payload)).expect("write");
            messages.push(payload);
        }

        let cursor = (
            vol.current_partition,
            vol.current_sector,
            vol.current_block,
            vol.last_block,
            vol.block_index,
            vol.messages_in_block,
            vol.message_id,
        );

        let disk = vol.unmount();
        let mut vol = block_on(Volume::mount(disk)).expect("remount");
        assert_eq!(
            cursor,
            (
                vol.current_partition,
                vol.current_sector,
                vol.current_block,
                vol.last_block,
                vol.block_index,
                vol.messages_in_block,
                vol.message_id,
            )
        );

        // Ids continue without a gap.
        let id = block_on(vol.write(b"after remount")).expect("write");
        assert_eq!(id, MessageId::new(300));

        for (seq, payload) in messages.iter().enumerate() {
            assert_eq!(&read_vec(&mut vol, seq as u32), payload);
        }
    }

    #[test]
    fn packing_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(0xf1a5);
        let mut vol = fresh_volume(8192);
        let mut total_slots = 0usize;
        for seq in 0..400 {
            let len = rng.gen_range(1..=100);
            block_on(vol.write(&pattern(len, seq))).expect("write");
            total_slots += slot::slot_size(len);
        }

        let mut used = 0usize;
        for lba in 1..=vol.last_block {
            if lba % 256 == 0 {
                continue;
            }
            let block = block_of(&vol, lba);
            if block[0] != 0 || block[1] != 0 {
                used += 1;
            }
        }

        // A block can carry at most 511 slot bytes, and a block only rolls
        // when fewer than max_len bytes remain.
        assert!(used >= total_slots.div_ceil(511));
        assert!(used <= total_slots.div_ceil(509 - 100) + 1);
    }

    #[test]
    fn device_full_without_rotation() {
        let mut vol = fresh_volume(2048);
        // 8 sector headers leave 2040 data blocks; 509-byte messages fill
        // one block each.
        for seq in 0..2040 {
            block_on(vol.write(&pattern(509, seq))).expect("write");
        }
        assert_eq!(
            block_on(vol.write(&pattern(509, 2040))),
            Err(FsError::DeviceFull)
        );
        // The condition is persistent.
        assert_eq!(block_on(vol.write(b"more")), Err(FsError::DeviceFull));

        let boot = block_of(&vol, 0);
        assert!(
            PartitionHeader::new(&boot)
                .flags()
                .contains(HeaderFlags::CARD_FULL)
        );

        let disk = vol.unmount();
        assert_eq!(block_on(Volume::mount(disk)).err(), Some(FsError::DeviceFull));
    }

    #[test]
    fn rotation_wraps_to_start() {
        let mut vol = rotating_volume(2048);
        for seq in 0..2040 {
            block_on(vol.write(&pattern(509, seq))).expect("write");
        }

        // Exhaustion with rotation enabled: the id space restarts and the
        // oldest data is overwritten.
        let id = block_on(vol.write(b"newest message")).expect("rotating write");
        assert_eq!(id, MessageId::new(0));
        assert_eq!(read_vec(&mut vol, 0), b"newest message");
        assert_eq!(
            block_on(vol.message_len(MessageId::new(1))),
            Err(FsError::NotFound)
        );

        // The rotated card still records card_full, so a remount refuses it.
        let disk = vol.unmount();
        assert_eq!(block_on(Volume::mount(disk)).err(), Some(FsError::DeviceFull));
    }

    #[test]
    fn erase_blanks_payload_in_place() {
        let mut vol = fresh_volume(8192);
        block_on(vol.write(b"aaaaa")).expect("write");
        block_on(vol.write(b"zzz")).expect("write");

        block_on(vol.erase(MessageId::new(0))).expect("erase");
        assert_eq!(read_vec(&mut vol, 0), [0u8; 5]);
        // The neighbour is untouched and ids keep their positions.
        assert_eq!(read_vec(&mut vol, 1), b"zzz");

        assert_eq!(
            block_on(vol.erase(MessageId::new(5))),
            Err(FsError::InvalidArgument)
        );
    }

    #[test]
    fn update_preserves_slot_size() {
        let mut vol = fresh_volume(8192);
        block_on(vol.write(b"aaaaa")).expect("write");

        block_on(vol.update(MessageId::new(0), b"bbbbb")).expect("update");
        assert_eq!(read_vec(&mut vol, 0), b"bbbbb");

        // A different length would change the encoded slot size.
        assert_eq!(
            block_on(vol.update(MessageId::new(0), b"bb")),
            Err(FsError::InvalidSize)
        );
        assert_eq!(
            block_on(vol.update(MessageId::new(1), b"xx")),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(read_vec(&mut vol, 0), b"bbbbb");
    }

    #[test]
    fn read_errors() {
        let mut vol = fresh_volume(8192);
        block_on(vol.write(b"abc")).expect("write");

        let mut buf = [0u8; 16];
        assert_eq!(
            block_on(vol.read(MessageId::new(5), &mut buf)),
            Err(FsError::NotFound)
        );
        assert_eq!(
            block_on(vol.read(MessageId::new(0), &mut buf[..2])),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(block_on(vol.message_len(MessageId::new(0))), Ok(3));
    }

    #[test]
    fn mount_adopts_unindexed_message() {
        let mut vol = fresh_volume(8192);
        block_on(vol.write(b"one")).expect("write");
        block_on(vol.write(b"two")).expect("write");

        // Simulate a write whose payload reached the media but whose sector
        // header update was lost.
        let stale_header = vol.device.snapshot(0);
        block_on(vol.write(b"three")).expect("write");
        let disk = vol.unmount();
        block_on(disk.write_sector(0, &stale_header)).expect("clobber header");

        let mut vol = block_on(Volume::mount(disk)).expect("remount");
        assert_eq!(vol.message_id, 3);
        assert_eq!(vol.messages_in_block, 3);
        assert_eq!(read_vec(&mut vol, 2), b"three");

        // The next write persists the reconciled state.
        let id = block_on(vol.write(b"four")).expect("write");
        assert_eq!(id, MessageId::new(3));
        let boot = block_of(&vol, 0);
        assert_eq!(PartitionHeader::new(&boot).message_id(), 4);
        assert_eq!(SectorHeader::new(&boot).index_entry(0), 4);
    }

    /// Builds a sealed, empty sector header as the crossover leaves behind.
    fn sealed_empty_header() -> [u8; BLOCK_BYTES] {
        let mut buf = [0u8; BLOCK_BYTES];
        {
            let mut sector = SectorHeaderMut::new(&mut buf);
            sector.set_first_message(0);
            let mut hdr = sector.header();
            hdr.set_flags(HeaderFlags::JUMP_TO_NEXT_SECTOR);
            hdr.set_partition_size(1);
            hdr.set_sector_size(1);
            hdr.set_partition_id(0);
            hdr.set_last_block(1);
            hdr.set_message_id(0);
            hdr.set_magic();
        }
        buf
    }

    #[test]
    fn partition_crossover_seals_and_resumes() {
        // Two partitions; the RamDisk is sparse so only touched blocks cost
        // real memory.
        let disk = RamDisk::new(u64::from(PARTITION_STRIDE) + 2_560, 512);
        let vol = block_on(Volume::mount_or_format(disk, FormatConfig::default()))
            .expect("format");
        let disk = vol.unmount();

        // Seed partition 0 as fully written: every sector sealed except the
        // last, whose final data block holds one message (id 253 after 253
        // one-per-block predecessors).
        let sealed = sealed_empty_header();
        let last_sector = PARTITION_STRIDE - 256;
        for lba in (0..last_sector).step_by(256) {
            block_on(disk.write_sector(u64::from(lba), &sealed)).expect("seed");
        }

        let mut active = [0u8; BLOCK_BYTES];
        {
            let mut sector = SectorHeaderMut::new(&mut active);
            sector.set_first_message(0);
            for i in 0..=253 {
                sector.set_index_entry(i, 1);
            }
            let mut hdr = sector.header();
            hdr.set_partition_size(1);
            hdr.set_sector_size(1);
            hdr.set_partition_id(0);
            hdr.set_last_block(PARTITION_STRIDE - 2);
            hdr.set_message_id(254);
            hdr.set_magic();
        }
        block_on(disk.write_sector(u64::from(last_sector), &active)).expect("seed");

        let mut tail_block = [0u8; BLOCK_BYTES];
        slot::encode(&mut tail_block, 0, &pattern(509, 253));
        block_on(disk.write_sector(u64::from(PARTITION_STRIDE - 2), &tail_block)).expect("seed");

        let mut vol = block_on(Volume::mount(disk)).expect("mount seeded");
        assert_eq!(vol.current_partition, 0);
        assert_eq!(vol.current_sector, last_sector);
        assert_eq!(vol.last_block, PARTITION_STRIDE - 2);
        assert_eq!(vol.block_index, 253);
        assert_eq!(vol.messages_in_block, 1);
        assert_eq!(vol.message_id, 254);

        // Fill the partition's final data block, then cross the boundary.
        let id = block_on(vol.write(&pattern(509, 254))).expect("write");
        assert_eq!(id, MessageId::new(254));
        assert_eq!(vol.last_block, PARTITION_STRIDE - 1);

        let id = block_on(vol.write(&pattern(509, 255))).expect("crossing write");
        assert_eq!(id, MessageId::new(255));
        assert_eq!(vol.current_partition, 1);
        assert_eq!(vol.current_sector, PARTITION_STRIDE);
        assert_eq!(vol.last_block, PARTITION_STRIDE + 1);

        // Partition 0 is sealed; its last sector is sealed; the new
        // partition's boot header doubles as the first sector header.
        let boot = block_of(&vol, 0);
        assert!(
            PartitionHeader::new(&boot)
                .flags()
                .contains(HeaderFlags::JUMP_TO_NEXT_PARTITION)
        );
        let old_sector = block_of(&vol, last_sector);
        assert!(
            PartitionHeader::new(&old_sector)
                .flags()
                .contains(HeaderFlags::JUMP_TO_NEXT_SECTOR)
        );
        let new_boot = block_of(&vol, PARTITION_STRIDE);
        let sector = SectorHeader::new(&new_boot);
        assert!(sector.header().is_formatted());
        assert_eq!(sector.first_message(), 255);
        assert_eq!(sector.header().partition_id(), 1);

        // Reads resolve across the boundary in both partitions.
        assert_eq!(read_vec(&mut vol, 253), pattern(509, 253));
        assert_eq!(read_vec(&mut vol, 254), pattern(509, 254));
        assert_eq!(read_vec(&mut vol, 255), pattern(509, 255));

        // Remount resumes in partition 1 without id gaps.
        let disk = vol.unmount();
        let mut vol = block_on(Volume::mount(disk)).expect("remount");
        assert_eq!(vol.current_partition, 1);
        assert_eq!(vol.current_sector, PARTITION_STRIDE);
        assert_eq!(vol.message_id, 256);
        let id = block_on(vol.write(b"post-crossing")).expect("write");
        assert_eq!(id, MessageId::new(256));
        assert_eq!(read_vec(&mut vol, 256), b"post-crossing");
    }
}
