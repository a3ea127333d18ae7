//! Master Boot Record parsing.
//!
//! An image either starts with an MBR whose table names a FAT partition, or
//! is itself a bare FAT volume starting at offset 0. Nothing here writes.

use alloc::vec::Vec;

use num_enum::TryFromPrimitive;

use crate::source::{read_exact, ByteSource};
use crate::{FatError, Result};

/// MBR addressing is always in 512-byte units, whatever the volume's sector size.
pub const MBR_SECTOR_SIZE: u64 = 512;

const PARTITION_TABLE: usize = 446;
const ENTRY_SIZE:      usize = 16;
const SIGNATURE:       usize = 510;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum PartitionType {
    Fat12      = 0x01,
    Fat16Small = 0x04,
    Fat16      = 0x06,
    Fat32Chs   = 0x0B,
    Fat32Lba   = 0x0C,
    Fat16Lba   = 0x0E,
}

/// One 16-byte partition table entry, as stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MbrEntry {
    pub index:        u8,
    pub status:       u8,
    pub chs_start:    [u8; 3],
    pub type_byte:    u8,
    pub chs_end:      [u8; 3],
    pub lba_start:    u32,
    pub sector_count: u32,
}

impl MbrEntry {
    fn parse(index: u8, raw: &[u8]) -> Self {
        Self {
            index,
            status:       raw[0],
            chs_start:    [raw[1], raw[2], raw[3]],
            type_byte:    raw[4],
            chs_end:      [raw[5], raw[6], raw[7]],
            lba_start:    u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    pub fn partition_type(&self) -> Option<PartitionType> {
        PartitionType::try_from(self.type_byte).ok()
    }

    pub fn is_bootable(&self) -> bool { self.status == 0x80 }
    pub fn byte_offset(&self) -> u64  { self.lba_start as u64 * MBR_SECTOR_SIZE }
    pub fn byte_length(&self) -> u64  { self.sector_count as u64 * MBR_SECTOR_SIZE }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionSource {
    /// Found through MBR table entry `index`.
    Mbr { index: u8, kind: PartitionType },
    /// No usable MBR: the whole image is the volume.
    Bare,
}

/// The byte window holding the FAT volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub offset: u64,
    pub length: u64,
    pub source: PartitionSource,
}

// ─── Public API ────────────────────────────────────────────────────────────────

/// All non-empty entries of the MBR partition table. Empty if sector 0 has no
/// 0x55AA signature.
pub fn list_partitions<S: ByteSource + ?Sized>(src: &mut S) -> Result<Vec<MbrEntry>> {
    let sector = read_sector0(src)?;
    if !has_signature(&sector) {
        return Ok(Vec::new());
    }
    Ok(table_entries(&sector).filter(|e| e.type_byte != 0).collect())
}

/// Find the FAT volume inside the image.
pub fn locate<S: ByteSource + ?Sized>(src: &mut S) -> Result<Partition> {
    let size = src.size();
    let sector = read_sector0(src)?;

    if has_signature(&sector) {
        for entry in table_entries(&sector) {
            let Some(kind) = entry.partition_type() else { continue };
            if !plausible(&entry, size) {
                log::debug!(
                    "partition::locate: skipping entry {} type {:#04x} (status {:#04x}, LBA {}, {} sectors)",
                    entry.index, entry.type_byte, entry.status, entry.lba_start, entry.sector_count
                );
                continue;
            }
            let offset = entry.byte_offset();
            let length = entry.byte_length().min(size - offset);
            log::info!(
                "partition::locate: MBR entry {} type {:#04x} at LBA {} ({} bytes)",
                entry.index, entry.type_byte, entry.lba_start, length
            );
            return Ok(Partition { offset, length, source: PartitionSource::Mbr { index: entry.index, kind } });
        }
    }

    log::info!("partition::locate: no FAT partition entry, treating image as a bare volume");
    Ok(Partition { offset: 0, length: size, source: PartitionSource::Bare })
}

// ─── Helpers ───────────────────────────────────────────────────────────────────

fn read_sector0<S: ByteSource + ?Sized>(src: &mut S) -> Result<[u8; 512]> {
    let size = src.size();
    if size < MBR_SECTOR_SIZE {
        return Err(FatError::ImageTooSmall { size });
    }
    let mut sector = [0u8; 512];
    read_exact(src, 0, &mut sector)?;
    Ok(sector)
}

fn has_signature(sector: &[u8; 512]) -> bool {
    sector[SIGNATURE] == 0x55 && sector[SIGNATURE + 1] == 0xAA
}

fn table_entries(sector: &[u8; 512]) -> impl Iterator<Item = MbrEntry> + '_ {
    (0..4u8).map(move |i| {
        let off = PARTITION_TABLE + i as usize * ENTRY_SIZE;
        MbrEntry::parse(i, &sector[off..off + ENTRY_SIZE])
    })
}

/// A bare FAT boot sector also ends in 0x55AA, and its boot code overlaps the
/// table. Only accept entries that look like a real table entry.
fn plausible(entry: &MbrEntry, image_size: u64) -> bool {
    (entry.status == 0x00 || entry.status == 0x80)
        && entry.lba_start > 0
        && entry.sector_count > 0
        && entry.byte_offset() + MBR_SECTOR_SIZE <= image_size
}
