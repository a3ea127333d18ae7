//! BIOS Parameter Block decoding.
//!
//! The BPB layout is shared by FAT12/16/32 up to offset 36; after that the
//! FAT32 extension and the FAT12/16 extended BPB diverge. A zero 16-bit FAT
//! size selects the FAT32 layout.

use alloc::string::String;

use crate::partition::Partition;
use crate::source::{read_exact, ByteSource};
use crate::{FatError, Result};

pub const DIR_ENTRY_SIZE: u32 = 32;

// ─── On-disk layout ────────────────────────────────────────────────────────────

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawBpb {
    jump:              [u8; 3],
    oem:               [u8; 8],
    bytes_per_sector:  u16,
    sectors_per_clus:  u8,
    reserved_sectors:  u16,
    num_fats:          u8,
    root_entry_count:  u16,
    total_sectors_16:  u16,
    media:             u8,
    fat_size_16:       u16,
    sectors_per_track: u16,
    num_heads:         u16,
    hidden_sectors:    u32,
    total_sectors_32:  u32,
}

/// Extended BPB of FAT12/16, at offset 36.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawExt16 {
    drive_number:   u8,
    _reserved:      u8,
    boot_signature: u8,
    volume_id:      u32,
    volume_label:   [u8; 11],
    fs_type:        [u8; 8],
}

/// FAT32 extension, at offset 36.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawExt32 {
    fat_size_32:        u32,
    ext_flags:          u16,
    fs_version:         u16,
    root_cluster:       u32,
    fs_info:            u16,
    backup_boot_sector: u16,
    _reserved:          [u8; 12],
    drive_number:       u8,
    _reserved2:         u8,
    boot_signature:     u8,
    volume_id:          u32,
    volume_label:       [u8; 11],
    fs_type:            [u8; 8],
}

const _: () = assert!(core::mem::size_of::<RawBpb>() == 36);
const _: () = assert!(core::mem::size_of::<RawExt16>() == 26);
const _: () = assert!(core::mem::size_of::<RawExt32>() == 54);

fn read_raw<T: Copy>(sector: &[u8; 512], offset: usize) -> T {
    assert!(offset + core::mem::size_of::<T>() <= sector.len());
    // SAFETY: in bounds (checked above); T is a packed struct of plain integers,
    // valid for any bit pattern.
    unsafe { core::ptr::read_unaligned(sector.as_ptr().add(offset) as *const T) }
}

// ─── Geometry ──────────────────────────────────────────────────────────────────

/// Volume geometry, fixed once the image is opened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    pub partition_offset:    u64,
    pub oem_name:            [u8; 8],
    pub bytes_per_sector:    u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors:    u16,
    pub fat_count:           u8,
    pub root_entries:        u16,
    pub total_sectors:       u32,
    pub media:               u8,
    pub sectors_per_fat:     u32,
    pub hidden_sectors:      u32,
    /// First cluster of the root directory; FAT32 only, 0 otherwise.
    pub root_cluster:        u32,
    pub volume_id:           u32,
    pub volume_label:        [u8; 11],
    pub fs_type_label:       [u8; 8],
}

impl Geometry {
    pub fn cluster_size(&self) -> u32 {
        self.sectors_per_cluster as u32 * self.bytes_per_sector as u32
    }

    pub fn root_dir_sectors(&self) -> u32 {
        let bps = self.bytes_per_sector as u32;
        (self.root_entries as u32 * DIR_ENTRY_SIZE).div_ceil(bps)
    }

    pub fn fat_region_sectors(&self) -> u64 {
        self.fat_count as u64 * self.sectors_per_fat as u64
    }

    /// Wide so a corrupt BPB cannot overflow; [`parse`] rejects anything that
    /// does not end inside `total_sectors`.
    pub fn first_data_sector(&self) -> u64 {
        self.reserved_sectors as u64 + self.fat_region_sectors() + self.root_dir_sectors() as u64
    }

    pub fn data_sectors(&self) -> u32 {
        (self.total_sectors as u64).saturating_sub(self.first_data_sector()) as u32
    }

    /// Number of data clusters; valid cluster numbers are `2..total_clusters() + 2`.
    pub fn total_clusters(&self) -> u32 {
        match self.sectors_per_cluster {
            0 => 0,
            spc => self.data_sectors() / spc as u32,
        }
    }

    pub fn volume_label(&self) -> String  { trimmed(&self.volume_label) }
    pub fn fs_type_label(&self) -> String { trimmed(&self.fs_type_label) }
    pub fn oem_name(&self) -> String      { trimmed(&self.oem_name) }
}

fn trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ─── Reader ────────────────────────────────────────────────────────────────────

/// Read and validate the boot sector at the start of `partition`.
pub fn read<S: ByteSource + ?Sized>(src: &mut S, partition: &Partition) -> Result<Geometry> {
    if partition.length < 512 {
        return Err(FatError::ImageTooSmall { size: partition.length });
    }
    let mut sector = [0u8; 512];
    read_exact(src, partition.offset, &mut sector)?;
    parse(&sector, partition.offset)
}

/// Decode a boot sector. `partition_offset` is recorded in the geometry.
pub fn parse(sector: &[u8; 512], partition_offset: u64) -> Result<Geometry> {
    let bpb: RawBpb = read_raw(sector, 0);

    if bpb.jump[0] != 0xEB && bpb.jump[0] != 0xE9 {
        log::warn!("boot_sector::parse: no jump instruction ({:#04x}), continuing", bpb.jump[0]);
    }

    let bytes_per_sector = u16::from_le(bpb.bytes_per_sector);
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        return Err(FatError::InvalidBootSector("bytes per sector not in {512, 1024, 2048, 4096}"));
    }
    let sectors_per_cluster = bpb.sectors_per_clus;
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
        return Err(FatError::InvalidBootSector("sectors per cluster not a power of two in [1, 128]"));
    }
    let reserved_sectors = u16::from_le(bpb.reserved_sectors);
    if reserved_sectors == 0 {
        return Err(FatError::InvalidBootSector("reserved sector count is zero"));
    }
    if bpb.num_fats == 0 {
        return Err(FatError::InvalidBootSector("FAT count is zero"));
    }

    let total_sectors = match u16::from_le(bpb.total_sectors_16) {
        0 => u32::from_le(bpb.total_sectors_32),
        n => n as u32,
    };
    let fat_size_16 = u16::from_le(bpb.fat_size_16) as u32;

    let mut geometry = Geometry {
        partition_offset,
        oem_name:            bpb.oem,
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        fat_count:           bpb.num_fats,
        root_entries:        u16::from_le(bpb.root_entry_count),
        total_sectors,
        media:               bpb.media,
        sectors_per_fat:     fat_size_16,
        hidden_sectors:      u32::from_le(bpb.hidden_sectors),
        root_cluster:        0,
        volume_id:           0,
        volume_label:        [b' '; 11],
        fs_type_label:       [b' '; 8],
    };

    if fat_size_16 == 0 {
        let ext: RawExt32 = read_raw(sector, 36);
        geometry.sectors_per_fat = u32::from_le(ext.fat_size_32);
        geometry.root_cluster = u32::from_le(ext.root_cluster);
        if ext.boot_signature == 0x29 {
            geometry.volume_id = u32::from_le(ext.volume_id);
            geometry.volume_label = ext.volume_label;
            geometry.fs_type_label = ext.fs_type;
        }
    } else {
        let ext: RawExt16 = read_raw(sector, 36);
        if ext.boot_signature == 0x29 {
            geometry.volume_id = u32::from_le(ext.volume_id);
            geometry.volume_label = ext.volume_label;
            geometry.fs_type_label = ext.fs_type;
        }
    }

    if geometry.sectors_per_fat == 0 {
        return Err(FatError::InvalidBootSector("sectors per FAT is zero"));
    }
    if geometry.total_sectors == 0 {
        return Err(FatError::InvalidBootSector("total sector count is zero"));
    }
    if geometry.reserved_sectors as u64 + geometry.fat_region_sectors() > geometry.total_sectors as u64 {
        return Err(FatError::InvalidBootSector("FAT region extends past the volume"));
    }
    if geometry.first_data_sector() >= geometry.total_sectors as u64 {
        return Err(FatError::InvalidBootSector("no room for a data region"));
    }

    Ok(geometry)
}
