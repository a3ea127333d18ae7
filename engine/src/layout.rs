//! Offset arithmetic over a volume's geometry.
//!
//! Sector numbers are relative to the volume: sector 0 is the boot sector.
//! Every byte offset returned here is absolute within the image, i.e. it
//! already includes the partition offset.

use alloc::vec::Vec;

use crate::boot_sector::Geometry;
use crate::fat_entry;
use crate::fat_type::FatType;
use crate::{FatError, Result};

/// How cluster numbers past the end of the data area are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeMode {
    /// Reject with `InvalidClusterNumber`.
    Strict,
    /// Compute the offset anyway; the caller reports it as beyond the partition.
    Lenient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    BootSector,
    Reserved,
    Fat(u8),
    RootDirectory,
    Data,
    BeyondVolume,
}

/// A run of sectors belonging to one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionSpan {
    pub region:       Region,
    pub start_sector: u32,
    pub sector_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub fat_type:            FatType,
    pub partition_offset:    u64,
    pub partition_length:    u64,
    pub bytes_per_sector:    u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors:    u32,
    pub fat_count:           u32,
    pub sectors_per_fat:     u32,
    pub root_dir_sectors:    u32,
    pub first_data_sector:   u32,
    pub total_sectors:       u32,
    pub total_clusters:      u32,
}

impl Layout {
    pub fn new(geometry: &Geometry, fat_type: FatType, partition_length: u64) -> Self {
        Self {
            fat_type,
            partition_offset:    geometry.partition_offset,
            partition_length,
            bytes_per_sector:    geometry.bytes_per_sector as u32,
            sectors_per_cluster: geometry.sectors_per_cluster as u32,
            reserved_sectors:    geometry.reserved_sectors as u32,
            fat_count:           geometry.fat_count as u32,
            sectors_per_fat:     geometry.sectors_per_fat,
            root_dir_sectors:    geometry.root_dir_sectors(),
            first_data_sector:   u32::try_from(geometry.first_data_sector()).unwrap_or(u32::MAX),
            total_sectors:       geometry.total_sectors,
            total_clusters:      geometry.total_clusters(),
        }
    }

    pub fn cluster_size(&self) -> u32 { self.sectors_per_cluster * self.bytes_per_sector }
    pub fn fat_size(&self) -> u64     { self.sectors_per_fat as u64 * self.bytes_per_sector as u64 }
    pub fn max_cluster(&self) -> u32  { self.total_clusters + 1 }

    // ─── Offsets ───────────────────────────────────────────────────────────────

    pub fn sector_offset(&self, sector: u64) -> u64 {
        self.partition_offset + sector * self.bytes_per_sector as u64
    }

    pub fn cluster_first_sector(&self, cluster: u32, mode: RangeMode) -> Result<u64> {
        self.check_cluster(cluster, mode)?;
        Ok(self.first_data_sector as u64 + (cluster as u64 - 2) * self.sectors_per_cluster as u64)
    }

    pub fn cluster_offset(&self, cluster: u32, mode: RangeMode) -> Result<u64> {
        Ok(self.sector_offset(self.cluster_first_sector(cluster, mode)?))
    }

    pub fn fat_offset(&self, copy: u32) -> Result<u64> {
        if copy >= self.fat_count {
            return Err(FatError::InvalidInput("FAT copy index out of range"));
        }
        Ok(self.sector_offset(self.reserved_sectors as u64 + copy as u64 * self.sectors_per_fat as u64))
    }

    /// Absolute offset of `cluster`'s entry in FAT `copy`. For FAT12 this is
    /// the first of the two bytes the entry straddles.
    pub fn fat_entry_offset(&self, copy: u32, cluster: u32) -> Result<u64> {
        let (byte, width) = fat_entry::entry_location(cluster, self.fat_type);
        if byte + width > self.fat_size() {
            return Err(FatError::InvalidClusterNumber { cluster, max: self.max_cluster() });
        }
        Ok(self.fat_offset(copy)? + byte)
    }

    pub fn root_dir_offset(&self) -> u64 {
        self.sector_offset(self.reserved_sectors as u64 + self.fat_count as u64 * self.sectors_per_fat as u64)
    }

    /// Length of the fixed root region; zero on FAT32.
    pub fn root_dir_len(&self) -> u64 { self.root_dir_sectors as u64 * self.bytes_per_sector as u64 }

    pub fn data_offset(&self) -> u64 { self.sector_offset(self.first_data_sector as u64) }

    /// Byte length of the clusters `2..=max_cluster()`.
    pub fn data_len(&self) -> u64 { self.total_clusters as u64 * self.cluster_size() as u64 }

    /// Map an absolute offset in the data area to `(cluster, position in cluster)`.
    pub fn cluster_of_offset(&self, offset: u64) -> Option<(u32, u32)> {
        let rel = offset.checked_sub(self.data_offset())?;
        if rel >= self.data_len() {
            return None;
        }
        let size = self.cluster_size() as u64;
        Some(((rel / size) as u32 + 2, (rel % size) as u32))
    }

    pub fn is_within_partition(&self, offset: u64, len: u64) -> bool {
        offset >= self.partition_offset
            && offset.saturating_add(len) <= self.partition_offset + self.partition_length
    }

    fn check_cluster(&self, cluster: u32, mode: RangeMode) -> Result<()> {
        let out_of_range = cluster < 2 || (mode == RangeMode::Strict && cluster > self.max_cluster());
        if out_of_range {
            return Err(FatError::InvalidClusterNumber { cluster, max: self.max_cluster() });
        }
        Ok(())
    }

    // ─── Region map ────────────────────────────────────────────────────────────

    pub fn regions(&self) -> Vec<RegionSpan> {
        let mut spans = Vec::with_capacity(4 + self.fat_count as usize);
        let mut push = |region: Region, start_sector: u32, sector_count: u32| {
            if sector_count > 0 {
                spans.push(RegionSpan { region, start_sector, sector_count });
            }
        };
        push(Region::BootSector, 0, 1);
        push(Region::Reserved, 1, self.reserved_sectors.saturating_sub(1));
        for copy in 0..self.fat_count {
            push(Region::Fat(copy as u8), self.reserved_sectors + copy * self.sectors_per_fat, self.sectors_per_fat);
        }
        push(Region::RootDirectory, self.first_data_sector - self.root_dir_sectors, self.root_dir_sectors);
        push(Region::Data, self.first_data_sector, self.total_sectors - self.first_data_sector);
        spans
    }

    pub fn region_of_sector(&self, sector: u64) -> Region {
        let fat_start = self.reserved_sectors as u64;
        let root_start = fat_start + self.fat_count as u64 * self.sectors_per_fat as u64;
        match sector {
            0 => Region::BootSector,
            s if s < fat_start => Region::Reserved,
            s if s < root_start => Region::Fat(((s - fat_start) / self.sectors_per_fat as u64) as u8),
            s if s < self.first_data_sector as u64 => Region::RootDirectory,
            s if s < self.total_sectors as u64 => Region::Data,
            _ => Region::BeyondVolume,
        }
    }
}
