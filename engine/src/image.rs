//! An opened FAT image: geometry derived once, then every query and mutation
//! the front end needs.

use alloc::vec::Vec;
use core::ops::{ControlFlow, Range};

use crate::boot_sector::{self, Geometry};
use crate::chain::{self, ClusterChain};
use crate::directory::{self, DirEntries, DirectoryEntry};
use crate::edit::EditBuffer;
use crate::fat_entry::{FatEntryValue, FatTable};
use crate::fat_type::{self, FatType};
use crate::layout::{Layout, RangeMode};
use crate::partition::{self, MbrEntry, Partition};
use crate::resolve::{self, IdFormat, Resolution};
use crate::scan::{self, EmptyScan, ScanConfig, ScanProgress, SearchOptions, TextSearch};
use crate::source::{read_vec, ByteSource};
use crate::{FatError, Result};

pub struct FatImage<S: ByteSource> {
    src:       S,
    partition: Partition,
    geometry:  Geometry,
    layout:    Layout,
}

/// Everything known about one cluster number typed by the user. Offsets are
/// reported even past the end of the volume so the caller can show where the
/// cluster would sit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterReport {
    pub resolution:       Resolution,
    /// Entry offset in FAT copy 0; `None` if the entry would lie past the FAT.
    pub fat_entry_offset: Option<u64>,
    pub fat_sector:       Option<u64>,
    /// `None` for clusters 0 and 1, which address no data.
    pub data_offset:      Option<u64>,
    pub data_sector:      Option<u64>,
    pub within_partition: bool,
    pub entry:            Option<FatEntryValue>,
    pub chain:            ClusterChain,
}

impl<S: ByteSource> FatImage<S> {
    /// Locate the volume, parse its boot sector and classify it. Any failure
    /// aborts the open.
    pub fn open(mut src: S) -> Result<Self> {
        let partition = partition::locate(&mut src)?;
        let geometry = boot_sector::read(&mut src, &partition)?;
        let fat_type = fat_type::classify(&geometry);
        let layout = Layout::new(&geometry, fat_type, partition.length);
        log::info!(
            "image::open: {fat_type} at {:#X}, {} B/sector, {} sectors/cluster, {} clusters, {} FAT(s) of {} sectors",
            partition.offset, geometry.bytes_per_sector, geometry.sectors_per_cluster,
            layout.total_clusters, geometry.fat_count, geometry.sectors_per_fat
        );
        Ok(Self { src, partition, geometry, layout })
    }

    pub fn geometry(&self) -> &Geometry      { &self.geometry }
    pub fn fat_type(&self) -> FatType        { self.layout.fat_type }
    pub fn layout(&self) -> &Layout          { &self.layout }
    pub fn partition(&self) -> &Partition    { &self.partition }
    pub fn source_mut(&mut self) -> &mut S   { &mut self.src }
    pub fn into_inner(self) -> S             { self.src }

    pub fn list_partitions(&mut self) -> Result<Vec<MbrEntry>> {
        partition::list_partitions(&mut self.src)
    }

    // ─── Raw views ─────────────────────────────────────────────────────────────

    fn check_sector(&self, sector: u64) -> Result<u64> {
        if sector >= self.layout.total_sectors as u64 {
            return Err(FatError::InvalidInput("sector number beyond the volume"));
        }
        Ok(self.layout.sector_offset(sector))
    }

    /// Volume sector `sector` (0 is the boot sector).
    pub fn read_sector(&mut self, sector: u64) -> Result<Vec<u8>> {
        let offset = self.check_sector(sector)?;
        read_vec(&mut self.src, offset, self.layout.bytes_per_sector as usize)
    }

    pub fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>> {
        let offset = self.layout.cluster_offset(cluster, RangeMode::Strict)?;
        read_vec(&mut self.src, offset, self.layout.cluster_size() as usize)
    }

    pub fn fat_entry(&mut self, copy: u32, cluster: u32) -> Result<FatEntryValue> {
        FatTable::new(&mut self.src, &self.layout, copy)?.entry(cluster)
    }

    // ─── Chains ────────────────────────────────────────────────────────────────

    pub fn chain(&mut self, start: u32) -> Result<ClusterChain> {
        chain::walk(&mut self.src, &self.layout, start)
    }

    pub fn find_chain_start(&mut self, cluster: u32) -> Result<u32> {
        chain::find_chain_start(&mut self.src, &self.layout, cluster)
    }

    /// Write an edited chain to every FAT copy. See [`chain::commit`].
    pub fn commit_chain(&mut self, chain: &ClusterChain) -> Result<Vec<u64>> {
        chain::commit(&mut self.src, &self.layout, chain)
    }

    // ─── Root directory ────────────────────────────────────────────────────────

    pub fn root_entries(&mut self) -> Result<DirEntries<'_, S>> {
        let extents = directory::root_extents(&mut self.src, &self.layout, self.geometry.root_cluster)?;
        Ok(DirEntries::new(&mut self.src, &self.layout, extents))
    }

    /// Every root slot up to the end marker, deleted entries included.
    pub fn root_directory(&mut self) -> Result<Vec<DirectoryEntry>> {
        self.root_entries()?.collect()
    }

    // ─── Search and scan ───────────────────────────────────────────────────────

    pub fn search_cluster(&mut self, text: &str, preferred: Option<IdFormat>) -> Result<ClusterReport> {
        let resolution = resolve::resolve(text, preferred)?;
        let cluster = resolution.cluster;
        let layout = self.layout;
        let bps = layout.bytes_per_sector as u64;

        let fat_entry_offset = layout.fat_entry_offset(0, cluster).ok();
        let fat_sector = fat_entry_offset.map(|o| (o - layout.partition_offset) / bps);
        let data_sector = layout.cluster_first_sector(cluster, RangeMode::Lenient).ok();
        let data_offset = data_sector.map(|s| layout.sector_offset(s));
        let within_partition = data_offset
            .is_some_and(|o| layout.is_within_partition(o, layout.cluster_size() as u64));

        let entry = match fat_entry_offset {
            Some(_) => Some(self.fat_entry(0, cluster)?),
            None => None,
        };
        let chain = self.chain(cluster)?;

        log::debug!("image::search_cluster: {text:?} -> {cluster}, entry {entry:?}, {} cluster chain", chain.len());
        Ok(ClusterReport {
            resolution,
            fat_entry_offset,
            fat_sector,
            data_offset,
            data_sector,
            within_partition,
            entry,
            chain,
        })
    }

    pub fn search_text(
        &mut self,
        needle: &[u8],
        options: SearchOptions,
        config: &ScanConfig,
    ) -> Result<TextSearch<'_, S>> {
        TextSearch::new(&mut self.src, &self.layout, self.geometry.root_cluster, needle, options, config)
    }

    /// Empty sectors in `range`. See [`scan::scan_empty_sectors`].
    pub fn scan_empty_sectors<F>(&mut self, range: Range<u64>, config: &ScanConfig, on_chunk: F) -> Result<EmptyScan>
    where
        F: FnMut(ScanProgress) -> ControlFlow<()>,
    {
        scan::scan_empty_sectors(&mut self.src, &self.layout, range, config, on_chunk)
    }

    // ─── Byte edits ────────────────────────────────────────────────────────────

    pub fn edit_sector(&mut self, sector: u64) -> Result<EditBuffer> {
        let offset = self.check_sector(sector)?;
        Ok(EditBuffer::new(offset, self.read_sector(sector)?))
    }

    pub fn edit_cluster(&mut self, cluster: u32) -> Result<EditBuffer> {
        let offset = self.layout.cluster_offset(cluster, RangeMode::Strict)?;
        Ok(EditBuffer::new(offset, self.read_cluster(cluster)?))
    }

    pub fn commit_edits(&mut self, buffer: &mut EditBuffer) -> Result<Vec<u64>> {
        buffer.commit(&mut self.src)
    }
}
