//! Cluster chains: walking, in-memory editing, and committing back to the FATs.
//!
//! A [`ClusterChain`] is a plain value. Walking reads FAT copy 0; editing
//! never touches the image; only [`commit`] writes, and it writes every FAT
//! copy in order, copy 0 first.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::fmt;

use crate::fat_entry::{self, FatEntryValue, FatTable};
use crate::layout::{Layout, RangeMode};
use crate::source::ByteSource;
use crate::{FatError, Result};

/// Why a walk stopped. Everything except `EndOfChain` marks the chain broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEnd {
    EndOfChain,
    /// The last cluster's entry is the bad-cluster marker.
    Bad,
    /// The last cluster's entry is free: the chain was cut short.
    Free,
    /// The last cluster's entry holds a reserved value.
    Reserved,
    /// A link (or the start) names a cluster outside the data area.
    OutOfRange(u32),
    /// A link points back at a cluster already in the chain.
    Cycle(u32),
    /// The walk hit the total-cluster-count ceiling.
    LengthCap,
}

impl ChainEnd {
    pub fn is_broken(self) -> bool { self != ChainEnd::EndOfChain }
}

impl fmt::Display for ChainEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainEnd::EndOfChain    => f.write_str("end of chain"),
            ChainEnd::Bad           => f.write_str("bad cluster"),
            ChainEnd::Free          => f.write_str("free cluster (truncated)"),
            ChainEnd::Reserved      => f.write_str("reserved value"),
            ChainEnd::OutOfRange(n) => write!(f, "link to out-of-range cluster {n}"),
            ChainEnd::Cycle(n)      => write!(f, "cycle back to cluster {n}"),
            ChainEnd::LengthCap     => f.write_str("length cap reached"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterChain {
    pub start:    u32,
    pub clusters: Vec<u32>,
    pub end:      ChainEnd,
}

// ─── Walking ───────────────────────────────────────────────────────────────────

/// Follow the chain from `start` through FAT copy 0.
///
/// Anomalies end the walk and are reported on the result, never as errors;
/// only I/O failures are errors.
pub fn walk<S: ByteSource + ?Sized>(src: &mut S, layout: &Layout, start: u32) -> Result<ClusterChain> {
    let max = layout.max_cluster();
    if !(2..=max).contains(&start) {
        log::warn!("chain::walk: start cluster {start} outside 2..={max}");
        return Ok(ClusterChain { start, clusters: Vec::new(), end: ChainEnd::OutOfRange(start) });
    }

    let mut table = FatTable::new(src, layout, 0)?;
    let cap = layout.total_clusters as usize + 1;
    let mut clusters = Vec::new();
    let mut visited = BTreeSet::new();
    let mut cur = start;

    let end = loop {
        visited.insert(cur);
        clusters.push(cur);
        let entry = match table.entry(cur) {
            Ok(e) => e,
            Err(FatError::InvalidClusterNumber { .. }) => break ChainEnd::OutOfRange(cur),
            Err(e) => return Err(e),
        };
        log::trace!("chain::walk: {cur} -> {entry}");
        let next = match entry {
            FatEntryValue::EndOfChain => break ChainEnd::EndOfChain,
            FatEntryValue::Bad        => break ChainEnd::Bad,
            FatEntryValue::Free       => break ChainEnd::Free,
            FatEntryValue::Reserved   => break ChainEnd::Reserved,
            FatEntryValue::Used(n)    => n,
        };
        if next < 2 || next > max { break ChainEnd::OutOfRange(next); }
        if visited.contains(&next) { break ChainEnd::Cycle(next); }
        if clusters.len() >= cap { break ChainEnd::LengthCap; }
        cur = next;
    };

    if end.is_broken() {
        log::warn!("chain::walk: chain from {start} broken after {} cluster(s): {end}", clusters.len());
    }
    Ok(ClusterChain { start, clusters, end })
}

/// Walk predecessor links back from `cluster` to the cluster no other entry
/// points at. Stops early on a loop.
pub fn find_chain_start<S: ByteSource + ?Sized>(src: &mut S, layout: &Layout, cluster: u32) -> Result<u32> {
    layout.cluster_offset(cluster, RangeMode::Strict)?;
    let max = layout.max_cluster();

    let mut preds: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut table = FatTable::new(src, layout, 0)?;
    for c in 2..=max {
        let entry = match table.entry(c) {
            Ok(e) => e,
            Err(FatError::InvalidClusterNumber { .. }) => {
                log::warn!("chain::find_chain_start: FAT ends at entry {c}, data area reaches {max}");
                break;
            }
            Err(e) => return Err(e),
        };
        if let Some(next) = entry.next() {
            if (2..=max).contains(&next) {
                preds.entry(next).or_default().push(c);
            }
        }
    }

    let mut visited = BTreeSet::new();
    let mut cur = cluster;
    loop {
        visited.insert(cur);
        let prev = preds.get(&cur).and_then(|p| p.iter().copied().find(|c| !visited.contains(c)));
        match prev {
            Some(p) => cur = p,
            None => return Ok(cur),
        }
    }
}

// ─── In-memory editing ─────────────────────────────────────────────────────────

impl ClusterChain {
    /// A chain assembled by hand, e.g. for relinking clusters from scratch.
    pub fn from_clusters(clusters: Vec<u32>) -> Self {
        let start = clusters.first().copied().unwrap_or(0);
        Self { start, clusters, end: ChainEnd::EndOfChain }
    }

    pub fn len(&self) -> usize        { self.clusters.len() }
    pub fn is_empty(&self) -> bool    { self.clusters.is_empty() }
    pub fn is_broken(&self) -> bool   { self.end.is_broken() }
    pub fn last(&self) -> Option<u32> { self.clusters.last().copied() }

    /// Size in bytes the chain can hold.
    pub fn byte_len(&self, cluster_size: u32) -> u64 { self.len() as u64 * cluster_size as u64 }

    // Every edit describes what `commit` will write, which always terminates
    // the chain, so edits reset `end`.

    pub fn append_cluster(&mut self, cluster: u32) {
        self.clusters.push(cluster);
        self.edited();
    }

    pub fn insert_at(&mut self, position: usize, cluster: u32) -> Result<()> {
        if position > self.clusters.len() {
            return Err(FatError::InvalidInput("insert position past end of chain"));
        }
        self.clusters.insert(position, cluster);
        self.edited();
        Ok(())
    }

    pub fn remove_at(&mut self, position: usize) -> Result<u32> {
        if position >= self.clusters.len() {
            return Err(FatError::InvalidInput("remove position past end of chain"));
        }
        let removed = self.clusters.remove(position);
        self.edited();
        Ok(removed)
    }

    /// Make the cluster at `position` the last one, dropping everything after it.
    pub fn mark_eof(&mut self, position: usize) -> Result<Vec<u32>> {
        if position >= self.clusters.len() {
            return Err(FatError::InvalidInput("EOF position past end of chain"));
        }
        let dropped = self.clusters.split_off(position + 1);
        self.edited();
        Ok(dropped)
    }

    /// Replace the order of the clusters. `new_order` must be a permutation
    /// of the current clusters.
    pub fn reorder(&mut self, new_order: &[u32]) -> Result<()> {
        let mut a = self.clusters.clone();
        let mut b = new_order.to_vec();
        a.sort_unstable();
        b.sort_unstable();
        if a != b {
            return Err(FatError::InvalidInput("new order is not a permutation of the chain"));
        }
        self.clusters = new_order.to_vec();
        self.edited();
        Ok(())
    }

    fn edited(&mut self) {
        self.start = self.clusters.first().copied().unwrap_or(0);
        self.end = ChainEnd::EndOfChain;
    }
}

// ─── Commit ────────────────────────────────────────────────────────────────────

/// The FAT writes needed to store `chain`: each cluster links to the next,
/// the last gets the end-of-chain marker.
pub fn planned_links(chain: &ClusterChain, layout: &Layout) -> Vec<(u32, u32)> {
    let eoc = layout.fat_type.eoc();
    chain.clusters.iter().enumerate()
        .map(|(i, &c)| (c, chain.clusters.get(i + 1).copied().unwrap_or(eoc)))
        .collect()
}

/// Write `chain` into every FAT copy. Validation happens before the first
/// write, so a rejected chain leaves the image untouched. Returns the offsets
/// written, in order.
pub fn commit<S: ByteSource + ?Sized>(src: &mut S, layout: &Layout, chain: &ClusterChain) -> Result<Vec<u64>> {
    if chain.is_empty() {
        return Err(FatError::InvalidInput("cannot commit an empty chain"));
    }
    let mut seen = BTreeSet::new();
    for &c in &chain.clusters {
        layout.fat_entry_offset(0, c)?;
        layout.cluster_offset(c, RangeMode::Strict)?;
        if !seen.insert(c) {
            return Err(FatError::InvalidInput("chain lists a cluster twice"));
        }
    }

    let links = planned_links(chain, layout);
    let mut written = Vec::with_capacity(links.len() * layout.fat_count as usize);
    for copy in 0..layout.fat_count {
        for &(cluster, value) in &links {
            let offset = layout.fat_entry_offset(copy, cluster)?;
            if let Err(e) = fat_entry::write_entry(src, layout, copy, cluster, value) {
                log::warn!("chain::commit: FAT{copy} entry {cluster} at {offset:#X} failed ({e}), {} written", written.len());
                return Err(FatError::WriteError { offset, written });
            }
            log::debug!("chain::commit: FAT{copy}[{cluster}] = {value:#X} at {offset:#X}");
            written.push(offset);
        }
    }
    log::info!(
        "chain::commit: {} cluster(s) from {} written to {} FAT copies",
        chain.len(), chain.start, layout.fat_count
    );
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::vec;
    use super::*;
    use crate::boot_sector::Geometry;
    use crate::fat_type::FatType;
    use crate::MemImage;

    /// A tiny FAT16 volume: 1 reserved sector, 2 FATs of 1 sector, 16 root
    /// entries, 1 sector per cluster, 64 sectors total.
    pub(crate) fn tiny(links: &[(u32, u16)]) -> (MemImage, Layout) {
        let g = Geometry {
            bytes_per_sector:    512,
            sectors_per_cluster: 1,
            reserved_sectors:    1,
            fat_count:           2,
            sectors_per_fat:     1,
            root_entries:        16,
            total_sectors:       64,
            ..Geometry::default()
        };
        let layout = Layout::new(&g, FatType::Fat16, 64 * 512);
        let mut img = vec![0u8; 64 * 512];
        for copy in 0..2 {
            let base = 512 + copy * 512;
            img[base..base + 4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
            for &(c, v) in links {
                let off = base + c as usize * 2;
                img[off..off + 2].copy_from_slice(&v.to_le_bytes());
            }
        }
        (MemImage(img), layout)
    }

    /// A FAT12 volume with two-sector FATs, big enough that entry 341 spans
    /// FAT bytes 511 and 512.
    fn tiny_fat12(links: &[(u32, u32)]) -> (MemImage, Layout) {
        let g = Geometry {
            bytes_per_sector:    512,
            sectors_per_cluster: 1,
            reserved_sectors:    1,
            fat_count:           2,
            sectors_per_fat:     2,
            root_entries:        16,
            total_sectors:       406,
            ..Geometry::default()
        };
        let layout = Layout::new(&g, FatType::Fat12, 406 * 512);
        let mut fat = vec![0u8; 1024];
        fat_entry::write(&mut fat, 0, 0xFF8, FatType::Fat12).unwrap();
        fat_entry::write(&mut fat, 1, 0xFFF, FatType::Fat12).unwrap();
        for &(c, v) in links {
            fat_entry::write(&mut fat, c, v, FatType::Fat12).unwrap();
        }
        let mut img = vec![0u8; 406 * 512];
        img[512..1536].copy_from_slice(&fat);
        img[1536..2560].copy_from_slice(&fat);
        (MemImage(img), layout)
    }

    /// FAT16 volume whose single-sector FAT holds 256 entries while the data
    /// area has 396 clusters.
    fn short_fat(links: &[(u32, u16)]) -> (MemImage, Layout) {
        let g = Geometry {
            bytes_per_sector:    512,
            sectors_per_cluster: 1,
            reserved_sectors:    1,
            fat_count:           2,
            sectors_per_fat:     1,
            root_entries:        16,
            total_sectors:       400,
            ..Geometry::default()
        };
        let layout = Layout::new(&g, FatType::Fat16, 400 * 512);
        let mut img = vec![0u8; 400 * 512];
        for &(c, v) in links {
            let off = 512 + c as usize * 2;
            img[off..off + 2].copy_from_slice(&v.to_le_bytes());
        }
        (MemImage(img), layout)
    }

    fn entry(img: &mut MemImage, layout: &Layout, copy: u32, c: u32) -> FatEntryValue {
        FatTable::new(img, layout, copy).unwrap().entry(c).unwrap()
    }

    // ── walk ─────────────────────────────────────────────────────────────────

    #[test]
    fn walks_to_end_of_chain() {
        let (mut img, l) = tiny(&[(2, 3), (3, 4), (4, 0xFFFF)]);
        let c = walk(&mut img, &l, 2).unwrap();
        assert_eq!(c.clusters, [2, 3, 4]);
        assert_eq!(c.end, ChainEnd::EndOfChain);
        assert!(!c.is_broken());
    }

    #[test]
    fn cycle_terminates() {
        let (mut img, l) = tiny(&[(5, 3), (3, 5)]);
        let c = walk(&mut img, &l, 3).unwrap();
        assert_eq!(c.clusters, [3, 5]);
        assert_eq!(c.end, ChainEnd::Cycle(3));
        assert!(c.is_broken());
    }

    #[test]
    fn self_loop_terminates() {
        let (mut img, l) = tiny(&[(6, 6)]);
        let c = walk(&mut img, &l, 6).unwrap();
        assert_eq!(c.clusters, [6]);
        assert_eq!(c.end, ChainEnd::Cycle(6));
    }

    #[test]
    fn distinct_break_reasons() {
        let (mut img, l) = tiny(&[(2, 3), (3, 0), (4, 0xFFF7), (5, 0xFFF2), (6, 9000), (7, 1)]);
        assert_eq!(walk(&mut img, &l, 2).unwrap().end, ChainEnd::Free);
        assert_eq!(walk(&mut img, &l, 4).unwrap().end, ChainEnd::Bad);
        assert_eq!(walk(&mut img, &l, 5).unwrap().end, ChainEnd::Reserved);
        assert_eq!(walk(&mut img, &l, 6).unwrap().end, ChainEnd::OutOfRange(9000));
        assert_eq!(walk(&mut img, &l, 7).unwrap().end, ChainEnd::Reserved);
    }

    #[test]
    fn out_of_range_start() {
        let (mut img, l) = tiny(&[]);
        let c = walk(&mut img, &l, 1).unwrap();
        assert!(c.clusters.is_empty());
        assert_eq!(c.end, ChainEnd::OutOfRange(1));
    }

    #[test]
    fn chain_start_is_found() {
        let (mut img, l) = tiny(&[(2, 9), (9, 4), (4, 0xFFFF), (5, 0xFFFF)]);
        assert_eq!(find_chain_start(&mut img, &l, 4).unwrap(), 2);
        assert_eq!(find_chain_start(&mut img, &l, 2).unwrap(), 2);
        assert_eq!(find_chain_start(&mut img, &l, 5).unwrap(), 5);
    }

    #[test]
    fn chain_start_survives_loops() {
        let (mut img, l) = tiny(&[(5, 3), (3, 5)]);
        let s = find_chain_start(&mut img, &l, 3).unwrap();
        assert!(s == 3 || s == 5);
    }

    #[test]
    fn chain_start_with_fat_shorter_than_data_area() {
        let (mut img, l) = short_fat(&[(2, 3), (3, 0xFFFF)]);
        assert_eq!(l.max_cluster(), 397);
        assert_eq!(walk(&mut img, &l, 2).unwrap().end, ChainEnd::EndOfChain);
        assert_eq!(find_chain_start(&mut img, &l, 3).unwrap(), 2);
        assert_eq!(find_chain_start(&mut img, &l, 300).unwrap(), 300);
    }

    // ── FAT12 sector boundary ────────────────────────────────────────────────

    #[test]
    fn fat12_entry_across_cached_sectors() {
        let (mut img, l) = tiny_fat12(&[(340, 341), (341, 342), (342, 0xFFF)]);
        assert_eq!(fat_entry::entry_location(341, FatType::Fat12), (511, 2));
        assert_eq!(entry(&mut img, &l, 0, 341), FatEntryValue::Used(342));
        let c = walk(&mut img, &l, 340).unwrap();
        assert_eq!(c.clusters, [340, 341, 342]);
        assert_eq!(c.end, ChainEnd::EndOfChain);
        assert_eq!(find_chain_start(&mut img, &l, 342).unwrap(), 340);
    }

    #[test]
    fn fat12_commit_across_sectors_keeps_neighbours() {
        let (mut img, l) = tiny_fat12(&[(340, 341), (341, 342), (342, 0xFFF)]);
        let written = commit(&mut img, &l, &ClusterChain::from_clusters(vec![341])).unwrap();
        assert_eq!(written, [512 + 511, 1536 + 511]);
        for copy in 0..2 {
            assert_eq!(entry(&mut img, &l, copy, 340), FatEntryValue::Used(341));
            assert_eq!(entry(&mut img, &l, copy, 341), FatEntryValue::EndOfChain);
            assert_eq!(entry(&mut img, &l, copy, 342), FatEntryValue::EndOfChain);
        }
        assert_eq!(walk(&mut img, &l, 340).unwrap().clusters, [340, 341]);
    }

    // ── editing ──────────────────────────────────────────────────────────────

    #[test]
    fn edits_stay_in_memory() {
        let (mut img, l) = tiny(&[(2, 3), (3, 0xFFFF)]);
        let before = img.clone();
        let mut c = walk(&mut img, &l, 2).unwrap();
        c.append_cluster(8);
        c.insert_at(1, 7).unwrap();
        assert_eq!(c.clusters, [2, 7, 3, 8]);
        assert_eq!(c.remove_at(0).unwrap(), 2);
        assert_eq!(c.start, 7);
        assert_eq!(c.mark_eof(1).unwrap(), [8]);
        assert_eq!(c.clusters, [7, 3]);
        c.reorder(&[3, 7]).unwrap();
        assert_eq!(c.clusters, [3, 7]);
        assert_eq!(img, before);
    }

    #[test]
    fn bad_positions_are_rejected() {
        let mut c = ClusterChain::from_clusters(vec![2, 3]);
        assert!(matches!(c.insert_at(3, 9), Err(FatError::InvalidInput(_))));
        assert!(matches!(c.remove_at(2), Err(FatError::InvalidInput(_))));
        assert!(matches!(c.mark_eof(2), Err(FatError::InvalidInput(_))));
        assert!(matches!(c.reorder(&[2, 4]), Err(FatError::InvalidInput(_))));
        assert!(matches!(c.reorder(&[2]), Err(FatError::InvalidInput(_))));
        assert_eq!(c.clusters, [2, 3]);
    }

    // ── commit ───────────────────────────────────────────────────────────────

    #[test]
    fn commit_writes_every_copy() {
        let (mut img, l) = tiny(&[(2, 3), (3, 0xFFFF)]);
        let mut c = walk(&mut img, &l, 2).unwrap();
        c.append_cluster(10);
        let written = commit(&mut img, &l, &c).unwrap();
        assert_eq!(written.len(), 6);
        assert!(written[..3].iter().all(|&o| o < 1024));
        assert!(written[3..].iter().all(|&o| o >= 1024));
        for copy in 0..2 {
            assert_eq!(entry(&mut img, &l, copy, 3), FatEntryValue::Used(10));
            assert_eq!(entry(&mut img, &l, copy, 10), FatEntryValue::EndOfChain);
        }
        assert_eq!(walk(&mut img, &l, 2).unwrap().clusters, [2, 3, 10]);
    }

    #[test]
    fn commit_repairs_a_cycle() {
        let (mut img, l) = tiny(&[(5, 3), (3, 5)]);
        let mut c = walk(&mut img, &l, 3).unwrap();
        c.mark_eof(1).unwrap();
        commit(&mut img, &l, &c).unwrap();
        let c = walk(&mut img, &l, 3).unwrap();
        assert_eq!(c.clusters, [3, 5]);
        assert_eq!(c.end, ChainEnd::EndOfChain);
    }

    #[test]
    fn invalid_chain_writes_nothing() {
        let (mut img, l) = tiny(&[]);
        let before = img.clone();
        let dup = ClusterChain::from_clusters(vec![2, 3, 2]);
        assert!(matches!(commit(&mut img, &l, &dup), Err(FatError::InvalidInput(_))));
        let oob = ClusterChain::from_clusters(vec![2, 500]);
        assert!(matches!(commit(&mut img, &l, &oob), Err(FatError::InvalidClusterNumber { cluster: 500, .. })));
        let empty = ClusterChain::from_clusters(vec![]);
        assert!(matches!(commit(&mut img, &l, &empty), Err(FatError::InvalidInput(_))));
        assert_eq!(img, before);
    }

    /// Fails every write at or past `limit`.
    struct FailAfter {
        inner: MemImage,
        limit: u64,
    }

    impl ByteSource for FailAfter {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool { self.inner.read_at(offset, buf) }
        fn write_at(&mut self, offset: u64, data: &[u8]) -> bool {
            offset < self.limit && self.inner.write_at(offset, data)
        }
        fn size(&self) -> u64 { self.inner.size() }
    }

    #[test]
    fn failed_second_copy_reports_first() {
        let (img, l) = tiny(&[]);
        let mut src = FailAfter { inner: img, limit: 1024 };
        let c = ClusterChain::from_clusters(vec![2, 3]);
        let err = commit(&mut src, &l, &c).unwrap_err();
        assert_eq!(err, FatError::WriteError { offset: 1024 + 4, written: vec![512 + 4, 512 + 6] });
        assert_eq!(entry(&mut src.inner, &l, 0, 2), FatEntryValue::Used(3));
        assert_eq!(entry(&mut src.inner, &l, 1, 2), FatEntryValue::Free);
    }
}
