//! FAT entry codec.
//!
//! One set of functions parameterised by [`FatType`] handles the three
//! encodings. FAT12 entries are 12 bits packed two per three bytes, so entry
//! `i` straddles bytes `i*3/2` and `i*3/2 + 1`: even entries take the low 12
//! bits of that little-endian word, odd entries the high 12.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::fat_type::FatType;
use crate::layout::Layout;
use crate::source::{read_exact, ByteSource};
use crate::{FatError, Result};

/// Byte offset of entry `cluster` inside a FAT, and how many bytes it touches.
pub fn entry_location(cluster: u32, ty: FatType) -> (u64, u64) {
    let n = cluster as u64;
    match ty {
        FatType::Fat12 => (n * 3 / 2, 2),
        FatType::Fat16 => (n * 2, 2),
        FatType::Fat32 => (n * 4, 4),
    }
}

/// Decode the raw value from the bytes returned by [`entry_location`].
pub fn decode_window(window: &[u8], cluster: u32, ty: FatType) -> u32 {
    match ty {
        FatType::Fat12 => {
            let word = u16::from_le_bytes([window[0], window[1]]);
            let v = if cluster & 1 == 0 { word & 0x0FFF } else { word >> 4 };
            v as u32
        }
        FatType::Fat16 => u16::from_le_bytes([window[0], window[1]]) as u32,
        FatType::Fat32 => {
            u32::from_le_bytes([window[0], window[1], window[2], window[3]]) & ty.mask()
        }
    }
}

/// Store `value` into the entry's window, keeping the bits that belong to the
/// neighbouring FAT12 entry or to the FAT32 reserved nibble.
pub fn encode_window(window: &mut [u8], cluster: u32, value: u32, ty: FatType) {
    match ty {
        FatType::Fat12 => {
            let word = u16::from_le_bytes([window[0], window[1]]);
            let v = (value & 0x0FFF) as u16;
            let word = if cluster & 1 == 0 { (word & 0xF000) | v } else { (word & 0x000F) | (v << 4) };
            window[..2].copy_from_slice(&word.to_le_bytes());
        }
        FatType::Fat16 => window[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        FatType::Fat32 => {
            let old = u32::from_le_bytes([window[0], window[1], window[2], window[3]]);
            let new = (old & 0xF000_0000) | (value & ty.mask());
            window[..4].copy_from_slice(&new.to_le_bytes());
        }
    }
}

fn span(fat_len: usize, cluster: u32, ty: FatType) -> Option<core::ops::Range<usize>> {
    let (off, width) = entry_location(cluster, ty);
    let end = off.checked_add(width)?;
    if end > fat_len as u64 { return None; }
    Some(off as usize..end as usize)
}

/// Raw value of entry `cluster` in an in-memory FAT. `None` past the end.
pub fn read(fat: &[u8], cluster: u32, ty: FatType) -> Option<u32> {
    let range = span(fat.len(), cluster, ty)?;
    Some(decode_window(&fat[range], cluster, ty))
}

/// Overwrite entry `cluster` in an in-memory FAT.
pub fn write(fat: &mut [u8], cluster: u32, value: u32, ty: FatType) -> Result<()> {
    let Some(range) = span(fat.len(), cluster, ty) else {
        let entries = (fat.len() as u64 * 8 / ty.bits() as u64) as u32;
        return Err(FatError::InvalidClusterNumber { cluster, max: entries.saturating_sub(1) });
    };
    encode_window(&mut fat[range], cluster, value, ty);
    Ok(())
}

// ─── Semantic view ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatEntryValue {
    Free,
    Used(u32),
    Reserved,
    Bad,
    EndOfChain,
}

impl FatEntryValue {
    pub fn decode(raw: u32, ty: FatType) -> Self {
        let raw = raw & ty.mask();
        match raw {
            0 => FatEntryValue::Free,
            1 => FatEntryValue::Reserved,
            v if v >= ty.eoc_min() => FatEntryValue::EndOfChain,
            v if v == ty.bad() => FatEntryValue::Bad,
            v if ty.reserved_range().contains(&v) => FatEntryValue::Reserved,
            v => FatEntryValue::Used(v),
        }
    }

    pub fn next(self) -> Option<u32> {
        match self {
            FatEntryValue::Used(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for FatEntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatEntryValue::Free       => f.write_str("free"),
            FatEntryValue::Used(n)    => write!(f, "next {n}"),
            FatEntryValue::Reserved   => f.write_str("reserved"),
            FatEntryValue::Bad        => f.write_str("bad cluster"),
            FatEntryValue::EndOfChain => f.write_str("end of chain"),
        }
    }
}

// ─── On-image FAT view ─────────────────────────────────────────────────────────

/// Read-only view of one FAT copy on the image, caching one sector at a time.
/// Chain walks touch neighbouring entries, so the cache absorbs most reads.
pub struct FatTable<'a, S: ByteSource + ?Sized> {
    src:          &'a mut S,
    layout:       Layout,
    base:         u64,
    cache_sector: u64,
    cache:        Vec<u8>,
}

impl<'a, S: ByteSource + ?Sized> FatTable<'a, S> {
    pub fn new(src: &'a mut S, layout: &Layout, copy: u32) -> Result<Self> {
        let base = layout.fat_offset(copy)?;
        Ok(Self {
            src,
            layout: *layout,
            base,
            cache_sector: u64::MAX,
            cache: vec![0u8; layout.bytes_per_sector as usize],
        })
    }

    fn byte_at(&mut self, pos: u64) -> Result<u8> {
        let bps = self.layout.bytes_per_sector as u64;
        let sector = pos / bps;
        if sector != self.cache_sector {
            read_exact(&mut *self.src, self.base + sector * bps, &mut self.cache)?;
            self.cache_sector = sector;
        }
        Ok(self.cache[(pos % bps) as usize])
    }

    /// Raw value of `cluster`'s entry. Fails for clusters whose entry lies past
    /// the end of the FAT.
    pub fn raw(&mut self, cluster: u32) -> Result<u32> {
        let ty = self.layout.fat_type;
        let (off, width) = entry_location(cluster, ty);
        if off + width > self.layout.fat_size() {
            return Err(FatError::InvalidClusterNumber { cluster, max: self.layout.max_cluster() });
        }
        let mut window = [0u8; 4];
        for (i, b) in window[..width as usize].iter_mut().enumerate() {
            *b = self.byte_at(off + i as u64)?;
        }
        Ok(decode_window(&window, cluster, ty))
    }

    pub fn entry(&mut self, cluster: u32) -> Result<FatEntryValue> {
        Ok(FatEntryValue::decode(self.raw(cluster)?, self.layout.fat_type))
    }
}

/// Read-modify-write one entry in place on the image. Returns the absolute
/// offset written.
pub(crate) fn write_entry<S: ByteSource + ?Sized>(
    src: &mut S,
    layout: &Layout,
    copy: u32,
    cluster: u32,
    value: u32,
) -> Result<u64> {
    let ty = layout.fat_type;
    let offset = layout.fat_entry_offset(copy, cluster)?;
    let width = entry_location(cluster, ty).1 as usize;
    let mut window = [0u8; 4];
    read_exact(src, offset, &mut window[..width])?;
    encode_window(&mut window, cluster, value, ty);
    if !src.write_at(offset, &window[..width]) {
        return Err(FatError::WriteError { offset, written: Vec::new() });
    }
    Ok(offset)
}
