//! Root directory decoding.
//!
//! Short (8.3) entries only. Long-filename slots are still returned, flagged
//! exotic, so that every 32-byte slot before the end marker is accounted for.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::boot_sector::DIR_ENTRY_SIZE;
use crate::chain;
use crate::fat_type::FatType;
use crate::layout::{Layout, RangeMode};
use crate::source::{read_exact, ByteSource};
use crate::Result;

const END_MARKER:     u8 = 0x00;
const DELETED_MARKER: u8 = 0xE5;
/// Stored in place of a real leading 0xE5 (a valid Kanji lead byte).
const KANJI_E5:       u8 = 0x05;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY    = 0x01;
        const HIDDEN       = 0x02;
        const SYSTEM       = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY    = 0x10;
        const ARCHIVE      = 0x20;
    }
}

const ATTR_LFN: u8 = 0x0F;

// ─── Directory entry (32 bytes) ────────────────────────────────────────────────

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawDirEntry {
    name:       [u8; 8],
    ext:        [u8; 3],
    attr:       u8,
    _nt:        u8,
    crt_tenths: u8,
    crt_time:   u16,
    crt_date:   u16,
    acc_date:   u16,
    cluster_hi: u16,
    mod_time:   u16,
    mod_date:   u16,
    cluster_lo: u16,
    size:       u32,
}

const _: () = assert!(core::mem::size_of::<RawDirEntry>() == DIR_ENTRY_SIZE as usize);

/// A packed DOS date and time, 2-second resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DosDateTime {
    pub year:   u16,
    pub month:  u8,
    pub day:    u8,
    pub hour:   u8,
    pub minute: u8,
    pub second: u8,
}

impl DosDateTime {
    /// `None` for the all-zero date that means "not recorded".
    pub fn decode(date: u16, time: u16) -> Option<Self> {
        if date == 0 { return None; }
        Some(Self {
            year:   1980 + (date >> 9),
            month:  ((date >> 5) & 0x0F) as u8,
            day:    (date & 0x1F) as u8,
            hour:   (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        })
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f, "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Absolute image offset of the 32-byte slot.
    pub offset:        u64,
    /// Raw name bytes, deleted marker included.
    pub name:          [u8; 8],
    pub ext:           [u8; 3],
    pub attr:          u8,
    pub attributes:    Attributes,
    pub deleted:       bool,
    pub start_cluster: u32,
    pub size:          u32,
    pub created:       Option<DosDateTime>,
    pub modified:      Option<DosDateTime>,
    pub accessed:      Option<DosDateTime>,
}

impl DirectoryEntry {
    /// Decode one slot. `None` for the end-of-directory marker.
    pub fn decode(slot: &[u8; 32], fat_type: FatType, offset: u64) -> Option<Self> {
        if slot[0] == END_MARKER { return None; }
        // SAFETY: RawDirEntry is 32 bytes of plain integers, any bit pattern is valid.
        let raw = unsafe { core::ptr::read_unaligned(slot.as_ptr() as *const RawDirEntry) };

        let hi = match fat_type {
            FatType::Fat32 => u16::from_le(raw.cluster_hi) as u32,
            _ => 0,
        };
        let mut created = DosDateTime::decode(u16::from_le(raw.crt_date), u16::from_le(raw.crt_time));
        if let Some(c) = created.as_mut() {
            c.second += raw.crt_tenths / 100;
        }

        Some(Self {
            offset,
            name:          raw.name,
            ext:           raw.ext,
            attr:          raw.attr,
            attributes:    Attributes::from_bits_truncate(raw.attr),
            deleted:       raw.name[0] == DELETED_MARKER,
            start_cluster: (hi << 16) | u16::from_le(raw.cluster_lo) as u32,
            size:          u32::from_le(raw.size),
            created,
            modified:      DosDateTime::decode(u16::from_le(raw.mod_date), u16::from_le(raw.mod_time)),
            accessed:      DosDateTime::decode(u16::from_le(raw.acc_date), 0),
        })
    }

    pub fn is_directory(&self) -> bool    { self.attributes.contains(Attributes::DIRECTORY) }
    pub fn is_volume_label(&self) -> bool { self.attributes.contains(Attributes::VOLUME_LABEL) }
    pub fn is_long_name(&self) -> bool    { self.attr & ATTR_LFN == ATTR_LFN }

    /// Volume labels, long-name slots and undefined attribute bits fall
    /// outside the plain 8.3 file/directory set.
    pub fn is_exotic(&self) -> bool {
        self.is_volume_label() || Attributes::from_bits(self.attr).is_none()
    }

    /// Display name, e.g. `"HELLO   TXT"` → `"HELLO.TXT"`. A deleted entry's
    /// lost first character shows as `?`.
    pub fn short_name(&self) -> String {
        let mut name = self.name;
        match name[0] {
            DELETED_MARKER => name[0] = b'?',
            KANJI_E5 => name[0] = DELETED_MARKER,
            _ => {}
        }
        let mut out = String::with_capacity(12);
        let name_end = name.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        out.extend(name[..name_end].iter().map(|&b| char::from(b)));
        let ext_end = self.ext.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        if ext_end > 0 {
            // Labels are 11 plain characters, not name + extension.
            if !self.is_volume_label() { out.push('.'); }
            out.extend(self.ext[..ext_end].iter().map(|&b| char::from(b)));
        }
        out
    }

    /// Text form of the attribute byte, `RHSVDA` with `-` for clear bits.
    pub fn attr_string(&self) -> String {
        [
            (Attributes::READ_ONLY, 'R'),
            (Attributes::HIDDEN, 'H'),
            (Attributes::SYSTEM, 'S'),
            (Attributes::VOLUME_LABEL, 'V'),
            (Attributes::DIRECTORY, 'D'),
            (Attributes::ARCHIVE, 'A'),
        ]
        .iter()
        .map(|&(flag, c)| if self.attributes.contains(flag) { c } else { '-' })
        .collect()
    }
}

// ─── Root directory iterator ───────────────────────────────────────────────────

/// Byte extents holding the root directory: the fixed region on FAT12/16,
/// the root cluster chain on FAT32.
pub fn root_extents<S: ByteSource + ?Sized>(src: &mut S, layout: &Layout, root_cluster: u32) -> Result<Vec<(u64, u64)>> {
    if layout.fat_type != FatType::Fat32 {
        return Ok(vec![(layout.root_dir_offset(), layout.root_dir_len())]);
    }
    let chain = chain::walk(src, layout, root_cluster)?;
    if chain.is_broken() {
        log::warn!("directory::root_extents: root chain from {root_cluster} is broken ({})", chain.end);
    }
    let size = layout.cluster_size() as u64;
    chain.clusters.iter()
        .map(|&c| Ok((layout.cluster_offset(c, RangeMode::Strict)?, size)))
        .collect()
}

/// Lazy walk over directory slots, one sector read at a time. Ends at the
/// first end marker or when the extents run out. A read failure is yielded
/// once and ends the walk.
pub struct DirEntries<'a, S: ByteSource + ?Sized> {
    src:      &'a mut S,
    fat_type: FatType,
    extents:  Vec<(u64, u64)>,
    extent:   usize,
    pos:      u64,
    sector:   Vec<u8>,
    done:     bool,
}

impl<'a, S: ByteSource + ?Sized> DirEntries<'a, S> {
    pub fn new(src: &'a mut S, layout: &Layout, extents: Vec<(u64, u64)>) -> Self {
        Self {
            src,
            fat_type: layout.fat_type,
            extents,
            extent: 0,
            pos: 0,
            sector: vec![0u8; layout.bytes_per_sector as usize],
            done: false,
        }
    }
}

impl<S: ByteSource + ?Sized> Iterator for DirEntries<'_, S> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(&(base, len)) = self.extents.get(self.extent) else {
                self.done = true;
                break;
            };
            if self.pos + DIR_ENTRY_SIZE as u64 > len {
                self.extent += 1;
                self.pos = 0;
                continue;
            }

            let bps = self.sector.len() as u64;
            let in_sector = (self.pos % bps) as usize;
            if in_sector == 0 {
                if let Err(e) = read_exact(&mut *self.src, base + self.pos, &mut self.sector) {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            let offset = base + self.pos;
            self.pos += DIR_ENTRY_SIZE as u64;

            let mut slot = [0u8; 32];
            slot.copy_from_slice(&self.sector[in_sector..in_sector + 32]);
            match DirectoryEntry::decode(&slot, self.fat_type, offset) {
                Some(entry) => return Some(Ok(entry)),
                None => self.done = true,
            }
        }
        None
    }
}
