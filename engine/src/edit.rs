//! Staged byte edits over a sector or cluster view.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::source::ByteSource;
use crate::{FatError, Result};

/// Sparse byte overrides on top of a snapshot of one region of the image.
/// Nothing reaches the image until [`EditBuffer::commit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditBuffer {
    base:      u64,
    original:  Vec<u8>,
    overrides: BTreeMap<u64, u8>,
}

impl EditBuffer {
    /// `original` is the region's current content, starting at absolute offset `base`.
    pub fn new(base: u64, original: Vec<u8>) -> Self {
        Self { base, original, overrides: BTreeMap::new() }
    }

    pub fn base(&self) -> u64         { self.base }
    pub fn len(&self) -> usize        { self.original.len() }
    pub fn is_empty(&self) -> bool    { self.original.is_empty() }
    pub fn original(&self) -> &[u8]   { &self.original }
    pub fn is_dirty(&self) -> bool    { !self.overrides.is_empty() }
    pub fn staged_count(&self) -> usize { self.overrides.len() }

    fn index(&self, offset: u64) -> Result<usize> {
        match offset.checked_sub(self.base) {
            Some(i) if i < self.original.len() as u64 => Ok(i as usize),
            _ => Err(FatError::InvalidInput("edit offset outside the viewed region")),
        }
    }

    /// Stage `value` at absolute `offset`. Staging the original byte drops
    /// the override.
    pub fn stage(&mut self, offset: u64, value: u8) -> Result<()> {
        let i = self.index(offset)?;
        if self.original[i] == value {
            self.overrides.remove(&offset);
        } else {
            self.overrides.insert(offset, value);
        }
        Ok(())
    }

    /// Stage a byte typed as one or two hex digits.
    pub fn stage_hex(&mut self, offset: u64, text: &str) -> Result<()> {
        let t = text.trim();
        if t.is_empty() || t.len() > 2 || !t.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FatError::InvalidInput("edit value must be one or two hex digits"));
        }
        let value = u8::from_str_radix(t, 16).map_err(|_| FatError::InvalidInput("bad hex byte"))?;
        self.stage(offset, value)
    }

    pub fn discard(&mut self, offset: u64) { self.overrides.remove(&offset); }
    pub fn discard_all(&mut self)          { self.overrides.clear(); }

    pub fn is_modified(&self, offset: u64) -> bool { self.overrides.contains_key(&offset) }

    pub fn value_at(&self, offset: u64) -> Option<u8> {
        let i = self.index(offset).ok()?;
        Some(self.overrides.get(&offset).copied().unwrap_or(self.original[i]))
    }

    /// `(offset, old, new)` for each staged byte, ascending.
    pub fn pending(&self) -> impl Iterator<Item = (u64, u8, u8)> + '_ {
        self.overrides.iter().map(|(&off, &new)| (off, self.original[(off - self.base) as usize], new))
    }

    /// The region as it will read after commit.
    pub fn apply(&self) -> Vec<u8> {
        let mut out = self.original.clone();
        for (&off, &v) in &self.overrides {
            out[(off - self.base) as usize] = v;
        }
        out
    }

    /// Contiguous staged runs as `(offset, bytes)`, ascending.
    fn runs(&self) -> Vec<(u64, Vec<u8>)> {
        let mut runs: Vec<(u64, Vec<u8>)> = Vec::new();
        for (&off, &v) in &self.overrides {
            if let Some((start, bytes)) = runs.last_mut() {
                if *start + bytes.len() as u64 == off {
                    bytes.push(v);
                    continue;
                }
            }
            runs.push((off, alloc::vec![v]));
        }
        runs
    }

    /// Write every staged byte, one write per contiguous run, in ascending
    /// order. Returns the offsets written. On failure the error lists the
    /// offsets already written; those are folded into the snapshot and the
    /// rest stay staged.
    pub fn commit<S: ByteSource + ?Sized>(&mut self, src: &mut S) -> Result<Vec<u64>> {
        let mut written = Vec::with_capacity(self.overrides.len());
        for (offset, bytes) in self.runs() {
            if !src.write_at(offset, &bytes) {
                log::warn!("edit::commit: write of {} byte(s) at {offset:#X} failed", bytes.len());
                return Err(FatError::WriteError { offset, written });
            }
            log::debug!("edit::commit: {} byte(s) at {offset:#X}", bytes.len());
            for (k, &b) in bytes.iter().enumerate() {
                let off = offset + k as u64;
                self.original[(off - self.base) as usize] = b;
                self.overrides.remove(&off);
                written.push(off);
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use super::*;
    use crate::MemImage;

    fn buffer() -> EditBuffer {
        EditBuffer::new(100, vec![0x10, 0x11, 0x12, 0x13, 0x14, 0x15])
    }

    // ── staging ──────────────────────────────────────────────────────────────

    #[test]
    fn stage_and_apply() {
        let mut b = buffer();
        b.stage(101, 0xAA).unwrap();
        b.stage_hex(104, "bb").unwrap();
        assert_eq!(b.apply(), [0x10, 0xAA, 0x12, 0x13, 0xBB, 0x15]);
        assert_eq!(b.original()[1], 0x11);
        assert_eq!(b.value_at(101), Some(0xAA));
        assert_eq!(b.pending().collect::<Vec<_>>(), [(101, 0x11, 0xAA), (104, 0x14, 0xBB)]);
    }

    #[test]
    fn restoring_original_drops_override() {
        let mut b = buffer();
        b.stage(102, 0x00).unwrap();
        assert!(b.is_dirty());
        b.stage_hex(102, "12").unwrap();
        assert!(!b.is_dirty());
    }

    #[test]
    fn out_of_region_rejected() {
        let mut b = buffer();
        assert!(matches!(b.stage(99, 1), Err(FatError::InvalidInput(_))));
        assert!(matches!(b.stage(106, 1), Err(FatError::InvalidInput(_))));
        assert_eq!(b.value_at(106), None);
    }

    #[test]
    fn non_hex_never_staged() {
        let mut b = buffer();
        for bad in ["", "g0", "123", "-1", "+f"] {
            assert!(matches!(b.stage_hex(100, bad), Err(FatError::InvalidInput(_))), "{bad:?}");
        }
        assert!(!b.is_dirty());
        b.stage_hex(100, "f").unwrap();
        assert_eq!(b.value_at(100), Some(0x0F));
    }

    // ── commit ───────────────────────────────────────────────────────────────

    #[test]
    fn commit_coalesces_runs() {
        struct Recorder { img: MemImage, writes: Vec<(u64, usize)> }
        impl ByteSource for Recorder {
            fn read_at(&mut self, o: u64, b: &mut [u8]) -> bool { self.img.read_at(o, b) }
            fn write_at(&mut self, o: u64, d: &[u8]) -> bool {
                self.writes.push((o, d.len()));
                self.img.write_at(o, d)
            }
            fn size(&self) -> u64 { self.img.size() }
        }

        let mut src = Recorder { img: MemImage(vec![0; 200]), writes: Vec::new() };
        let mut b = buffer();
        for off in [105, 101, 102, 103] {
            b.stage(off, 0xEE).unwrap();
        }
        let written = b.commit(&mut src).unwrap();
        assert_eq!(written, [101, 102, 103, 105]);
        assert_eq!(src.writes, [(101, 3), (105, 1)]);
        assert_eq!(src.img.0[100..106], [0, 0xEE, 0xEE, 0xEE, 0, 0xEE]);
        assert!(!b.is_dirty());
        assert_eq!(b.original()[1], 0xEE);
    }

    #[test]
    fn failed_run_reports_earlier_offsets() {
        // The image ends at 104, so the run at 105 cannot be written.
        let mut img = MemImage(vec![0; 104]);
        let mut b = buffer();
        b.stage(101, 1).unwrap();
        b.stage(102, 2).unwrap();
        b.stage(105, 5).unwrap();
        let err = b.commit(&mut img).unwrap_err();
        assert_eq!(err, FatError::WriteError { offset: 105, written: vec![101, 102] });
        assert!(b.is_dirty());
        assert_eq!(b.staged_count(), 1);
        assert_eq!(img.0[101..103], [1, 2]);
    }
}
