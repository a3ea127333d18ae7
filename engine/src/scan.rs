//! Sequential scans over the image: empty-sector detection and text search.
//!
//! Both read forward in chunks of `ScanConfig::chunk_sectors` and can be
//! stopped between chunks, never mid-read. Unreadable stretches are recorded
//! and skipped; what was read before and after them is kept.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::{ControlFlow, Range};

use crate::directory;
use crate::fat_type::FatType;
use crate::layout::Layout;
use crate::source::ByteSource;
use crate::{FatError, Result};

/// Bytes of surrounding text kept on each side of a match.
const CONTEXT: usize = 20;

// ─── Configuration ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Most sectors one empty-sector scan examines; callers page past it.
    pub max_sectors:      u64,
    /// Sectors read per I/O call.
    pub chunk_sectors:    u32,
    /// Text search stops after this many matches.
    pub max_text_matches: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { max_sectors: 10_000, chunk_sectors: 64, max_text_matches: 100 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    pub done:  u64,
    pub total: u64,
}

// ─── Empty sectors ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmptyScan {
    /// Volume sector numbers whose bytes are all zero.
    pub empty:       BTreeSet<u64>,
    /// Sectors the source could not supply, e.g. past the end of a truncated image.
    pub unreadable:  BTreeSet<u64>,
    /// Sectors visited, readable or not.
    pub scanned:     u64,
    /// Where to resume if the requested range was not covered, by the cap or
    /// by cancellation.
    pub next_sector: Option<u64>,
    pub cancelled:   bool,
}

/// Classify every sector in `range` (volume sector numbers, clipped to the
/// volume) as empty or not. `on_chunk` runs after each chunk and may break to
/// cancel.
pub fn scan_empty_sectors<S, F>(
    src: &mut S,
    layout: &Layout,
    range: Range<u64>,
    config: &ScanConfig,
    mut on_chunk: F,
) -> Result<EmptyScan>
where
    S: ByteSource + ?Sized,
    F: FnMut(ScanProgress) -> ControlFlow<()>,
{
    let requested_end = range.end.min(layout.total_sectors as u64);
    let start = range.start.min(requested_end);
    let end = requested_end.min(start.saturating_add(config.max_sectors));
    let bps = layout.bytes_per_sector as usize;
    let chunk = config.chunk_sectors.max(1) as u64;

    let mut out = EmptyScan::default();
    let mut buf = vec![0u8; chunk as usize * bps];
    let mut sector = start;

    while sector < end {
        let n = chunk.min(end - sector);
        let bytes = &mut buf[..n as usize * bps];
        if src.read_at(layout.sector_offset(sector), bytes) {
            for (i, data) in bytes.chunks_exact(bps).enumerate() {
                if is_zero(data) {
                    out.empty.insert(sector + i as u64);
                }
            }
        } else {
            // Retry one sector at a time so only the bad sectors are lost.
            let one = &mut buf[..bps];
            for s in sector..sector + n {
                if !src.read_at(layout.sector_offset(s), one) {
                    out.unreadable.insert(s);
                } else if is_zero(one) {
                    out.empty.insert(s);
                }
            }
            log::warn!("scan::empty_sectors: chunk at sector {sector} failed, {} sector(s) unreadable so far", out.unreadable.len());
        }
        sector += n;
        out.scanned += n;

        let progress = ScanProgress { done: sector - start, total: end - start };
        if sector < end && on_chunk(progress).is_break() {
            log::warn!("scan::empty_sectors: cancelled at sector {sector}");
            out.cancelled = true;
            break;
        }
    }

    if sector < requested_end {
        out.next_sector = Some(sector);
        log::debug!("scan::empty_sectors: stopped at {sector}, {} sectors left", requested_end - sector);
    }
    log::debug!("scan::empty_sectors: {} of {} sectors empty", out.empty.len(), out.scanned);
    Ok(out)
}

fn is_zero(data: &[u8]) -> bool { data.iter().all(|&b| b == 0) }

// ─── Text search ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchRegion {
    RootDirectory,
    Data,
    /// Root directory first, then the data area.
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub region:         SearchRegion,
}

impl Default for SearchOptions {
    fn default() -> Self { Self { case_sensitive: true, region: SearchRegion::All } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchLocation {
    /// `position` counts from the start of the root directory.
    RootDirectory { position: u64 },
    Cluster { cluster: u32, position: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMatch {
    /// Absolute image offset of the first matched byte.
    pub offset:   u64,
    /// The bytes as stored, original case.
    pub bytes:    Vec<u8>,
    pub location: MatchLocation,
    /// Printable rendering of the bytes around the match; other bytes show as `.`.
    pub context:  String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExtentKind { Root, Data }

#[derive(Clone, Copy, Debug)]
struct Extent {
    base: u64,
    len:  u64,
    kind: ExtentKind,
    /// Root-relative position of `base`.
    root_pos: u64,
}

/// Lazy, offset-ordered match sequence. Dropping it cancels the search.
pub struct TextSearch<'a, S: ByteSource + ?Sized> {
    src:      &'a mut S,
    layout:   Layout,
    needle:   Vec<u8>,
    fold:     bool,
    extents:  Vec<Extent>,
    extent:   usize,
    pos:      u64,
    chunk:    u64,
    buf:      Vec<u8>,
    pending:  VecDeque<TextMatch>,
    emitted:  usize,
    limit:    usize,
    done:     bool,
    progress: ScanProgress,
    skipped:  Vec<Range<u64>>,
}

impl<'a, S: ByteSource + ?Sized> TextSearch<'a, S> {
    pub fn new(
        src: &'a mut S,
        layout: &Layout,
        root_cluster: u32,
        needle: &[u8],
        options: SearchOptions,
        config: &ScanConfig,
    ) -> Result<Self> {
        if needle.is_empty() {
            return Err(FatError::InvalidInput("empty search text"));
        }
        let fold = !options.case_sensitive;
        let needle = if fold { needle.to_ascii_lowercase() } else { needle.to_vec() };

        // A FAT32 root lives in data clusters, so a full search covers it once
        // through the data area and keeps offsets ascending.
        let root_in_data = layout.fat_type == FatType::Fat32;
        let mut extents = Vec::new();
        let search_root = match options.region {
            SearchRegion::RootDirectory => true,
            SearchRegion::All => !root_in_data,
            SearchRegion::Data => false,
        };
        if search_root {
            let mut root_pos = 0;
            for (base, len) in directory::root_extents(src, layout, root_cluster)? {
                extents.push(Extent { base, len, kind: ExtentKind::Root, root_pos });
                root_pos += len;
            }
        }
        if matches!(options.region, SearchRegion::Data | SearchRegion::All) {
            extents.push(Extent { base: layout.data_offset(), len: layout.data_len(), kind: ExtentKind::Data, root_pos: 0 });
        }

        // Clip to what the source holds; a truncated image loses only its tail.
        let size = src.size();
        let mut skipped = Vec::new();
        for ext in &mut extents {
            let avail = size.saturating_sub(ext.base);
            if ext.len > avail {
                log::warn!("scan::search_text: {} bytes at {:#X} lie past the end of the image", ext.len - avail, ext.base + avail);
                skipped.push(ext.base + avail..ext.base + ext.len);
                ext.len = avail;
            }
        }
        extents.retain(|e| e.len > 0);

        let total: u64 = extents.iter().map(|e| e.len).sum();
        let chunk = config.chunk_sectors.max(1) as u64 * layout.bytes_per_sector as u64;
        log::debug!("scan::search_text: {} byte needle over {total} bytes", needle.len());
        Ok(Self {
            src,
            layout: *layout,
            needle,
            fold,
            extents,
            extent: 0,
            pos: 0,
            chunk,
            buf: Vec::new(),
            pending: VecDeque::new(),
            emitted: 0,
            limit: config.max_text_matches,
            done: false,
            progress: ScanProgress { done: 0, total },
            skipped,
        })
    }

    pub fn progress(&self) -> ScanProgress { self.progress }

    /// Absolute byte ranges that could not be read and were not searched.
    pub fn skipped(&self) -> &[Range<u64>] { &self.skipped }

    /// Scan the next chunk, queueing its matches.
    fn fill(&mut self) {
        let Some(&ext) = self.extents.get(self.extent) else {
            self.done = true;
            return;
        };
        if self.pos >= ext.len {
            self.extent += 1;
            self.pos = 0;
            return;
        }

        // The window holds CONTEXT bytes before the chunk and runs past it by
        // needle.len() - 1 + CONTEXT, so matches straddling the boundary are
        // seen with full context. Only starts inside the chunk are reported.
        let n = self.needle.len();
        let owned = self.chunk.min(ext.len - self.pos);
        let mut lead = self.pos.min(CONTEXT as u64);
        let trail = (owned + (n - 1 + CONTEXT) as u64).min(ext.len - self.pos);
        let start = ext.base + self.pos;
        self.buf.resize((lead + trail) as usize, 0);

        // On failure fall back to the chunk alone; its edges lose context and
        // straddling matches.
        let readable = self.src.read_at(start - lead, &mut self.buf) || {
            lead = 0;
            self.buf.resize(owned as usize, 0);
            self.src.read_at(start, &mut self.buf)
        };
        if readable {
            self.scan_window(ext, start, lead as usize, owned as usize);
        } else {
            log::warn!("scan::search_text: {owned} bytes at {start:#X} unreadable, skipped");
            self.skipped.push(start..start + owned);
        }

        self.pos += owned;
        self.progress.done += owned;
    }

    /// Queue matches starting in `buf[lead..lead + owned]`; `start` is the
    /// absolute offset of `buf[lead]`.
    fn scan_window(&mut self, ext: Extent, start: u64, lead: usize, owned: usize) {
        let n = self.needle.len();
        if self.buf.len() < lead + n {
            return;
        }
        let fold = self.fold;
        for s in lead..=(self.buf.len() - n).min(lead + owned - 1) {
            let hit = self.buf[s..s + n].iter().zip(&self.needle).all(|(&a, &b)| {
                if fold { a.to_ascii_lowercase() == b } else { a == b }
            });
            if !hit { continue; }
            let rel = (s - lead) as u64;
            let offset = start + rel;
            let location = match ext.kind {
                ExtentKind::Root => MatchLocation::RootDirectory { position: ext.root_pos + self.pos + rel },
                ExtentKind::Data => match self.layout.cluster_of_offset(offset) {
                    Some((cluster, position)) => MatchLocation::Cluster { cluster, position },
                    None => continue,
                },
            };
            let lo = s.saturating_sub(CONTEXT);
            let hi = (s + n + CONTEXT).min(self.buf.len());
            self.pending.push_back(TextMatch {
                offset,
                bytes: self.buf[s..s + n].to_vec(),
                location,
                context: printable(&self.buf[lo..hi]),
            });
        }
    }
}

impl<S: ByteSource + ?Sized> Iterator for TextSearch<'_, S> {
    type Item = TextMatch;

    fn next(&mut self) -> Option<TextMatch> {
        loop {
            if self.emitted >= self.limit {
                return None;
            }
            if let Some(m) = self.pending.pop_front() {
                self.emitted += 1;
                return Some(m);
            }
            if self.done {
                return None;
            }
            self.fill();
        }
    }
}

fn printable(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| if (32..127).contains(&b) { b as char } else { '.' }).collect()
}
