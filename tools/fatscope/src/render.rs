//! Plain-text rendering of engine values.

use std::collections::BTreeSet;
use std::fmt::Write;

use fat_engine::layout::Region;
use fat_engine::partition::MbrEntry;
use fat_engine::{ClusterChain, DirectoryEntry};

/// Classic hex dump: offset, 16 bytes split 8 + 8, then the printable column.
pub fn hex_dump(bytes: &[u8], base: u64) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 16);
    for (i, line) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08X}  ", base + i as u64 * 16);
        for col in 0..16 {
            match line.get(col) {
                Some(b) => { let _ = write!(out, "{b:02X} "); }
                None => out.push_str("   "),
            }
            if col == 7 { out.push(' '); }
        }
        out.push_str(" |");
        out.extend(line.iter().map(|&b| if (32..127).contains(&b) { b as char } else { '.' }));
        out.push_str("|\n");
    }
    out
}

pub fn region_name(region: Region) -> String {
    match region {
        Region::BootSector    => "boot sector".into(),
        Region::Reserved      => "reserved".into(),
        Region::Fat(copy)     => format!("FAT #{}", copy + 1),
        Region::RootDirectory => "root directory".into(),
        Region::Data          => "data".into(),
        Region::BeyondVolume  => "beyond volume".into(),
    }
}

pub fn chain_line(chain: &ClusterChain) -> String {
    let mut out = chain.clusters.iter().map(u32::to_string).collect::<Vec<_>>().join(" -> ");
    if out.is_empty() {
        out.push_str("(no clusters)");
    }
    let _ = write!(out, "  [{}{}]", chain.end, if chain.is_broken() { ", BROKEN" } else { "" });
    out
}

pub fn dir_entry_line(e: &DirectoryEntry) -> String {
    let modified = e.modified.map_or_else(|| "-".repeat(19), |t| t.to_string());
    format!(
        "{:<12} {} {:>10} {:>8}  {}{}",
        e.short_name(),
        e.attr_string(),
        e.size,
        e.start_cluster,
        modified,
        match (e.deleted, e.is_long_name(), e.is_exotic()) {
            (true, _, _) => "  (deleted)",
            (_, true, _) => "  (long name)",
            (_, _, true) => "  (exotic)",
            _ => "",
        }
    )
}

pub fn partition_line(e: &MbrEntry) -> String {
    let kind = e.partition_type().map_or_else(|| "unknown".to_string(), |t| format!("{t:?}"));
    format!(
        "#{} {} type {:#04X} {:<10} LBA {:>10} sectors {:>10} ({} bytes)",
        e.index,
        if e.is_bootable() { "*" } else { " " },
        e.type_byte,
        kind,
        e.lba_start,
        e.sector_count,
        e.byte_length(),
    )
}

/// `"5, 7-9, 12"` for the set {5, 7, 8, 9, 12}.
pub fn sector_ranges(sectors: &BTreeSet<u64>) -> String {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &s in sectors {
        if let Some((_, end)) = runs.last_mut() {
            if *end + 1 == s {
                *end = s;
                continue;
            }
        }
        runs.push((s, s));
    }
    runs.iter()
        .map(|&(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
        .collect::<Vec<_>>()
        .join(", ")
}
