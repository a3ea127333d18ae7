//! Demonstration FAT16 image.
//!
//! Three root entries exercise the chain engine: TEST.TXT (2 → 3 → 4),
//! DATA.BIN (5 → 6) and BROKEN.DAT, whose only cluster (7) is marked free.

use alloc::vec;
use alloc::vec::Vec;

use crate::boot_sector::Geometry;
use crate::fat_type::{self, FatType};
use crate::{FatError, Result};

pub const SAMPLE_BYTES_PER_SECTOR:    u16 = 512;
pub const SAMPLE_SECTORS_PER_CLUSTER: u8  = 4;
pub const SAMPLE_RESERVED_SECTORS:    u16 = 4;
pub const SAMPLE_ROOT_ENTRIES:        u16 = 512;
pub const SAMPLE_VOLUME_ID:           u32 = 0x1234_5678;

/// Files placed in the sample root directory: name, first cluster, size.
pub const SAMPLE_FILES: [(&[u8; 11], u16, u32); 3] = [
    (b"TEST    TXT", 2, 1024),
    (b"DATA    BIN", 5, 2048),
    (b"BROKEN  DAT", 7, 512),
];

/// Geometry of a sample image of `size_mb` MiB.
pub fn sample_geometry(size_mb: u32) -> Geometry {
    let total_sectors = size_mb.saturating_mul(1024 * 1024 / SAMPLE_BYTES_PER_SECTOR as u32);
    Geometry {
        oem_name:            *b"TESTFAT ",
        bytes_per_sector:    SAMPLE_BYTES_PER_SECTOR,
        sectors_per_cluster: SAMPLE_SECTORS_PER_CLUSTER,
        reserved_sectors:    SAMPLE_RESERVED_SECTORS,
        fat_count:           2,
        root_entries:        SAMPLE_ROOT_ENTRIES,
        total_sectors,
        media:               0xF8,
        sectors_per_fat:     (total_sectors / 100).max(246),
        volume_id:           SAMPLE_VOLUME_ID,
        volume_label:        *b"TEST IMAGE ",
        fs_type_label:       *b"FAT16   ",
        ..Geometry::default()
    }
}

/// Build the whole image in memory. Fails unless `size_mb` yields a volume
/// that classifies as FAT16 with every cluster addressable by its FAT.
pub fn build_sample_fat16(size_mb: u32) -> Result<Vec<u8>> {
    let g = sample_geometry(size_mb);
    let fat_entries = g.sectors_per_fat as u64 * g.bytes_per_sector as u64 / 2;
    if fat_type::classify(&g) != FatType::Fat16 || (g.total_clusters() as u64 + 2) > fat_entries {
        return Err(FatError::InvalidInput("sample size does not give a FAT16 volume"));
    }

    let bps = g.bytes_per_sector as usize;
    let mut img = vec![0u8; g.total_sectors as usize * bps];
    write_boot_sector(&mut img[..512], &g);

    let fat_len = g.sectors_per_fat as usize * bps;
    let mut fat = vec![0u8; fat_len];
    let links: [(usize, u16); 8] = [
        (0, 0xFFF8), (1, 0xFFFF),
        (2, 3), (3, 4), (4, 0xFFFF),
        (5, 6), (6, 0xFFFF),
        (7, 0x0000),
    ];
    for (cluster, value) in links {
        fat[cluster * 2..cluster * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    let fat_start = g.reserved_sectors as usize * bps;
    for copy in 0..g.fat_count as usize {
        let at = fat_start + copy * fat_len;
        img[at..at + fat_len].copy_from_slice(&fat);
    }

    let root = fat_start + g.fat_count as usize * fat_len;
    for (i, (name, cluster, size)) in SAMPLE_FILES.iter().enumerate() {
        let e = &mut img[root + i * 32..root + i * 32 + 32];
        e[..11].copy_from_slice(*name);
        e[11] = 0x20;
        e[26..28].copy_from_slice(&cluster.to_le_bytes());
        e[28..32].copy_from_slice(&size.to_le_bytes());
    }

    let cluster_size = g.cluster_size() as usize;
    let data = g.first_data_sector() as usize * bps;
    let ascending: Vec<u8> = (0..=255u8).collect();
    let descending: Vec<u8> = (0..=255u8).rev().collect();
    let contents: [Vec<u8>; 6] = [
        b"Ceci est le contenu du fichier TEST.TXT\n".repeat(20),
        b"Suite du fichier TEST.TXT (cluster 3)\n".repeat(20),
        b"Fin du fichier TEST.TXT (cluster 4)\n".to_vec(),
        ascending.repeat(cluster_size / 256),
        descending.repeat(cluster_size / 256),
        [0xDE, 0xAD, 0xBE, 0xEF].repeat(cluster_size / 4),
    ];
    for (i, content) in contents.iter().enumerate() {
        let at = data + i * cluster_size;
        let n = content.len().min(cluster_size);
        img[at..at + n].copy_from_slice(&content[..n]);
    }

    log::info!(
        "sample::build: {size_mb} MiB FAT16, {} sectors/FAT, {} clusters",
        g.sectors_per_fat, g.total_clusters()
    );
    Ok(img)
}

fn write_boot_sector(s: &mut [u8], g: &Geometry) {
    s[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    s[3..11].copy_from_slice(&g.oem_name);
    s[11..13].copy_from_slice(&g.bytes_per_sector.to_le_bytes());
    s[13] = g.sectors_per_cluster;
    s[14..16].copy_from_slice(&g.reserved_sectors.to_le_bytes());
    s[16] = g.fat_count;
    s[17..19].copy_from_slice(&g.root_entries.to_le_bytes());
    s[21] = g.media;
    s[22..24].copy_from_slice(&(g.sectors_per_fat as u16).to_le_bytes());
    s[24..26].copy_from_slice(&32u16.to_le_bytes());
    s[26..28].copy_from_slice(&64u16.to_le_bytes());
    s[32..36].copy_from_slice(&g.total_sectors.to_le_bytes());
    s[36] = 0x80;
    s[38] = 0x29;
    s[39..43].copy_from_slice(&g.volume_id.to_le_bytes());
    s[43..54].copy_from_slice(&g.volume_label);
    s[54..62].copy_from_slice(&g.fs_type_label);
    s[510] = 0x55;
    s[511] = 0xAA;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_sector;

    #[test]
    fn ten_mib_matches_demo_geometry() {
        let img = build_sample_fat16(10).unwrap();
        assert_eq!(img.len(), 10 * 1024 * 1024);
        let g = boot_sector::parse(img[..512].try_into().unwrap(), 0).unwrap();
        assert_eq!(g, sample_geometry(10));
        assert_eq!(g.sectors_per_fat, 246);
        assert_eq!(g.first_data_sector(), 528);
        assert_eq!(fat_type::classify(&g), FatType::Fat16);
    }

    #[test]
    fn both_fats_identical() {
        let img = build_sample_fat16(10).unwrap();
        let fat = 246 * 512;
        assert_eq!(img[2048..2048 + fat], img[2048 + fat..2048 + 2 * fat]);
        assert_eq!(img[2048..2052], [0xF8, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn cluster_contents() {
        let img = build_sample_fat16(10).unwrap();
        let data = 528 * 512;
        assert!(img[data..].starts_with(b"Ceci est le contenu"));
        assert_eq!(img[data + 3 * 2048 + 255], 255);
        assert_eq!(img[data + 4 * 2048], 255);
        assert_eq!(img[data + 5 * 2048..data + 5 * 2048 + 4], [0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(img[data + 6 * 2048..data + 7 * 2048].iter().all(|&b| b == 0));
    }

    #[test]
    fn sizes_outside_fat16_rejected() {
        assert!(matches!(build_sample_fat16(1), Err(FatError::InvalidInput(_))));
        assert!(matches!(build_sample_fat16(200), Err(FatError::InvalidInput(_))));
        assert!(build_sample_fat16(32).is_ok());
    }
}
