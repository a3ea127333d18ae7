// Volumes formatted and populated by the fatfs crate, read back through the
// engine.

use std::io::{Cursor, Seek, SeekFrom, Write};

use fat_engine::{ChainEnd, DirectoryEntry, FatEntryValue, FatImage, FatType, MemImage};

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

/// Format a volume and write `files` into its root; `removed` files are
/// created then deleted so their slots stay behind.
fn build(size: usize, fat_type: fatfs::FatType, files: &[(&str, Vec<u8>)], removed: &[&str]) -> Vec<u8> {
    let mut disk = Cursor::new(vec![0u8; size]);
    fatfs::format_volume(
        &mut disk,
        fatfs::FormatVolumeOptions::new()
            .fat_type(fat_type)
            .volume_label(*b"EVIDENCE   "),
    )
    .expect("fatfs: format_volume failed");

    disk.seek(SeekFrom::Start(0)).unwrap();
    {
        let fs = fatfs::FileSystem::new(&mut disk, fatfs::FsOptions::new())
            .expect("fatfs: FileSystem::new failed");
        let root = fs.root_dir();
        for (name, data) in files {
            let mut f = root.create_file(name).expect("fatfs: create_file failed");
            f.truncate().unwrap();
            f.write_all(data).unwrap();
        }
        for name in removed {
            let mut f = root.create_file(name).expect("fatfs: create_file failed");
            f.write_all(b"short lived").unwrap();
            drop(f);
            root.remove(name).expect("fatfs: remove failed");
        }
    }
    disk.into_inner()
}

fn plain_files(entries: &[DirectoryEntry]) -> Vec<&DirectoryEntry> {
    entries.iter()
        .filter(|e| !e.deleted && !e.is_long_name() && !e.is_volume_label())
        .collect()
}

/// Concatenate a file's clusters and cut to its size.
fn file_bytes(img: &mut FatImage<MemImage>, entry: &DirectoryEntry) -> Vec<u8> {
    let chain = img.chain(entry.start_cluster).unwrap();
    assert_eq!(chain.end, ChainEnd::EndOfChain, "{}", entry.short_name());
    let mut out = Vec::new();
    for &c in &chain.clusters {
        out.extend(img.read_cluster(c).unwrap());
    }
    out.truncate(entry.size as usize);
    out
}

fn check_volume(bytes: Vec<u8>, expected: FatType, files: &[(&str, Vec<u8>)]) -> FatImage<MemImage> {
    let mut img = FatImage::open(MemImage(bytes)).unwrap();
    assert_eq!(img.fat_type(), expected);
    assert_eq!(img.geometry().volume_label(), "EVIDENCE");

    let root = img.root_directory().unwrap();
    let listed = plain_files(&root);
    assert_eq!(listed.len(), files.len());
    for (name, data) in files {
        let entry = listed.iter().find(|e| e.short_name() == *name)
            .unwrap_or_else(|| panic!("{name} not listed"));
        assert_eq!(entry.size as usize, data.len());
        if data.is_empty() {
            assert_eq!(entry.start_cluster, 0);
            continue;
        }
        assert_eq!(&file_bytes(&mut img, entry), data, "{name}");

        // Every FAT copy agrees on the chain.
        for &c in &img.chain(entry.start_cluster).unwrap().clusters {
            assert_eq!(img.fat_entry(0, c).unwrap(), img.fat_entry(1, c).unwrap());
        }
    }
    img
}

// ── per FAT type ─────────────────────────────────────────────────────────────

#[test]
fn fat12_floppy() {
    let files = [("NOTES.TXT", pattern(3000, 0x11)), ("TINY.BIN", pattern(10, 0x22))];
    let bytes = build(1440 * KIB, fatfs::FatType::Fat12, &files, &[]);
    let mut img = check_volume(bytes, FatType::Fat12, &files);
    let notes = img.root_directory().unwrap().into_iter()
        .find(|e| e.short_name() == "NOTES.TXT")
        .unwrap();
    let chain = img.chain(notes.start_cluster).unwrap();
    let last = chain.last().unwrap();
    assert_eq!(img.fat_entry(0, last).unwrap(), FatEntryValue::EndOfChain);
    let cluster_size = img.layout().cluster_size();
    assert_eq!(chain.len() as u64, 3000u64.div_ceil(cluster_size as u64));
    assert!(chain.byte_len(cluster_size) >= 3000);
}

#[test]
fn fat16_volume() {
    let files = [
        ("REPORT.DOC", pattern(40 * KIB, 0x33)),
        ("EMPTY.TXT", Vec::new()),
        ("A.B", pattern(1, 0x44)),
    ];
    let bytes = build(16 * MIB, fatfs::FatType::Fat16, &files, &[]);
    check_volume(bytes, FatType::Fat16, &files);
}

#[test]
fn fat32_volume_root_in_data_area() {
    let files = [("DISK.IMG", pattern(100 * KIB, 0x55)), ("README", pattern(700, 0x66))];
    let bytes = build(40 * MIB, fatfs::FatType::Fat32, &files, &[]);
    let mut img = check_volume(bytes, FatType::Fat32, &files);
    assert_eq!(img.layout().root_dir_len(), 0);
    let root = img.chain(img.geometry().root_cluster).unwrap();
    assert!(!root.is_broken());
}

// ── directory details ────────────────────────────────────────────────────────

#[test]
fn deleted_slot_is_listed() {
    let files = [("KEEP.TXT", pattern(600, 0x77))];
    let bytes = build(16 * MIB, fatfs::FatType::Fat16, &files, &["GONE.TXT"]);
    let mut img = FatImage::open(MemImage(bytes)).unwrap();

    let root = img.root_directory().unwrap();
    let gone = root.iter()
        .find(|e| e.deleted && !e.is_long_name() && e.short_name() == "?ONE.TXT")
        .expect("deleted entry missing");
    assert_eq!(gone.name[1..4], *b"ONE");
    assert!(plain_files(&root).iter().any(|e| e.short_name() == "KEEP.TXT"));
}

#[test]
fn listing_is_repeatable() {
    let files = [("ONE.TXT", pattern(10, 1)), ("TWO.TXT", pattern(20, 2))];
    let bytes = build(1440 * KIB, fatfs::FatType::Fat12, &files, &[]);
    let mut img = FatImage::open(MemImage(bytes)).unwrap();
    assert_eq!(img.root_directory().unwrap(), img.root_directory().unwrap());
}

#[test]
fn timestamps_are_decoded() {
    let files = [("STAMP.TXT", pattern(10, 3))];
    let bytes = build(1440 * KIB, fatfs::FatType::Fat12, &files, &[]);
    let mut img = FatImage::open(MemImage(bytes)).unwrap();
    let root = img.root_directory().unwrap();
    let entry = plain_files(&root)[0].clone();
    let modified = entry.modified.expect("fatfs stamps files");
    assert!(modified.year >= 1980);
    assert!((1..=12).contains(&modified.month));
}
