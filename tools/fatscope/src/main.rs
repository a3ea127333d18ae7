mod config;
mod logger;
mod render;

use std::ops::ControlFlow;
use std::{env, fs, process};

use anyhow::{bail, Context, Result};
use fat_engine::resolve::IdFormat;
use fat_engine::sample::build_sample_fat16;
use fat_engine::scan::{MatchLocation, SearchOptions, SearchRegion};
use fat_engine::{ByteSource, ClusterChain, EditBuffer, FatError, FatImage, FileImage, RangeMode};

use crate::config::Config;

const USAGE: &str = "\
usage: fatscope <image> <command> [args]
       fatscope mksample <out> [size_mb]

commands:
  info                          geometry, FAT type and region map
  partitions                    MBR partition table
  sector <n>                    hex dump of volume sector n
  cluster <n>                   hex dump of cluster n
  fat <copy> <cluster>          one FAT entry
  chain <start>                 follow a cluster chain
  chain-start <cluster>         first cluster of the chain holding <cluster>
  ls                            root directory, deleted entries included
  find-cluster <text> [dec|hex|le|be]
  grep <needle> [-i] [root|data]
  empty [start [count]]         all-zero sectors, paged
  poke <offset> <hexbyte>...    write bytes at an absolute image offset
  relink <cluster>...           rewrite a chain in every FAT copy

environment: FATSCOPE_LOG, FATSCOPE_SCAN_LIMIT, FATSCOPE_MAX_MATCHES";

fn main() {
    if let Err(e) = run() {
        match e.downcast_ref::<FatError>() {
            Some(fat) => eprintln!("fatscope: error {}: {e:#}", u8::from(fat.code())),
            None => eprintln!("fatscope: {e:#}"),
        }
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::from_env()?;
    logger::init(config.log_level).context("installing logger")?;

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] | ["-h" | "--help" | "help"] => {
            println!("{USAGE}");
            Ok(())
        }
        ["mksample", out, rest @ ..] => mksample(out, rest),
        [path, command, rest @ ..] => dispatch(path, command, rest, &config),
        [_] => bail!("missing command\n{USAGE}"),
    }
}

fn dispatch(path: &str, command: &str, args: &[&str], config: &Config) -> Result<()> {
    match (command, args) {
        ("poke", [offset, bytes @ ..]) if !bytes.is_empty() => poke(&mut open_writable(path)?, offset, bytes),
        ("relink", clusters) if !clusters.is_empty() => relink(&mut open_writable(path)?, clusters),
        _ => {
            let mut img = open(path)?;
            match (command, args) {
                ("info", []) => info(&mut img),
                ("partitions", []) => partitions(&mut img),
                ("sector", [n]) => sector(&mut img, parse_number(n)?),
                ("cluster", [n]) => cluster(&mut img, parse_u32(n)?),
                ("fat", [copy, n]) => fat(&mut img, parse_u32(copy)?, parse_u32(n)?),
                ("chain", [start]) => chain(&mut img, parse_u32(start)?),
                ("chain-start", [n]) => chain_start(&mut img, parse_u32(n)?),
                ("ls", []) => ls(&mut img),
                ("find-cluster", [text, rest @ ..]) => find_cluster(&mut img, text, rest),
                ("grep", [needle, rest @ ..]) => grep(&mut img, needle, rest, config),
                ("empty", rest) if rest.len() <= 2 => empty(&mut img, rest, config),
                _ => bail!("unknown command or wrong arguments: {command} {}\n{USAGE}", args.join(" ")),
            }
        }
    }
}

// ─── Opening ───────────────────────────────────────────────────────────────────

fn open(path: &str) -> Result<FatImage<FileImage>> {
    let src = FileImage::open(path).with_context(|| format!("opening {path}"))?;
    FatImage::open(src).with_context(|| format!("reading FAT volume in {path}"))
}

fn open_writable(path: &str) -> Result<FatImage<FileImage>> {
    let src = FileImage::open_writable(path).with_context(|| format!("opening {path} for writing"))?;
    FatImage::open(src).with_context(|| format!("reading FAT volume in {path}"))
}

/// Decimal, or hex with a `0x` prefix.
fn parse_number(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("not a number: {text:?}"))
}

fn parse_u32(text: &str) -> Result<u32> {
    u32::try_from(parse_number(text)?).with_context(|| format!("{text} does not fit in 32 bits"))
}

// ─── Read-only commands ────────────────────────────────────────────────────────

fn info<S: ByteSource>(img: &mut FatImage<S>) -> Result<()> {
    let g = img.geometry().clone();
    let l = *img.layout();
    let p = *img.partition();
    println!("partition        {:?} at {:#X}, {} bytes", p.source, p.offset, p.length);
    println!("FAT type         {}", l.fat_type);
    println!("OEM name         {:?}", g.oem_name());
    println!("volume label     {:?}", g.volume_label());
    println!("volume ID        {:08X}", g.volume_id);
    println!("fs type string   {:?}", g.fs_type_label());
    println!("bytes/sector     {}", g.bytes_per_sector);
    println!("sectors/cluster  {} ({} bytes)", g.sectors_per_cluster, g.cluster_size());
    println!("reserved         {}", g.reserved_sectors);
    println!("FATs             {} x {} sectors", g.fat_count, g.sectors_per_fat);
    println!("root entries     {}", g.root_entries);
    if l.fat_type == fat_engine::FatType::Fat32 {
        println!("root cluster     {}", g.root_cluster);
    }
    println!("media            {:#04X}", g.media);
    println!("hidden sectors   {}", g.hidden_sectors);
    println!("total sectors    {}", g.total_sectors);
    println!("first data       sector {}", l.first_data_sector);
    println!("clusters         {} (2..={})", l.total_clusters, l.max_cluster());
    println!();
    for span in l.regions() {
        println!(
            "{:<16} sectors {:>10} .. {:<10} at {:#X}",
            render::region_name(span.region),
            span.start_sector,
            span.start_sector as u64 + span.sector_count as u64,
            l.sector_offset(span.start_sector as u64),
        );
    }
    Ok(())
}

fn partitions<S: ByteSource>(img: &mut FatImage<S>) -> Result<()> {
    let entries = img.list_partitions()?;
    if entries.is_empty() {
        println!("no MBR partition table");
    }
    for e in &entries {
        println!("{}", render::partition_line(e));
    }
    Ok(())
}

fn sector<S: ByteSource>(img: &mut FatImage<S>, n: u64) -> Result<()> {
    let bytes = img.read_sector(n)?;
    let offset = img.layout().sector_offset(n);
    println!("sector {n} ({}) at {offset:#X}", render::region_name(img.layout().region_of_sector(n)));
    print!("{}", render::hex_dump(&bytes, offset));
    Ok(())
}

fn cluster<S: ByteSource>(img: &mut FatImage<S>, n: u32) -> Result<()> {
    let bytes = img.read_cluster(n)?;
    let offset = img.layout().cluster_offset(n, RangeMode::Strict)?;
    println!("cluster {n} at {offset:#X}, FAT entry {}", img.fat_entry(0, n)?);
    print!("{}", render::hex_dump(&bytes, offset));
    Ok(())
}

fn fat<S: ByteSource>(img: &mut FatImage<S>, copy: u32, n: u32) -> Result<()> {
    let offset = img.layout().fat_entry_offset(copy, n)?;
    let value = img.fat_entry(copy, n)?;
    println!("FAT #{} entry {n} at {offset:#X}: {value}", copy + 1);
    Ok(())
}

fn chain<S: ByteSource>(img: &mut FatImage<S>, start: u32) -> Result<()> {
    let chain = img.chain(start)?;
    println!("{} cluster(s), {} bytes", chain.len(), chain.byte_len(img.layout().cluster_size()));
    println!("{}", render::chain_line(&chain));
    Ok(())
}

fn chain_start<S: ByteSource>(img: &mut FatImage<S>, n: u32) -> Result<()> {
    let start = img.find_chain_start(n)?;
    println!("cluster {n} belongs to the chain starting at {start}");
    Ok(())
}

fn ls<S: ByteSource>(img: &mut FatImage<S>) -> Result<()> {
    println!("{:<12} {:<6} {:>10} {:>8}  {:<19}", "NAME", "ATTR", "SIZE", "CLUSTER", "MODIFIED");
    for entry in img.root_entries()? {
        println!("{}", render::dir_entry_line(&entry?));
    }
    Ok(())
}

fn find_cluster<S: ByteSource>(img: &mut FatImage<S>, text: &str, rest: &[&str]) -> Result<()> {
    let preferred = match rest {
        [] => None,
        ["dec"] => Some(IdFormat::Decimal),
        ["hex"] => Some(IdFormat::Hex),
        ["le"] => Some(IdFormat::LittleEndian),
        ["be"] => Some(IdFormat::BigEndian),
        _ => bail!("format must be one of dec, hex, le, be"),
    };
    let r = img.search_cluster(text, preferred)?;
    println!("{:?} read as {}: cluster {}", r.resolution.input, r.resolution.format, r.resolution.cluster);
    if r.resolution.is_ambiguous() {
        for (format, value) in &r.resolution.interpretations {
            println!("  as {format}: {value}");
        }
    }
    match (r.fat_entry_offset, r.fat_sector) {
        (Some(off), Some(sector)) => println!("FAT entry        {off:#X} (sector {sector})"),
        _ => println!("FAT entry        beyond the FAT"),
    }
    match (r.data_offset, r.data_sector) {
        (Some(off), Some(sector)) => println!("data             {off:#X} (sector {sector})"),
        _ => println!("data             none, clusters 0 and 1 hold no data"),
    }
    println!("in partition     {}", if r.within_partition { "yes" } else { "no" });
    if let Some(entry) = r.entry {
        println!("entry value      {entry}");
    }
    println!("chain            {}", render::chain_line(&r.chain));
    Ok(())
}

fn grep<S: ByteSource>(img: &mut FatImage<S>, needle: &str, rest: &[&str], config: &Config) -> Result<()> {
    let mut options = SearchOptions::default();
    for &flag in rest {
        match flag {
            "-i" => options.case_sensitive = false,
            "root" => options.region = SearchRegion::RootDirectory,
            "data" => options.region = SearchRegion::Data,
            other => bail!("unknown grep option {other:?}"),
        }
    }
    let mut count = 0;
    let mut search = img.search_text(needle.as_bytes(), options, &config.scan)?;
    for m in search.by_ref() {
        let location = match m.location {
            MatchLocation::RootDirectory { position } => format!("root+{position}"),
            MatchLocation::Cluster { cluster, position } => format!("cluster {cluster}+{position}"),
        };
        println!("{:#010X}  {location:<20} {}", m.offset, m.context);
        count += 1;
    }
    if count == config.scan.max_text_matches {
        println!("stopped at {count} matches ({})", config::ENV_MAX_MATCHES);
    } else {
        println!("{count} match(es)");
    }
    for range in search.skipped() {
        println!("not searched     {:#X}..{:#X} (unreadable)", range.start, range.end);
    }
    Ok(())
}

fn empty<S: ByteSource>(img: &mut FatImage<S>, rest: &[&str], config: &Config) -> Result<()> {
    let start = match rest.first() {
        Some(s) => parse_number(s)?,
        None => img.layout().first_data_sector as u64,
    };
    let count = match rest.get(1) {
        Some(c) => parse_number(c)?,
        None => config.scan.max_sectors,
    };
    let scan = img.scan_empty_sectors(start..start.saturating_add(count), &config.scan, |p| {
        log::debug!("fatscope::empty: {}/{} sectors", p.done, p.total);
        ControlFlow::Continue(())
    })?;
    println!("{} of {} sectors empty from sector {start}", scan.empty.len(), scan.scanned);
    println!("{}", render::sector_ranges(&scan.empty));
    if !scan.unreadable.is_empty() {
        println!("{} sector(s) unreadable: {}", scan.unreadable.len(), render::sector_ranges(&scan.unreadable));
    }
    if let Some(next) = scan.next_sector {
        println!("more: fatscope <image> empty {next}");
    }
    Ok(())
}

// ─── Mutating commands ─────────────────────────────────────────────────────────

fn poke<S: ByteSource>(img: &mut FatImage<S>, offset: &str, bytes: &[&str]) -> Result<()> {
    let start = parse_number(offset)?;
    let layout = *img.layout();
    let bps = layout.bytes_per_sector as u64;
    let Some(rel) = start.checked_sub(layout.partition_offset) else {
        bail!("offset {start:#X} lies before the volume");
    };

    // Stage everything first so a bad digit aborts before any write.
    let mut buffers = Vec::new();
    for (i, text) in bytes.iter().enumerate() {
        let at = start + i as u64;
        let sector = (rel + i as u64) / bps;
        if buffers.last().is_none_or(|(s, _)| *s != sector) {
            buffers.push((sector, img.edit_sector(sector)?));
        }
        if let Some((_, buf)) = buffers.last_mut() {
            buf.stage_hex(at, text).with_context(|| format!("byte {text:?} at {at:#X}"))?;
        }
    }

    for (_, buf) in &buffers {
        for (off, old, new) in buf.pending() {
            println!("{off:#010X}  {old:02X} -> {new:02X}");
        }
    }
    match commit_all(img, &mut buffers) {
        Ok(written) => {
            log::info!("fatscope::poke: {} byte(s) written", written.len());
            Ok(())
        }
        Err(FatError::WriteError { offset, written }) => {
            let done = written.iter().map(|o| format!("{o:#X}")).collect::<Vec<_>>().join(", ");
            let context = format!("poke stopped at {offset:#X}, bytes already written at [{done}]");
            Err(anyhow::Error::new(FatError::WriteError { offset, written }).context(context))
        }
        Err(e) => Err(e.into()),
    }
}

/// Commit `buffers` in order. A failed write reports every offset already
/// written, earlier buffers included.
fn commit_all<S: ByteSource>(img: &mut FatImage<S>, buffers: &mut [(u64, EditBuffer)]) -> Result<Vec<u64>, FatError> {
    let mut written = Vec::new();
    for (_, buf) in buffers.iter_mut() {
        match img.commit_edits(buf) {
            Ok(offsets) => written.extend(offsets),
            Err(FatError::WriteError { offset, written: partial }) => {
                written.extend(partial);
                return Err(FatError::WriteError { offset, written });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

fn relink<S: ByteSource>(img: &mut FatImage<S>, clusters: &[&str]) -> Result<()> {
    let clusters = clusters.iter().map(|c| parse_u32(c)).collect::<Result<Vec<_>>>()?;
    let chain = ClusterChain::from_clusters(clusters);
    for (cluster, next) in fat_engine::chain::planned_links(&chain, img.layout()) {
        println!("FAT[{cluster}] = {next:#X}");
    }
    let written = img.commit_chain(&chain)?;
    println!("{} entries written across {} FAT copies", written.len(), img.layout().fat_count);
    println!("{}", render::chain_line(&img.chain(chain.start)?));
    Ok(())
}

fn mksample(out: &str, rest: &[&str]) -> Result<()> {
    let size_mb = match rest {
        [] => 10,
        [size] => parse_u32(size)?,
        _ => bail!("usage: fatscope mksample <out> [size_mb]"),
    };
    let image = build_sample_fat16(size_mb)?;
    fs::write(out, &image).with_context(|| format!("writing {out}"))?;
    println!("wrote {size_mb} MiB FAT16 sample to {out}");
    Ok(())
}
