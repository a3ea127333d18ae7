//! Cluster identifiers typed by a user.
//!
//! The same text can mean different clusters: `"0200"` is 200 in decimal,
//! 0x200 in hex, and 2 read as little-endian FAT entry bytes. Every valid
//! reading is returned alongside the one picked.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::{FatError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdFormat {
    Decimal,
    Hex,
    LittleEndian,
    BigEndian,
}

impl fmt::Display for IdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdFormat::Decimal      => "decimal",
            IdFormat::Hex          => "hex",
            IdFormat::LittleEndian => "little-endian bytes",
            IdFormat::BigEndian    => "big-endian bytes",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub input:           String,
    /// Every format the text is valid in, with its value.
    pub interpretations: Vec<(IdFormat, u32)>,
    pub format:          IdFormat,
    pub cluster:         u32,
}

impl Resolution {
    /// More than one distinct value was possible.
    pub fn is_ambiguous(&self) -> bool {
        self.interpretations.iter().any(|&(_, v)| v != self.cluster)
    }
}

/// Resolve `text` to a cluster number. With `preferred`, that reading must be
/// valid; without, the most likely one is picked: a `0x` prefix means hex,
/// space-separated byte pairs mean on-disk (little-endian) bytes, plain digits
/// mean decimal, anything else hex.
pub fn resolve(text: &str, preferred: Option<IdFormat>) -> Result<Resolution> {
    let t = text.trim();
    let mut interpretations = Vec::with_capacity(4);
    let mut add = |format, value: Option<u32>| {
        if let Some(v) = value { interpretations.push((format, v)); }
    };
    add(IdFormat::Decimal, parse_decimal(t));
    add(IdFormat::Hex, parse_hex(t));
    let bytes = parse_bytes(t);
    add(IdFormat::LittleEndian, bytes.as_deref().map(|b| b.iter().rev().fold(0, |acc, &x| acc << 8 | x as u32)));
    add(IdFormat::BigEndian, bytes.as_deref().map(|b| b.iter().fold(0, |acc, &x| acc << 8 | x as u32)));

    if interpretations.is_empty() {
        return Err(FatError::InvalidInput("not a decimal, hex or byte-sequence cluster number"));
    }

    let format = match preferred {
        Some(f) => f,
        None if t.starts_with("0x") || t.starts_with("0X") => IdFormat::Hex,
        None if t.contains(char::is_whitespace) => IdFormat::LittleEndian,
        None if parse_decimal(t).is_some() => IdFormat::Decimal,
        None => IdFormat::Hex,
    };
    let Some(&(_, cluster)) = interpretations.iter().find(|(f, _)| *f == format) else {
        return Err(FatError::InvalidInput("text is not valid in the requested format"));
    };

    log::trace!("resolve::resolve: {t:?} -> {cluster} ({format})");
    Ok(Resolution { input: String::from(t), interpretations, format, cluster })
}

fn parse_decimal(t: &str) -> Option<u32> {
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) { return None; }
    t.parse().ok()
}

fn parse_hex(t: &str) -> Option<u32> {
    let digits = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Hex byte sequence, optionally separated by spaces, `:` or `-`. An odd
/// digit count gets a leading zero. At most four bytes.
fn parse_bytes(t: &str) -> Option<Vec<u8>> {
    let mut digits = Vec::with_capacity(t.len());
    for c in t.chars() {
        match c {
            ' ' | '\t' | ':' | '-' => continue,
            c => digits.push(c.to_digit(16)? as u8),
        }
    }
    if digits.is_empty() { return None; }
    if digits.len() % 2 == 1 { digits.insert(0, 0); }
    if digits.len() > 8 { return None; }
    Some(digits.chunks(2).map(|p| p[0] << 4 | p[1]).collect())
}
