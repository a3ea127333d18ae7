//! Byte-addressed access to a disk image.
//!
//! The engine never maps a whole image into memory: everything goes through
//! positioned reads and writes on a [`ByteSource`]. The host supplies the
//! implementation; [`MemImage`] and (with `std`) [`FileImage`] cover the
//! common cases.

use alloc::vec;
use alloc::vec::Vec;

use crate::{FatError, Result};

// ─── Image I/O boundary ────────────────────────────────────────────────────────

pub trait ByteSource {
    /// Fill `buf` from `offset`. Returns `false` if the range is not fully readable.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool;
    /// Write `data` at `offset`. Returns `false` if nothing could be stored.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> bool;
    fn size(&self) -> u64;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool { (**self).read_at(offset, buf) }
    fn write_at(&mut self, offset: u64, data: &[u8]) -> bool { (**self).write_at(offset, data) }
    fn size(&self) -> u64 { (**self).size() }
}

pub(crate) fn read_exact<S: ByteSource + ?Sized>(src: &mut S, offset: u64, buf: &mut [u8]) -> Result<()> {
    if src.read_at(offset, buf) {
        Ok(())
    } else {
        Err(FatError::ReadError { offset, len: buf.len() })
    }
}

pub(crate) fn read_vec<S: ByteSource + ?Sized>(src: &mut S, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact(src, offset, &mut buf)?;
    Ok(buf)
}

// ─── In-memory image ───────────────────────────────────────────────────────────

/// An image held entirely in memory. Writes never grow it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemImage(pub Vec<u8>);

impl MemImage {
    pub fn new(bytes: Vec<u8>) -> Self { MemImage(bytes) }
    pub fn into_inner(self) -> Vec<u8> { self.0 }
}

impl ByteSource for MemImage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(buf.len() as u64) else { return false };
        if end > self.0.len() as u64 { return false; }
        let start = offset as usize;
        buf.copy_from_slice(&self.0[start..start + buf.len()]);
        true
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len() as u64) else { return false };
        if end > self.0.len() as u64 { return false; }
        let start = offset as usize;
        self.0[start..start + data.len()].copy_from_slice(data);
        true
    }

    fn size(&self) -> u64 { self.0.len() as u64 }
}

// ─── File-backed image ─────────────────────────────────────────────────────────

#[cfg(feature = "std")]
pub use file_image::FileImage;

#[cfg(feature = "std")]
mod file_image {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Seek, SeekFrom, Write};
    use std::path::Path;

    use super::ByteSource;

    /// A raw image file (`.raw`, `.img`, `.dd`) addressed through seek + read.
    #[derive(Debug)]
    pub struct FileImage {
        file: File,
        size: u64,
    }

    impl FileImage {
        pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
            Self::from_file(File::open(path)?)
        }

        pub fn open_writable(path: impl AsRef<Path>) -> io::Result<Self> {
            Self::from_file(OpenOptions::new().read(true).write(true).open(path)?)
        }

        fn from_file(file: File) -> io::Result<Self> {
            let size = file.metadata()?.len();
            Ok(Self { file, size })
        }
    }

    impl ByteSource for FileImage {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
            if offset.saturating_add(buf.len() as u64) > self.size { return false; }
            self.file.seek(SeekFrom::Start(offset)).is_ok() && self.file.read_exact(buf).is_ok()
        }

        fn write_at(&mut self, offset: u64, data: &[u8]) -> bool {
            if offset.saturating_add(data.len() as u64) > self.size { return false; }
            self.file.seek(SeekFrom::Start(offset)).is_ok()
                && self.file.write_all(data).is_ok()
                && self.file.flush().is_ok()
        }

        fn size(&self) -> u64 { self.size }
    }
}
