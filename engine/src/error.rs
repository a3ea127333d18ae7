use alloc::vec::Vec;
use core::fmt;

use num_enum::IntoPrimitive;

/// Failures surfaced by the engine.
///
/// A broken cluster chain is deliberately not in this list: it is reported
/// through [`crate::ChainEnd`] on the returned chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FatError {
    /// The image cannot even hold a boot sector.
    ImageTooSmall { size: u64 },
    /// A BIOS Parameter Block field failed its sanity bounds.
    InvalidBootSector(&'static str),
    /// A cluster number outside `2..=max` in a strict-range query.
    InvalidClusterNumber { cluster: u32, max: u32 },
    /// Malformed user input (cluster identifier, hex digit, edit position).
    InvalidInput(&'static str),
    /// The byte source could not supply `len` bytes at `offset`.
    ReadError { offset: u64, len: usize },
    /// A write at `offset` failed; `written` lists the offsets that had
    /// already been written, in the order they were written.
    WriteError { offset: u64, written: Vec<u64> },
}

/// Stable numeric codes for embedders that switch on integers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive)]
pub enum ErrorCode {
    ImageTooSmall        = 1,
    InvalidBootSector    = 2,
    InvalidClusterNumber = 3,
    InvalidInput         = 4,
    ReadError            = 5,
    WriteError           = 6,
}

impl FatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FatError::ImageTooSmall { .. }        => ErrorCode::ImageTooSmall,
            FatError::InvalidBootSector(_)        => ErrorCode::InvalidBootSector,
            FatError::InvalidClusterNumber { .. } => ErrorCode::InvalidClusterNumber,
            FatError::InvalidInput(_)             => ErrorCode::InvalidInput,
            FatError::ReadError { .. }            => ErrorCode::ReadError,
            FatError::WriteError { .. }           => ErrorCode::WriteError,
        }
    }
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatError::ImageTooSmall { size } => {
                write!(f, "image too small: {size} bytes, need at least 512")
            }
            FatError::InvalidBootSector(reason) => write!(f, "invalid boot sector: {reason}"),
            FatError::InvalidClusterNumber { cluster, max } => {
                write!(f, "invalid cluster number {cluster} (valid range 2..={max})")
            }
            FatError::InvalidInput(reason) => write!(f, "invalid input: {reason}"),
            FatError::ReadError { offset, len } => {
                write!(f, "read of {len} bytes at offset {offset:#X} failed")
            }
            FatError::WriteError { offset, written } => write!(
                f,
                "write at offset {offset:#X} failed after {} successful write(s)",
                written.len()
            ),
        }
    }
}

impl core::error::Error for FatError {}
