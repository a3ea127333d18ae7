use core::fmt;
use core::ops::RangeInclusive;

use num_enum::IntoPrimitive;

use crate::boot_sector::Geometry;

/// Cluster-count thresholds. Anything below `FAT12_LIMIT` is FAT12, below
/// `FAT16_LIMIT` FAT16, otherwise FAT32.
pub const FAT12_LIMIT: u32 = 4085;
pub const FAT16_LIMIT: u32 = 65525;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive)]
pub enum FatType {
    Fat12 = 12,
    Fat16 = 16,
    Fat32 = 32,
}

impl FatType {
    /// Bits per entry as stored (FAT32 only uses the low 28).
    pub fn bits(self) -> u32 { u8::from(self) as u32 }

    /// Significant bits of an entry value.
    pub fn mask(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// Values at or above this end a chain.
    pub fn eoc_min(self) -> u32 { self.mask() - 7 }
    /// The bad-cluster marker.
    pub fn bad(self) -> u32 { self.mask() - 8 }
    /// The end-of-chain value written when closing a chain.
    pub fn eoc(self) -> u32 { self.mask() }

    pub fn reserved_range(self) -> RangeInclusive<u32> {
        self.mask() - 15..=self.mask() - 9
    }
}

impl fmt::Display for FatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAT{}", self.bits())
    }
}

/// FAT type from the number of data clusters, the only reliable criterion.
pub fn classify(geometry: &Geometry) -> FatType {
    match geometry.total_clusters() {
        n if n < FAT12_LIMIT => FatType::Fat12,
        n if n < FAT16_LIMIT => FatType::Fat16,
        _ => FatType::Fat32,
    }
}
