// Library crate for FAT12/16/32 image inspection.
// No_std + alloc unless the `std` feature is on (it is by default) or we are testing.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod boot_sector;
pub mod chain;
pub mod directory;
pub mod edit;
pub mod error;
pub mod fat_entry;
pub mod fat_type;
pub mod image;
pub mod layout;
pub mod partition;
pub mod resolve;
pub mod sample;
pub mod scan;
pub mod source;

pub use boot_sector::Geometry;
pub use chain::{ChainEnd, ClusterChain};
pub use directory::{Attributes, DirectoryEntry};
pub use edit::EditBuffer;
pub use error::{ErrorCode, FatError};
pub use fat_entry::FatEntryValue;
pub use fat_type::FatType;
pub use image::{ClusterReport, FatImage};
pub use layout::{Layout, RangeMode};
pub use source::{ByteSource, MemImage};

#[cfg(feature = "std")]
pub use source::FileImage;

pub type Result<T, E = FatError> = core::result::Result<T, E>;
