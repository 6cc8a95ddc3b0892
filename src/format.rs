//! Shared on-disk constants for the initrd image formats.
//!
//! Both format versions use little-endian, packed layouts and place the
//! data section on a 4KB page boundary so the kernel can map file
//! contents directly.

use crate::error::{InitrdError, Result};

/// Data blobs and the data section itself are aligned to this boundary.
pub const PAGE_SIZE: u64 = 0x1000;

/// Signature of a v1 image ('I' 'N' 'I' 'T' 'v' '1').
pub const V1_SIGNATURE: &[u8; 6] = b"INITv1";

/// Signature of a v2 image ('I' 'N' 'I' 'T' 'v' '2').
pub const V2_SIGNATURE: &[u8; 6] = b"INITv2";

pub const DEFAULT_FILE_MODE: u16 = 0o644;
pub const DEFAULT_DIR_MODE: u16 = 0o755;
pub const DEFAULT_LINK_MODE: u16 = 0o777;
pub const DEFAULT_UID: u32 = 0;
pub const DEFAULT_GID: u32 = 0;

/// Round `n` up to the next multiple of `align` (a power of two).
pub fn align_up(n: u64, align: u64) -> u64 {
    (n + align - 1) & !(align - 1)
}

/// Entry type, common to directives and decoded entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

impl EntryKind {
    /// On-disk type byte: 'd' | 'f' | 'l'.
    pub fn as_byte(self) -> u8 {
        match self {
            EntryKind::Dir => b'd',
            EntryKind::File => b'f',
            EntryKind::Symlink => b'l',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'd' => Ok(EntryKind::Dir),
            b'f' => Ok(EntryKind::File),
            b'l' => Ok(EntryKind::Symlink),
            other => Err(InitrdError::InvalidEntryType(other)),
        }
    }

    /// Sort priority at equal path depth: directories, then files, then symlinks.
    pub fn priority(self) -> u8 {
        match self {
            EntryKind::Dir => 0,
            EntryKind::File => 1,
            EntryKind::Symlink => 2,
        }
    }

    pub fn default_mode(self) -> u16 {
        match self {
            EntryKind::Dir => DEFAULT_DIR_MODE,
            EntryKind::File => DEFAULT_FILE_MODE,
            EntryKind::Symlink => DEFAULT_LINK_MODE,
        }
    }
}

/// Narrow a derived quantity into a u32 wire field.
pub(crate) fn to_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| InitrdError::FieldOverflow { field, value })
}

/// Narrow a derived quantity into a u16 wire field.
pub(crate) fn to_u16(field: &'static str, value: u64) -> Result<u16> {
    u16::try_from(value).map_err(|_| InitrdError::FieldOverflow { field, value })
}
