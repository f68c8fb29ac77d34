//! Windows-style file attribute bitfield.
//!
//! Mirrors `smb-fscc`'s `FileAttributes`: one bit per flag, packed into a
//! `u32`. Only the attributes the capture/apply engine actually inspects
//! carry documentation; the rest exist so round-tripping a captured value
//! never silently drops bits an adapter reported.

use modular_bitfield::prelude::*;

/// Attributes of a captured file or directory.
///
/// Bit layout matches the Windows `FILE_ATTRIBUTE_*` values so adapters can
/// hand back a raw `u32` and have it interpreted without translation.
#[bitfield(bits = 32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes {
    pub readonly: bool,
    pub hidden: bool,
    pub system: bool,
    #[skip]
    __: bool,

    pub directory: bool,
    pub archive: bool,
    #[skip]
    __: bool,
    pub normal: bool,

    pub temporary: bool,
    pub sparse_file: bool,
    pub reparse_point: bool,
    pub compressed: bool,

    pub offline: bool,
    pub not_content_indexed: bool,
    pub encrypted: bool,
    #[skip]
    __: B17,
}

impl FileAttributes {
    /// Whether this inode must not have an unnamed stream (invariant I6).
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.directory()
    }
}

impl From<u32> for FileAttributes {
    fn from(value: u32) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }
}

impl From<FileAttributes> for u32 {
    fn from(value: FileAttributes) -> Self {
        u32::from_le_bytes(value.into_bytes())
    }
}
