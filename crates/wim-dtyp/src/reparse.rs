//! Reparse point tag values (the subset the capture/apply engines care
//! about; mirrors `smb-fscc`'s much larger `ReparseTag` enum, trimmed to
//! what §4.4/§4.5 actually branch on).

/// A reparse point's tag, identifying the filter/feature that owns it.
///
/// Only `Symlink` and `MountPoint` get engine-level treatment per spec.md
/// §4.4; any other tag is captured and re-applied opaquely (payload bytes
/// round-trip, but the engine does not interpret them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReparseTag {
    Symlink,
    MountPoint,
    Other(u32),
}

impl ReparseTag {
    pub const SYMLINK_VALUE: u32 = 0xA000_000C;
    pub const MOUNT_POINT_VALUE: u32 = 0xA000_0003;

    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            Self::SYMLINK_VALUE => Self::Symlink,
            Self::MOUNT_POINT_VALUE => Self::MountPoint,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Symlink => Self::SYMLINK_VALUE,
            Self::MountPoint => Self::MOUNT_POINT_VALUE,
            Self::Other(v) => v,
        }
    }
}

impl From<u32> for ReparseTag {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<ReparseTag> for u32 {
    fn from(value: ReparseTag) -> Self {
        value.as_u32()
    }
}

/// The on-wire prefix described in spec.md §6: `{u32 tag, u16 len, u16
/// reserved}`. The core never writes this prefix into the unnamed stream
/// (invariant I6 strips it); this helper exists purely for the apply-side
/// reconstruction step (§4.5 pass 1.f) and the maximum-size check (§8).
pub const REPARSE_HEADER_LEN: usize = 8;
/// Maximum total reparse buffer size (header + payload), per spec.md §4.4.
pub const REPARSE_MAX_TOTAL_LEN: usize = 16 * 1024;
/// Maximum payload length storable in the `u16` length field (0xFFFE, not
/// 0xFFFF, per spec.md §4.5 pass 1.f).
pub const REPARSE_MAX_PAYLOAD_LEN: usize = 0xFFFE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlink_round_trips() {
        assert_eq!(ReparseTag::from_u32(ReparseTag::SYMLINK_VALUE), ReparseTag::Symlink);
        assert_eq!(ReparseTag::Symlink.as_u32(), ReparseTag::SYMLINK_VALUE);
    }

    #[test]
    fn unknown_tag_preserved() {
        let tag = ReparseTag::from_u32(0x1234_5678);
        assert_eq!(tag, ReparseTag::Other(0x1234_5678));
        assert_eq!(tag.as_u32(), 0x1234_5678);
    }
}
