//! Windows `FILETIME`-style timestamp: 100ns ticks since 1601-01-01 UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of 100ns ticks between the Windows epoch (1601-01-01) and the
/// Unix epoch (1970-01-01).
const TICKS_TO_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: u64 = 10_000_000;
const NANOS_PER_TICK: u64 = 100;

/// A timestamp expressed as 100-nanosecond ticks since 1601-01-01 UTC.
///
/// This is the representation `spec.md` §3 mandates for Inode timestamps;
/// it is kept as a bare tick count (not `time::PrimitiveDateTime` as the
/// teacher's wire types use) since the core never serializes it to the WIM
/// container — that is an external collaborator's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct FileTime(pub u64);

impl FileTime {
    pub const ZERO: FileTime = FileTime(0);

    #[must_use]
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Converts from a [`SystemTime`], saturating at the Windows epoch for
    /// times before 1601 (never observed in practice, but stat() on some
    /// virtual filesystems reports the Unix epoch for "unknown").
    #[must_use]
    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(since_unix) => {
                let ticks = since_unix.as_secs() * TICKS_PER_SECOND
                    + u64::from(since_unix.subsec_nanos()) / NANOS_PER_TICK;
                Self(ticks + TICKS_TO_UNIX_EPOCH)
            }
            Err(before_unix) => {
                let back = before_unix.duration();
                let back_ticks =
                    back.as_secs() * TICKS_PER_SECOND + u64::from(back.subsec_nanos()) / NANOS_PER_TICK;
                Self(TICKS_TO_UNIX_EPOCH.saturating_sub(back_ticks))
            }
        }
    }

    /// Converts to a [`SystemTime`]; returns `None` if the value predates
    /// the Unix epoch (1970), which an apply target generally cannot set
    /// with `SystemTime` anyway.
    #[must_use]
    pub fn to_system_time(self) -> Option<SystemTime> {
        let unix_ticks = self.0.checked_sub(TICKS_TO_UNIX_EPOCH)?;
        let secs = unix_ticks / TICKS_PER_SECOND;
        let subsec_ticks = unix_ticks % TICKS_PER_SECOND;
        Some(UNIX_EPOCH + Duration::new(secs, (subsec_ticks * NANOS_PER_TICK) as u32))
    }
}

impl From<SystemTime> for FileTime {
    fn from(t: SystemTime) -> Self {
        Self::from_system_time(t)
    }
}
