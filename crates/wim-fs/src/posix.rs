//! `Posix`: a [`FsAdapter`] backed by `std::fs` and POSIX metadata.
//!
//! This is the one adapter variant this core fully implements; `Win32`
//! and `Ntfs` are out of scope per spec.md §1 ("the particulars of any
//! specific host-filesystem API beyond the abstract capabilities").
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use wim_dtyp::{FileAttributes, FileTime};

use crate::adapter::{Capabilities, EntryKind, FsAdapter, Stat, UnixMetadata};

/// A POSIX local-filesystem adapter. Stateless: every operation takes an
/// absolute or relative path and resolves it directly, the same way
/// `smb-cli/copy.rs`'s `Path::Local` branch calls straight into
/// `std::fs`/`tokio::fs` with no session object in between.
#[derive(Debug, Clone, Copy, Default)]
pub struct Posix;

impl Posix {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn attributes_from_metadata(meta: &fs::Metadata) -> FileAttributes {
        let mut attrs = FileAttributes::new();
        if meta.is_dir() {
            attrs.set_directory(true);
        }
        if meta.file_type().is_symlink() {
            attrs.set_reparse_point(true);
        }
        if meta.permissions().mode() & 0o200 == 0 {
            attrs.set_readonly(true);
        }
        attrs
    }
}

impl FsAdapter for Posix {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            short_names: false,
            alternate_data_streams: false,
            reparse_points: false,
            security_descriptors: false,
            hard_links: true,
        }
    }

    fn stat(&self, path: &Path, dereference: bool) -> std::io::Result<Stat> {
        let meta = if dereference {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };

        let kind = if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::Regular
        } else {
            EntryKind::Other
        };

        Ok(Stat {
            kind,
            size: meta.len(),
            attributes: Self::attributes_from_metadata(&meta),
            created: meta
                .created()
                .map(FileTime::from_system_time)
                .unwrap_or(FileTime::ZERO),
            modified: meta
                .modified()
                .map(FileTime::from_system_time)
                .unwrap_or(FileTime::ZERO),
            accessed: meta
                .accessed()
                .map(FileTime::from_system_time)
                .unwrap_or(FileTime::ZERO),
            device_inode: (meta.dev(), meta.ino()),
            nlink: meta.nlink(),
            unix: Some(UnixMetadata {
                uid: meta.uid(),
                gid: meta.gid(),
                mode: meta.mode(),
                rdev: meta.rdev(),
            }),
        })
    }

    fn list_children(&self, path: &Path) -> std::io::Result<Vec<std::ffi::OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name());
        }
        Ok(names)
    }

    fn read_link(&self, path: &Path) -> std::io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn open_for_read(&self, path: &Path) -> std::io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn create_directory(&self, path: &Path) -> std::io::Result<()> {
        fs::create_dir(path)
    }

    fn create_file(&self, path: &Path) -> std::io::Result<()> {
        fs::File::create(path)?;
        Ok(())
    }

    fn open_stream_for_write(
        &self,
        path: &Path,
        name: Option<&str>,
    ) -> std::io::Result<Box<dyn Write>> {
        if name.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "POSIX adapter has no alternate data streams",
            ));
        }
        Ok(Box::new(fs::OpenOptions::new().write(true).open(path)?))
    }

    fn set_attributes(&self, path: &Path, attrs: FileAttributes) -> std::io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        let mut perms = meta.permissions();
        let mode = perms.mode();
        let new_mode = if attrs.readonly() {
            mode & !0o222
        } else {
            mode | 0o200
        };
        if new_mode != mode {
            perms.set_mode(new_mode);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    fn hard_link(&self, existing: &Path, new: &Path) -> std::io::Result<()> {
        fs::hard_link(existing, new)
    }

    fn set_times(
        &self,
        path: &Path,
        _creation: FileTime,
        write: FileTime,
        access: FileTime,
    ) -> std::io::Result<()> {
        // POSIX has no creation-time setter through std; last-write and
        // last-access are applied via `std::fs::File::set_times` (stable
        // since Rust 1.75, below this workspace's 1.85.0 floor). A
        // read-only handle is enough — `futimens` checks filesystem
        // permission on the path, not the mode the handle was opened
        // with — so this also works for directories, which cannot be
        // opened writable on most platforms.
        let file = fs::File::open(path)?;
        let mut times = fs::FileTimes::new();
        if let Some(t) = write.to_system_time() {
            times = times.set_modified(t);
        }
        if let Some(t) = access.to_system_time() {
            times = times.set_accessed(t);
        }
        file.set_times(times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn stat_reports_regular_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        fs::File::create(&path).unwrap().write_all(b"hello").unwrap();

        let posix = Posix::new();
        let stat = posix.stat(&path, false).unwrap();
        assert_eq!(stat.kind, EntryKind::Regular);
        assert_eq!(stat.size, 5);
    }

    #[test]
    fn stat_does_not_dereference_symlink_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let posix = Posix::new();
        let stat = posix.stat(&link, false).unwrap();
        assert_eq!(stat.kind, EntryKind::Symlink);

        let deref = posix.stat(&link, true).unwrap();
        assert_eq!(deref.kind, EntryKind::Directory);
    }

    #[test]
    fn hard_link_creates_second_name_for_same_inode() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::File::create(&a).unwrap().write_all(b"x").unwrap();

        let posix = Posix::new();
        posix.hard_link(&a, &b).unwrap();

        let stat_a = posix.stat(&a, false).unwrap();
        let stat_b = posix.stat(&b, false).unwrap();
        assert_eq!(stat_a.device_inode, stat_b.device_inode);
        assert_eq!(stat_a.nlink, 2);
    }
}
