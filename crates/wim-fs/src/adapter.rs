//! The Filesystem Capability Adapter (spec.md §4.6): the abstract
//! interface both engines call through. Mirrors the way `smb-cli/copy.rs`
//! treats `Path::Local`/`Path::Remote` as interchangeable endpoints behind
//! one set of operations — here the two "endpoints" are the capture
//! source and the apply target, behind one `FsAdapter` trait instead of
//! an enum, since a single capture or apply pass only ever talks to one
//! backend at a time.

use std::io::{Read, Write};
use std::path::Path;

use wim_dtyp::{FileAttributes, FileTime, ReparseTag};

/// What a backend can represent. The engines gate optional code paths on
/// these (spec.md §9 "Capability negotiation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub short_names: bool,
    pub alternate_data_streams: bool,
    pub reparse_points: bool,
    pub security_descriptors: bool,
    pub hard_links: bool,
}

/// The kind of filesystem entry `stat` observed, before the capture
/// engine has decided what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Raw POSIX ownership/mode bits, captured for the UNIX-data mode
/// alternate data stream (spec.md §4.4 step 4, SPEC_FULL §11). `None` on
/// an adapter that has no such concept (e.g. a hypothetical Win32/NTFS
/// backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixMetadata {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
}

/// Everything the capture engine needs out of a `stat` call.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub kind: EntryKind,
    pub size: u64,
    pub attributes: FileAttributes,
    pub created: FileTime,
    pub modified: FileTime,
    pub accessed: FileTime,
    /// Opaque on-device inode identifier, `(device, inode)`. Used for
    /// hard-link detection during capture (spec.md §9).
    pub device_inode: (u64, u64),
    pub nlink: u64,
    pub unix: Option<UnixMetadata>,
}

/// One named alternate data stream, as reported by `list_streams`.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub name: String,
    pub size: u64,
}

/// A reparse buffer as read off the device: tag plus payload, header
/// already stripped (invariant I6).
#[derive(Debug, Clone)]
pub struct ReparseData {
    pub tag: ReparseTag,
    pub payload: Vec<u8>,
}

/// The abstract interface consumed by both engines (spec.md §4.6).
///
/// A concrete adapter addresses entries by [`Path`] directly rather than
/// through an opaque handle type: on every backend this crate implements,
/// a path *is* the stable, cheaply-cloned identifier the engines need
/// (spec.md's `pathToInode(path) -> handle` collapses to the identity
/// function here).
pub trait FsAdapter {
    fn capabilities(&self) -> Capabilities;

    // ---- capture-side operations ----

    /// `dereference`: whether a symlink at `path` itself should be
    /// followed (spec.md §4.4 step 2 — controlled by the `DEREFERENCE`
    /// flag, and forced `true` once for a symlink capture root).
    fn stat(&self, path: &Path, dereference: bool) -> std::io::Result<Stat>;
    fn list_children(&self, path: &Path) -> std::io::Result<Vec<std::ffi::OsString>>;
    fn read_link(&self, path: &Path) -> std::io::Result<std::path::PathBuf>;
    fn open_for_read(&self, path: &Path) -> std::io::Result<Box<dyn Read>>;
    fn short_name_of(&self, _path: &Path) -> std::io::Result<Option<String>> {
        Ok(None)
    }
    fn read_security(&self, _path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        Ok(None)
    }
    fn list_streams(&self, _path: &Path) -> std::io::Result<Vec<StreamMeta>> {
        Ok(Vec::new())
    }
    fn open_named_stream_for_read(
        &self,
        _path: &Path,
        _name: &str,
    ) -> std::io::Result<Box<dyn Read>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "named streams are not supported by this adapter",
        ))
    }
    fn read_reparse(&self, _path: &Path) -> std::io::Result<Option<ReparseData>> {
        Ok(None)
    }

    // ---- apply-side operations ----

    fn create_directory(&self, path: &Path) -> std::io::Result<()>;
    fn create_file(&self, path: &Path) -> std::io::Result<()>;
    fn open_stream_for_write(
        &self,
        path: &Path,
        name: Option<&str>,
    ) -> std::io::Result<Box<dyn Write>>;
    fn set_attributes(&self, path: &Path, attrs: FileAttributes) -> std::io::Result<()>;
    fn set_security(&self, _path: &Path, _descriptor: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
    fn set_reparse(&self, _path: &Path, _tag: ReparseTag, _payload: &[u8]) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "reparse points are not supported by this adapter",
        ))
    }
    fn hard_link(&self, existing: &Path, new: &Path) -> std::io::Result<()>;
    fn set_short_name(&self, _path: &Path, _short_name: &str) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "short names are not supported by this adapter",
        ))
    }
    fn set_times(
        &self,
        path: &Path,
        creation: FileTime,
        write: FileTime,
        access: FileTime,
    ) -> std::io::Result<()>;
}
