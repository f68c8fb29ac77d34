//! The crate-wide error taxonomy (spec.md §7): a closed, non-overlapping
//! set of kinds, each carrying the path/context needed to print "a single
//! line naming the operation and the path involved." Adapter I/O failures
//! are wrapped via `#[source] std::io::Error`, the way `smb-msg`'s error
//! types wrap lower-level transport failures.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory")]
    NoMem,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid capture configuration: {0}")]
    InvalidCaptureConfig(String),

    #[error("cannot overlay onto '{path}': {reason}")]
    InvalidOverlay { path: String, reason: String },

    #[error("invalid dentry '{path}': {reason}")]
    InvalidDentry { path: String, reason: String },

    #[error("resource hash mismatch for '{path}': expected {expected}, got {actual}")]
    InvalidResourceHash { path: String, expected: String, actual: String },

    #[error("invalid UTF-8 in path '{path}'")]
    InvalidUtf8 { path: PathBuf },

    #[error("iconv is not available on this platform")]
    IconvNotAvailable,

    #[error("stat failed for '{path}'")]
    Stat { path: PathBuf, #[source] source: std::io::Error },

    #[error("'{path}' is not a directory")]
    NotDir { path: PathBuf },

    #[error("'{path}' is a special file this adapter cannot capture")]
    SpecialFile { path: PathBuf },

    #[error("open failed for '{path}'")]
    Open { path: PathBuf, #[source] source: std::io::Error },

    #[error("read failed for '{path}'")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("write failed for '{path}'")]
    Write { path: PathBuf, #[source] source: std::io::Error },

    #[error("readlink failed for '{path}'")]
    ReadLink { path: PathBuf, #[source] source: std::io::Error },

    #[error("an image named '{0}' already exists")]
    ImageNameCollision(String),

    #[error("splitting a WIM is not supported by this core")]
    SplitUnsupported,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("NTFS backend failure: {0}")]
    NtfsBackendFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;
