//! Capture progress messages (spec.md §6). Delivered synchronously from
//! the engine thread; per spec.md §9 the callback must not mutate the
//! engine's own data structures, since it runs interleaved with the walk
//! that produced it.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    ScanBegin { source: PathBuf, target: String },
    ScanDentry { cur_path: String, excluded: bool },
    ScanEnd { source: PathBuf, target: String },
}

/// A callback that does nothing, for callers with no progress UI.
pub fn no_progress(_event: ProgressEvent) {}
