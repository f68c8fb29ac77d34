//! The Filesystem Capability Adapter abstraction (spec.md §4.6) and a
//! POSIX backend, plus the streaming digest/copy utilities both engines
//! share (spec.md §2.9).

pub mod adapter;
pub mod io_utils;
pub mod posix;

pub use adapter::{Capabilities, EntryKind, FsAdapter, ReparseData, Stat, StreamMeta, UnixMetadata};
pub use posix::Posix;
