//! Primitive data types shared by the `wim-capture` crates.
//!
//! These mirror the role `smb-dtyp`/`smb-fscc` play in a protocol stack:
//! small, dependency-light value types with no knowledge of the engines
//! that consume them.

pub mod digest;
pub mod file_attributes;
pub mod file_time;
pub mod reparse;

pub use digest::Sha1Digest;
pub use file_attributes::FileAttributes;
pub use file_time::FileTime;
pub use reparse::ReparseTag;
