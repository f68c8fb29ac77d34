//! The dentry/inode model, lookup table, capture config, and the
//! capture/apply engines (spec.md §2 components 1-8): the capture-and-
//! apply engine this crate exists to provide.
//!
//! Consumers construct a [`LookupTable`] and an [`ImageMetadataRegistry`]
//! once per WIM, then drive [`capture::add_image`]/
//! [`capture::add_image_multisource`] to populate images and
//! [`apply::apply_image`] to reconstruct one onto a target volume.

pub mod apply;
pub mod capture;
pub mod config;
pub mod error;
pub mod lookup_table;
pub mod progress;
pub mod registry;
pub mod tree;

pub use apply::{apply_image, apply_image_to_ntfs_volume, ApplyFlags};
pub use capture::{
    add_image, add_image_multisource, CaptureFlags, CaptureResult, CaptureSource,
    UNIX_DATA_STREAM_NAME,
};
pub use config::CaptureConfig;
pub use error::{Error, Result};
pub use lookup_table::{LookupTable, Residence, StreamEntry};
pub use progress::{no_progress, ProgressEvent};
pub use registry::{ImageDescriptor, ImageMetadataRegistry};
pub use tree::{Dentry, DentryId, Inode, InodeId, NamedStream, Tree};

pub use wim_security::{SecurityId, SecuritySet};
