//! The image metadata registry (spec.md §3 `ImageDescriptor`, §4.4 step 6
//! "Append a fresh `ImageDescriptor`"): an append-only array of images,
//! each owning a root dentry tree, its own `SecuritySet`, and a handle to
//! a metadata-stream placeholder in the shared `LookupTable`.

use wim_dtyp::Sha1Digest;
use wim_security::SecuritySet;

use crate::error::{Error, Result};
use crate::lookup_table::{LookupTable, Residence, StreamEntry};
use crate::tree::{DentryId, Tree};

/// One captured image inside a WIM (spec.md §3 `ImageDescriptor`).
///
/// Owns its root dentry tree and security set outright; the byte content
/// its streams reference lives in the caller's shared [`LookupTable`].
pub struct ImageDescriptor {
    pub name: String,
    pub tree: Tree,
    pub root: DentryId,
    pub security: SecuritySet,
    /// The digest of this image's metadata-stream placeholder in the
    /// shared lookup table (spec.md §11, `add_new_dentry_tree`'s
    /// `random_hash()` call).
    pub metadata_stream: Sha1Digest,
    /// Set whenever the image is created or subsequently mutated;
    /// persisting it to the XML registry is out of scope for this core
    /// (spec.md §11).
    pub modified: bool,
}

/// Append-only array of [`ImageDescriptor`]s plus the boot-image marker
/// (spec.md §2 component 8, §4.4 step 8).
#[derive(Default)]
pub struct ImageMetadataRegistry {
    images: Vec<ImageDescriptor>,
    boot_index: Option<usize>,
}

impl ImageMetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ImageDescriptor> {
        self.images.get(index)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ImageDescriptor> {
        self.images.get_mut(index)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.images.iter().position(|i| i.name == name)
    }

    #[must_use]
    pub fn boot_index(&self) -> Option<usize> {
        self.boot_index
    }

    /// Appends a freshly-captured image (spec.md §4.4 steps 6 and 8):
    /// allocates a random, collision-free metadata-stream digest in
    /// `lookup` flagged `is_metadata`, stores the image, and marks it as
    /// the boot image when `boot` is set.
    ///
    /// Fails with [`Error::ImageNameCollision`] if `name` already names an
    /// image in this registry (spec.md §7).
    pub fn append(
        &mut self,
        name: String,
        tree: Tree,
        root: DentryId,
        security: SecuritySet,
        lookup: &mut LookupTable,
        boot: bool,
    ) -> Result<usize> {
        if self.find_by_name(&name).is_some() {
            return Err(Error::ImageNameCollision(name));
        }

        let digest = lookup.unique_random_digest();
        let mut entry = StreamEntry::new(digest, 0, Residence::Absent);
        entry.is_metadata = true;
        lookup.insert(entry);
        lookup.ref_up(&digest);

        let index = self.images.len();
        self.images.push(ImageDescriptor {
            name,
            tree,
            root,
            security,
            metadata_stream: digest,
            modified: true,
        });
        if boot {
            self.boot_index = Some(index);
        }
        log::debug!("registered image #{index} with metadata stream {digest}");
        Ok(index)
    }

    /// Marks an existing image dirty (spec.md §3 `ImageDescriptor`
    /// lifecycle: "mutation of existing images requires setting
    /// `modified`").
    pub fn mark_modified(&mut self, index: usize) {
        if let Some(image) = self.images.get_mut(index) {
            image.modified = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.images.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_dense_metadata_digests_and_refcounts() {
        let mut registry = ImageMetadataRegistry::new();
        let mut lookup = LookupTable::new();

        let mut tree1 = Tree::new();
        let root1 = tree1.ensure_root();
        registry.append("a".into(), tree1, root1, SecuritySet::new(), &mut lookup, true).unwrap();

        let mut tree2 = Tree::new();
        let root2 = tree2.ensure_root();
        registry.append("b".into(), tree2, root2, SecuritySet::new(), &mut lookup, false).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.boot_index(), Some(0));
        assert_ne!(registry.get(0).unwrap().metadata_stream, registry.get(1).unwrap().metadata_stream);
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn duplicate_image_name_is_rejected() {
        let mut registry = ImageMetadataRegistry::new();
        let mut lookup = LookupTable::new();
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        registry.append("dup".into(), tree, root, SecuritySet::new(), &mut lookup, false).unwrap();

        let mut tree2 = Tree::new();
        let root2 = tree2.ensure_root();
        let err = registry
            .append("dup".into(), tree2, root2, SecuritySet::new(), &mut lookup, false)
            .unwrap_err();
        assert!(matches!(err, Error::ImageNameCollision(_)));
    }
}
