//! The apply engine (spec.md §4.5): two passes over the dentry tree that
//! reconstruct it onto a target volume through a [`FsAdapter`].
//!
//! Pass 1 walks pre-order, creating directories and files and writing
//! their content; pass 2 walks post-order, writing timestamps last so
//! that content writes and child creation do not clobber a directory's
//! own modification time (spec.md §5 ordering guarantee 3).

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use wim_dtyp::Sha1Digest;
use wim_fs::{io_utils, FsAdapter};
use wim_security::SecuritySet;

use crate::error::{Error, Result};
use crate::lookup_table::{LookupTable, Residence};
use crate::registry::ImageDescriptor;
use crate::tree::{DentryId, Inode, InodeId, Tree};

/// Apply-side flags (spec.md §6). `symlink` and `hardlink` are only
/// meaningful — and only rejected — in NTFS apply mode
/// ([`apply_image_to_ntfs_volume`]); a generic [`apply_image`] call always
/// honors the tree as captured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyFlags {
    pub verbose: bool,
    pub symlink: bool,
    pub hardlink: bool,
}

fn open_residence(residence: &Residence) -> Result<Box<dyn Read>> {
    match residence {
        Residence::SourceFile(path) => Ok(Box::new(
            std::fs::File::open(path).map_err(|e| Error::Read { path: path.clone(), source: e })?,
        )),
        Residence::InMemory(buf) => Ok(Box::new(Cursor::new(buf.clone()))),
        Residence::NamedStreamOfFile(path, name) => Err(Error::Unsupported(format!(
            "cannot read named stream '{name}' of '{}' without a stream-capable source adapter",
            path.display()
        ))),
        Residence::InWim { .. } => Err(Error::Unsupported(
            "reading a resource directly out of a WIM container requires the container reader, \
             which is a collaborator outside this core"
                .into(),
        )),
        Residence::Absent => Err(Error::Unsupported("stream residence is absent".into())),
    }
}

/// Mutable state threaded through one `applyImage` call.
struct ApplyCtx<'a> {
    tree: &'a Tree,
    security: &'a SecuritySet,
    lookup: &'a LookupTable,
    adapter: &'a dyn FsAdapter,
    target_root: PathBuf,
    /// First extracted path per inode, used to create subsequent hard
    /// links against it (spec.md §4.5 pass 1.b).
    extracted: HashMap<InodeId, PathBuf>,
    /// Dentries already fully populated, so a DOS-name preapply hoist and
    /// the normal top-down walk never double-process one (spec.md §4.5
    /// pass 1 step 3).
    done: HashSet<DentryId>,
    #[allow(dead_code)]
    flags: ApplyFlags,
}

impl<'a> ApplyCtx<'a> {
    fn target_path(&self, d: DentryId) -> PathBuf {
        let cached = self
            .tree
            .dentry(d)
            .cached_path
            .as_ref()
            .expect("apply requires a tree with computed paths");
        let rel = cached.strip_prefix("/").unwrap_or(cached);
        self.target_root.join(rel)
    }

    fn apply_attrs_and_security(&self, inode: &Inode, target_path: &Path) -> Result<()> {
        self.adapter
            .set_attributes(target_path, inode.attributes)
            .map_err(|e| Error::Write { path: target_path.to_path_buf(), source: e })?;
        if let Some(sec_id) = inode.security_id {
            if let Some(bytes) = self.security.get(sec_id) {
                self.adapter
                    .set_security(target_path, bytes)
                    .map_err(|e| Error::Write { path: target_path.to_path_buf(), source: e })?;
            }
        }
        Ok(())
    }

    fn write_stream(&self, target_path: &Path, stream_name: Option<&str>, digest: Sha1Digest) -> Result<()> {
        let entry = self.lookup.lookup(&digest).ok_or_else(|| Error::InvalidDentry {
            path: target_path.display().to_string(),
            reason: format!("stream digest {digest} is not present in the lookup table"),
        })?;
        let reader = open_residence(&entry.residence)?;
        let writer = self
            .adapter
            .open_stream_for_write(target_path, stream_name)
            .map_err(|e| Error::Write { path: target_path.to_path_buf(), source: e })?;
        let (actual, _len) = io_utils::copy_and_hash(reader, writer)
            .map_err(|e| Error::Write { path: target_path.to_path_buf(), source: e })?;
        if actual != digest {
            return Err(Error::InvalidResourceHash {
                path: target_path.display().to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    fn write_reparse(&self, target_path: &Path, inode: &Inode) -> Result<()> {
        let tag = inode.reparse_tag.expect("reparse inode must carry a tag");
        let digest = inode
            .unnamed_stream
            .expect("reparse inode must store its payload as the unnamed stream");
        let entry = self.lookup.lookup(&digest).ok_or_else(|| Error::InvalidDentry {
            path: target_path.display().to_string(),
            reason: format!("reparse payload digest {digest} is not present in the lookup table"),
        })?;
        let mut reader = open_residence(&entry.residence)?;
        let mut payload = Vec::with_capacity(entry.size as usize);
        reader
            .read_to_end(&mut payload)
            .map_err(|e| Error::Read { path: target_path.to_path_buf(), source: e })?;
        if payload.len() > wim_dtyp::reparse::REPARSE_MAX_PAYLOAD_LEN {
            return Err(Error::InvalidDentry {
                path: target_path.display().to_string(),
                reason: "reparse payload exceeds maximum length".into(),
            });
        }
        self.adapter
            .set_reparse(target_path, tag, &payload)
            .map_err(|e| Error::Write { path: target_path.to_path_buf(), source: e })?;
        Ok(())
    }

    /// Finds the sibling (within `parent`) that carries the group's DOS
    /// name, enforcing invariant I4 (spec.md §4.5 pass 1.a). Returns
    /// `None` when `d` itself is the sole short-named dentry, or when no
    /// dentry in this directory's slice of the link group has one.
    fn dos_name_sibling(
        &self,
        d: DentryId,
        inode_id: InodeId,
        parent: Option<DentryId>,
    ) -> Result<Option<DentryId>> {
        let mut count = 0usize;
        let mut other = None;
        for &sib in &self.tree.inode(inode_id).dentries {
            if self.tree.dentry(sib).parent != parent {
                continue;
            }
            if self.tree.dentry(sib).short_name.is_some() {
                count += 1;
                if sib != d {
                    other = Some(sib);
                }
            }
        }
        if count > 1 {
            return Err(Error::InvalidDentry {
                path: self.target_path(d).display().to_string(),
                reason: "more than one dentry in this hard-link group has a non-empty short name"
                    .into(),
            });
        }
        Ok(other)
    }

    fn populate_root(&mut self, root: DentryId) -> Result<()> {
        let inode_id = self.tree.dentry(root).inode;
        let inode = self.tree.inode(inode_id);
        let target_root = self.target_root.clone();
        self.apply_attrs_and_security(inode, &target_root)?;
        self.done.insert(root);
        log::debug!("populated root at '{}'", target_root.display());
        for child in self.tree.dentry(root).children().to_vec() {
            self.populate(child)?;
        }
        Ok(())
    }

    fn populate(&mut self, d: DentryId) -> Result<()> {
        if self.done.contains(&d) {
            return Ok(());
        }
        let target_path = self.target_path(d);
        let inode_id = self.tree.dentry(d).inode;

        if self.tree.is_directory(d) {
            self.adapter
                .create_directory(&target_path)
                .map_err(|e| Error::Write { path: target_path.clone(), source: e })?;
            self.apply_attrs_and_security(self.tree.inode(inode_id), &target_path)?;
            self.done.insert(d);
            log::debug!("populated directory '{}'", target_path.display());
            for child in self.tree.dentry(d).children().to_vec() {
                self.populate(child)?;
            }
            return Ok(());
        }

        let parent = self.tree.dentry(d).parent;
        if let Some(sibling) = self.dos_name_sibling(d, inode_id, parent)? {
            if !self.done.contains(&sibling) {
                log::debug!(
                    "hoisting DOS-named sibling '{}' before '{}'",
                    self.target_path(sibling).display(),
                    target_path.display()
                );
                self.populate(sibling)?;
            }
        }

        if let Some(existing) = self.extracted.get(&inode_id).cloned() {
            self.adapter
                .hard_link(&existing, &target_path)
                .map_err(|e| Error::Write { path: target_path.clone(), source: e })?;
            if let Some(short) = self.tree.dentry(d).short_name.clone() {
                self.adapter
                    .set_short_name(&target_path, &short)
                    .map_err(|e| Error::Write { path: target_path.clone(), source: e })?;
            }
            self.done.insert(d);
            log::debug!("linked '{}' -> '{}'", target_path.display(), existing.display());
            return Ok(());
        }

        self.adapter
            .create_file(&target_path)
            .map_err(|e| Error::Write { path: target_path.clone(), source: e })?;
        self.extracted.insert(inode_id, target_path.clone());

        let inode = self.tree.inode(inode_id).clone();
        if inode.attributes.reparse_point() {
            self.write_reparse(&target_path, &inode)?;
        } else if let Some(digest) = inode.unnamed_stream {
            self.write_stream(&target_path, None, digest)?;
        }
        if self.adapter.capabilities().alternate_data_streams {
            for stream in &inode.streams {
                self.write_stream(&target_path, Some(&stream.name), stream.digest)?;
            }
        } else if !inode.streams.is_empty() {
            log::warn!(
                "target adapter has no alternate-data-stream support; dropping {} stream(s) for '{}'",
                inode.streams.len(),
                target_path.display()
            );
        }

        self.apply_attrs_and_security(&inode, &target_path)?;

        if let Some(short) = self.tree.dentry(d).short_name.clone() {
            self.adapter
                .set_short_name(&target_path, &short)
                .map_err(|e| Error::Write { path: target_path.clone(), source: e })?;
        }

        self.done.insert(d);
        log::debug!("populated '{}'", target_path.display());
        Ok(())
    }

    fn apply_timestamps(&mut self, d: DentryId) -> Result<()> {
        for child in self.tree.dentry(d).children().to_vec() {
            self.apply_timestamps(child)?;
        }
        let target_path = self.target_path(d);
        let inode = self.tree.inode(self.tree.dentry(d).inode);
        self.adapter
            .set_times(&target_path, inode.created, inode.modified, inode.accessed)
            .map_err(|e| Error::Write { path: target_path, source: e })?;
        Ok(())
    }
}

/// `applyImage` (spec.md §4.5): reconstructs `image`'s dentry tree onto
/// `target_root` through `adapter`, pulling stream bytes via `lookup`
/// (the same shared [`LookupTable`] the capture engine populated — spec.md
/// §2's control-flow diagram: "`ApplyEngine(image, targetAdapter)` ...
/// pulling stream bytes via `LookupTable`"). Strong property: on success,
/// the target filesystem is observationally equivalent to the captured
/// tree modulo whatever `adapter`'s capability set cannot represent.
pub fn apply_image(
    image: &ImageDescriptor,
    lookup: &LookupTable,
    target_root: &Path,
    adapter: &dyn FsAdapter,
    flags: ApplyFlags,
) -> Result<()> {
    let mut ctx = ApplyCtx {
        tree: &image.tree,
        security: &image.security,
        lookup,
        adapter,
        target_root: target_root.to_path_buf(),
        extracted: HashMap::new(),
        done: HashSet::new(),
        flags,
    };
    ctx.populate_root(image.root)?;
    ctx.apply_timestamps(image.root)?;
    Ok(())
}

/// `applyImageToNtfsVolume` (spec.md §6): the public NTFS apply entry
/// point. `SYMLINK` and `HARDLINK` are rejected in this mode (the NTFS
/// backend always reconstructs reparse points and link topology
/// natively); beyond that check this delegates straight to
/// [`apply_image`], since the abstract capability model in spec.md §4.6
/// is all this core specifies about any particular backend.
pub fn apply_image_to_ntfs_volume(
    image: &ImageDescriptor,
    lookup: &LookupTable,
    device_path: &Path,
    adapter: &dyn FsAdapter,
    flags: ApplyFlags,
) -> Result<()> {
    if flags.symlink || flags.hardlink {
        return Err(Error::Unsupported(
            "SYMLINK and HARDLINK flags are rejected when applying to an NTFS volume".into(),
        ));
    }
    apply_image(image, lookup, device_path, adapter, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{add_image, CaptureFlags};
    use crate::config::CaptureConfig;
    use crate::lookup_table::LookupTable;
    use crate::progress::no_progress;
    use crate::registry::ImageMetadataRegistry;
    use std::fs;
    use std::io::Write as _;
    use wim_fs::Posix;

    fn capture_dir(dir: &Path) -> (ImageMetadataRegistry, LookupTable) {
        let adapter = Posix::new();
        let config = CaptureConfig::empty();
        let mut lookup = LookupTable::new();
        let mut registry = ImageMetadataRegistry::new();
        let mut on_progress = no_progress;
        let result =
            add_image(dir, &config, CaptureFlags::default(), &adapter, &mut lookup, &mut on_progress)
                .unwrap();
        registry
            .append("test".into(), result.tree, result.root, result.security, &mut lookup, false)
            .unwrap();
        (registry, lookup)
    }

    #[test]
    fn round_trips_plain_file_content() {
        let src = tempfile::tempdir().unwrap();
        fs::File::create(src.path().join("hello.txt")).unwrap().write_all(b"hi there\n").unwrap();

        let (registry, lookup) = capture_dir(src.path());
        let image = registry.get(0).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let adapter = Posix::new();
        apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap();

        let content = fs::read_to_string(dst.path().join("hello.txt")).unwrap();
        assert_eq!(content, "hi there\n");
    }

    #[test]
    fn round_trips_hard_links_as_links_not_copies() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("x");
        let b = src.path().join("y");
        fs::File::create(&a).unwrap().write_all(b"hello\n").unwrap();
        fs::hard_link(&a, &b).unwrap();

        let (registry, lookup) = capture_dir(src.path());
        let image = registry.get(0).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let adapter = Posix::new();
        apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap();

        let stat_x = adapter.stat(&dst.path().join("x"), false).unwrap();
        let stat_y = adapter.stat(&dst.path().join("y"), false).unwrap();
        assert_eq!(stat_x.device_inode, stat_y.device_inode);
        assert_eq!(stat_x.nlink, 2);
    }

    #[test]
    fn resource_hash_mismatch_is_rejected() {
        let src = tempfile::tempdir().unwrap();
        fs::File::create(src.path().join("f")).unwrap().write_all(b"abc").unwrap();

        let (registry, mut lookup) = capture_dir(src.path());
        let image = registry.get(0).unwrap();

        // Tamper with the source file after capture so the bytes the
        // residence points at no longer match the recorded digest.
        fs::File::create(src.path().join("f")).unwrap().write_all(b"xyz!!").unwrap();
        let digest = *lookup.iter().next().unwrap().0;
        lookup.lookup_mut(&digest).unwrap().size = 3;

        let dst = tempfile::tempdir().unwrap();
        let adapter = Posix::new();
        let err =
            apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidResourceHash { .. }));
    }

    #[test]
    fn empty_directory_round_trips_with_no_content_writes() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();

        let (registry, lookup) = capture_dir(src.path());
        let image = registry.get(0).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let adapter = Posix::new();
        apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap();

        assert!(dst.path().join("sub").is_dir());
    }

    /// A `Posix`-backed adapter that also accepts `set_short_name` (which
    /// `Posix` itself has no concept of) and records the order `create_file`
    /// is called in, so DOS-name-hoisting order can be observed even though
    /// no `FsAdapter` this core ships reports `short_names` capability.
    struct NamingAdapter {
        inner: Posix,
        created: std::cell::RefCell<Vec<PathBuf>>,
    }

    impl NamingAdapter {
        fn new() -> Self {
            Self { inner: Posix::new(), created: std::cell::RefCell::new(Vec::new()) }
        }
    }

    impl FsAdapter for NamingAdapter {
        fn capabilities(&self) -> wim_fs::Capabilities {
            self.inner.capabilities()
        }
        fn stat(&self, path: &Path, dereference: bool) -> std::io::Result<wim_fs::Stat> {
            self.inner.stat(path, dereference)
        }
        fn list_children(&self, path: &Path) -> std::io::Result<Vec<std::ffi::OsString>> {
            self.inner.list_children(path)
        }
        fn read_link(&self, path: &Path) -> std::io::Result<PathBuf> {
            self.inner.read_link(path)
        }
        fn open_for_read(&self, path: &Path) -> std::io::Result<Box<dyn Read>> {
            self.inner.open_for_read(path)
        }
        fn create_directory(&self, path: &Path) -> std::io::Result<()> {
            self.inner.create_directory(path)
        }
        fn create_file(&self, path: &Path) -> std::io::Result<()> {
            self.created.borrow_mut().push(path.to_path_buf());
            self.inner.create_file(path)
        }
        fn open_stream_for_write(
            &self,
            path: &Path,
            name: Option<&str>,
        ) -> std::io::Result<Box<dyn std::io::Write>> {
            self.inner.open_stream_for_write(path, name)
        }
        fn set_attributes(&self, path: &Path, attrs: wim_dtyp::FileAttributes) -> std::io::Result<()> {
            self.inner.set_attributes(path, attrs)
        }
        fn hard_link(&self, existing: &Path, new: &Path) -> std::io::Result<()> {
            self.inner.hard_link(existing, new)
        }
        fn set_short_name(&self, _path: &Path, _short_name: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn set_times(
            &self,
            path: &Path,
            creation: wim_dtyp::FileTime,
            write: wim_dtyp::FileTime,
            access: wim_dtyp::FileTime,
        ) -> std::io::Result<()> {
            self.inner.set_times(path, creation, write, access)
        }
    }

    #[test]
    fn dos_named_sibling_is_hoisted_before_the_rest_of_its_link_group() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("alpha");
        let b = src.path().join("beta");
        fs::File::create(&a).unwrap().write_all(b"hi\n").unwrap();
        fs::hard_link(&a, &b).unwrap();

        let (mut registry, lookup) = capture_dir(src.path());
        {
            let image = registry.get_mut(0).unwrap();
            let beta = image.tree.find_child(image.root, "beta").unwrap();
            image.tree.dentry_mut(beta).short_name = Some("BETA".into());
        }
        let image = registry.get(0).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let adapter = NamingAdapter::new();
        apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap();

        let created = adapter.created.borrow();
        assert_eq!(created.len(), 1, "the second sibling should hard-link, not create_file, got {created:?}");
        assert!(
            created[0].ends_with("beta"),
            "the DOS-named sibling must be extracted first, got {created:?}"
        );
    }

    #[test]
    fn two_short_names_in_one_link_group_is_invalid_dentry() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("alpha");
        let b = src.path().join("beta");
        fs::File::create(&a).unwrap().write_all(b"hi\n").unwrap();
        fs::hard_link(&a, &b).unwrap();

        let (mut registry, lookup) = capture_dir(src.path());
        {
            let image = registry.get_mut(0).unwrap();
            let alpha = image.tree.find_child(image.root, "alpha").unwrap();
            let beta = image.tree.find_child(image.root, "beta").unwrap();
            image.tree.dentry_mut(alpha).short_name = Some("ALPHA".into());
            image.tree.dentry_mut(beta).short_name = Some("BETA".into());
        }
        let image = registry.get(0).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let adapter = NamingAdapter::new();
        let err = apply_image(image, &lookup, dst.path(), &adapter, ApplyFlags::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidDentry { .. }));
    }
}
