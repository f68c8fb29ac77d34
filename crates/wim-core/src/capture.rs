//! The capture engine (spec.md §4.4): recursive `buildDentryTree` plus
//! the multi-source driver (`addImage`/`addImageMultisource`).

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use modular_bitfield::prelude::*;
use sha1::{Digest, Sha1};
use wim_dtyp::{ReparseTag, Sha1Digest};
use wim_fs::{EntryKind, FsAdapter};
use wim_security::SecuritySet;

use crate::error::{Error, Result};
use crate::lookup_table::{LookupTable, Residence, StreamEntry};
use crate::progress::ProgressEvent;
use crate::tree::{DentryId, Inode, InodeId, NamedStream, Tree};

/// The name under which UNIX ownership/mode data is stored as an
/// alternate data stream (spec.md §11, fixed by the original).
pub const UNIX_DATA_STREAM_NAME: &str = "$$__wimlib_UNIX_data";

/// Capture flags (spec.md §6): the public bits occupy the low byte, the
/// internal-only `ROOT`/`SOURCE` markers the next two bits, so one
/// 32-bit word threads unchanged through every recursive call
/// (SPEC_FULL §11).
#[bitfield(bits = 32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureFlags {
    pub boot: bool,
    pub verbose: bool,
    pub dereference: bool,
    pub unix_data: bool,
    pub ntfs: bool,
    #[skip]
    __: B3,
    pub root: bool,
    pub source: bool,
    #[skip]
    __: B22,
}

impl CaptureFlags {
    #[must_use]
    pub fn public(boot: bool, verbose: bool, dereference: bool, unix_data: bool, ntfs: bool) -> Self {
        Self::new()
            .with_boot(boot)
            .with_verbose(verbose)
            .with_dereference(dereference)
            .with_unix_data(unix_data)
            .with_ntfs(ntfs)
    }

    /// The flags a per-source top-level `buildDentryTree` call starts
    /// with: `ROOT` and `SOURCE` both set, cleared again before recursing
    /// into children (spec.md §4.4 "Directory").
    #[must_use]
    fn at_source_root(self) -> Self {
        self.with_root(true).with_source(true)
    }

    #[must_use]
    fn for_child(self) -> Self {
        self.with_root(false).with_source(false)
    }
}

/// One capture source: an on-disk subtree paired with its target path
/// inside the image (spec.md glossary "Capture source").
#[derive(Debug, Clone)]
pub struct CaptureSource {
    pub path: PathBuf,
    /// Canonicalized: no leading or trailing `/` (spec.md §4.4 step 1).
    pub target: String,
}

impl CaptureSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, target: impl AsRef<str>) -> Self {
        Self { path: path.into(), target: canonicalize_target(target.as_ref()) }
    }
}

fn canonicalize_target(target: &str) -> String {
    target.trim_matches('/').to_string()
}

fn path_to_forward_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn sha1_bytes(bytes: &[u8]) -> Sha1Digest {
    let digest: [u8; 20] = Sha1::digest(bytes).into();
    Sha1Digest::from_bytes(digest)
}

/// Mutable state threaded through one source's recursive
/// `buildDentryTree` calls. `inode_map` is scoped per source (spec.md §9
/// "Hard-link detection during capture").
struct CaptureCtx<'a> {
    adapter: &'a dyn FsAdapter,
    config: &'a crate::config::CaptureConfig,
    prefix: String,
    lookup: &'a mut LookupTable,
    security: &'a mut SecuritySet,
    tree: &'a mut Tree,
    inode_map: HashMap<(u64, u64), InodeId>,
    on_progress: &'a mut dyn FnMut(ProgressEvent),
}

impl<'a> CaptureCtx<'a> {
    /// Looks up or inserts a lookup-table entry for `digest`, then bumps
    /// its refcount — the dedup-then-bind pattern every stream (main
    /// content, ADS, UNIX-data, reparse payload) goes through.
    fn dedup_and_bind(&mut self, digest: Sha1Digest, size: u64, residence: Residence) {
        if self.lookup.lookup(&digest).is_none() {
            self.lookup.insert(StreamEntry::new(digest, size, residence));
        }
        self.lookup.ref_up(&digest);
    }

    /// Per-node recursive build (spec.md §4.4). Returns `None` when the
    /// node was excluded.
    fn build_dentry_tree(
        &mut self,
        source_path: &Path,
        name: OsString,
        flags: CaptureFlags,
    ) -> Result<Option<DentryId>> {
        // 1. Filter.
        let path_str = path_to_forward_slash(source_path);
        let excluded = self.config.exclude(&path_str, Some(&self.prefix), true);
        if excluded {
            if flags.root() {
                return Err(Error::InvalidCaptureConfig(
                    "cannot exclude the root of capture".into(),
                ));
            }
            (self.on_progress)(ProgressEvent::ScanDentry { cur_path: path_str, excluded: true });
            return Ok(None);
        }
        (self.on_progress)(ProgressEvent::ScanDentry { cur_path: path_str.clone(), excluded: false });

        // 2. Stat, with the root-symlink dereference exception.
        let stat = if flags.root() {
            let lstat = self
                .adapter
                .stat(source_path, false)
                .map_err(|e| Error::Stat { path: source_path.to_path_buf(), source: e })?;
            if lstat.kind == EntryKind::Symlink {
                let deref = self
                    .adapter
                    .stat(source_path, true)
                    .map_err(|e| Error::Stat { path: source_path.to_path_buf(), source: e })?;
                if deref.kind != EntryKind::Directory {
                    return Err(Error::NotDir { path: source_path.to_path_buf() });
                }
                deref
            } else {
                lstat
            }
        } else {
            self.adapter
                .stat(source_path, flags.dereference())
                .map_err(|e| Error::Stat { path: source_path.to_path_buf(), source: e })?
        };

        let capabilities = self.adapter.capabilities();
        let stream_capable = capabilities.alternate_data_streams || capabilities.reparse_points;

        match stat.kind {
            EntryKind::Regular | EntryKind::Directory | EntryKind::Symlink => {}
            EntryKind::Other if stream_capable => {}
            EntryKind::Other => return Err(Error::SpecialFile { path: source_path.to_path_buf() }),
        }

        // 3. Create dentry + inode (hard-link detection keyed by the
        // opaque on-device identifier, scoped to this source).
        let inode_id = if let Some(&existing) = self.inode_map.get(&stat.device_inode) {
            existing
        } else {
            let inode = Inode {
                attributes: stat.attributes,
                created: stat.created,
                modified: stat.modified,
                accessed: stat.accessed,
                reparse_tag: None,
                security_id: None,
                device_inode: Some(stat.device_inode),
                unnamed_stream: None,
                streams: Vec::new(),
                dentries: Vec::new(),
                resolved: true,
                inode_number: 0,
            };
            let id = self.tree.new_inode(inode);
            self.inode_map.insert(stat.device_inode, id);
            id
        };
        let dentry_id = self.tree.new_dentry(name, inode_id);

        if capabilities.short_names {
            match self.adapter.short_name_of(source_path) {
                Ok(Some(short)) => self.tree.dentry_mut(dentry_id).short_name = Some(short),
                Ok(None) => {}
                Err(e) => log::warn!("short name lookup failed for {}: {e}", source_path.display()),
            }
        }
        if capabilities.security_descriptors {
            match self.adapter.read_security(source_path) {
                Ok(Some(bytes)) => {
                    let id = self.security.add_descriptor(bytes);
                    self.tree.inode_mut(inode_id).security_id = Some(id);
                }
                Ok(None) => {}
                Err(e) => log::warn!("security read failed for {}: {e}", source_path.display()),
            }
        }

        // 4. UNIX-data mode (optional).
        if flags.unix_data() {
            if let Some(unix) = stat.unix {
                let mut payload = Vec::with_capacity(16);
                payload.extend_from_slice(&unix.uid.to_le_bytes());
                payload.extend_from_slice(&unix.gid.to_le_bytes());
                payload.extend_from_slice(&unix.mode.to_le_bytes());
                payload.extend_from_slice(&(unix.rdev as u32).to_le_bytes());
                let digest = sha1_bytes(&payload);
                let size = payload.len() as u64;
                self.dedup_and_bind(digest, size, Residence::InMemory(payload));
                self.tree
                    .inode_mut(inode_id)
                    .streams
                    .push(NamedStream { name: UNIX_DATA_STREAM_NAME.to_string(), digest });
            }
        }

        // 5. Kind dispatch.
        if stat.attributes.reparse_point() && stream_capable {
            match self.adapter.read_reparse(source_path) {
                Ok(Some(rd)) => {
                    if rd.payload.len() > wim_dtyp::reparse::REPARSE_MAX_TOTAL_LEN {
                        return Err(Error::InvalidDentry {
                            path: path_str,
                            reason: "reparse payload exceeds maximum length".into(),
                        });
                    }
                    let digest = sha1_bytes(&rd.payload);
                    let size = rd.payload.len() as u64;
                    self.dedup_and_bind(digest, size, Residence::InMemory(rd.payload));
                    let inode = self.tree.inode_mut(inode_id);
                    inode.unnamed_stream = Some(digest);
                    inode.reparse_tag = Some(rd.tag);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("reparse read failed for {}: {e}", source_path.display());
                }
            }
        } else if stat.kind == EntryKind::Symlink {
            self.capture_symlink(source_path, inode_id, &path_str)?;
        } else if stat.kind == EntryKind::Directory {
            self.capture_directory(source_path, dentry_id, flags)?;
        } else if stat.kind == EntryKind::Regular {
            if stream_capable {
                self.capture_streams_generic(source_path, inode_id)?;
            } else if stat.size > 0 {
                self.capture_regular_content(source_path, inode_id, stat.size)?;
            }
        }

        log::debug!("captured dentry '{path_str}'");
        Ok(Some(dentry_id))
    }

    fn capture_regular_content(
        &mut self,
        source_path: &Path,
        inode_id: InodeId,
        size: u64,
    ) -> Result<()> {
        let reader = self
            .adapter
            .open_for_read(source_path)
            .map_err(|e| Error::Open { path: source_path.to_path_buf(), source: e })?;
        let (digest, len) = wim_fs::io_utils::hash_reader(reader)
            .map_err(|e| Error::Read { path: source_path.to_path_buf(), source: e })?;
        debug_assert_eq!(len, size, "stat size and streamed length disagree for {source_path:?}");
        self.dedup_and_bind(digest, len, Residence::SourceFile(source_path.to_path_buf()));
        self.tree.inode_mut(inode_id).unnamed_stream = Some(digest);
        log::trace!("bound content stream {digest} for {}", source_path.display());
        Ok(())
    }

    fn capture_streams_generic(&mut self, source_path: &Path, inode_id: InodeId) -> Result<()> {
        let streams = self
            .adapter
            .list_streams(source_path)
            .map_err(|e| Error::Read { path: source_path.to_path_buf(), source: e })?;
        for stream in streams {
            if stream.name.is_empty() {
                if stream.size > 0 {
                    self.capture_regular_content(source_path, inode_id, stream.size)?;
                }
                continue;
            }
            let reader = self
                .adapter
                .open_named_stream_for_read(source_path, &stream.name)
                .map_err(|e| Error::Open { path: source_path.to_path_buf(), source: e })?;
            let (digest, len) = wim_fs::io_utils::hash_reader(reader)
                .map_err(|e| Error::Read { path: source_path.to_path_buf(), source: e })?;
            self.dedup_and_bind(
                digest,
                len,
                Residence::NamedStreamOfFile(source_path.to_path_buf(), stream.name.clone()),
            );
            self.tree.inode_mut(inode_id).streams.push(NamedStream { name: stream.name, digest });
        }
        Ok(())
    }

    /// Synthesizes a reparse buffer for a captured symlink (spec.md §4.4
    /// "Symbolic link (POSIX adapter)"). The payload is this core's own
    /// minimal encoding — a relative/absolute flag followed by the raw
    /// link-target bytes — rather than the Microsoft symlink reparse
    /// buffer's substitute/print-name layout, since nothing downstream of
    /// this core interprets the buffer as a real NTFS reparse point
    /// (spec.md §1 scopes NTFS-specific formats out).
    fn capture_symlink(&mut self, source_path: &Path, inode_id: InodeId, path_str: &str) -> Result<()> {
        let target = self
            .adapter
            .read_link(source_path)
            .map_err(|e| Error::ReadLink { path: source_path.to_path_buf(), source: e })?;
        let mut payload = Vec::with_capacity(4 + target.as_os_str().len());
        payload.extend_from_slice(&(target.is_relative() as u32).to_le_bytes());
        payload.extend_from_slice(target.to_string_lossy().as_bytes());
        if payload.len() > wim_dtyp::reparse::REPARSE_MAX_TOTAL_LEN {
            return Err(Error::InvalidDentry {
                path: path_str.to_string(),
                reason: "reparse payload exceeds maximum length".into(),
            });
        }
        let digest = sha1_bytes(&payload);
        let size = payload.len() as u64;
        self.dedup_and_bind(digest, size, Residence::InMemory(payload));

        let dereferenced_is_dir = self
            .adapter
            .stat(source_path, true)
            .map(|s| s.kind == EntryKind::Directory)
            .unwrap_or(false);

        let inode = self.tree.inode_mut(inode_id);
        inode.unnamed_stream = Some(digest);
        inode.reparse_tag = Some(ReparseTag::Symlink);
        inode.attributes.set_reparse_point(true);
        if dereferenced_is_dir {
            inode.attributes.set_directory(true);
        }
        Ok(())
    }

    fn capture_directory(
        &mut self,
        source_path: &Path,
        dentry_id: DentryId,
        flags: CaptureFlags,
    ) -> Result<()> {
        let children = self
            .adapter
            .list_children(source_path)
            .map_err(|e| Error::Read { path: source_path.to_path_buf(), source: e })?;
        let child_flags = flags.for_child();
        for child_name in children {
            let child_path = source_path.join(&child_name);
            if let Some(child) =
                self.build_dentry_tree(&child_path, child_name, child_flags)?
            {
                self.tree.add_child(dentry_id, child)?;
            }
        }
        Ok(())
    }
}

/// Moves `branch` into the tree at `target_path`, creating filler
/// directories along the way (spec.md §4.4 `attachBranch`).
fn attach_branch(tree: &mut Tree, branch: DentryId, target_path: &str) -> Result<()> {
    if target_path.is_empty() {
        match tree.root() {
            None => tree.set_root(branch),
            Some(root) => tree.overlay(root, branch)?,
        }
        return Ok(());
    }

    let root = tree.ensure_root();
    let components: Vec<&str> = target_path.split('/').filter(|s| !s.is_empty()).collect();
    let mut cur = root;
    for component in &components[..components.len().saturating_sub(1)] {
        cur = find_or_create_filler_child(tree, cur, component)?;
    }
    let last = components.last().copied().unwrap_or("");
    match tree.find_child(cur, last) {
        Some(existing) => tree.overlay(existing, branch)?,
        None => tree.add_child(cur, branch)?,
    }
    Ok(())
}

fn find_or_create_filler_child(tree: &mut Tree, parent: DentryId, name: &str) -> Result<DentryId> {
    if let Some(existing) = tree.find_child(parent, name) {
        if !tree.is_directory(existing) {
            return Err(Error::InvalidOverlay {
                path: name.to_string(),
                reason: "path component already exists and is not a directory".into(),
            });
        }
        return Ok(existing);
    }
    let inode = tree.new_inode(Inode::filler_directory());
    let dentry = tree.new_dentry(OsString::from(name), inode);
    tree.add_child(parent, dentry)?;
    Ok(dentry)
}

/// The result of a multi-source capture: the finished tree, its root,
/// and the image-scoped security set accumulated while building it.
pub struct CaptureResult {
    pub tree: Tree,
    pub root: DentryId,
    pub security: SecuritySet,
}

/// `addImageMultisource` (spec.md §4.4 "Multi-source driver").
pub fn add_image_multisource(
    sources: &[CaptureSource],
    config: &crate::config::CaptureConfig,
    flags: CaptureFlags,
    adapter: &dyn FsAdapter,
    lookup: &mut LookupTable,
    on_progress: &mut dyn FnMut(ProgressEvent),
) -> Result<CaptureResult> {
    if flags.ntfs() && !(sources.len() == 1 && sources[0].target.is_empty()) {
        return Err(Error::InvalidParam(
            "NTFS apply mode requires exactly one source targeting the image root".into(),
        ));
    }

    let mut ordered: Vec<&CaptureSource> = sources.iter().collect();
    ordered.sort_by(|a, b| a.target.cmp(&b.target));

    let mut tree = Tree::new();
    let mut security = SecuritySet::new();

    for source in ordered {
        on_progress(ProgressEvent::ScanBegin {
            source: source.path.clone(),
            target: source.target.clone(),
        });

        let name = source.path.file_name().map(OsString::from).unwrap_or_default();
        let source_flags = flags.at_source_root();
        let branch = {
            let mut ctx = CaptureCtx {
                adapter,
                config,
                prefix: path_to_forward_slash(&source.path),
                lookup: &mut *lookup,
                security: &mut security,
                tree: &mut tree,
                inode_map: HashMap::new(),
                on_progress: &mut *on_progress,
            };
            ctx.build_dentry_tree(&source.path, name, source_flags)?
        };

        if let Some(branch) = branch {
            if source.target.is_empty() {
                tree.rename(branch, "");
            } else {
                let basename = source.target.rsplit('/').next().unwrap_or(&source.target);
                tree.rename(branch, basename);
            }
            attach_branch(&mut tree, branch, &source.target)?;
        }

        on_progress(ProgressEvent::ScanEnd {
            source: source.path.clone(),
            target: source.target.clone(),
        });
    }

    let root = tree.ensure_root();
    tree.compute_paths(root);
    tree.assign_inode_numbers(root);

    Ok(CaptureResult { tree, root, security })
}

/// `addImage` (spec.md §6): a single-source wrapper over
/// [`add_image_multisource`].
pub fn add_image(
    source_path: &Path,
    config: &crate::config::CaptureConfig,
    flags: CaptureFlags,
    adapter: &dyn FsAdapter,
    lookup: &mut LookupTable,
    on_progress: &mut dyn FnMut(ProgressEvent),
) -> Result<CaptureResult> {
    let sources = [CaptureSource::new(source_path.to_path_buf(), "")];
    add_image_multisource(&sources, config, flags, adapter, lookup, on_progress)
}
