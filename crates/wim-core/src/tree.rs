//! The dentry/inode graph, as an arena (spec.md §9 "Cyclic ownership in
//! the dentry/inode graph"): inodes and dentries live in dense `Vec`s
//! inside one `Tree`, and every cross-reference is a plain `u32` index
//! rather than a pointer. The link-group "intrusive circular list" from
//! spec.md §3 becomes `Inode::dentries`, a plain `Vec<DentryId>` — there
//! is no cycle to eliminate because there is no pointer to begin with.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use wim_dtyp::{FileAttributes, FileTime, ReparseTag, Sha1Digest};
use wim_security::SecurityId;

use crate::error::{Error, Result};

pub type InodeId = u32;
pub type DentryId = u32;

/// One named alternate data stream bound to an inode.
#[derive(Debug, Clone)]
pub struct NamedStream {
    pub name: String,
    pub digest: Sha1Digest,
}

/// The file object named by one or more dentries (spec.md §3 `Inode`).
#[derive(Debug, Clone)]
pub struct Inode {
    pub attributes: FileAttributes,
    pub created: FileTime,
    pub modified: FileTime,
    pub accessed: FileTime,
    pub reparse_tag: Option<ReparseTag>,
    /// `-1` (`None` here) means "no ACL" (invariant S2); `Some(id)` indexes
    /// the owning image's `SecuritySet`.
    pub security_id: Option<SecurityId>,
    /// The opaque on-device identifier used for hard-link detection during
    /// capture (spec.md §9); `None` for filler directories and inodes
    /// synthesized rather than captured from a live filesystem.
    pub device_inode: Option<(u64, u64)>,
    pub unnamed_stream: Option<Sha1Digest>,
    pub streams: Vec<NamedStream>,
    /// The link group: every dentry that names this inode (spec.md §3
    /// "intrusive circular list", collapsed to a plain vector per §9).
    pub dentries: Vec<DentryId>,
    /// Whether stream references have been bound to `StreamEntry` handles
    /// (here: validated digests) rather than raw, unresolved ones. Always
    /// `true` for inodes this core builds (step 3 of spec.md §4.4 sets it
    /// immediately), kept as a field because spec.md §3 names it as part
    /// of the data model and the apply engine asserts it before trusting
    /// a stream reference.
    pub resolved: bool,
    /// Dense per-image inode number assigned in the multi-source driver's
    /// post-process step (spec.md §4.4 step 7); `0` for filler
    /// directories, which never get a real number.
    pub inode_number: u32,
}

impl Inode {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.attributes.directory()
    }

    /// A filler directory: no stream, no security, not yet numbered
    /// (spec.md §4.4 `attachBranch`).
    #[must_use]
    pub fn filler_directory() -> Self {
        let mut attributes = FileAttributes::new();
        attributes.set_directory(true);
        Self {
            attributes,
            created: FileTime::ZERO,
            modified: FileTime::ZERO,
            accessed: FileTime::ZERO,
            reparse_tag: None,
            security_id: None,
            device_inode: None,
            unnamed_stream: None,
            streams: Vec::new(),
            dentries: Vec::new(),
            resolved: true,
            inode_number: 0,
        }
    }
}

/// A directory entry: a name binding onto an [`Inode`] (spec.md §3
/// `Dentry`).
#[derive(Debug, Clone)]
pub struct Dentry {
    pub name: OsString,
    pub short_name: Option<String>,
    pub inode: InodeId,
    pub parent: Option<DentryId>,
    /// Ordered by insertion (mirrors adapter enumeration order, spec.md §5
    /// ordering guarantee 4); keyed for lookup by case-folded name
    /// (invariant I3), while `name` above stays case-preserving.
    children_order: Vec<DentryId>,
    children_by_fold: BTreeMap<String, DentryId>,
    /// Derived, filled in by `Tree::compute_paths` (spec.md §3 "cached
    /// full path (derived)").
    pub cached_path: Option<PathBuf>,
}

impl Dentry {
    #[must_use]
    pub fn children(&self) -> &[DentryId] {
        &self.children_order
    }

    #[must_use]
    pub fn is_empty_children(&self) -> bool {
        self.children_order.is_empty()
    }
}

fn case_fold(name: &std::ffi::OsStr) -> String {
    name.to_string_lossy().to_lowercase()
}

/// The arena owning every `Inode` and `Dentry` for one image (spec.md §9
/// recommended re-architecture).
#[derive(Debug, Default)]
pub struct Tree {
    inodes: Vec<Inode>,
    dentries: Vec<Dentry>,
    root: Option<DentryId>,
}

impl Tree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn root(&self) -> Option<DentryId> {
        self.root
    }

    pub fn new_inode(&mut self, inode: Inode) -> InodeId {
        let id = self.inodes.len() as InodeId;
        self.inodes.push(inode);
        id
    }

    #[must_use]
    pub fn inode(&self, id: InodeId) -> &Inode {
        &self.inodes[id as usize]
    }

    pub fn inode_mut(&mut self, id: InodeId) -> &mut Inode {
        &mut self.inodes[id as usize]
    }

    #[must_use]
    pub fn dentry(&self, id: DentryId) -> &Dentry {
        &self.dentries[id as usize]
    }

    pub fn dentry_mut(&mut self, id: DentryId) -> &mut Dentry {
        &mut self.dentries[id as usize]
    }

    /// Creates a dentry named `name` bound to `inode`, with no parent yet
    /// (the caller attaches it with [`Tree::add_child`] or sets it as
    /// root). Registers the dentry in the inode's link group.
    pub fn new_dentry(&mut self, name: OsString, inode: InodeId) -> DentryId {
        let id = self.dentries.len() as DentryId;
        self.dentries.push(Dentry {
            name,
            short_name: None,
            inode,
            parent: None,
            children_order: Vec::new(),
            children_by_fold: BTreeMap::new(),
            cached_path: None,
        });
        self.inodes[inode as usize].dentries.push(id);
        id
    }

    /// Creates an empty root dentry (invariant I5: empty name) bound to a
    /// fresh filler directory inode, and installs it as the tree's root.
    /// Used when a multi-source capture needs a synthetic root before any
    /// source's own tree can serve as one.
    pub fn ensure_root(&mut self) -> DentryId {
        if let Some(root) = self.root {
            return root;
        }
        let inode = self.new_inode(Inode::filler_directory());
        let root = self.new_dentry(OsString::new(), inode);
        self.root = Some(root);
        root
    }

    /// Installs `dentry` as the tree's root directly (used when the first
    /// capture source's own branch can serve as the root with no filler
    /// needed).
    pub fn set_root(&mut self, dentry: DentryId) {
        debug_assert!(self.root.is_none(), "root already set");
        self.root = Some(dentry);
    }

    #[must_use]
    pub fn is_directory(&self, id: DentryId) -> bool {
        self.inode(self.dentry(id).inode).is_directory()
    }

    #[must_use]
    pub fn find_child(&self, parent: DentryId, name: &str) -> Option<DentryId> {
        self.dentries[parent as usize]
            .children_by_fold
            .get(&name.to_lowercase())
            .copied()
    }

    /// Attaches `child` under `parent`, enforcing invariant I3 (distinct
    /// case-insensitive sibling names). `child` must not already have a
    /// parent.
    pub fn add_child(&mut self, parent: DentryId, child: DentryId) -> Result<()> {
        let fold = case_fold(&self.dentries[child as usize].name);
        if self.dentries[parent as usize].children_by_fold.contains_key(&fold) {
            let path = self.display_path(parent);
            return Err(Error::InvalidOverlay {
                path,
                reason: format!(
                    "a child named '{}' (case-insensitively) already exists",
                    self.dentries[child as usize].name.to_string_lossy()
                ),
            });
        }
        self.dentries[parent as usize].children_order.push(child);
        self.dentries[parent as usize].children_by_fold.insert(fold, child);
        self.dentries[child as usize].parent = Some(parent);
        Ok(())
    }

    pub fn rename(&mut self, id: DentryId, new_name: &str) {
        self.dentries[id as usize].name = OsString::from(new_name);
    }

    /// Moves every child of `branch` onto `target` (spec.md §4.4
    /// `overlay`); `branch` itself is discarded (no longer reachable from
    /// any parent, and directories never own stream references, so
    /// nothing needs to be freed in the lookup table for it).
    pub fn overlay(&mut self, target: DentryId, branch: DentryId) -> Result<()> {
        if !self.is_directory(target) {
            return Err(Error::InvalidOverlay {
                path: self.display_path(target),
                reason: "overlay target is not a directory".into(),
            });
        }
        let children: Vec<DentryId> = self.dentries[branch as usize].children_order.clone();
        for child in children {
            self.dentries[child as usize].parent = None;
            self.add_child(target, child)?;
        }
        Ok(())
    }

    /// A best-effort, non-canonicalizing path for error messages: walks
    /// parent links joining names with `/`. Not the same as
    /// [`Tree::compute_paths`], which requires a capture-source-rooted
    /// prefix this helper doesn't have.
    fn display_path(&self, mut id: DentryId) -> String {
        let mut parts = Vec::new();
        loop {
            let d = &self.dentries[id as usize];
            if !d.name.is_empty() {
                parts.push(d.name.to_string_lossy().into_owned());
            }
            match d.parent {
                Some(p) => id = p,
                None => break,
            }
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Walks the tree from `root` and fills in `cached_path` for every
    /// dentry (spec.md §4.4 step 5).
    pub fn compute_paths(&mut self, root: DentryId) {
        self.compute_paths_from(root, PathBuf::from("/"));
    }

    fn compute_paths_from(&mut self, id: DentryId, parent_path: PathBuf) {
        let path = if self.dentries[id as usize].name.is_empty() {
            parent_path.clone()
        } else {
            parent_path.join(&self.dentries[id as usize].name)
        };
        self.dentries[id as usize].cached_path = Some(path.clone());
        let children = self.dentries[id as usize].children_order.clone();
        for child in children {
            self.compute_paths_from(child, path.clone());
        }
    }

    /// Assigns dense per-image inode numbers in pre-order visitation,
    /// skipping filler directories (left at `0`) and visiting each real
    /// inode only once even though multiple dentries may share it
    /// (spec.md §4.4 step 7).
    pub fn assign_inode_numbers(&mut self, root: DentryId) {
        let mut next = 1u32;
        let mut numbered = vec![false; self.inodes.len()];
        self.assign_inode_numbers_from(root, &mut next, &mut numbered);
    }

    fn assign_inode_numbers_from(&mut self, id: DentryId, next: &mut u32, numbered: &mut [bool]) {
        let inode_id = self.dentries[id as usize].inode as usize;
        let is_filler = self.inodes[inode_id].device_inode.is_none()
            && self.inodes[inode_id].is_directory()
            && self.inodes[inode_id].unnamed_stream.is_none()
            && self.inodes[inode_id].security_id.is_none()
            && self.inodes[inode_id].streams.is_empty();
        if !is_filler && !numbered[inode_id] {
            self.inodes[inode_id].inode_number = *next;
            *next += 1;
            numbered[inode_id] = true;
        }
        let children = self.dentries[id as usize].children_order.clone();
        for child in children {
            self.assign_inode_numbers_from(child, next, numbered);
        }
    }

    #[must_use]
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn dentry_count(&self) -> usize {
        self.dentries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_file_inode() -> Inode {
        Inode {
            attributes: FileAttributes::new(),
            created: FileTime::ZERO,
            modified: FileTime::ZERO,
            accessed: FileTime::ZERO,
            reparse_tag: None,
            security_id: None,
            device_inode: Some((1, 42)),
            unnamed_stream: None,
            streams: Vec::new(),
            dentries: Vec::new(),
            resolved: true,
            inode_number: 0,
        }
    }

    #[test]
    fn root_has_empty_name() {
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        assert!(tree.dentry(root).name.is_empty());
    }

    #[test]
    fn sibling_names_are_case_insensitively_unique() {
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        let i1 = tree.new_inode(real_file_inode());
        let a = tree.new_dentry("FILE.TXT".into(), i1);
        tree.add_child(root, a).unwrap();

        let i2 = tree.new_inode(real_file_inode());
        let b = tree.new_dentry("file.txt".into(), i2);
        assert!(tree.add_child(root, b).is_err());
    }

    #[test]
    fn hard_link_group_collects_both_dentries() {
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        let inode = tree.new_inode(real_file_inode());
        let x = tree.new_dentry("x".into(), inode);
        let y = tree.new_dentry("y".into(), inode);
        tree.add_child(root, x).unwrap();
        tree.add_child(root, y).unwrap();
        assert_eq!(tree.inode(inode).dentries.len(), 2);
    }

    #[test]
    fn overlay_moves_children_and_detects_collision() {
        let mut tree = Tree::new();
        let target_inode = tree.new_inode(Inode::filler_directory());
        let target = tree.new_dentry("os".into(), target_inode);

        let branch_inode = tree.new_inode(Inode::filler_directory());
        let branch = tree.new_dentry("os2".into(), branch_inode);
        let child_inode = tree.new_inode(real_file_inode());
        let child = tree.new_dentry("drivers".into(), child_inode);
        tree.add_child(branch, child).unwrap();

        tree.overlay(target, branch).unwrap();
        assert_eq!(tree.dentry(target).children(), &[child]);
        assert_eq!(tree.dentry(child).parent, Some(target));
    }

    #[test]
    fn overlay_collision_on_case_folded_name_is_rejected() {
        let mut tree = Tree::new();
        let target_inode = tree.new_inode(Inode::filler_directory());
        let target = tree.new_dentry("os".into(), target_inode);
        let existing_inode = tree.new_inode(real_file_inode());
        let existing = tree.new_dentry("Drivers".into(), existing_inode);
        tree.add_child(target, existing).unwrap();

        let branch_inode = tree.new_inode(Inode::filler_directory());
        let branch = tree.new_dentry("unused".into(), branch_inode);
        let colliding_inode = tree.new_inode(real_file_inode());
        let colliding = tree.new_dentry("drivers".into(), colliding_inode);
        tree.add_child(branch, colliding).unwrap();

        assert!(tree.overlay(target, branch).is_err());
    }

    #[test]
    fn compute_paths_joins_names_from_root() {
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        let dir_inode = tree.new_inode(Inode::filler_directory());
        let dir = tree.new_dentry("sub".into(), dir_inode);
        tree.add_child(root, dir).unwrap();
        let file_inode = tree.new_inode(real_file_inode());
        let file = tree.new_dentry("f.txt".into(), file_inode);
        tree.add_child(dir, file).unwrap();

        tree.compute_paths(root);
        assert_eq!(tree.dentry(file).cached_path, Some(PathBuf::from("/sub/f.txt")));
    }

    #[test]
    fn filler_directories_keep_inode_number_zero() {
        let mut tree = Tree::new();
        let root = tree.ensure_root();
        let file_inode = tree.new_inode(real_file_inode());
        let file = tree.new_dentry("f".into(), file_inode);
        tree.add_child(root, file).unwrap();

        tree.assign_inode_numbers(root);
        assert_eq!(tree.inode(tree.dentry(root).inode).inode_number, 0);
        assert_eq!(tree.inode(file_inode).inode_number, 1);
    }
}
