//! `SecuritySet`: a deduplicated store of opaque security-descriptor blobs.
//!
//! Mirrors the dedup/ordering discipline `smb-dtyp::security::ACL` applies
//! to its ACEs (see `acl.rs::order_aces`/`sort_aces_by`), but the unit of
//! dedup here is a whole descriptor blob rather than a single ACE, and the
//! blob itself stays opaque to this crate (spec.md §3 `S3`).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Index of a descriptor inside a [`SecuritySet`]. Dense, starts at 0
/// (invariant S1). `-1` (not representable by this type) means "no
/// descriptor"; callers that need that sentinel use `Option<SecurityId>`
/// or a signed wrapper at the call site (spec.md §3 `S2`).
pub type SecurityId = u32;

/// A red-black-tree-like dedup index in the original description; here a
/// hash map keyed by `(len, hash)` with a fallback byte comparison, since
/// Rust's standard collections make that the idiomatic equivalent without
/// hand-rolling tree balancing.
#[derive(Debug, Default)]
pub struct SecuritySet {
    descriptors: Vec<Vec<u8>>,
    index: HashMap<(usize, u64), Vec<SecurityId>>,
}

impl SecuritySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct descriptors currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn hash_of(bytes: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish()
    }

    /// Adds a descriptor, deduplicating against any byte-identical entry
    /// already present. Returns the dense [`SecurityId`] of the (possibly
    /// pre-existing) entry.
    pub fn add_descriptor(&mut self, bytes: Vec<u8>) -> SecurityId {
        let key = (bytes.len(), Self::hash_of(&bytes));
        if let Some(candidates) = self.index.get(&key) {
            for &id in candidates {
                if self.descriptors[id as usize] == bytes {
                    return id;
                }
            }
        }

        let id = self.descriptors.len() as SecurityId;
        self.descriptors.push(bytes);
        self.index.entry(key).or_default().push(id);
        log::trace!("security descriptor {id} registered ({} total)", self.descriptors.len());
        id
    }

    /// Returns the descriptor bytes for `id`, or `None` if out of range.
    #[must_use]
    pub fn get(&self, id: SecurityId) -> Option<&[u8]> {
        self.descriptors.get(id as usize).map(Vec::as_slice)
    }

    /// Iterates over all descriptors in dense-ID order.
    pub fn iter(&self) -> impl Iterator<Item = (SecurityId, &[u8])> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (i as SecurityId, d.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_from_zero() {
        let mut set = SecuritySet::new();
        let a = set.add_descriptor(vec![1, 2, 3]);
        let b = set.add_descriptor(vec![4, 5, 6]);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn identical_descriptors_dedup() {
        let mut set = SecuritySet::new();
        let a = set.add_descriptor(vec![9, 9, 9]);
        let b = set.add_descriptor(vec![9, 9, 9]);
        assert_eq!(a, b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn distinct_descriptors_with_same_length_are_not_merged() {
        let mut set = SecuritySet::new();
        let a = set.add_descriptor(vec![1, 2, 3]);
        let b = set.add_descriptor(vec![3, 2, 1]);
        assert_ne!(a, b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn re_read_is_byte_identical() {
        let mut set = SecuritySet::new();
        let id = set.add_descriptor(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(set.get(id), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
    }
}
