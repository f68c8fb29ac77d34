//! The content-addressed `LookupTable` (spec.md §3, §4.2): a map from
//! 20-byte SHA-1 digest to a deduplicated `StreamEntry`. Dedup itself is
//! the caller's job (`lookup` then `insert`); this type only enforces
//! that two entries never coexist for the same digest (invariant L3).

use std::collections::HashMap;
use std::path::PathBuf;

use wim_dtyp::Sha1Digest;

/// Where a stream's bytes actually live, as a tagged variant (spec.md §9
/// "Stream residence as a sum type").
#[derive(Debug, Clone)]
pub enum Residence {
    /// The unnamed stream of a regular file at this path, on the host
    /// filesystem that was captured. Holds only a path, never an open
    /// handle (spec.md §5 resource policy).
    SourceFile(PathBuf),
    /// A named alternate data stream of the file at this path.
    NamedStreamOfFile(PathBuf, String),
    /// Backed by an already-written WIM resource. `descriptor` is an
    /// opaque blob identifying where in the container the resource sits;
    /// interpreting it is the WIM-container reader/writer's job, which is
    /// out of scope for this core (spec.md §1).
    InWim { wim_handle: u64, descriptor: Vec<u8> },
    /// Held entirely in memory (e.g. UNIX-data ADS payloads, spec.md §11).
    InMemory(Vec<u8>),
    /// The residence was freed (refcount reached zero) but the entry is
    /// still reachable through a dangling lookup; not expected to occur
    /// through the public API, which removes zero-refcount entries
    /// outright, but kept as an explicit state rather than leaving a
    /// logical gap in the variant set.
    Absent,
}

/// One lookup-table entry: a deduplicated content stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub digest: Sha1Digest,
    pub size: u64,
    pub refcount: u32,
    pub residence: Residence,
    /// Set for the per-image metadata-stream placeholder (spec.md §11);
    /// such entries are exempt from the "empty streams have no entry"
    /// rule (invariant from spec.md §3) since they are administrative,
    /// not captured content.
    pub is_metadata: bool,
}

impl StreamEntry {
    #[must_use]
    pub fn new(digest: Sha1Digest, size: u64, residence: Residence) -> Self {
        Self { digest, size, refcount: 0, residence, is_metadata: false }
    }
}

/// Content-addressed map: SHA-1 digest → `StreamEntry` (spec.md §4.2).
///
/// No concurrency guarantees: mutation is serialized externally, exactly
/// as spec.md §5 requires ("the core takes no internal locks").
#[derive(Debug, Default)]
pub struct LookupTable {
    entries: HashMap<Sha1Digest, StreamEntry>,
}

impl LookupTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Places `entry` in the table keyed by its own digest. The caller is
    /// responsible for having already checked `lookup` to avoid a
    /// duplicate digest (invariant L3); this panics on a colliding insert
    /// since it would indicate a capture-engine bug, not recoverable
    /// caller input.
    pub fn insert(&mut self, entry: StreamEntry) {
        let digest = entry.digest;
        let prior = self.entries.insert(digest, entry);
        assert!(prior.is_none(), "duplicate lookup-table entry for digest {digest}");
    }

    #[must_use]
    pub fn lookup(&self, digest: &Sha1Digest) -> Option<&StreamEntry> {
        self.entries.get(digest)
    }

    #[must_use]
    pub fn lookup_mut(&mut self, digest: &Sha1Digest) -> Option<&mut StreamEntry> {
        self.entries.get_mut(digest)
    }

    /// Increments the refcount of the entry keyed by `digest`. Panics if
    /// no such entry exists, since every caller is expected to have just
    /// inserted or looked it up.
    pub fn ref_up(&mut self, digest: &Sha1Digest) {
        let entry = self.entries.get_mut(digest).expect("ref_up on unknown digest");
        entry.refcount += 1;
        log::trace!("stream {digest} refcount now {}", entry.refcount);
    }

    /// Decrements the refcount of the entry keyed by `digest`, removing
    /// (and thereby freeing the residence) it if it reaches zero
    /// (invariant L4).
    pub fn ref_down(&mut self, digest: &Sha1Digest) {
        let Some(entry) = self.entries.get_mut(digest) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            self.entries.remove(digest);
            log::trace!("stream {digest} refcount reached 0, entry freed");
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Sha1Digest, &StreamEntry)> {
        self.entries.iter()
    }

    /// Allocates a digest guaranteed not to collide with anything already
    /// in the table, retrying on the astronomically rare collision
    /// (spec.md §11, `add_new_dentry_tree`'s `random_hash`).
    #[must_use]
    pub fn unique_random_digest(&self) -> Sha1Digest {
        loop {
            let candidate = Sha1Digest::random();
            if !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Sha1Digest {
        Sha1Digest::from_bytes([byte; 20])
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut table = LookupTable::new();
        let d = digest(1);
        table.insert(StreamEntry::new(d, 1024, Residence::SourceFile("a.bin".into())));
        let entry = table.lookup(&d).unwrap();
        assert_eq!(entry.size, 1024);
        assert_eq!(entry.refcount, 0);
    }

    #[test]
    fn ref_up_twice_gives_refcount_two() {
        let mut table = LookupTable::new();
        let d = digest(2);
        table.insert(StreamEntry::new(d, 6, Residence::SourceFile("x".into())));
        table.ref_up(&d);
        table.ref_up(&d);
        assert_eq!(table.lookup(&d).unwrap().refcount, 2);
    }

    #[test]
    fn ref_down_to_zero_removes_entry() {
        let mut table = LookupTable::new();
        let d = digest(3);
        table.insert(StreamEntry::new(d, 6, Residence::SourceFile("x".into())));
        table.ref_up(&d);
        table.ref_down(&d);
        assert!(table.lookup(&d).is_none());
        assert!(table.is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate lookup-table entry")]
    fn duplicate_digest_insert_panics() {
        let mut table = LookupTable::new();
        let d = digest(4);
        table.insert(StreamEntry::new(d, 1, Residence::SourceFile("a".into())));
        table.insert(StreamEntry::new(d, 2, Residence::SourceFile("b".into())));
    }

    #[test]
    fn unique_random_digest_avoids_existing_entries() {
        let mut table = LookupTable::new();
        let existing = digest(5);
        table.insert(StreamEntry::new(existing, 0, Residence::Absent));
        for _ in 0..64 {
            assert_ne!(table.unique_random_digest(), existing);
        }
    }
}
