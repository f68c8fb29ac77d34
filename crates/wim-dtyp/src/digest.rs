//! The 20-byte SHA-1 digest used as the lookup-table key (spec.md §3 L1).

use std::fmt;

/// A 20-byte SHA-1 digest, used as the `LookupTable` key and as the
/// content-identity check at apply time (invariant L1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha1Digest(pub [u8; 20]);

impl Sha1Digest {
    pub const LEN: usize = 20;

    #[must_use]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// A digest that cannot collide with any real SHA-1 hash of content an
    /// adapter would ever produce from a live byte stream often enough to
    /// matter; used for metadata-stream placeholders (spec.md §11).
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({self})")
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_hex() {
        let d = Sha1Digest::from_bytes([0xAB; 20]);
        assert_eq!(d.to_string(), "ab".repeat(20));
    }

    #[test]
    fn random_digests_differ() {
        assert_ne!(Sha1Digest::random(), Sha1Digest::random());
    }
}
