//! `wim`: the public façade over the capture-and-apply engine, re-exporting
//! `wim-dtyp`/`wim-security`/`wim-fs`/`wim-core` the way `smb`'s `lib.rs`
//! re-exports `smb-dtyp`/`smb-fscc`/`smb-msg` for its callers. This crate
//! adds nothing of its own: the WIM container reader/writer, XML
//! image-list metadata, compression codecs, and CLI glue are external
//! collaborators out of scope for this core (spec.md §1).

pub use wim_core::*;
pub use wim_dtyp::*;
pub use wim_fs::*;
pub use wim_security::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write as _;

    /// An end-to-end smoke test driving the façade's re-exported surface
    /// exactly as an external caller would: capture a small tree, apply it
    /// to an empty directory, and check the content round-trips (spec.md
    /// §8 round-trip law R1, restricted to what the `Posix` adapter can
    /// represent).
    #[test]
    fn capture_then_apply_round_trips_through_the_facade() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("docs")).unwrap();
        fs::File::create(src.path().join("docs/readme.txt"))
            .unwrap()
            .write_all(b"hello from the facade\n")
            .unwrap();

        let adapter = Posix::new();
        let config = CaptureConfig::empty();
        let mut lookup = LookupTable::new();
        let mut registry = ImageMetadataRegistry::new();
        let mut on_progress = no_progress;

        let result = add_image(
            src.path(),
            &config,
            CaptureFlags::default(),
            &adapter,
            &mut lookup,
            &mut on_progress,
        )
        .unwrap();
        let index = registry
            .append("smoke".into(), result.tree, result.root, result.security, &mut lookup, true)
            .unwrap();

        let dst = tempfile::tempdir().unwrap();
        apply_image(
            registry.get(index).unwrap(),
            &lookup,
            dst.path(),
            &adapter,
            ApplyFlags::default(),
        )
        .unwrap();

        let content = fs::read_to_string(dst.path().join("docs/readme.txt")).unwrap();
        assert_eq!(content, "hello from the facade\n");
    }
}
