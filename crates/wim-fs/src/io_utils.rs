//! Streaming SHA-1 and chunked copy, grounded on `smb-cli/copy.rs`'s
//! `block_copy_progress`/`do_copy`: read in fixed-size chunks, feed a
//! running accumulator (there: a progress bar; here: a hasher and/or a
//! destination writer), repeat until EOF.

use std::io::{Read, Write};

use sha1::{Digest, Sha1};
use wim_dtyp::Sha1Digest;

/// Chunk size for all streaming reads in this crate (spec.md §2.9).
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Computes the SHA-1 digest and byte count of everything `reader`
/// produces, without buffering the whole stream in memory.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<(Sha1Digest, u64)> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let digest: [u8; 20] = hasher.finalize().into();
    Ok((Sha1Digest::from_bytes(digest), total))
}

/// Copies every byte from `reader` to `writer`, 32 KiB at a time, while
/// hashing what was read. Used by the apply engine to materialize a
/// stream and verify its digest in the same pass (spec.md §4.5 pass 1.d).
pub fn copy_and_hash<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
) -> std::io::Result<(Sha1Digest, u64)> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    let digest: [u8; 20] = hasher.finalize().into();
    Ok((Sha1Digest::from_bytes(digest), total))
}
