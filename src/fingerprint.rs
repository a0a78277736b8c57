//! SHA-256 fingerprints over byte streams.
//!
//! Everything here is streaming: bytes are folded into the hasher as they pass
//! through, so neither the dump nor the corpus ever needs to be held in memory.
//! A [`Fingerprinter`] can additionally build a Merkle root over fixed-size
//! chunks, letting a verifier check a slice of the data without rehashing all
//! of it.

use crate::config::HASH_CHUNK_SIZE;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::path::Path;

/// Hex SHA-256 of the empty byte sequence
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Final digests for one byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub sha256: String,
    pub merkle_root: Option<String>,
    pub bytes: u64,
}

/// Incremental hasher with an optional chunked Merkle tree alongside.
pub struct Fingerprinter {
    hasher: Sha256,
    merkle: Option<MerkleBuilder>,
    bytes: u64,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            merkle: None,
            bytes: 0,
        }
    }

    pub fn with_merkle(chunk_size: NonZeroUsize) -> Self {
        Self {
            hasher: Sha256::new(),
            merkle: Some(MerkleBuilder::new(chunk_size)),
            bytes: 0,
        }
    }

    pub fn from_option(chunk_size: Option<NonZeroUsize>) -> Self {
        match chunk_size {
            Some(size) => Self::with_merkle(size),
            None => Self::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        if let Some(merkle) = self.merkle.as_mut() {
            merkle.update(data);
        }
        self.bytes += data.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint {
            sha256: hex::encode(self.hasher.finalize()),
            merkle_root: self.merkle.map(|m| hex::encode(m.finish())),
            bytes: self.bytes,
        }
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-256 of an in-memory byte sequence.
pub fn digest(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Streams `reader` to its end in `HASH_CHUNK_SIZE` chunks.
pub fn digest_reader<R: Read>(reader: R) -> io::Result<String> {
    Ok(fingerprint_reader(reader, None)?.sha256)
}

pub fn digest_file(path: impl AsRef<Path>) -> io::Result<String> {
    digest_reader(File::open(path)?)
}

/// Runs `reader` to its end through a [`Fingerprinter`].
pub fn fingerprint_reader<R: Read>(
    mut reader: R,
    merkle_chunk_size: Option<NonZeroUsize>,
) -> io::Result<Fingerprint> {
    let mut fp = Fingerprinter::from_option(merkle_chunk_size);
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        fp.update(&buf[..n]);
    }
    Ok(fp.finish())
}

pub fn fingerprint_file(
    path: impl AsRef<Path>,
    merkle_chunk_size: Option<NonZeroUsize>,
) -> io::Result<Fingerprint> {
    fingerprint_reader(File::open(path)?, merkle_chunk_size)
}

/// Merkle root of `data` split into `chunk_size` leaves.
pub fn merkle_root(data: &[u8], chunk_size: NonZeroUsize) -> String {
    let mut builder = MerkleBuilder::new(chunk_size);
    builder.update(data);
    hex::encode(builder.finish())
}

pub fn merkle_root_reader<R: Read>(reader: R, chunk_size: NonZeroUsize) -> io::Result<String> {
    let fp = fingerprint_reader(reader, Some(chunk_size))?;
    Ok(fp.merkle_root.unwrap_or_default())
}

/// Leaves are SHA-256 of each chunk; parents hash the concatenation of two
/// children, and an odd trailing node is paired with itself.
struct MerkleBuilder {
    chunk_size: usize,
    pending: Vec<u8>,
    leaves: Vec<[u8; 32]>,
}

impl MerkleBuilder {
    fn new(chunk_size: NonZeroUsize) -> Self {
        Self {
            chunk_size: chunk_size.get(),
            pending: Vec::new(),
            leaves: Vec::new(),
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.chunk_size - self.pending.len();
            let take = room.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.chunk_size {
                self.leaves.push(Sha256::digest(&self.pending).into());
                self.pending.clear();
            }
        }
    }

    fn finish(mut self) -> [u8; 32] {
        if !self.pending.is_empty() {
            self.leaves.push(Sha256::digest(&self.pending).into());
        }
        if self.leaves.is_empty() {
            return Sha256::digest(b"").into();
        }

        let mut level = self.leaves;
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                })
                .collect();
        }
        level[0]
    }
}

/// Fingerprints every byte read through it.
pub struct HashingReader<R> {
    inner: R,
    fingerprinter: Fingerprinter,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, fingerprinter: Fingerprinter) -> Self {
        Self {
            inner,
            fingerprinter,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.fingerprinter.bytes()
    }

    /// Reads whatever is left of the inner reader, then returns the
    /// fingerprint of everything that passed through.
    pub fn finish(mut self) -> io::Result<Fingerprint> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(self.fingerprinter.finish())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.fingerprinter.update(&buf[..n]);
        Ok(n)
    }
}

/// Fingerprints every byte written through it.
pub struct HashingWriter<W> {
    inner: W,
    fingerprinter: Fingerprinter,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, fingerprinter: Fingerprinter) -> Self {
        Self {
            inner,
            fingerprinter,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.fingerprinter.bytes()
    }

    /// Flushes the inner writer and hands it back with the fingerprint.
    pub fn finish(mut self) -> io::Result<(W, Fingerprint)> {
        self.inner.flush()?;
        Ok((self.inner, self.fingerprinter.finish()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.fingerprinter.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn digest_of_empty_is_known_constant() {
        assert_eq!(digest(b""), EMPTY_SHA256);
        assert_eq!(digest(""), EMPTY_SHA256);
    }

    #[test]
    fn digest_known_vector() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_stable_across_calls() {
        let data = b"hello wikipedia";
        assert_eq!(digest(data), digest(data));
        assert_eq!(digest(data).len(), 64);
    }

    #[test]
    fn different_content_different_digest() {
        assert_ne!(digest("Content A"), digest("Content B"));
    }

    #[test]
    fn digest_reader_matches_in_memory_digest() {
        let data = vec![7u8; HASH_CHUNK_SIZE * 2 + 17];
        let streamed = digest_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, digest(&data));
    }

    #[test]
    fn incremental_updates_match_one_shot() {
        let mut fp = Fingerprinter::new();
        fp.update(b"Hello ");
        fp.update(b"");
        fp.update(b"world.");
        let result = fp.finish();
        assert_eq!(result.sha256, digest("Hello world."));
        assert_eq!(result.bytes, 12);
        assert!(result.merkle_root.is_none());
    }

    #[test]
    fn merkle_single_chunk_equals_sha256() {
        let data = b"small file";
        assert_eq!(merkle_root(data, chunk(10_000)), digest(data));
    }

    #[test]
    fn merkle_empty_equals_empty_digest() {
        assert_eq!(merkle_root(b"", chunk(4)), EMPTY_SHA256);
    }

    #[test]
    fn merkle_two_chunks() {
        let left = Sha256::digest(b"abcd");
        let right = Sha256::digest(b"efgh");
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        let expected = hex::encode(hasher.finalize());
        assert_eq!(merkle_root(b"abcdefgh", chunk(4)), expected);
    }

    #[test]
    fn merkle_odd_leaf_is_paired_with_itself() {
        let a: [u8; 32] = Sha256::digest(b"aa").into();
        let b: [u8; 32] = Sha256::digest(b"bb").into();
        let c: [u8; 32] = Sha256::digest(b"c").into();
        let pair = |l: &[u8; 32], r: &[u8; 32]| -> [u8; 32] {
            let mut h = Sha256::new();
            h.update(l);
            h.update(r);
            h.finalize().into()
        };
        let expected = pair(&pair(&a, &b), &pair(&c, &c));
        assert_eq!(merkle_root(b"aabbc", chunk(2)), hex::encode(expected));
    }

    #[test]
    fn merkle_independent_of_update_boundaries() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut fp = Fingerprinter::with_merkle(chunk(5));
        for piece in data.chunks(3) {
            fp.update(piece);
        }
        let result = fp.finish();
        assert_eq!(result.merkle_root, Some(merkle_root(data, chunk(5))));
        assert_eq!(result.sha256, digest(data));
    }

    #[test]
    fn merkle_reader_matches_in_memory_root() {
        let data = vec![3u8; HASH_CHUNK_SIZE + 100];
        let streamed = merkle_root_reader(Cursor::new(&data), chunk(4096)).unwrap();
        assert_eq!(streamed, merkle_root(&data, chunk(4096)));
    }

    #[test]
    fn merkle_changes_when_content_changes() {
        assert_ne!(
            merkle_root(b"content A", chunk(4)),
            merkle_root(b"content B", chunk(4))
        );
    }

    #[test]
    fn hashing_reader_finish_drains_unread_bytes() {
        let data = b"0123456789";
        let mut reader = HashingReader::new(Cursor::new(data), Fingerprinter::new());
        let mut first = [0u8; 4];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(reader.bytes_read(), 4);

        let fp = reader.finish().unwrap();
        assert_eq!(fp.sha256, digest(data));
        assert_eq!(fp.bytes, 10);
    }

    #[test]
    fn hashing_writer_digests_written_bytes() {
        let mut writer = HashingWriter::new(Vec::new(), Fingerprinter::new());
        writer.write_all(b"Hello world.").unwrap();
        writer.write_all(b" Plain text.").unwrap();
        let (out, fp) = writer.finish().unwrap();
        assert_eq!(out, b"Hello world. Plain text.");
        assert_eq!(fp.sha256, digest("Hello world. Plain text."));
    }

    #[test]
    fn digest_file_missing_is_not_found() {
        let err = digest_file("/definitely/not/here.txt").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
