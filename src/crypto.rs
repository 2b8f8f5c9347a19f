//! Content hashing: streaming SHA-256 digests of uploaded file bytes.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use thiserror::Error;

/// Hex length of a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    /// The content stream failed before it was fully consumed.
    #[error("failed to read input: {0}")]
    Read(#[from] io::Error),
}

/// Digest of a complete byte stream together with its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256.
    pub hash: String,
    pub size: u64,
}

impl ContentDigest {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Incremental hasher fed chunk by chunk, e.g. from a multipart upload.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.size += chunk.len() as u64;
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest {
            hash: hex::encode(self.inner.finalize()),
            size: self.size,
        }
    }
}

/// Hash everything `reader` yields. On a read error nothing is returned.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<ContentDigest, HashError> {
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::Read(e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// One-shot SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer gone"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn same_bytes_same_digest() {
        let a = hash_reader(&b"quarterly numbers"[..]).unwrap();
        let b = hash_reader(&b"quarterly numbers"[..]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), DIGEST_HEX_LEN);
        assert_eq!(a.size, 17);
    }

    #[test]
    fn chunking_does_not_change_digest() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = ContentHasher::new();
        for chunk in data.chunks(777) {
            hasher.update(chunk);
        }
        let streamed = hasher.finalize();
        assert_eq!(streamed.hash, sha256_hex(&data));
        assert_eq!(streamed, hash_reader(data.as_slice()).unwrap());
    }

    #[test]
    fn read_error_yields_no_digest() {
        let err = hash_reader(FailingReader { served: false }).unwrap_err();
        assert!(matches!(err, HashError::Read(_)));
    }

    #[test]
    fn empty_stream_is_empty() {
        let d = hash_reader(io::empty()).unwrap();
        assert!(d.is_empty());
        assert_eq!(d.hash, sha256_hex(b""));
    }
}
