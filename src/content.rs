//! Deterministic synthetic content.
//!
//! Generated files have no real payload. Their bytes are a SHA-256 counter
//! stream keyed by the file's seed, so the node and the farmer can both
//! regenerate identical content from `(seed, size)` alone.

use std::io::Read;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the hex seeds produced by [`random_seed`]
pub const SEED_BYTES: usize = 16;

pub fn random_seed() -> String {
    let mut bytes = [0u8; SEED_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reader over the `size`-byte stream for `seed`.
pub struct SeededContent {
    seed: Vec<u8>,
    size: u64,
    position: u64,
    counter: u64,
    block: [u8; 32],
    block_pos: usize,
}

impl SeededContent {
    pub fn new(seed: &str, size: u64) -> Self {
        Self {
            seed: seed.as_bytes().to_vec(),
            size,
            position: 0,
            counter: 0,
            block: [0u8; 32],
            block_pos: 32,
        }
    }

    /// Content hash of the stream, `sha256-<hex>`.
    pub fn file_hash(seed: &str, size: u64) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        let mut reader = Self::new(seed, size);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("sha256-{}", hex::encode(hasher.finalize())))
    }

    fn refill(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.block = hasher.finalize().into();
        self.counter += 1;
        self.block_pos = 0;
    }
}

impl Read for SeededContent {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.size - self.position;
        let want = (buf.len() as u64).min(remaining) as usize;

        let mut written = 0;
        while written < want {
            if self.block_pos == self.block.len() {
                self.refill();
            }
            let take = (self.block.len() - self.block_pos).min(want - written);
            buf[written..written + take]
                .copy_from_slice(&self.block[self.block_pos..self.block_pos + take]);
            self.block_pos += take;
            written += take;
        }

        self.position += written as u64;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(seed: &str, size: u64) -> Vec<u8> {
        let mut out = Vec::new();
        SeededContent::new(seed, size).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stream_has_exact_size() {
        assert_eq!(read_all("abc", 0).len(), 0);
        assert_eq!(read_all("abc", 33).len(), 33);
        assert_eq!(read_all("abc", 100_000).len(), 100_000);
    }

    #[test]
    fn test_same_seed_same_bytes() {
        assert_eq!(read_all("seed", 1000), read_all("seed", 1000));
        assert_ne!(read_all("seed", 1000), read_all("other", 1000));
    }

    #[test]
    fn test_prefix_is_stable_across_sizes() {
        let short = read_all("seed", 40);
        let long = read_all("seed", 4000);
        assert_eq!(&long[..40], &short[..]);
    }

    #[test]
    fn test_random_seed_is_hex() {
        let seed = random_seed();
        assert_eq!(seed.len(), SEED_BYTES * 2);
        assert!(hex::decode(&seed).is_ok());
    }
}
